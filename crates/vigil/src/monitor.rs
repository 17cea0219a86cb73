//! Threshold evaluation for scheduled memory checks.

use std::sync::Arc;

use tracing::debug;

use crate::config::Target;
use crate::platform::{MetricFetcher, PlatformError};

/// Result of one memory observation against the ceiling.
#[derive(Debug, Clone, Copy)]
pub struct Evaluation {
    pub observed_gb: f64,
    pub ceiling_gb: f64,
    pub exceeded: bool,
}

/// Fetches the monitored service's latest memory reading and compares it
/// against the configured ceiling.
pub struct ThresholdEvaluator {
    fetcher: Arc<dyn MetricFetcher>,
    target: Target,
    ceiling_gb: f64,
}

impl ThresholdEvaluator {
    #[must_use]
    pub fn new(fetcher: Arc<dyn MetricFetcher>, target: Target, ceiling_gb: f64) -> Self {
        Self {
            fetcher,
            target,
            ceiling_gb,
        }
    }

    /// One observation. The comparison is inclusive: a reading exactly at
    /// the ceiling counts as exceeded.
    ///
    /// # Errors
    ///
    /// Propagates the collaborator's resolution and transport errors
    /// unchanged.
    pub async fn evaluate(&self) -> Result<Evaluation, PlatformError> {
        let observed_gb = self
            .fetcher
            .fetch_latest_memory_gb(&self.target.environment_name, &self.target.service_id)
            .await?;
        let exceeded = observed_gb >= self.ceiling_gb;
        debug!(
            observed_gb,
            ceiling_gb = self.ceiling_gb,
            exceeded,
            "memory check evaluated"
        );
        Ok(Evaluation {
            observed_gb,
            ceiling_gb: self.ceiling_gb,
            exceeded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedFetcher(f64);

    #[async_trait]
    impl MetricFetcher for FixedFetcher {
        async fn fetch_latest_memory_gb(
            &self,
            _environment_name: &str,
            _service_id: &str,
        ) -> Result<f64, PlatformError> {
            Ok(self.0)
        }
    }

    struct EmptySeriesFetcher;

    #[async_trait]
    impl MetricFetcher for EmptySeriesFetcher {
        async fn fetch_latest_memory_gb(
            &self,
            _environment_name: &str,
            _service_id: &str,
        ) -> Result<f64, PlatformError> {
            Err(PlatformError::NoData {
                service_id: "svc-1".to_string(),
            })
        }
    }

    fn target() -> Target {
        Target {
            service_id: "svc-1".to_string(),
            service_name: "payments".to_string(),
            environment_id: "env-1".to_string(),
            environment_name: "production".to_string(),
            memory_limit_gb: Some(5.0),
        }
    }

    fn evaluator(observed: f64, ceiling: f64) -> ThresholdEvaluator {
        ThresholdEvaluator::new(Arc::new(FixedFetcher(observed)), target(), ceiling)
    }

    #[tokio::test]
    async fn under_ceiling_is_not_exceeded() {
        let evaluation = evaluator(4.2, 5.0).evaluate().await.unwrap();
        assert!(!evaluation.exceeded);
        assert!((evaluation.observed_gb - 4.2).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn over_ceiling_is_exceeded() {
        let evaluation = evaluator(5.2, 5.0).evaluate().await.unwrap();
        assert!(evaluation.exceeded);
    }

    #[tokio::test]
    async fn exactly_at_ceiling_is_exceeded() {
        let evaluation = evaluator(5.0, 5.0).evaluate().await.unwrap();
        assert!(evaluation.exceeded);
    }

    #[tokio::test]
    async fn empty_series_propagates() {
        let evaluator = ThresholdEvaluator::new(Arc::new(EmptySeriesFetcher), target(), 5.0);
        let err = evaluator.evaluate().await.unwrap_err();
        assert!(err.is_no_data());
    }
}
