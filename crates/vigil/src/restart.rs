//! Restart orchestration against the platform.

use std::sync::Arc;

use tracing::info;

use crate::config::Target;
use crate::platform::{PlatformError, RestartCaller};

/// Proof that a restart call was issued and acknowledged.
#[derive(Debug, Clone)]
pub struct RestartReceipt {
    pub deployment_id: String,
}

/// Resolves which deployment to restart and issues the call.
pub struct RestartOrchestrator {
    restarter: Arc<dyn RestartCaller>,
    target: Target,
}

impl RestartOrchestrator {
    #[must_use]
    pub fn new(restarter: Arc<dyn RestartCaller>, target: Target) -> Self {
        Self { restarter, target }
    }

    /// Resolves the target's current deployment and restarts it.
    ///
    /// # Errors
    ///
    /// `NotFound` variants when a resolution step fails, naming the
    /// missing identity; transport or API errors otherwise.
    pub async fn restart(&self) -> Result<RestartReceipt, PlatformError> {
        let deployment_id = self
            .restarter
            .resolve_deployment(&self.target.service_id, &self.target.environment_id)
            .await?;
        self.restarter.restart_deployment(&deployment_id).await?;
        info!(
            service = %self.target.service_name,
            deployment = %deployment_id,
            "restart issued"
        );
        Ok(RestartReceipt { deployment_id })
    }

    /// Restarts a deployment the caller already identified (push-driven
    /// alerts carry both ids).
    pub async fn restart_by_ids(
        &self,
        service_id: &str,
        deployment_id: &str,
    ) -> Result<RestartReceipt, PlatformError> {
        self.restarter.restart_deployment(deployment_id).await?;
        info!(
            service = %service_id,
            deployment = %deployment_id,
            "restart issued from alert-supplied ids"
        );
        Ok(RestartReceipt {
            deployment_id: deployment_id.to_string(),
        })
    }
}
