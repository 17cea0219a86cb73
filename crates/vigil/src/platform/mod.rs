//! Remote deployment-platform control plane.
//!
//! The controller never talks to the platform directly; it consumes the
//! two capability traits below, implemented by [`PlatformClient`] in
//! production and by in-memory fakes in tests:
//! - [`MetricFetcher`] resolves the monitored service inside an
//!   environment and returns its most recent memory sample.
//! - [`RestartCaller`] resolves and restarts the service's current
//!   deployment.

pub mod client;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use client::PlatformClient;

/// Connection settings for the control-plane API.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub base_url: String,
    pub api_token: String,
    /// Project scoping metric queries.
    pub project_id: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("environment {identity:?} not found in project")]
    EnvironmentNotFound { identity: String },
    #[error("service {service_id:?} not found in environment {environment:?}")]
    ServiceNotFound {
        service_id: String,
        environment: String,
    },
    #[error("no deployment for service {service_id:?} in environment {environment_id:?}")]
    DeploymentNotFound {
        service_id: String,
        environment_id: String,
    },
    #[error("metric series for service {service_id:?} is empty")]
    NoData { service_id: String },
    #[error("platform API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("platform request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl PlatformError {
    /// True for identity-resolution failures; the missing identity is
    /// named in the message.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::EnvironmentNotFound { .. }
                | Self::ServiceNotFound { .. }
                | Self::DeploymentNotFound { .. }
        )
    }

    /// True when the metric series existed but held no samples.
    #[must_use]
    pub fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData { .. })
    }
}

/// Fetches the monitored service's most recent memory reading, in GB.
#[async_trait]
pub trait MetricFetcher: Send + Sync {
    /// # Errors
    ///
    /// `EnvironmentNotFound` / `ServiceNotFound` when the identity cannot
    /// be located, `NoData` when the series is empty, transport or API
    /// errors otherwise.
    async fn fetch_latest_memory_gb(
        &self,
        environment_name: &str,
        service_id: &str,
    ) -> Result<f64, PlatformError>;
}

/// Issues restarts against the platform.
#[async_trait]
pub trait RestartCaller: Send + Sync {
    /// Resolves the service's current deployment in the given
    /// environment.
    async fn resolve_deployment(
        &self,
        service_id: &str,
        environment_id: &str,
    ) -> Result<String, PlatformError>;

    /// Restarts the given deployment.
    async fn restart_deployment(&self, deployment_id: &str) -> Result<(), PlatformError>;
}
