//! HTTP client for the control-plane API.

use reqwest::Response;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::types::{EnvironmentsResponse, MetricsResponse, Service};
use super::{MetricFetcher, PlatformConfig, PlatformError, RestartCaller};
use async_trait::async_trait;

/// Measurement name for memory usage in gigabytes.
const MEMORY_MEASUREMENT: &str = "MEMORY_USAGE_GB";

/// Talks to the deployment platform's control plane. Implements both
/// collaborator capabilities against the same connection.
#[derive(Debug, Clone)]
pub struct PlatformClient {
    config: PlatformConfig,
    client: reqwest::Client,
}

impl PlatformClient {
    /// # Errors
    ///
    /// Fails if the underlying HTTP client cannot be constructed.
    pub fn new(config: PlatformConfig) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, PlatformError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.config.api_token)
            .query(query)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn parse_response<T: DeserializeOwned>(response: Response) -> Result<T, PlatformError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PlatformError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    async fn environments(&self) -> Result<EnvironmentsResponse, PlatformError> {
        let url = self.url(&format!(
            "projects/{}/environments",
            self.config.project_id
        ));
        self.get_json(&url, &[]).await
    }

    async fn service(&self, service_id: &str) -> Result<Service, PlatformError> {
        let url = self.url(&format!("services/{service_id}"));
        self.get_json(&url, &[]).await
    }

    async fn memory_series(
        &self,
        environment_id: &str,
        service_id: &str,
    ) -> Result<MetricsResponse, PlatformError> {
        let url = self.url("metrics");
        self.get_json(
            &url,
            &[
                ("projectId", self.config.project_id.as_str()),
                ("environmentId", environment_id),
                ("serviceId", service_id),
                ("measurement", MEMORY_MEASUREMENT),
            ],
        )
        .await
    }
}

#[async_trait]
impl MetricFetcher for PlatformClient {
    async fn fetch_latest_memory_gb(
        &self,
        environment_name: &str,
        service_id: &str,
    ) -> Result<f64, PlatformError> {
        debug!(
            environment = %environment_name,
            service = %service_id,
            "fetching latest memory sample"
        );

        let listing = self.environments().await?;
        let environment = listing
            .environments
            .iter()
            .find(|environment| environment.name == environment_name)
            .ok_or_else(|| PlatformError::EnvironmentNotFound {
                identity: environment_name.to_string(),
            })?;
        if !environment.has_service(service_id) {
            return Err(PlatformError::ServiceNotFound {
                service_id: service_id.to_string(),
                environment: environment_name.to_string(),
            });
        }

        let metrics = self.memory_series(&environment.id, service_id).await?;
        let latest = metrics
            .measurements
            .iter()
            .find(|series| series.measurement == MEMORY_MEASUREMENT)
            .and_then(super::types::MeasurementSeries::latest)
            .ok_or_else(|| PlatformError::NoData {
                service_id: service_id.to_string(),
            })?;

        debug!(value_gb = latest.value, ts = latest.ts, "memory sample fetched");
        Ok(latest.value)
    }
}

#[async_trait]
impl RestartCaller for PlatformClient {
    async fn resolve_deployment(
        &self,
        service_id: &str,
        environment_id: &str,
    ) -> Result<String, PlatformError> {
        let listing = self.environments().await?;
        let environment = listing
            .environments
            .iter()
            .find(|environment| environment.id == environment_id)
            .ok_or_else(|| PlatformError::EnvironmentNotFound {
                identity: environment_id.to_string(),
            })?;
        if !environment.has_service(service_id) {
            return Err(PlatformError::ServiceNotFound {
                service_id: service_id.to_string(),
                environment: environment_id.to_string(),
            });
        }

        let service = self.service(service_id).await.map_err(|err| match err {
            PlatformError::Api { status: 404, .. } => PlatformError::ServiceNotFound {
                service_id: service_id.to_string(),
                environment: environment_id.to_string(),
            },
            other => other,
        })?;
        let deployment =
            service
                .deployment_in(environment_id)
                .ok_or_else(|| PlatformError::DeploymentNotFound {
                    service_id: service_id.to_string(),
                    environment_id: environment_id.to_string(),
                })?;
        Ok(deployment.id.clone())
    }

    async fn restart_deployment(&self, deployment_id: &str) -> Result<(), PlatformError> {
        info!(deployment = %deployment_id, "issuing deployment restart");
        let url = self.url(&format!("deployments/{deployment_id}/restart"));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PlatformError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}
