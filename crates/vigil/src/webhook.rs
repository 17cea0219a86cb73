//! Inbound alert payloads for the webhook trigger.
//!
//! Senders push structured resource alerts; the controller only acts on
//! memory alerts naming its monitored service and environment. Anything
//! else is recorded and left alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Memory,
    Cpu,
    Disk,
    /// Any type this controller does not know; never acted on.
    #[serde(other)]
    Other,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Cpu => write!(f, "cpu"),
            Self::Disk => write!(f, "disk"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertService {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEnvironment {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDeployment {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertResource {
    pub service: AlertService,
    pub environment: AlertEnvironment,
    /// Some senders know the deployment; when absent the restart path
    /// resolves it.
    #[serde(default)]
    pub deployment: Option<AlertDeployment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDetails {
    pub current_value: f64,
    pub threshold: f64,
    #[serde(default)]
    pub unit: Option<String>,
}

/// One inbound alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub resource: AlertResource,
    #[serde(default)]
    pub details: Option<AlertDetails>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl AlertPayload {
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.alert_type == AlertType::Memory
    }

    /// Whether this alert names the monitored target: same service name,
    /// same environment id. The alert type is judged separately; a
    /// target-matching alert of the wrong type is recorded, not ignored.
    #[must_use]
    pub fn matches_target(&self, target: &Target) -> bool {
        self.resource.service.name == target.service_name
            && self.resource.environment.id == target.environment_id
    }

    /// Observed value and threshold from the sender, when present.
    #[must_use]
    pub fn observation(&self) -> Option<(f64, f64)> {
        self.details
            .as_ref()
            .map(|details| (details.current_value, details.threshold))
    }

    #[must_use]
    pub fn deployment_id(&self) -> Option<&str> {
        self.resource
            .deployment
            .as_ref()
            .map(|deployment| deployment.id.as_str())
    }
}
