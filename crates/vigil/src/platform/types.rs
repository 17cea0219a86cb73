//! Wire types for the control-plane API.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentsResponse {
    pub environments: Vec<Environment>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub service_instances: Vec<ServiceInstance>,
}

impl Environment {
    #[must_use]
    pub fn has_service(&self, service_id: &str) -> bool {
        self.service_instances
            .iter()
            .any(|instance| instance.service_id == service_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub service_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub deployments: Vec<Deployment>,
}

impl Service {
    /// The service's deployment in the given environment, if any.
    #[must_use]
    pub fn deployment_in(&self, environment_id: &str) -> Option<&Deployment> {
        self.deployments
            .iter()
            .find(|deployment| deployment.environment_id == environment_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    pub environment_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsResponse {
    pub measurements: Vec<MeasurementSeries>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeasurementSeries {
    pub measurement: String,
    #[serde(default)]
    pub values: Vec<MetricSample>,
}

impl MeasurementSeries {
    /// Most recent sample by timestamp. The API usually returns samples
    /// newest-first, but ordering is not relied upon.
    #[must_use]
    pub fn latest(&self) -> Option<&MetricSample> {
        self.values.iter().max_by_key(|sample| sample.ts)
    }
}

/// One sample: epoch seconds and the measured value.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MetricSample {
    pub ts: i64,
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_environment_listing() {
        let response: EnvironmentsResponse = serde_json::from_value(json!({
            "environments": [
                {
                    "id": "env-1",
                    "name": "production",
                    "serviceInstances": [{"serviceId": "svc-1"}]
                },
                {"id": "env-2", "name": "staging"}
            ]
        }))
        .unwrap();
        assert_eq!(response.environments.len(), 2);
        assert!(response.environments[0].has_service("svc-1"));
        assert!(!response.environments[1].has_service("svc-1"));
    }

    #[test]
    fn finds_deployment_for_environment() {
        let service: Service = serde_json::from_value(json!({
            "id": "svc-1",
            "name": "payments",
            "deployments": [
                {"id": "dep-old", "environmentId": "env-2", "status": "SLEEPING"},
                {"id": "dep-1", "environmentId": "env-1", "status": "SUCCESS"}
            ]
        }))
        .unwrap();
        assert_eq!(service.deployment_in("env-1").map(|d| d.id.as_str()), Some("dep-1"));
        assert!(service.deployment_in("env-9").is_none());
    }

    #[test]
    fn latest_sample_is_picked_by_timestamp() {
        let series: MeasurementSeries = serde_json::from_value(json!({
            "measurement": "MEMORY_USAGE_GB",
            "values": [
                {"ts": 100, "value": 4.1},
                {"ts": 300, "value": 5.2},
                {"ts": 200, "value": 4.9}
            ]
        }))
        .unwrap();
        let latest = series.latest().unwrap();
        assert_eq!(latest.ts, 300);
        assert!((latest.value - 5.2).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_series_has_no_latest() {
        let series: MeasurementSeries = serde_json::from_value(json!({
            "measurement": "MEMORY_USAGE_GB"
        }))
        .unwrap();
        assert!(series.latest().is_none());
    }
}
