//! Bounded, queryable history of remediation decisions.
//!
//! Every trigger firing (scheduled check, forced restart, webhook alert)
//! records exactly one [`RemediationEvent`]. The log is a fixed-capacity
//! ring: once full, each insertion evicts the oldest entry. A lifetime
//! counter of restart outcomes survives eviction.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default ring capacity when none is configured.
pub const DEFAULT_CAPACITY: usize = 100;
/// Query limit applied when the caller does not give one.
pub const DEFAULT_QUERY_LIMIT: usize = 20;
/// Hard ceiling on query limits.
pub const MAX_QUERY_LIMIT: usize = 100;

/// Which trigger produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    ScheduledCheck,
    ForcedRestart,
    WebhookAlert,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ScheduledCheck => write!(f, "scheduled-check"),
            Self::ForcedRestart => write!(f, "forced-restart"),
            Self::WebhookAlert => write!(f, "webhook-alert"),
        }
    }
}

/// Final result of a trigger firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventOutcome {
    /// A restart call was issued and acknowledged.
    RestartTriggered,
    /// Observed and recorded; no action was warranted.
    LoggedOnly,
    /// The trigger did not concern the monitored target.
    Ignored,
    /// The failure guard refused the remote call.
    GuardRejected,
    /// The remote call ran and failed.
    RemoteError,
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RestartTriggered => write!(f, "restart-triggered"),
            Self::LoggedOnly => write!(f, "logged-only"),
            Self::Ignored => write!(f, "ignored"),
            Self::GuardRejected => write!(f, "guard-rejected"),
            Self::RemoteError => write!(f, "remote-error"),
        }
    }
}

/// One recorded decision and its outcome. Immutable once pushed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub service_name: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_gb: Option<f64>,
    pub outcome: EventOutcome,
    /// Present only when a restart call was actually issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
}

impl RemediationEvent {
    #[must_use]
    pub fn new(kind: EventKind, service_name: impl Into<String>, outcome: EventOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            service_name: service_name.into(),
            occurred_at: Utc::now(),
            observed_gb: None,
            threshold_gb: None,
            outcome,
            deployment_id: None,
        }
    }

    /// Overrides the generated id. Used when an id was handed out before
    /// the decision resolved (webhook acknowledgements).
    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_observation(mut self, observed_gb: f64, threshold_gb: f64) -> Self {
        self.observed_gb = Some(observed_gb);
        self.threshold_gb = Some(threshold_gb);
        self
    }

    #[must_use]
    pub fn with_deployment(mut self, deployment_id: impl Into<String>) -> Self {
        self.deployment_id = Some(deployment_id.into());
        self
    }
}

/// Filters for [`EventLog::query`].
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// Maximum entries to return; defaults to [`DEFAULT_QUERY_LIMIT`],
    /// clamped to [`MAX_QUERY_LIMIT`].
    pub limit: Option<usize>,
    pub kind: Option<EventKind>,
    pub service: Option<String>,
}

/// Aggregate counters for the status surface.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStats {
    /// Entries currently held (bounded by capacity).
    pub total_events: usize,
    /// Lifetime count of `restart-triggered` outcomes, unaffected by
    /// eviction.
    pub restarts_triggered: u64,
}

/// Fixed-capacity, insertion-ordered ring of remediation events.
pub struct EventLog {
    buffer: VecDeque<RemediationEvent>,
    capacity: usize,
    restarts_triggered: u64,
}

impl EventLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            restarts_triggered: 0,
        }
    }

    /// Appends an event, evicting the oldest entry when full.
    pub fn push(&mut self, event: RemediationEvent) {
        if event.outcome == EventOutcome::RestartTriggered {
            self.restarts_triggered += 1;
        }
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(event);
    }

    /// Matching events, most recently pushed first.
    #[must_use]
    pub fn query(&self, query: &EventQuery) -> Vec<RemediationEvent> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .min(MAX_QUERY_LIMIT);
        self.buffer
            .iter()
            .rev()
            .filter(|event| query.kind.map_or(true, |kind| event.kind == kind))
            .filter(|event| {
                query
                    .service
                    .as_deref()
                    .map_or(true, |service| event.service_name == service)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> LogStats {
        LogStats {
            total_events: self.buffer.len(),
            restarts_triggered: self.restarts_triggered,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_event(service: &str, outcome: EventOutcome) -> RemediationEvent {
        RemediationEvent::new(EventKind::ScheduledCheck, service, outcome)
    }

    #[test]
    fn push_keeps_insertion_order() {
        let mut log = EventLog::new(10);
        log.push(check_event("a", EventOutcome::LoggedOnly));
        log.push(check_event("b", EventOutcome::LoggedOnly));
        assert_eq!(log.len(), 2);
        let events = log.query(&EventQuery::default());
        assert_eq!(events[0].service_name, "b");
        assert_eq!(events[1].service_name, "a");
    }

    #[test]
    fn full_log_evicts_oldest() {
        let mut log = EventLog::new(3);
        for name in ["a", "b", "c", "d"] {
            log.push(check_event(name, EventOutcome::LoggedOnly));
        }
        assert_eq!(log.len(), 3);
        let events = log.query(&EventQuery::default());
        let names: Vec<_> = events.iter().map(|e| e.service_name.as_str()).collect();
        assert_eq!(names, ["d", "c", "b"]);
    }

    #[test]
    fn restart_counter_survives_eviction() {
        let mut log = EventLog::new(100);
        for _ in 0..101 {
            log.push(check_event("svc", EventOutcome::RestartTriggered));
        }
        assert_eq!(log.len(), 100);
        assert_eq!(log.stats().restarts_triggered, 101);
    }

    #[test]
    fn restart_counter_ignores_other_outcomes() {
        let mut log = EventLog::new(10);
        log.push(check_event("svc", EventOutcome::RestartTriggered));
        log.push(check_event("svc", EventOutcome::LoggedOnly));
        log.push(check_event("svc", EventOutcome::GuardRejected));
        log.push(check_event("svc", EventOutcome::RestartTriggered));
        assert_eq!(log.stats().restarts_triggered, 2);
        assert_eq!(log.stats().total_events, 4);
    }

    #[test]
    fn query_returns_most_recent_first_with_limit() {
        let mut log = EventLog::new(20);
        for i in 0..10 {
            log.push(check_event(&format!("svc-{i}"), EventOutcome::LoggedOnly));
        }
        let events = log.query(&EventQuery {
            limit: Some(5),
            ..EventQuery::default()
        });
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].service_name, "svc-9");
        assert_eq!(events[4].service_name, "svc-5");
    }

    #[test]
    fn query_limit_defaults_to_twenty() {
        let mut log = EventLog::new(50);
        for _ in 0..30 {
            log.push(check_event("svc", EventOutcome::LoggedOnly));
        }
        assert_eq!(log.query(&EventQuery::default()).len(), DEFAULT_QUERY_LIMIT);
    }

    #[test]
    fn query_limit_clamped_to_maximum() {
        let mut log = EventLog::new(150);
        for _ in 0..120 {
            log.push(check_event("svc", EventOutcome::LoggedOnly));
        }
        let events = log.query(&EventQuery {
            limit: Some(500),
            ..EventQuery::default()
        });
        assert_eq!(events.len(), MAX_QUERY_LIMIT);
    }

    #[test]
    fn query_filters_by_kind_and_service() {
        let mut log = EventLog::new(10);
        log.push(RemediationEvent::new(
            EventKind::ForcedRestart,
            "svc",
            EventOutcome::RestartTriggered,
        ));
        log.push(check_event("svc", EventOutcome::LoggedOnly));
        log.push(check_event("other", EventOutcome::LoggedOnly));

        let forced = log.query(&EventQuery {
            kind: Some(EventKind::ForcedRestart),
            ..EventQuery::default()
        });
        assert_eq!(forced.len(), 1);
        assert_eq!(forced[0].outcome, EventOutcome::RestartTriggered);

        let for_other = log.query(&EventQuery {
            service: Some("other".into()),
            ..EventQuery::default()
        });
        assert_eq!(for_other.len(), 1);
        assert_eq!(for_other[0].service_name, "other");
    }

    #[test]
    fn serializes_with_wire_names() {
        let event = check_event("svc", EventOutcome::GuardRejected)
            .with_observation(5.2, 5.0)
            .with_deployment("dep-1");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "scheduled-check");
        assert_eq!(json["outcome"], "guard-rejected");
        assert_eq!(json["serviceName"], "svc");
        assert_eq!(json["observedGb"], 5.2);
        assert_eq!(json["deploymentId"], "dep-1");
    }
}
