//! Decision core tying triggers to remediation.
//!
//! One [`Controller`] owns every trigger surface: the scheduled memory
//! check, the forced-restart timer, webhook alerts, and operator
//! restarts. All remote work funnels through a single [`FailureGuard`],
//! so every trigger draws on the same failure budget, and every trigger
//! firing leaves exactly one entry in the event log.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use guard::{FailureGuard, GuardError, GuardSnapshot};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, Target};
use crate::events::{EventKind, EventLog, EventOutcome, EventQuery, LogStats, RemediationEvent};
use crate::monitor::{Evaluation, ThresholdEvaluator};
use crate::platform::{MetricFetcher, PlatformError, RestartCaller};
use crate::restart::{RestartOrchestrator, RestartReceipt};
use crate::webhook::AlertPayload;

/// Why a restart call was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartReason {
    /// A scheduled check observed memory at or above the ceiling.
    Threshold,
    Forced,
    Alert,
    Manual,
}

impl std::fmt::Display for RestartReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Threshold => write!(f, "threshold"),
            Self::Forced => write!(f, "forced"),
            Self::Alert => write!(f, "alert"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Most recent completed memory check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRecord {
    pub at: DateTime<Utc>,
    /// Absent when the check ran but the metric series held no samples.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_gb: Option<f64>,
    pub exceeded: bool,
}

/// Most recent restart issued by any trigger.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartRecord {
    pub at: DateTime<Utc>,
    pub reason: RestartReason,
    pub deployment_id: String,
}

/// Point-in-time controller state for the status surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub service_name: String,
    pub environment_name: String,
    pub guard: GuardSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<CheckRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_restart: Option<RestartRecord>,
    pub events: LogStats,
    pub uptime_secs: u64,
}

/// Failure modes of an operator-initiated restart.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("restart refused by failure guard, retry in {retry_in:?}")]
    GuardOpen { retry_in: Duration },
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

impl From<GuardError<PlatformError>> for TriggerError {
    fn from(err: GuardError<PlatformError>) -> Self {
        match err {
            GuardError::Rejected { retry_in } => Self::GuardOpen { retry_in },
            GuardError::Inner(inner) => Self::Platform(inner),
        }
    }
}

/// What the controller decided to do with a webhook alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertAction {
    /// A restart task was spawned.
    RestartQueued,
    /// Recorded without action: non-memory type, or auto-restart is
    /// disabled.
    LoggedOnly,
    /// The alert names some other service or environment.
    Ignored,
}

/// Outcome of [`Controller::handle_alert`], available before any
/// spawned restart work completes.
pub struct AlertDecision {
    pub action: AlertAction,
    /// Id the recorded event carries, echoed in the acknowledgement.
    pub event_id: Uuid,
    /// The detached restart task, when one was spawned. The server
    /// drops it; tests await it to observe the final outcome.
    pub task: Option<JoinHandle<()>>,
}

/// Singleton driving all remediation for one monitored service.
pub struct Controller {
    target: Target,
    auto_restart_on_alert: bool,
    check_interval: Option<Duration>,
    forced_restart_interval: Option<Duration>,
    guard: FailureGuard,
    log: RwLock<EventLog>,
    /// Present only when a memory ceiling is configured.
    evaluator: Option<ThresholdEvaluator>,
    orchestrator: RestartOrchestrator,
    last_check: RwLock<Option<CheckRecord>>,
    last_restart: RwLock<Option<RestartRecord>>,
    started_at: Instant,
}

impl Controller {
    #[must_use]
    pub fn new(
        config: &Config,
        fetcher: Arc<dyn MetricFetcher>,
        restarter: Arc<dyn RestartCaller>,
    ) -> Self {
        let guard = FailureGuard::new(config.guard).with_state_change_hook(|state| {
            info!(%state, "failure guard changed state");
        });
        let evaluator = config.target.memory_limit_gb.map(|ceiling_gb| {
            ThresholdEvaluator::new(Arc::clone(&fetcher), config.target.clone(), ceiling_gb)
        });
        Self {
            target: config.target.clone(),
            auto_restart_on_alert: config.auto_restart_on_alert,
            check_interval: config.check_interval,
            forced_restart_interval: config.forced_restart_interval,
            guard,
            log: RwLock::new(EventLog::new(config.event_log_capacity)),
            evaluator,
            orchestrator: RestartOrchestrator::new(restarter, config.target.clone()),
            last_check: RwLock::new(None),
            last_restart: RwLock::new(None),
            started_at: Instant::now(),
        }
    }

    /// Runs one scheduled memory check and records its event.
    ///
    /// Returns `None` when no memory ceiling is configured, the recorded
    /// outcome otherwise.
    pub async fn check_once(&self) -> Option<EventOutcome> {
        let evaluator = self.evaluator.as_ref()?;
        let outcome = match self.guard.execute(|| evaluator.evaluate()).await {
            Ok(evaluation) => {
                self.record_check(Some(evaluation.observed_gb), evaluation.exceeded)
                    .await;
                if evaluation.exceeded {
                    warn!(
                        observed_gb = evaluation.observed_gb,
                        ceiling_gb = evaluation.ceiling_gb,
                        service = %self.target.service_name,
                        "memory above ceiling, restarting"
                    );
                    self.restart_for_check(&evaluation).await
                } else {
                    debug!(
                        observed_gb = evaluation.observed_gb,
                        ceiling_gb = evaluation.ceiling_gb,
                        service = %self.target.service_name,
                        "memory within ceiling"
                    );
                    self.push_event(
                        RemediationEvent::new(
                            EventKind::ScheduledCheck,
                            &self.target.service_name,
                            EventOutcome::LoggedOnly,
                        )
                        .with_observation(evaluation.observed_gb, evaluation.ceiling_gb),
                    )
                    .await;
                    EventOutcome::LoggedOnly
                }
            }
            // An empty series is not actionable: record that the check
            // ran and observed nothing. The guard still counted the
            // failure.
            Err(GuardError::Inner(err)) if err.is_no_data() => {
                warn!(service = %self.target.service_id, "no recent memory samples");
                self.record_check(None, false).await;
                self.push_event(RemediationEvent::new(
                    EventKind::ScheduledCheck,
                    &self.target.service_name,
                    EventOutcome::LoggedOnly,
                ))
                .await;
                EventOutcome::LoggedOnly
            }
            Err(err) => {
                self.record_failure(EventKind::ScheduledCheck, None, None, &err)
                    .await
            }
        };
        Some(outcome)
    }

    /// Issues the restart an exceeded check calls for and finishes the
    /// firing's event.
    async fn restart_for_check(&self, evaluation: &Evaluation) -> EventOutcome {
        match self.guard.execute(|| self.orchestrator.restart()).await {
            Ok(receipt) => {
                self.record_restart(RestartReason::Threshold, &receipt.deployment_id)
                    .await;
                self.push_event(
                    RemediationEvent::new(
                        EventKind::ScheduledCheck,
                        &self.target.service_name,
                        EventOutcome::RestartTriggered,
                    )
                    .with_observation(evaluation.observed_gb, evaluation.ceiling_gb)
                    .with_deployment(&receipt.deployment_id),
                )
                .await;
                EventOutcome::RestartTriggered
            }
            Err(err) => {
                self.record_failure(
                    EventKind::ScheduledCheck,
                    None,
                    Some((evaluation.observed_gb, evaluation.ceiling_gb)),
                    &err,
                )
                .await
            }
        }
    }

    /// Runs one forced-restart firing and records its event.
    pub async fn forced_restart_once(&self) -> EventOutcome {
        info!(service = %self.target.service_name, "forced restart interval elapsed");
        match self.guard.execute(|| self.orchestrator.restart()).await {
            Ok(receipt) => {
                self.record_restart(RestartReason::Forced, &receipt.deployment_id)
                    .await;
                self.push_event(
                    RemediationEvent::new(
                        EventKind::ForcedRestart,
                        &self.target.service_name,
                        EventOutcome::RestartTriggered,
                    )
                    .with_deployment(&receipt.deployment_id),
                )
                .await;
                EventOutcome::RestartTriggered
            }
            Err(err) => {
                self.record_failure(EventKind::ForcedRestart, None, None, &err)
                    .await
            }
        }
    }

    /// Decides what to do with an inbound platform alert.
    ///
    /// Restart work runs on a detached task so the webhook endpoint can
    /// acknowledge immediately; the decision carries the id the recorded
    /// event will have once the task resolves.
    pub async fn handle_alert(self: &Arc<Self>, alert: AlertPayload) -> AlertDecision {
        let event_id = Uuid::new_v4();
        if !alert.matches_target(&self.target) {
            info!(
                alert_type = %alert.alert_type,
                service = %alert.resource.service.name,
                "alert does not name the monitored target"
            );
            self.push_event(
                RemediationEvent::new(
                    EventKind::WebhookAlert,
                    &alert.resource.service.name,
                    EventOutcome::Ignored,
                )
                .with_id(event_id),
            )
            .await;
            return AlertDecision {
                action: AlertAction::Ignored,
                event_id,
                task: None,
            };
        }
        // Right target, wrong alert type: recorded, never remediated.
        if !alert.is_memory() {
            info!(
                alert_type = %alert.alert_type,
                service = %alert.resource.service.name,
                "non-memory alert for the monitored target"
            );
            self.push_event(
                RemediationEvent::new(
                    EventKind::WebhookAlert,
                    &alert.resource.service.name,
                    EventOutcome::LoggedOnly,
                )
                .with_id(event_id),
            )
            .await;
            return AlertDecision {
                action: AlertAction::LoggedOnly,
                event_id,
                task: None,
            };
        }
        if !self.auto_restart_on_alert {
            info!(
                service = %alert.resource.service.name,
                "memory alert received, auto-restart disabled"
            );
            let mut event = RemediationEvent::new(
                EventKind::WebhookAlert,
                &alert.resource.service.name,
                EventOutcome::LoggedOnly,
            )
            .with_id(event_id);
            if let Some((observed, threshold)) = alert.observation() {
                event = event.with_observation(observed, threshold);
            }
            self.push_event(event).await;
            return AlertDecision {
                action: AlertAction::LoggedOnly,
                event_id,
                task: None,
            };
        }
        warn!(
            service = %alert.resource.service.name,
            "memory alert received, queueing restart"
        );
        let controller = Arc::clone(self);
        let task = tokio::spawn(async move {
            controller.run_alert_restart(event_id, alert).await;
        });
        AlertDecision {
            action: AlertAction::RestartQueued,
            event_id,
            task: Some(task),
        }
    }

    /// Body of the detached alert-restart task.
    async fn run_alert_restart(&self, event_id: Uuid, alert: AlertPayload) {
        // A deployment named in the payload skips identity resolution.
        let result = match alert.deployment_id() {
            Some(deployment_id) => {
                self.guard
                    .execute(|| {
                        self.orchestrator
                            .restart_by_ids(&alert.resource.service.id, deployment_id)
                    })
                    .await
            }
            None => self.guard.execute(|| self.orchestrator.restart()).await,
        };
        match result {
            Ok(receipt) => {
                self.record_restart(RestartReason::Alert, &receipt.deployment_id)
                    .await;
                let mut event = RemediationEvent::new(
                    EventKind::WebhookAlert,
                    &alert.resource.service.name,
                    EventOutcome::RestartTriggered,
                )
                .with_id(event_id)
                .with_deployment(&receipt.deployment_id);
                if let Some((observed, threshold)) = alert.observation() {
                    event = event.with_observation(observed, threshold);
                }
                self.push_event(event).await;
            }
            Err(err) => {
                self.record_failure(
                    EventKind::WebhookAlert,
                    Some(event_id),
                    alert.observation(),
                    &err,
                )
                .await;
            }
        }
    }

    /// Operator-initiated restart. Updates the last-restart record but
    /// writes no event.
    ///
    /// # Errors
    ///
    /// [`TriggerError::GuardOpen`] when the failure guard refuses the
    /// call, [`TriggerError::Platform`] when the platform rejects it.
    pub async fn trigger_restart_now(&self) -> Result<RestartReceipt, TriggerError> {
        info!(service = %self.target.service_name, "manual restart requested");
        let receipt = self.guard.execute(|| self.orchestrator.restart()).await?;
        self.record_restart(RestartReason::Manual, &receipt.deployment_id)
            .await;
        Ok(receipt)
    }

    /// Drives scheduled checks for the life of the process. Returns at
    /// once when the trigger is not configured.
    pub async fn run_check_loop(self: Arc<Self>) {
        let Some(period) = self.check_interval else {
            return;
        };
        info!(period_secs = period.as_secs(), "scheduled memory checks enabled");
        // The first check fires one full period after startup.
        loop {
            tokio::time::sleep(period).await;
            self.check_once().await;
        }
    }

    /// Drives unconditional periodic restarts. Returns at once when the
    /// trigger is not configured.
    pub async fn run_forced_restart_loop(self: Arc<Self>) {
        let Some(period) = self.forced_restart_interval else {
            return;
        };
        info!(period_secs = period.as_secs(), "forced restarts enabled");
        loop {
            tokio::time::sleep(period).await;
            self.forced_restart_once().await;
        }
    }

    /// Snapshot for the status endpoint.
    pub async fn status(&self) -> ControllerStatus {
        ControllerStatus {
            service_name: self.target.service_name.clone(),
            environment_name: self.target.environment_name.clone(),
            guard: self.guard.snapshot().await,
            last_check: self.last_check.read().await.clone(),
            last_restart: self.last_restart.read().await.clone(),
            events: self.log.read().await.stats(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// Matching events, most recent first.
    pub async fn query_events(&self, query: &EventQuery) -> Vec<RemediationEvent> {
        self.log.read().await.query(query)
    }

    /// Records the event for a firing whose remote work failed and maps
    /// the error to its outcome.
    async fn record_failure(
        &self,
        kind: EventKind,
        event_id: Option<Uuid>,
        observation: Option<(f64, f64)>,
        err: &GuardError<PlatformError>,
    ) -> EventOutcome {
        let outcome = match err {
            GuardError::Rejected { retry_in } => {
                warn!(%kind, ?retry_in, "failure guard refused remote call");
                EventOutcome::GuardRejected
            }
            GuardError::Inner(inner) => {
                error!(%kind, error = %inner, "remote call failed");
                EventOutcome::RemoteError
            }
        };
        let mut event = RemediationEvent::new(kind, &self.target.service_name, outcome);
        if let Some(id) = event_id {
            event = event.with_id(id);
        }
        if let Some((observed, threshold)) = observation {
            event = event.with_observation(observed, threshold);
        }
        self.push_event(event).await;
        outcome
    }

    async fn record_check(&self, observed_gb: Option<f64>, exceeded: bool) {
        *self.last_check.write().await = Some(CheckRecord {
            at: Utc::now(),
            observed_gb,
            exceeded,
        });
    }

    async fn record_restart(&self, reason: RestartReason, deployment_id: &str) {
        *self.last_restart.write().await = Some(RestartRecord {
            at: Utc::now(),
            reason,
            deployment_id: deployment_id.to_string(),
        });
    }

    async fn push_event(&self, event: RemediationEvent) {
        debug!(kind = %event.kind, outcome = %event.outcome, "remediation event recorded");
        self.log.write().await.push(event);
    }
}
