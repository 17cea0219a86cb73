//! HTTP surface: health, status, event queries, manual restarts, and
//! the inbound alert webhook.
//!
//! Routes under `/api` require the configured `X-API-Key` header when
//! one is set. `/health` and the webhook stay open so probes and alert
//! senders work without credentials.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::controller::{Controller, ControllerStatus, TriggerError};
use crate::events::{EventKind, EventQuery, RemediationEvent};
use crate::webhook::AlertPayload;

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    controller: Arc<Controller>,
    config: Arc<Config>,
}

impl AppState {
    #[must_use]
    pub fn new(controller: Arc<Controller>, config: Arc<Config>) -> Self {
        Self { controller, config }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    #[serde(flatten)]
    controller: ControllerStatus,
    config: ConfigEcho,
}

/// Operative knobs echoed on the status surface. Secrets never appear
/// here.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigEcho {
    check_interval_secs: Option<u64>,
    forced_restart_interval_secs: Option<u64>,
    memory_limit_gb: Option<f64>,
    auto_restart_on_alert: bool,
}

#[derive(Debug, Deserialize)]
struct EventsParams {
    limit: Option<usize>,
    kind: Option<EventKind>,
    service: Option<String>,
}

#[derive(Serialize)]
struct EventsResponse {
    count: usize,
    events: Vec<RemediationEvent>,
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/events", get(get_events))
        .route("/restart", post(post_restart))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/alerts", post(receive_alert))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds the listener and serves until the process exits.
pub async fn run_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "http server listening");
    axum::serve(listener, build_router(state))
        .await
        .context("http server terminated")?;
    Ok(())
}

async fn require_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = state.config.api_key.as_deref() {
        let provided = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            warn!("api request rejected: missing or wrong api key");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalid api key" })),
            )
                .into_response();
        }
    }
    next.run(request).await
}

/// Liveness plus a thin operational summary. Never fails.
async fn health(State(state): State<AppState>) -> Json<Value> {
    let status = state.controller.status().await;
    Json(json!({
        "status": "ok",
        "uptimeSecs": status.uptime_secs,
        "guardState": status.guard.state,
        "totalEvents": status.events.total_events,
        "restartsTriggered": status.events.restarts_triggered,
    }))
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let controller = state.controller.status().await;
    Json(StatusResponse {
        controller,
        config: ConfigEcho {
            check_interval_secs: state.config.check_interval.map(|d| d.as_secs()),
            forced_restart_interval_secs: state
                .config
                .forced_restart_interval
                .map(|d| d.as_secs()),
            memory_limit_gb: state.config.target.memory_limit_gb,
            auto_restart_on_alert: state.config.auto_restart_on_alert,
        },
    })
}

async fn get_events(
    State(state): State<AppState>,
    Query(params): Query<EventsParams>,
) -> Json<EventsResponse> {
    let query = EventQuery {
        limit: params.limit,
        kind: params.kind,
        service: params.service,
    };
    let events = state.controller.query_events(&query).await;
    Json(EventsResponse {
        count: events.len(),
        events,
    })
}

async fn post_restart(State(state): State<AppState>) -> Response {
    match state.controller.trigger_restart_now().await {
        Ok(receipt) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "deploymentId": receipt.deployment_id,
                "timestamp": Utc::now(),
            })),
        )
            .into_response(),
        Err(err @ TriggerError::GuardOpen { .. }) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

/// Accepts a platform alert and acknowledges before any restart work
/// happens. The acknowledgement carries the id of the event the firing
/// will record.
async fn receive_alert(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    // Parsed by hand so a malformed body yields a structured 400
    // instead of the extractor's default rejection.
    let alert: AlertPayload = match serde_json::from_value(body) {
        Ok(alert) => alert,
        Err(err) => {
            warn!(error = %err, "malformed alert payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("malformed alert: {err}") })),
            )
                .into_response();
        }
    };
    let decision = state.controller.handle_alert(alert).await;
    // Any spawned restart task runs detached from this request.
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "received": true,
            "eventId": decision.event_id,
            "action": decision.action,
        })),
    )
        .into_response()
}
