//! HTTP control surface: health probes, the notify trigger, the
//! Prometheus endpoint, and a JSON view of consumer offsets.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{debug, warn};

use crate::domain::OffsetRecord;
use crate::engine::RelayNotifier;

use super::db::PostgresEventStore;

const NOTIFY_TOKEN_HEADER: &str = "x-notify-access-token";

#[derive(Clone)]
pub struct ControlState {
    pub db: Arc<PostgresEventStore>,
    pub notifier: RelayNotifier,
    pub notify_access_token: Option<String>,
    pub metrics: PrometheusHandle,
}

pub fn build_control_router(state: ControlState) -> Router {
    Router::new()
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/notify", post(notify))
        .route("/metrics", get(render_metrics))
        .route("/offsets", get(list_offsets))
        .with_state(state)
}

async fn health_live() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn health_ready(State(state): State<ControlState>) -> Response {
    match state.db.health_check().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            warn!(error = %err, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// Wake the sequencer. Producers call this after inserting events so
/// invalidations propagate without waiting for the fallback scan.
async fn notify(State(state): State<ControlState>, headers: HeaderMap) -> Response {
    if let Some(expected) = &state.notify_access_token {
        let provided = headers
            .get(NOTIFY_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());
        if provided != Some(expected.as_str()) {
            return (StatusCode::FORBIDDEN, "Invalid access token").into_response();
        }
    }

    debug!("Notify received");
    state.notifier.notify();
    StatusCode::NO_CONTENT.into_response()
}

async fn render_metrics(State(state): State<ControlState>) -> Response {
    state.metrics.render().into_response()
}

async fn list_offsets(State(state): State<ControlState>) -> Response {
    match state.db.list_offsets().await {
        Ok(offsets) => Json::<Vec<OffsetRecord>>(offsets).into_response(),
        Err(err) => {
            warn!(error = %err, "Failed to list offsets");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
