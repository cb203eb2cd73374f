//! HTTP routes for the webhook receiver.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::{info, warn};

use tpsync_compliance::TpsClient;
use tpsync_core::{EventOutcome, ReactorConfig, handle_notification};
use tpsync_crm::HubSpotClient;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub crm: Arc<HubSpotClient>,
    pub checker: Arc<TpsClient>,
    pub reactor: Arc<ReactorConfig>,
    /// Events received since startup.
    pub processed_events: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(crm: HubSpotClient, checker: TpsClient, reactor: ReactorConfig) -> Self {
        Self {
            crm: Arc::new(crm),
            checker: Arc::new(checker),
            reactor: Arc::new(reactor),
            processed_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/webhooks/hubspot", post(receive_notification))
        .route("/health", get(health))
        .with_state(state)
}

/// Accept a CRM change notification and process its events in order.
///
/// Per-event failures are logged and never change the response; only a
/// body that is not JSON at all is rejected.
async fn receive_notification(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, bytes = body.len(), "rejecting non-JSON notification");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid JSON: {e}") })),
            );
        }
    };

    let outcomes = handle_notification(
        state.crm.as_ref(),
        state.checker.as_ref(),
        &state.reactor,
        payload,
    )
    .await;

    let updated = outcomes
        .iter()
        .filter(|o| matches!(o, EventOutcome::Updated { .. }))
        .count();
    state
        .processed_events
        .fetch_add(outcomes.len() as u64, Ordering::Relaxed);
    info!(events = outcomes.len(), updated, "notification handled");

    (StatusCode::OK, Json(json!({ "received": true })))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "processed_events": state.processed_events.load(Ordering::Relaxed),
    }))
}
