//! Engine control endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use super::AppState;
use crate::events::{EngineState, StatusSnapshot};

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub started: bool,
    pub state: EngineState,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub state: EngineState,
}

#[derive(Debug, Serialize)]
pub struct KickResponse {
    pub accepted: bool,
}

/// GET /sync/status - Latest engine state and counters
pub async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.engine.snapshot())
}

/// POST /sync/start - Start the background worker if it is not running
pub async fn start(State(state): State<AppState>) -> (StatusCode, Json<StartResponse>) {
    let started = state.engine.start(state.profile.as_ref().clone());
    if started {
        tracing::info!("Sync engine started over API");
    }
    let code = if started { StatusCode::ACCEPTED } else { StatusCode::OK };
    (
        code,
        Json(StartResponse {
            started,
            state: state.engine.state(),
        }),
    )
}

/// POST /sync/stop - Stop the worker, waiting for the current cycle
pub async fn stop(State(state): State<AppState>) -> Json<StopResponse> {
    tracing::info!("Stop requested over API");
    state.engine.stop().await;
    Json(StopResponse {
        state: state.engine.state(),
    })
}

/// POST /sync/kick - Skip the current wait and sync now
pub async fn kick(State(state): State<AppState>) -> (StatusCode, Json<KickResponse>) {
    let accepted = state.engine.kick();
    let code = if accepted { StatusCode::ACCEPTED } else { StatusCode::CONFLICT };
    (code, Json(KickResponse { accepted }))
}
