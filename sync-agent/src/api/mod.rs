//! Local HTTP control API for the sync agent.

pub mod control;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::SyncProfile;
use crate::engine::SyncEngine;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
    /// Profile used when the worker is (re)started over the API
    pub profile: Arc<SyncProfile>,
}

impl AppState {
    pub fn new(engine: Arc<SyncEngine>, profile: SyncProfile) -> Self {
        Self {
            engine,
            profile: Arc::new(profile),
        }
    }
}

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/sync/status", get(control::status))
        .route("/sync/start", post(control::start))
        .route("/sync/stop", post(control::stop))
        .route("/sync/kick", post(control::kick))
        .route("/ws", get(crate::ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EngineState, EventBus};
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn state(local: &TempDir, data: &TempDir) -> AppState {
        let engine = SyncEngine::new(Arc::new(MemoryStore::new()), data.path(), EventBus::new());
        AppState::new(Arc::new(engine), SyncProfile::new("dev-a", local.path()))
    }

    async fn call(router: Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (local, data) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let (status, body) = call(create_router(state(&local, &data)), "GET", "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["engine"], "idle");
    }

    #[tokio::test]
    async fn test_status_before_start() {
        let (local, data) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let (status, body) = call(create_router(state(&local, &data)), "GET", "/sync/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "idle");
        assert_eq!(body["cycle_count"], 0);
    }

    #[tokio::test]
    async fn test_kick_when_not_running_conflicts() {
        let (local, data) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let (status, body) = call(create_router(state(&local, &data)), "POST", "/sync/kick").await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["accepted"], false);
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let (local, data) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let state = state(&local, &data);
        let router = create_router(state.clone());

        let (status, body) = call(router.clone(), "POST", "/sync/start").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["started"], true);

        let (status, body) = call(router.clone(), "POST", "/sync/start").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["started"], false);

        let (status, body) = call(router, "POST", "/sync/stop").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "stopped");
        assert_eq!(state.engine.state(), EngineState::Stopped);
    }
}
