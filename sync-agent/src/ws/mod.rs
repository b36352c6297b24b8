//! WebSocket stream of engine events.
//!
//! Every [`SyncEvent`] is forwarded to each connected client as JSON. On
//! connect the client first receives the current status snapshot so it does
//! not have to wait for the next cycle. A client that falls too far behind
//! skips the events it missed.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::api::AppState;
use crate::events::{StatusSnapshot, SyncEvent};

/// First frame sent on every connection
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "payload")]
enum Hello {
    #[serde(rename = "sync:snapshot")]
    Snapshot(StatusSnapshot),
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(app_state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("New WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();

    // Subscribe before taking the snapshot so nothing falls in between
    let mut rx = state.engine.subscribe();
    let hello = Hello::Snapshot(state.engine.snapshot());

    let mut send_task = tokio::spawn(async move {
        match serde_json::to_string(&hello) {
            Ok(json) => {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    return;
                }
            }
            Err(e) => error!("Failed to serialize snapshot: {:?}", e),
        }

        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    warn!("WebSocket client lagging, skipped {} event(s)", missed);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match encode(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!("Failed to serialize event: {:?}", e),
            }
        }
    });

    // The stream is one-way; incoming frames are only drained to notice close
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
            debug!("Ignoring client WebSocket message");
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("WebSocket client disconnected");
}

fn encode(event: &SyncEvent) -> serde_json::Result<String> {
    serde_json::to_string(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{SyncStatus, LogLevel};

    #[test]
    fn test_hello_serialization() {
        let json = serde_json::to_string(&Hello::Snapshot(StatusSnapshot::default())).unwrap();
        assert!(json.starts_with(r#"{"type":"sync:snapshot","payload":{"#));
        assert!(json.contains(r#""state":"idle""#));
    }

    #[test]
    fn test_event_frames() {
        let json = encode(&SyncEvent::Status(SyncStatus::Syncing)).unwrap();
        assert_eq!(json, r#"{"type":"sync:status","payload":"syncing"}"#);

        let json = encode(&SyncEvent::Log { level: LogLevel::Warn, message: "x".into() }).unwrap();
        assert_eq!(json, r#"{"type":"sync:log","payload":{"level":"warn","message":"x"}}"#);
    }
}
