//! WebSocket streaming for real-time session updates
//!
//! Each `/ws/sessions/:id` client receives the current session snapshot, then
//! every persisted update of that session in order, interleaved with the
//! consultation lifecycle events that mention it.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::ServerAppState;
use crate::datastore::SessionSubscription;
use crate::events::{payload_session_id, EVENT_SESSION_UPDATED};
use crate::models::Session;

/// A server event that can be pushed to WebSocket clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEvent {
    /// Event type (e.g., "session:updated", "consultation:completed")
    pub event: String,
    /// Event payload as JSON value
    pub payload: serde_json::Value,
}

impl ServerEvent {
    pub fn new(event_type: &str, payload: impl Serialize) -> Self {
        Self {
            event: event_type.to_string(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn session_updated(session: &Session) -> Self {
        Self::new(EVENT_SESSION_UPDATED, session)
    }

    /// Session this event is about, if its payload names one
    pub fn session_id(&self) -> Option<&str> {
        payload_session_id(&self.payload)
    }
}

/// Broadcasts lifecycle events to all connected clients
pub struct EventBroadcaster {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventBroadcaster {
    /// Create a new event broadcaster with a channel capacity of 1000 events
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1000);
        Self { tx }
    }

    /// Broadcast an event to all connected clients
    pub fn broadcast(&self, event_type: &str, payload: impl Serialize) {
        // Ignore send errors (no receivers)
        let _ = self.tx.send(ServerEvent::new(event_type, payload));
    }

    /// Subscribe to events (returns a receiver)
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// WebSocket upgrade handler for one session's update stream
pub async fn session_ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<ServerAppState>,
) -> Response {
    // Subscribe before reading so no update falls between snapshot and stream
    let updates = state.datastore.subscribe(&session_id);
    let events = state.broadcaster.subscribe();

    let snapshot = match state.datastore.read_session(&session_id).await {
        Ok(session) => session,
        Err(e) if e.is_not_found() => {
            return (StatusCode::NOT_FOUND, e.to_string()).into_response();
        }
        Err(e) => {
            log::warn!("Failed to read session {} for streaming: {}", session_id, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_session_socket(socket, snapshot, updates, events))
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), ()> {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json)).await.map_err(|_| ()),
        Err(e) => {
            log::warn!("Failed to serialize event: {}", e);
            Ok(())
        }
    }
}

/// Handle a session WebSocket connection
async fn handle_session_socket(
    socket: WebSocket,
    snapshot: Session,
    mut updates: SessionSubscription,
    mut events: broadcast::Receiver<ServerEvent>,
) {
    let (mut sender, mut receiver) = socket.split();
    let session_id = snapshot.id.clone();

    log::info!("WebSocket client attached to session {}", session_id);

    let watched_id = session_id.clone();
    let send_task = tokio::spawn(async move {
        if send_event(&mut sender, &ServerEvent::session_updated(&snapshot))
            .await
            .is_err()
        {
            return;
        }

        loop {
            let event = tokio::select! {
                update = updates.next() => match update {
                    Some(session) => ServerEvent::session_updated(&session),
                    None => break,
                },
                event = events.recv() => match event {
                    Ok(event) if event.session_id() == Some(watched_id.as_str()) => event,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Event stream lagged, skipped {} events", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            if send_event(&mut sender, &event).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                log::info!("WebSocket client disconnected");
                break;
            }
            Ok(Message::Text(text)) => {
                log::debug!("Ignoring client message: {}", text);
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("WebSocket error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    log::info!("WebSocket stream for session {} closed", session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ConsultationFailedPayload, EVENT_CONSULTATION_FAILED};

    #[test]
    fn test_event_broadcaster() {
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        broadcaster.broadcast(
            EVENT_CONSULTATION_FAILED,
            ConsultationFailedPayload {
                session_id: "s-1".to_string(),
                error: "boom".to_string(),
            },
        );

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event, EVENT_CONSULTATION_FAILED);
        assert_eq!(event.session_id(), Some("s-1"));
    }

    #[test]
    fn test_broadcast_without_receivers_is_ignored() {
        let broadcaster = EventBroadcaster::new();
        broadcaster.broadcast("anything", serde_json::json!({}));
    }

    #[test]
    fn test_session_updated_event_carries_full_record() {
        let session = Session::initial("s-1", "u-1");
        let event = ServerEvent::session_updated(&session);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "session:updated");
        assert_eq!(json["payload"]["id"], "s-1");
        assert_eq!(json["payload"]["current_state"], "WAITING_FOR_INFO");
    }
}
