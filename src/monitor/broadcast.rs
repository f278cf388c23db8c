use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use warp::ws::Message;

use super::connection::{ConnectionHandle, ConnectionId};
use super::signaling::SignalMessage;

/// One-to-many fan-out of session lifecycle events to every connected
/// observer. Delivery is best-effort: no acknowledgement, no retry, no
/// queueing for late joiners — an observer that connects after an event
/// never receives it.
pub struct EventBroadcaster {
    observers: Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self {
            observers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn subscribe(&self, handle: ConnectionHandle) {
        let mut observers = self.observers.write().await;
        observers.insert(handle.id(), handle);
    }

    pub async fn unsubscribe(&self, connection_id: ConnectionId) {
        let mut observers = self.observers.write().await;
        observers.remove(&connection_id);
    }

    pub async fn observer_count(&self) -> usize {
        let observers = self.observers.read().await;
        observers.len()
    }

    /// Serializes once and sends to every current observer. Failed sends
    /// are logged and skipped; the dead observer gets pruned by its own
    /// disconnect path.
    pub async fn publish(&self, event: &SignalMessage) {
        let frame = match event.to_ws_message() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize broadcast event");
                return;
            }
        };

        let observers = self.observers.read().await;
        for (connection_id, handle) in observers.iter() {
            if let Err(e) = handle.send(frame.clone()) {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "Failed to deliver broadcast event"
                );
            }
        }
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
