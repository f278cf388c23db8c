use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use warp::ws::Message;

use crate::error::{MonitorError, Result};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Transient identifier for a live socket. Assigned at connect time,
/// invalidated at disconnect, never persisted. Session ids, not connection
/// ids, are the stable join key between kiosk and admin sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(raw: u64) -> Self {
        ConnectionId(raw)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A live bidirectional channel: the connection id plus the outbound half
/// feeding the socket's sender task. Cloning the handle clones the sender,
/// not the socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<Message>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: ConnectionId::next(),
            sender,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, message: Message) -> Result<()> {
        self.sender
            .send(message)
            .map_err(|_| MonitorError::ConnectionClosed(self.id.to_string()))
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = ConnectionHandle::new(tx.clone());
        let b = ConnectionHandle::new(tx);
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
    }

    #[test]
    fn test_send_after_receiver_dropped_reports_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(tx);
        drop(rx);

        let err = handle.send(Message::text("hello")).unwrap_err();
        assert!(matches!(err, MonitorError::ConnectionClosed(_)));
    }
}
