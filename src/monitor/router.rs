use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use super::connection::{ConnectionHandle, ConnectionId};
use super::registry::SessionId;
use super::signaling::SignalMessage;
use crate::error::{MonitorError, Result};

/// Which live connections currently represent the kiosk and the viewers
/// for one session. At most one kiosk owns a session's media stream;
/// viewers are deduplicated by connection id, insertion order irrelevant.
#[derive(Default)]
struct RoutingEntry {
    kiosk: Option<ConnectionHandle>,
    viewers: Vec<ConnectionHandle>,
}

impl RoutingEntry {
    fn is_empty(&self) -> bool {
        self.kiosk.is_none() && self.viewers.is_empty()
    }
}

/// Maps session ids to the connection(s) that must receive a signaling
/// message. Keyed by session id, never by connection handle: handles are
/// reissued on reconnect, the session id is the stable join key both sides
/// learned out-of-band (login response / login broadcast).
pub struct SignalingRouter {
    entries: Arc<RwLock<HashMap<SessionId, RoutingEntry>>>,
}

impl SignalingRouter {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Sets the kiosk handle for a session, last-register-wins: a stale
    /// kiosk connection stops being reachable the moment a new one
    /// registers for the same session.
    pub async fn register_kiosk(&self, session_id: &str, handle: ConnectionHandle) {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(session_id.to_string()).or_default();

        if let Some(previous) = &entry.kiosk {
            if previous.id() != handle.id() {
                tracing::info!(
                    session_id = %session_id,
                    old_connection = %previous.id(),
                    new_connection = %handle.id(),
                    "Replacing registered kiosk connection"
                );
            }
        }

        entry.kiosk = Some(handle);
    }

    /// Remembers the admin as a viewer of the session, then delivers the
    /// offer to the registered kiosk with `adminConnectionRef` stamped. No
    /// kiosk means the offer is dropped with `KioskUnavailable` — the
    /// viewer registration survives, so a resend after `register-kiosk`
    /// goes through.
    pub async fn forward_offer(
        &self,
        session_id: &str,
        admin: &ConnectionHandle,
        offer: Value,
    ) -> Result<()> {
        let kiosk = {
            let mut entries = self.entries.write().await;
            let entry = entries.entry(session_id.to_string()).or_default();

            if !entry.viewers.iter().any(|v| v.id() == admin.id()) {
                entry.viewers.push(admin.clone());
                tracing::debug!(
                    session_id = %session_id,
                    connection_id = %admin.id(),
                    viewer_count = entry.viewers.len(),
                    "Admin added to viewer set"
                );
            }

            entry.kiosk.clone()
        };

        let kiosk = kiosk.ok_or_else(|| MonitorError::KioskUnavailable(session_id.to_string()))?;

        let message = SignalMessage::AdminOffer {
            session_id: session_id.to_string(),
            offer,
            admin_connection_ref: Some(admin.id().as_u64()),
        };
        self.deliver(&kiosk, &message, session_id);
        Ok(())
    }

    /// Point-to-point delivery of the kiosk's answer to the admin that
    /// originated the corresponding offer.
    pub async fn forward_answer(
        &self,
        session_id: &str,
        admin_ref: ConnectionId,
        answer: Value,
    ) -> Result<()> {
        let admin = {
            let entries = self.entries.read().await;
            entries
                .get(session_id)
                .and_then(|entry| entry.viewers.iter().find(|v| v.id() == admin_ref))
                .cloned()
        };

        let admin = admin.ok_or_else(|| MonitorError::RouteNotFound(session_id.to_string()))?;

        let message = SignalMessage::WebrtcAnswer {
            session_id: session_id.to_string(),
            answer,
            admin_connection_ref: admin_ref.as_u64(),
        };
        self.deliver(&admin, &message, session_id);
        Ok(())
    }

    /// Routes an ICE candidate by sender role: from the registered kiosk it
    /// fans out to every current viewer of that session, from anyone else
    /// it goes solely to the kiosk.
    pub async fn forward_ice_candidate(
        &self,
        session_id: &str,
        sender: ConnectionId,
        candidate: Value,
    ) -> Result<()> {
        let (kiosk, viewers) = {
            let entries = self.entries.read().await;
            let entry = entries
                .get(session_id)
                .ok_or_else(|| MonitorError::RouteNotFound(session_id.to_string()))?;
            (entry.kiosk.clone(), entry.viewers.clone())
        };

        let message = SignalMessage::WebrtcIceCandidate {
            session_id: session_id.to_string(),
            candidate,
        };

        let sender_is_kiosk = kiosk.as_ref().map(|k| k.id()) == Some(sender);
        if sender_is_kiosk {
            for viewer in &viewers {
                self.deliver(viewer, &message, session_id);
            }
            return Ok(());
        }

        let kiosk = kiosk.ok_or_else(|| MonitorError::KioskUnavailable(session_id.to_string()))?;
        self.deliver(&kiosk, &message, session_id);
        Ok(())
    }

    /// Removes a dead connection from every routing entry: cleared as kiosk
    /// wherever it matches, pruned from every viewer set, and entries left
    /// with neither are dropped. A full scan — there is no reverse index —
    /// which is fine at lab-fleet scale. No-op for unknown connections.
    pub async fn drop_connection(&self, connection_id: ConnectionId) {
        let mut entries = self.entries.write().await;
        let mut touched = 0usize;

        entries.retain(|session_id, entry| {
            let mut changed = false;

            if entry.kiosk.as_ref().map(|k| k.id()) == Some(connection_id) {
                entry.kiosk = None;
                changed = true;
                tracing::debug!(
                    session_id = %session_id,
                    connection_id = %connection_id,
                    "Cleared kiosk handle for dropped connection"
                );
            }

            let before = entry.viewers.len();
            entry.viewers.retain(|v| v.id() != connection_id);
            changed |= entry.viewers.len() != before;

            if changed {
                touched += 1;
            }
            !entry.is_empty()
        });

        if touched > 0 {
            tracing::info!(
                connection_id = %connection_id,
                sessions = touched,
                "Pruned routing entries for dropped connection"
            );
        }
    }

    /// The connection currently registered as kiosk for a session.
    pub async fn kiosk_for(&self, session_id: &str) -> Option<ConnectionId> {
        let entries = self.entries.read().await;
        entries
            .get(session_id)
            .and_then(|entry| entry.kiosk.as_ref().map(|k| k.id()))
    }

    /// The viewer set of a session, by connection id.
    pub async fn viewers_for(&self, session_id: &str) -> Vec<ConnectionId> {
        let entries = self.entries.read().await;
        entries
            .get(session_id)
            .map(|entry| entry.viewers.iter().map(|v| v.id()).collect())
            .unwrap_or_default()
    }

    pub async fn has_route(&self, session_id: &str) -> bool {
        let entries = self.entries.read().await;
        entries.contains_key(session_id)
    }

    /// Best-effort send: a failed delivery is logged and the message
    /// dropped, never retried.
    fn deliver(&self, target: &ConnectionHandle, message: &SignalMessage, session_id: &str) {
        let ws_message = match message.to_ws_message() {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Failed to serialize signaling message");
                return;
            }
        };

        if let Err(e) = target.send(ws_message) {
            tracing::warn!(
                session_id = %session_id,
                connection_id = %target.id(),
                error = %e,
                "Failed to deliver signaling message"
            );
        }
    }
}

impl Default for SignalingRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;
    use warp::ws::Message;

    fn test_handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx), rx)
    }

    fn received(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Value> {
        let mut messages = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            messages.push(serde_json::from_str(msg.to_str().unwrap()).unwrap());
        }
        messages
    }

    #[tokio::test]
    async fn test_offer_without_kiosk_is_unavailable_but_remembers_viewer() {
        let router = SignalingRouter::new();
        let (admin, _admin_rx) = test_handle();

        let err = router
            .forward_offer("S1", &admin, json!({"sdp": "v=0"}))
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::KioskUnavailable(_)));
        assert_eq!(router.viewers_for("S1").await, vec![admin.id()]);

        // After the kiosk registers, a resend goes through
        let (kiosk, mut kiosk_rx) = test_handle();
        router.register_kiosk("S1", kiosk).await;
        router
            .forward_offer("S1", &admin, json!({"sdp": "v=0"}))
            .await
            .unwrap();

        let delivered = received(&mut kiosk_rx);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0]["type"], "admin-offer");
        assert_eq!(delivered[0]["adminConnectionRef"], admin.id().as_u64());
    }

    #[tokio::test]
    async fn test_register_kiosk_last_wins() {
        let router = SignalingRouter::new();
        let (old_kiosk, mut old_rx) = test_handle();
        let (new_kiosk, mut new_rx) = test_handle();
        let (admin, _admin_rx) = test_handle();

        router.register_kiosk("S1", old_kiosk.clone()).await;
        router.register_kiosk("S1", new_kiosk.clone()).await;
        assert_eq!(router.kiosk_for("S1").await, Some(new_kiosk.id()));

        router
            .forward_offer("S1", &admin, json!({"sdp": "v=0"}))
            .await
            .unwrap();
        router
            .forward_ice_candidate("S1", admin.id(), json!({"candidate": "c"}))
            .await
            .unwrap();

        assert!(received(&mut old_rx).is_empty());
        assert_eq!(received(&mut new_rx).len(), 2);
    }

    #[tokio::test]
    async fn test_offer_does_not_duplicate_viewer() {
        let router = SignalingRouter::new();
        let (kiosk, _kiosk_rx) = test_handle();
        let (admin, _admin_rx) = test_handle();
        router.register_kiosk("S1", kiosk).await;

        for _ in 0..3 {
            router
                .forward_offer("S1", &admin, json!({"sdp": "v=0"}))
                .await
                .unwrap();
        }
        assert_eq!(router.viewers_for("S1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_answer_goes_to_originating_admin_only() {
        let router = SignalingRouter::new();
        let (kiosk, _kiosk_rx) = test_handle();
        let (admin_a, mut rx_a) = test_handle();
        let (admin_b, mut rx_b) = test_handle();

        router.register_kiosk("S1", kiosk).await;
        router
            .forward_offer("S1", &admin_a, json!({"sdp": "a"}))
            .await
            .unwrap();
        router
            .forward_offer("S1", &admin_b, json!({"sdp": "b"}))
            .await
            .unwrap();

        router
            .forward_answer("S1", admin_a.id(), json!({"sdp": "answer"}))
            .await
            .unwrap();

        let for_a = received(&mut rx_a);
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0]["type"], "webrtc-answer");
        assert!(received(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_answer_to_unknown_admin_is_route_not_found() {
        let router = SignalingRouter::new();
        let (kiosk, _kiosk_rx) = test_handle();
        router.register_kiosk("S1", kiosk).await;

        let err = router
            .forward_answer("S1", ConnectionId::from(9999), json!({"sdp": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::RouteNotFound(_)));
    }

    #[tokio::test]
    async fn test_kiosk_candidate_fans_out_to_exactly_the_viewer_set() {
        let router = SignalingRouter::new();
        let (kiosk, _kiosk_rx) = test_handle();
        let (admin_a, mut rx_a) = test_handle();
        let (admin_b, mut rx_b) = test_handle();
        let (other_admin, mut rx_other) = test_handle();
        let (other_kiosk, mut rx_other_kiosk) = test_handle();

        router.register_kiosk("S1", kiosk.clone()).await;
        router
            .forward_offer("S1", &admin_a, json!({"sdp": "a"}))
            .await
            .unwrap();
        router
            .forward_offer("S1", &admin_b, json!({"sdp": "b"}))
            .await
            .unwrap();

        // A second session that must not see S1's candidates
        router.register_kiosk("S2", other_kiosk).await;
        router
            .forward_offer("S2", &other_admin, json!({"sdp": "o"}))
            .await
            .unwrap();
        let _ = received(&mut rx_other_kiosk);

        router
            .forward_ice_candidate("S1", kiosk.id(), json!({"candidate": "c1"}))
            .await
            .unwrap();

        assert_eq!(received(&mut rx_a).len(), 1);
        assert_eq!(received(&mut rx_b).len(), 1);
        assert!(received(&mut rx_other).is_empty());
        assert!(received(&mut rx_other_kiosk).is_empty());
    }

    #[tokio::test]
    async fn test_admin_candidate_goes_only_to_kiosk() {
        let router = SignalingRouter::new();
        let (kiosk, mut kiosk_rx) = test_handle();
        let (admin_a, mut rx_a) = test_handle();
        let (admin_b, mut rx_b) = test_handle();

        router.register_kiosk("S1", kiosk).await;
        router
            .forward_offer("S1", &admin_a, json!({"sdp": "a"}))
            .await
            .unwrap();
        router
            .forward_offer("S1", &admin_b, json!({"sdp": "b"}))
            .await
            .unwrap();
        let _ = received(&mut kiosk_rx);

        router
            .forward_ice_candidate("S1", admin_a.id(), json!({"candidate": "c"}))
            .await
            .unwrap();

        let for_kiosk = received(&mut kiosk_rx);
        assert_eq!(for_kiosk.len(), 1);
        assert_eq!(for_kiosk[0]["type"], "webrtc-ice-candidate");
        assert!(received(&mut rx_a).is_empty());
        assert!(received(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_candidate_for_unknown_session_is_route_not_found() {
        let router = SignalingRouter::new();
        let (sender, _rx) = test_handle();

        let err = router
            .forward_ice_candidate("S-unknown", sender.id(), json!({"candidate": "c"}))
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::RouteNotFound(_)));
    }

    #[tokio::test]
    async fn test_drop_connection_prunes_everywhere() {
        let router = SignalingRouter::new();
        let (kiosk, _kiosk_rx) = test_handle();
        let (admin, _admin_rx) = test_handle();

        // Same admin watching two sessions, kiosk on one of them
        router.register_kiosk("S1", kiosk.clone()).await;
        router
            .forward_offer("S1", &admin, json!({"sdp": "a"}))
            .await
            .unwrap();
        let _ = router.forward_offer("S2", &admin, json!({"sdp": "b"})).await;

        router.drop_connection(admin.id()).await;
        assert!(router.viewers_for("S1").await.is_empty());
        // S2 had only this viewer, so the whole entry is gone
        assert!(!router.has_route("S2").await);

        router.drop_connection(kiosk.id()).await;
        assert_eq!(router.kiosk_for("S1").await, None);
        assert!(!router.has_route("S1").await);
    }

    #[tokio::test]
    async fn test_drop_unknown_connection_is_noop() {
        let router = SignalingRouter::new();
        let (kiosk, _kiosk_rx) = test_handle();
        router.register_kiosk("S1", kiosk.clone()).await;

        router.drop_connection(ConnectionId::from(424242)).await;
        assert_eq!(router.kiosk_for("S1").await, Some(kiosk.id()));
    }
}
