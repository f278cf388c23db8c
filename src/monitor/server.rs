use serde_json::Value;

use super::broadcast::EventBroadcaster;
use super::connection::{ConnectionHandle, ConnectionId};
use super::registry::{now_millis, CloseOutcome, SessionRecord, SessionRegistry};
use super::router::SignalingRouter;
use super::signaling::SignalMessage;
use crate::error::{MonitorError, Result};

/// Composition root for the monitoring core: the session registry, the
/// signaling router and the event broadcaster behind one shared handle,
/// invoked from both the HTTP session API and the per-socket signaling
/// handlers.
pub struct MonitorServer {
    registry: SessionRegistry,
    router: SignalingRouter,
    broadcaster: EventBroadcaster,
}

impl MonitorServer {
    pub fn new() -> Self {
        Self {
            registry: SessionRegistry::new(),
            router: SignalingRouter::new(),
            broadcaster: EventBroadcaster::new(),
        }
    }

    // Session lifecycle, driven by the HTTP layer

    /// Opens a session (force-completing any active one on the same
    /// computer) and announces the login to all observers.
    pub async fn student_login(
        &self,
        student_name: &str,
        student_id: &str,
        computer_name: &str,
        lab_id: &str,
        system_number: &str,
    ) -> SessionRecord {
        let session = self
            .registry
            .open_session(student_name, student_id, computer_name, lab_id, system_number)
            .await;

        self.broadcaster
            .publish(&SignalMessage::StudentLogin {
                session_id: session.id.clone(),
                student_name: session.student_name.clone(),
                student_id: session.student_id.clone(),
                computer_name: session.computer_name.clone(),
                lab_id: session.lab_id.clone(),
                system_number: session.system_number.clone(),
                login_time: session.login_time,
            })
            .await;

        session
    }

    /// Closes a session and, when this call actually completed it,
    /// announces the logout and the stream-stop trigger. A repeated logout
    /// returns the record without rebroadcasting.
    pub async fn student_logout(&self, session_id: &str) -> Result<SessionRecord> {
        match self.registry.close_session(session_id).await? {
            CloseOutcome::Closed(session) => {
                self.broadcaster
                    .publish(&SignalMessage::StudentLogout {
                        session_id: session.id.clone(),
                        student_name: session.student_name.clone(),
                        computer_name: session.computer_name.clone(),
                        logout_time: session.logout_time.unwrap_or_default(),
                        duration: session.duration.unwrap_or_default(),
                    })
                    .await;
                self.broadcaster
                    .publish(&SignalMessage::StopLiveStream {
                        session_id: session.id.clone(),
                    })
                    .await;
                Ok(session)
            }
            CloseOutcome::AlreadyCompleted(session) => Ok(session),
        }
    }

    /// Stores the latest screenshot and announces it with a server
    /// timestamp. The blob is never inspected.
    pub async fn update_screenshot(&self, session_id: &str, screenshot: String) -> Result<()> {
        self.registry
            .update_screenshot(session_id, screenshot.clone())
            .await?;

        self.broadcaster
            .publish(&SignalMessage::ScreenshotUpdate {
                session_id: session_id.to_string(),
                screenshot,
                timestamp: now_millis(),
            })
            .await;
        Ok(())
    }

    pub async fn active_sessions(&self, lab_filter: Option<&str>) -> Vec<SessionRecord> {
        self.registry.list_active(lab_filter).await
    }

    pub async fn session_history(&self, limit: usize) -> Vec<SessionRecord> {
        self.registry.history(limit).await
    }

    pub async fn session_on_computer(&self, computer_name: &str) -> Option<SessionRecord> {
        self.registry.get_by_computer(computer_name).await
    }

    // Signaling, driven by the per-socket handlers

    /// Registers a kiosk connection for a session. A kiosk may only claim
    /// sessions that exist in the registry; a successful registration
    /// announces the stream-start trigger.
    pub async fn register_kiosk(&self, session_id: &str, handle: ConnectionHandle) -> Result<()> {
        if self.registry.get(session_id).await.is_none() {
            return Err(MonitorError::SessionNotFound(session_id.to_string()));
        }

        self.router.register_kiosk(session_id, handle).await;
        tracing::info!(session_id = %session_id, "Kiosk registered for session");

        self.broadcaster
            .publish(&SignalMessage::StartLiveStream {
                session_id: session_id.to_string(),
            })
            .await;
        Ok(())
    }

    pub async fn forward_offer(
        &self,
        session_id: &str,
        admin: &ConnectionHandle,
        offer: Value,
    ) -> Result<()> {
        self.router.forward_offer(session_id, admin, offer).await
    }

    pub async fn forward_answer(
        &self,
        session_id: &str,
        admin_ref: ConnectionId,
        answer: Value,
    ) -> Result<()> {
        self.router.forward_answer(session_id, admin_ref, answer).await
    }

    pub async fn forward_ice_candidate(
        &self,
        session_id: &str,
        sender: ConnectionId,
        candidate: Value,
    ) -> Result<()> {
        self.router
            .forward_ice_candidate(session_id, sender, candidate)
            .await
    }

    // Connection lifecycle

    pub async fn attach(&self, handle: ConnectionHandle) {
        tracing::info!(connection_id = %handle.id(), "Connection attached");
        self.broadcaster.subscribe(handle).await;
    }

    /// Prunes every routing entry and the broadcast subscription for a
    /// dropped connection. The registry is left untouched: a kiosk that
    /// disconnects without logging out leaves its session active until an
    /// explicit logout arrives.
    pub async fn detach(&self, connection_id: ConnectionId) {
        self.broadcaster.unsubscribe(connection_id).await;
        self.router.drop_connection(connection_id).await;
        tracing::info!(connection_id = %connection_id, "Connection detached");
    }

    #[cfg(test)]
    pub fn router(&self) -> &SignalingRouter {
        &self.router
    }
}

impl Default for MonitorServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use warp::ws::Message;

    fn test_handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Value> {
        let mut events = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            events.push(serde_json::from_str(msg.to_str().unwrap()).unwrap());
        }
        events
    }

    async fn login(server: &MonitorServer, computer: &str) -> SessionRecord {
        server
            .student_login("John Doe", "2024001", computer, "LAB-01", "3")
            .await
    }

    #[tokio::test]
    async fn test_login_is_broadcast_to_observers() {
        let server = MonitorServer::new();
        let (observer, mut rx) = test_handle();
        server.attach(observer).await;

        let session = login(&server, "LAB1-PC03").await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "student-login");
        assert_eq!(events[0]["sessionId"], session.id);
        assert_eq!(events[0]["computerName"], "LAB1-PC03");
    }

    #[tokio::test]
    async fn test_logout_broadcasts_once() {
        let server = MonitorServer::new();
        let session = login(&server, "LAB1-PC03").await;

        let (observer, mut rx) = test_handle();
        server.attach(observer).await;

        server.student_logout(&session.id).await.unwrap();
        let events = drain(&mut rx);
        let types: Vec<_> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["student-logout", "stop-live-stream"]);

        // Second logout: record returned, nothing rebroadcast
        server.student_logout(&session.id).await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_logout_unknown_session() {
        let server = MonitorServer::new();
        let err = server.student_logout("SESSION_0_999").await.unwrap_err();
        assert!(matches!(err, MonitorError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_register_kiosk_requires_existing_session() {
        let server = MonitorServer::new();
        let (kiosk, _rx) = test_handle();

        let err = server
            .register_kiosk("SESSION_0_999", kiosk)
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::SessionNotFound(_)));
        assert!(!server.router().has_route("SESSION_0_999").await);
    }

    #[tokio::test]
    async fn test_register_kiosk_announces_stream_start() {
        let server = MonitorServer::new();
        let session = login(&server, "LAB1-PC03").await;

        let (kiosk, mut kiosk_rx) = test_handle();
        server.attach(kiosk.clone()).await;
        server.register_kiosk(&session.id, kiosk.clone()).await.unwrap();

        let events = drain(&mut kiosk_rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "start-live-stream");
        assert_eq!(events[0]["sessionId"], session.id);
        assert_eq!(server.router().kiosk_for(&session.id).await, Some(kiosk.id()));
    }

    #[tokio::test]
    async fn test_screenshot_update_is_broadcast() {
        let server = MonitorServer::new();
        let session = login(&server, "LAB1-PC03").await;

        let (observer, mut rx) = test_handle();
        server.attach(observer).await;

        server
            .update_screenshot(&session.id, "data:image/png;base64,AAAA".to_string())
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "screenshot-update");
        assert_eq!(events[0]["sessionId"], session.id);
        assert!(events[0]["timestamp"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_full_signaling_exchange() {
        let server = MonitorServer::new();
        let session = login(&server, "LAB1-PC03").await;

        let (kiosk, mut kiosk_rx) = test_handle();
        let (admin, mut admin_rx) = test_handle();
        server.register_kiosk(&session.id, kiosk.clone()).await.unwrap();

        // Offer reaches the kiosk with the admin ref stamped
        server
            .forward_offer(&session.id, &admin, json!({"sdp": "offer"}))
            .await
            .unwrap();
        let to_kiosk = drain(&mut kiosk_rx);
        assert_eq!(to_kiosk.len(), 1);
        let admin_ref = to_kiosk[0]["adminConnectionRef"].as_u64().unwrap();
        assert_eq!(admin_ref, admin.id().as_u64());

        // Answer comes back point-to-point
        server
            .forward_answer(&session.id, admin_ref.into(), json!({"sdp": "answer"}))
            .await
            .unwrap();
        let to_admin = drain(&mut admin_rx);
        assert_eq!(to_admin.len(), 1);
        assert_eq!(to_admin[0]["type"], "webrtc-answer");

        // ICE both directions
        server
            .forward_ice_candidate(&session.id, kiosk.id(), json!({"candidate": "k"}))
            .await
            .unwrap();
        assert_eq!(drain(&mut admin_rx).len(), 1);

        server
            .forward_ice_candidate(&session.id, admin.id(), json!({"candidate": "a"}))
            .await
            .unwrap();
        assert_eq!(drain(&mut kiosk_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_detach_prunes_routes_but_not_session() {
        let server = MonitorServer::new();
        let session = login(&server, "LAB1-PC03").await;

        let (kiosk, _kiosk_rx) = test_handle();
        server.attach(kiosk.clone()).await;
        server.register_kiosk(&session.id, kiosk.clone()).await.unwrap();

        server.detach(kiosk.id()).await;

        assert_eq!(server.router().kiosk_for(&session.id).await, None);
        // Registry untouched: the session stays active until explicit logout
        let active = server.active_sessions(None).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, session.id);
    }
}
