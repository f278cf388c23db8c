use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use warp::ws::Message;

use super::connection::ConnectionHandle;
use super::server::MonitorServer;
use crate::error::Result;

/// Every message that crosses a monitor socket, in both directions. Tags
/// and field names are the wire protocol the kiosk and dashboard clients
/// already speak. SDP offers/answers and ICE candidates are opaque blobs:
/// the server routes them, never inspects them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SignalMessage {
    /// kiosk -> server: claim the media stream for a session
    RegisterKiosk { session_id: String },

    /// admin -> server -> kiosk. The server stamps `adminConnectionRef` on
    /// the way through so the kiosk can address its answer.
    AdminOffer {
        session_id: String,
        offer: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        admin_connection_ref: Option<u64>,
    },

    /// kiosk -> server -> admin, point-to-point via `adminConnectionRef`
    WebrtcAnswer {
        session_id: String,
        answer: Value,
        admin_connection_ref: u64,
    },

    /// either role -> server; routed by comparing the sender to the
    /// registered kiosk handle
    WebrtcIceCandidate { session_id: String, candidate: Value },

    /// server -> all observers
    StudentLogin {
        session_id: String,
        student_name: String,
        student_id: String,
        computer_name: String,
        lab_id: String,
        system_number: String,
        login_time: u64,
    },

    /// server -> all observers
    StudentLogout {
        session_id: String,
        student_name: String,
        computer_name: String,
        logout_time: u64,
        duration: u64,
    },

    /// server -> all observers
    ScreenshotUpdate {
        session_id: String,
        screenshot: String,
        timestamp: u64,
    },

    /// server -> all observers, session start trigger
    StartLiveStream { session_id: String },

    /// server -> all observers, session end trigger
    StopLiveStream { session_id: String },
}

impl SignalMessage {
    pub fn to_ws_message(&self) -> Result<Message> {
        Ok(Message::text(serde_json::to_string(self)?))
    }
}

/// Per-connection dispatch: owns this socket's handle and forwards inbound
/// frames to the shared server. One instance per WebSocket, dropped with it.
pub struct SignalingHandler {
    server: Arc<MonitorServer>,
    handle: ConnectionHandle,
}

impl SignalingHandler {
    pub fn new(server: Arc<MonitorServer>, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            server,
            handle: ConnectionHandle::new(sender),
        }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Subscribes this connection to the broadcast feed. No registry or
    /// router side effects until the client registers as kiosk or sends a
    /// first signaling message.
    pub async fn attach(&self) {
        self.server.attach(self.handle.clone()).await;
    }

    pub async fn handle_message(&mut self, message: SignalMessage) {
        let connection_id = self.handle.id();

        let result = match message {
            SignalMessage::RegisterKiosk { session_id } => {
                self.server
                    .register_kiosk(&session_id, self.handle.clone())
                    .await
            }
            SignalMessage::AdminOffer {
                session_id, offer, ..
            } => {
                self.server
                    .forward_offer(&session_id, &self.handle, offer)
                    .await
            }
            SignalMessage::WebrtcAnswer {
                session_id,
                answer,
                admin_connection_ref,
            } => {
                self.server
                    .forward_answer(&session_id, admin_connection_ref.into(), answer)
                    .await
            }
            SignalMessage::WebrtcIceCandidate {
                session_id,
                candidate,
            } => {
                self.server
                    .forward_ice_candidate(&session_id, connection_id, candidate)
                    .await
            }
            other => {
                tracing::warn!(
                    connection_id = %connection_id,
                    message_type = ?other,
                    "Ignoring server-originated message type from client"
                );
                Ok(())
            }
        };

        if let Err(e) = result {
            // Signaling errors are non-fatal: drop the message, keep the
            // connection open, the client may retry.
            if e.is_signaling() {
                tracing::warn!(connection_id = %connection_id, error = %e, "Dropped signaling message");
            } else {
                tracing::error!(connection_id = %connection_id, error = %e, "Error handling signaling message");
            }
        }
    }

    /// Disconnect hook: prunes routing entries and the broadcast
    /// subscription. Deliberately does NOT close any registry session —
    /// session closure is driven by explicit logout only, so a kiosk that
    /// goes dark leaves its session active until someone logs it out.
    pub async fn cleanup(&self) {
        self.server.detach(self.handle.id()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_register_kiosk() {
        let msg: SignalMessage =
            serde_json::from_str(r#"{"type":"register-kiosk","sessionId":"SESSION_1_1"}"#).unwrap();
        assert!(matches!(
            msg,
            SignalMessage::RegisterKiosk { session_id } if session_id == "SESSION_1_1"
        ));
    }

    #[test]
    fn test_parses_admin_offer_without_connection_ref() {
        let msg: SignalMessage = serde_json::from_str(
            r#"{"type":"admin-offer","sessionId":"S1","offer":{"type":"offer","sdp":"v=0..."}}"#,
        )
        .unwrap();
        match msg {
            SignalMessage::AdminOffer {
                session_id,
                admin_connection_ref,
                ..
            } => {
                assert_eq!(session_id, "S1");
                assert!(admin_connection_ref.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parses_webrtc_answer() {
        let msg: SignalMessage = serde_json::from_str(
            r#"{"type":"webrtc-answer","sessionId":"S1","answer":{"sdp":"v=0..."},"adminConnectionRef":7}"#,
        )
        .unwrap();
        match msg {
            SignalMessage::WebrtcAnswer {
                admin_connection_ref,
                ..
            } => assert_eq!(admin_connection_ref, 7),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_student_login_wire_shape() {
        let msg = SignalMessage::StudentLogin {
            session_id: "SESSION_1_1".to_string(),
            student_name: "John Doe".to_string(),
            student_id: "2024001".to_string(),
            computer_name: "LAB1-PC03".to_string(),
            lab_id: "LAB-01".to_string(),
            system_number: "3".to_string(),
            login_time: 1_700_000_000_000,
        };

        let value: Value = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(value["type"], "student-login");
        assert_eq!(value["sessionId"], "SESSION_1_1");
        assert_eq!(value["studentName"], "John Doe");
        assert_eq!(value["computerName"], "LAB1-PC03");
        assert_eq!(value["loginTime"], 1_700_000_000_000u64);
    }

    #[test]
    fn test_ice_candidate_payload_stays_opaque() {
        let candidate = json!({
            "candidate": "candidate:0 1 UDP 2122252543 10.0.0.7 49203 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0
        });
        let msg = SignalMessage::WebrtcIceCandidate {
            session_id: "S1".to_string(),
            candidate: candidate.clone(),
        };

        let round_trip: SignalMessage =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        match round_trip {
            SignalMessage::WebrtcIceCandidate {
                candidate: parsed, ..
            } => assert_eq!(parsed, candidate),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_type() {
        let result =
            serde_json::from_str::<SignalMessage>(r#"{"type":"shutdown-lab","sessionId":"S1"}"#);
        assert!(result.is_err());
    }
}
