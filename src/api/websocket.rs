use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::error::MonitorError;
use crate::monitor::{MonitorServer, SignalMessage, SignalingHandler};

pub async fn handle_monitor_websocket(websocket: WebSocket, server: Arc<MonitorServer>) {
    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let mut signaling_handler = SignalingHandler::new(server, tx);
    let connection_id = signaling_handler.connection().id();
    tracing::info!(connection_id = %connection_id, "New monitor WebSocket connection established");

    // Subscribe to the broadcast feed before processing any frames so the
    // connection observes events from the moment it is attached
    signaling_handler.attach().await;

    // Spawn task to send messages to client
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                tracing::error!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                handle_websocket_message(&mut signaling_handler, message).await;
            }
            Err(e) => {
                tracing::error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    signaling_handler.cleanup().await;
    sender_task.abort();
    tracing::info!(connection_id = %connection_id, "Monitor WebSocket connection closed");
}

async fn handle_websocket_message(signaling_handler: &mut SignalingHandler, message: Message) {
    if let Ok(text) = message.to_str() {
        tracing::debug!("Received signaling message: {}", text);

        match serde_json::from_str::<SignalMessage>(text) {
            Ok(signal_message) => {
                signaling_handler.handle_message(signal_message).await;
            }
            Err(e) => {
                // Malformed frames are dropped, the connection stays open
                let err = MonitorError::invalid_payload(e.to_string());
                tracing::warn!(
                    error = %err,
                    raw_message = %text,
                    "Failed to parse signaling message"
                );
            }
        }
    }
}
