use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use warp::http::StatusCode;
use warp::Filter;

use super::websocket;
use crate::config::Config;
use crate::error::MonitorError;
use crate::monitor::{now_millis, MonitorServer};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub student_name: String,
    pub student_id: String,
    pub computer_name: String,
    pub lab_id: String,
    pub system_number: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotRequest {
    pub session_id: String,
    pub screenshot: String,
}

/// All routes of the monitor server: the WebSocket upgrade plus the HTTP
/// session API consumed by kiosks and the admin dashboard.
pub fn monitor_routes(
    server: Arc<MonitorServer>,
    config: Arc<Config>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    monitor_websocket_route(server.clone())
        .or(student_login_route(server.clone()))
        .or(student_logout_route(server.clone()))
        .or(update_screenshot_route(server.clone()))
        .or(active_sessions_route(server.clone()))
        .or(session_history_route(server))
        .or(health_route())
        .or(config_route(config))
}

pub fn monitor_websocket_route(
    server: Arc<MonitorServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("ws")
        .and(warp::ws())
        .and(with_server(server))
        .map(|ws: warp::ws::Ws, server: Arc<MonitorServer>| {
            ws.on_upgrade(move |websocket| {
                websocket::handle_monitor_websocket(websocket, server)
            })
        })
}

pub fn student_login_route(
    server: Arc<MonitorServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "student-login")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_server(server))
        .then(|request: LoginRequest, server: Arc<MonitorServer>| async move {
            let session = server
                .student_login(
                    &request.student_name,
                    &request.student_id,
                    &request.computer_name,
                    &request.lab_id,
                    &request.system_number,
                )
                .await;

            warp::reply::json(&json!({
                "success": true,
                "sessionId": session.id,
            }))
        })
}

pub fn student_logout_route(
    server: Arc<MonitorServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "student-logout")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_server(server))
        .then(|request: LogoutRequest, server: Arc<MonitorServer>| async move {
            match server.student_logout(&request.session_id).await {
                Ok(session) => warp::reply::with_status(
                    warp::reply::json(&json!({
                        "success": true,
                        "session": session,
                    })),
                    StatusCode::OK,
                ),
                Err(e) => failure_reply(e),
            }
        })
}

pub fn update_screenshot_route(
    server: Arc<MonitorServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "update-screenshot")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_server(server))
        .then(
            |request: ScreenshotRequest, server: Arc<MonitorServer>| async move {
                match server
                    .update_screenshot(&request.session_id, request.screenshot)
                    .await
                {
                    Ok(()) => warp::reply::with_status(
                        warp::reply::json(&json!({ "success": true })),
                        StatusCode::OK,
                    ),
                    Err(e) => failure_reply(e),
                }
            },
        )
}

pub fn active_sessions_route(
    server: Arc<MonitorServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "active-sessions")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_server(server))
        .then(
            |query: HashMap<String, String>, server: Arc<MonitorServer>| async move {
                let sessions = server
                    .active_sessions(query.get("lab").map(String::as_str))
                    .await;
                warp::reply::json(&json!({
                    "success": true,
                    "sessions": sessions,
                }))
            },
        )
}

pub fn session_history_route(
    server: Arc<MonitorServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "session-history")
        .and(warp::get())
        .and(with_server(server))
        .then(|server: Arc<MonitorServer>| async move {
            let sessions = server.session_history(20).await;
            warp::reply::json(&json!({
                "success": true,
                "sessions": sessions,
            }))
        })
}

pub fn health_route() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "health").and(warp::get()).map(|| {
        warp::reply::json(&json!({
            "success": true,
            "status": "Server running",
            "timestamp": now_millis(),
        }))
    })
}

/// Client-facing configuration: the STUN server kiosks and viewers should
/// use, and the screenshot poll cadence.
pub fn config_route(
    config: Arc<Config>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "config").and(warp::get()).map(move || {
        warp::reply::json(&json!({
            "stunServerUrl": config.signaling.stun_server_url,
            "screenshotIntervalSecs": config.signaling.screenshot_interval_secs,
        }))
    })
}

fn failure_reply(error: MonitorError) -> warp::reply::WithStatus<warp::reply::Json> {
    let status = match &error {
        MonitorError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        MonitorError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        MonitorError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    warp::reply::with_status(
        warp::reply::json(&json!({
            "success": false,
            "error": error.to_string(),
        })),
        status,
    )
}

fn with_server(
    server: Arc<MonitorServer>,
) -> impl Filter<Extract = (Arc<MonitorServer>,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}
