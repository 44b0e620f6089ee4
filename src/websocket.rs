use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{HeaderValue, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::hub::BroadcastHub;
use crate::types::{ControlMessage, ObserverId};

/// Shared application state
#[derive(Clone)]
pub struct BrokerState {
    pub hub: BroadcastHub,
    pub started_at: Instant,
}

impl BrokerState {
    pub fn new(hub: BroadcastHub) -> Self {
        Self {
            hub,
            started_at: Instant::now(),
        }
    }
}

/// Build the observer-facing HTTP router
pub fn router(state: BrokerState, cors_origins: &[String]) -> Router {
    let cors = if cors_origins.iter().any(|origin| origin == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = cors_origins
            .iter()
            .filter_map(|origin| origin.parse::<HeaderValue>().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/ws", get(handle_websocket))
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub connected_observers: usize,
    pub uptime_seconds: u64,
}

/// Health check endpoint
pub async fn health_check(State(state): State<BrokerState>) -> (StatusCode, Json<HealthResponse>) {
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connected_observers: state.hub.observer_count(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    };

    (StatusCode::OK, Json(response))
}

/// Handle WebSocket upgrade
pub async fn handle_websocket(ws: WebSocketUpgrade, State(state): State<BrokerState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle individual observer connection
async fn handle_socket(socket: WebSocket, state: BrokerState) {
    let (mut sender, mut receiver) = socket.split();
    let mut handle = state.hub.connect();
    let observer_id = handle.id;

    info!("Observer {} connected", observer_id);

    loop {
        tokio::select! {
            update = handle.updates.recv() => {
                let Some(update) = update else {
                    // the hub dropped us
                    break;
                };
                if let Err(e) = sender.send(Message::Text(update.to_string().into())).await {
                    warn!("Failed to deliver update to observer {}: {}", observer_id, e);
                    break;
                }
            }
            msg = receiver.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        error!("WebSocket error from observer {}: {}", observer_id, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => handle_control_message(&state.hub, &observer_id, &text),
                    Message::Close(_) => {
                        info!("Observer {} closed the connection", observer_id);
                        break;
                    }
                    Message::Ping(data) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    state.hub.disconnect(&observer_id);
    info!("Observer {} terminated", observer_id);
}

/// Apply one subscribe/unsubscribe message; malformed messages are skipped
fn handle_control_message(hub: &BroadcastHub, observer_id: &ObserverId, text: &str) {
    let control: ControlMessage = match serde_json::from_str(text) {
        Ok(control) => control,
        Err(e) => {
            warn!("Ignoring malformed control message from {}: {}", observer_id, e);
            return;
        }
    };

    let target = control.target();
    let applied = match control {
        ControlMessage::Subscribe { .. } => hub.subscribe(observer_id, target),
        ControlMessage::Unsubscribe { .. } => hub.unsubscribe(observer_id, target),
    };

    if applied {
        debug!(
            "Observer {} {:?} -> {:?}",
            observer_id,
            control,
            hub.subscription(observer_id)
        );
    } else {
        warn!("Control message for unknown observer {}", observer_id);
    }
}
