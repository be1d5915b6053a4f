//! WebSocket transport: one room subscription per tenant plus a direct,
//! instance-addressed channel for commands (spec.md §6, §4.10, §4.11).

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::AuthContext;
use crate::domain::ConnectionType;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub agent_name: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<WsQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, auth, query.agent_name))
}

/// Reconciles the tenant's room broadcast, its own instance-addressed
/// channel, and the client's own frames in one loop until either side closes,
/// mirroring the select-on-two-sources pattern used for server push (§4.10).
async fn handle_socket(mut socket: WebSocket, state: AppState, auth: AuthContext, agent_name: Option<String>) {
    let instance_id = Uuid::new_v4().to_string();
    let team_id = auth.team_id.clone();

    state
        .agent_status
        .heartbeat(&team_id, &instance_id, ConnectionType::Websocket, None, agent_name)
        .await;

    let mut room_rx = state.fanout.subscribe(&auth.team().llm_events_room()).await;
    let mut alert_rx = state.fanout.subscribe(&auth.team().alerts_room()).await;
    let mut instance_rx = state.fanout.register_instance(&instance_id, &team_id).await;

    let welcome = json!({"type": "subscribed", "instance_id": instance_id});
    if socket.send(Message::Text(welcome.to_string())).await.is_err() {
        cleanup(&state, &team_id, &instance_id).await;
        return;
    }

    loop {
        tokio::select! {
            batch = room_rx.recv() => {
                match batch {
                    Ok(payload) => {
                        if socket.send(Message::Text(payload.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(instance_id, skipped, "websocket lagged behind event room");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            alert = alert_rx.recv() => {
                match alert {
                    Ok(payload) => {
                        if socket.send(Message::Text(payload.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            command = instance_rx.recv() => {
                match command {
                    Some(payload) => {
                        if socket.send(Message::Text(payload.to_string())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => handle_client_frame(&state, &team_id, &instance_id, &text).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    cleanup(&state, &team_id, &instance_id).await;
}

async fn handle_client_frame(state: &AppState, team_id: &str, instance_id: &str, text: &str) {
    let Ok(frame) = serde_json::from_str::<serde_json::Value>(text) else {
        return;
    };
    match frame.get("type").and_then(|t| t.as_str()) {
        Some("heartbeat") => {
            let agent_name = frame.get("agent_name").and_then(|v| v.as_str()).map(str::to_string);
            state.agent_status.heartbeat(team_id, instance_id, ConnectionType::Websocket, None, agent_name).await;
        }
        Some("subscribe-llm-events") => {
            // Already subscribed to the tenant's room at connect time; accepted for
            // wire-protocol compatibility with SDKs that send it explicitly.
        }
        _ => {}
    }
}

async fn cleanup(state: &AppState, team_id: &str, instance_id: &str) {
    state.agent_status.disconnect(team_id, instance_id).await;
    state.fanout.evict_instance(instance_id).await;
}
