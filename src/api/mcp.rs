//! MCP transport: a server-generated SSE session per connection, message
//! delivery posted back through the same session (spec.md §6, §7: "cross-tenant
//! MCP session access -> 403").

use std::collections::HashMap;
use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::AuthContext;
use crate::error::{HiveError, Result};

/// One entry per open MCP session: the owning team and the channel used to
/// push JSON-RPC frames back over its SSE stream.
#[derive(Default)]
pub struct McpSessions {
    sessions: RwLock<HashMap<String, McpSession>>,
}

struct McpSession {
    team_id: String,
    sender: mpsc::UnboundedSender<Value>,
}

impl McpSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(&self, team_id: &str) -> (String, mpsc::UnboundedReceiver<Value>) {
        let session_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.write().await.insert(session_id.clone(), McpSession { team_id: team_id.to_string(), sender: tx });
        (session_id, rx)
    }

    pub async fn close(&self, team_id: &str, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(session_id) {
            Some(session) if session.team_id == team_id => {
                sessions.remove(session_id);
                Ok(())
            }
            Some(_) => Err(HiveError::forbidden("session belongs to a different team")),
            None => Err(HiveError::not_found(format!("mcp session {session_id}"))),
        }
    }

    pub async fn send(&self, team_id: &str, session_id: &str, message: Value) -> Result<()> {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(session) if session.team_id == team_id => {
                session.sender.send(message).map_err(|_| HiveError::not_found("mcp session closed"))
            }
            Some(_) => Err(HiveError::forbidden("session belongs to a different team")),
            None => Err(HiveError::not_found(format!("mcp session {session_id}"))),
        }
    }

    pub async fn list(&self, team_id: &str) -> Vec<String> {
        self.sessions.read().await.iter().filter(|(_, s)| s.team_id == team_id).map(|(id, _)| id.clone()).collect()
    }
}

pub async fn open_session(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let (session_id, rx) = state.mcp_sessions.open(&auth.team_id).await;
    let greeting = futures::stream::once(async move {
        Ok(Event::default().event("session").data(json!({ "session_id": session_id }).to_string()))
    });
    let frames = UnboundedReceiverStream::new(rx)
        .map(|payload| Ok(Event::default().event("message").data(payload.to_string())));
    Sse::new(greeting.chain(frames)).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: String,
}

pub async fn post_message(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<SessionQuery>,
    Json(message): Json<Value>,
) -> Result<Json<Value>> {
    state.mcp_sessions.send(&auth.team_id, &query.session_id, message).await?;
    Ok(Json(json!({ "accepted": true })))
}

pub async fn list_sessions(State(state): State<AppState>, auth: AuthContext) -> Json<Value> {
    let sessions = state.mcp_sessions.list(&auth.team_id).await;
    Json(json!({ "sessions": sessions }))
}

pub async fn close_session(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    state.mcp_sessions.close(&auth.team_id, &id).await?;
    Ok(Json(json!({ "closed": id })))
}

pub async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}
