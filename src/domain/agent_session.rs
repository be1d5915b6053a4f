//! Connected SDK instance bookkeeping (spec.md §3, §4.11).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Websocket,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub instance_id: String,
    pub team_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub connection_type: ConnectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// An instance is healthy iff `now - last_heartbeat < 60s` (§4.11).
pub const HEALTH_THRESHOLD_SECS: i64 = 60;

impl AgentSession {
    pub fn is_healthy_at(&self, now: DateTime<Utc>) -> bool {
        (now - self.last_heartbeat).num_seconds() < HEALTH_THRESHOLD_SECS
    }

    pub fn heartbeat(&mut self, at: DateTime<Utc>) {
        self.last_heartbeat = at;
    }
}
