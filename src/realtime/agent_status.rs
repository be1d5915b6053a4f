//! Heartbeat-driven registry of connected SDK instances (C11, spec.md §4.11).

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::domain::{AgentSession, ConnectionType};
use crate::storage::AgentSummary;

#[derive(Debug, Clone, Serialize)]
pub struct AgentDiscoveryEntry {
    #[serde(flatten)]
    pub summary: AgentSummary,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

#[derive(Default)]
pub struct AgentStatusTracker {
    sessions: RwLock<HashMap<(String, String), AgentSession>>,
}

impl AgentStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Created on WS connect or first HTTP heartbeat carrying
    /// `sdk_instance_id`; `last_heartbeat` updates on every heartbeat
    /// regardless of transport (§4.11).
    pub async fn heartbeat(
        &self,
        team_id: &str,
        instance_id: &str,
        connection_type: ConnectionType,
        policy_id: Option<String>,
        agent_name: Option<String>,
    ) {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let key = (team_id.to_string(), instance_id.to_string());
        sessions
            .entry(key)
            .and_modify(|s| {
                s.last_heartbeat = now;
                if agent_name.is_some() {
                    s.agent_name = agent_name.clone();
                }
            })
            .or_insert_with(|| AgentSession {
                instance_id: instance_id.to_string(),
                team_id: team_id.to_string(),
                policy_id,
                agent_name,
                connected_at: now,
                last_heartbeat: now,
                connection_type,
                status: Some("connected".to_string()),
            });
    }

    pub async fn disconnect(&self, team_id: &str, instance_id: &str) {
        self.sessions.write().await.remove(&(team_id.to_string(), instance_id.to_string()));
    }

    pub async fn count_connected(&self, team_id: &str) -> usize {
        let now = Utc::now();
        self.sessions.read().await.values().filter(|s| s.team_id == team_id && s.is_healthy_at(now)).count()
    }

    pub async fn list_instances(&self, team_id: &str) -> Vec<AgentSession> {
        self.sessions.read().await.values().filter(|s| s.team_id == team_id).cloned().collect()
    }

    pub async fn count_total(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Merges live sessions with historical `ListDistinctAgents` rows for the
    /// `/agents` discovery view: join by `instance_id` first, then by
    /// `agent_name`; store-only agents are `disconnected`, connected
    /// instances with no historical events are appended (§4.11).
    pub async fn discovery_view(&self, team_id: &str, historical: Vec<AgentSummary>) -> Vec<AgentDiscoveryEntry> {
        let now = Utc::now();
        let sessions = self.sessions.read().await;
        let live: Vec<&AgentSession> =
            sessions.values().filter(|s| s.team_id == team_id && s.is_healthy_at(now)).collect();

        let mut matched_instance_ids: Vec<String> = Vec::new();
        let mut entries: Vec<AgentDiscoveryEntry> = historical
            .into_iter()
            .map(|summary| {
                let live_match = live
                    .iter()
                    .find(|s| s.instance_id == summary.agent)
                    .or_else(|| live.iter().find(|s| s.agent_name.as_deref() == Some(summary.agent.as_str())));
                if let Some(session) = live_match {
                    matched_instance_ids.push(session.instance_id.clone());
                    AgentDiscoveryEntry {
                        summary,
                        connected: true,
                        instance_id: Some(session.instance_id.clone()),
                    }
                } else {
                    AgentDiscoveryEntry { summary, connected: false, instance_id: None }
                }
            })
            .collect();

        for session in live {
            if matched_instance_ids.contains(&session.instance_id) {
                continue;
            }
            entries.push(AgentDiscoveryEntry {
                summary: AgentSummary {
                    agent: session.agent_name.clone().unwrap_or_else(|| session.instance_id.clone()),
                    agent_name: session.agent_name.clone(),
                    first_seen: session.connected_at,
                    last_seen: session.last_heartbeat,
                    total_requests: 0,
                    total_cost: rust_decimal::Decimal::ZERO,
                },
                connected: true,
                instance_id: Some(session.instance_id.clone()),
            });
        }

        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn heartbeat_creates_and_updates_session() {
        let tracker = AgentStatusTracker::new();
        tracker.heartbeat("acme", "i1", ConnectionType::Websocket, None, Some("researcher".into())).await;
        assert_eq!(tracker.count_connected("acme").await, 1);
        tracker.heartbeat("acme", "i1", ConnectionType::Websocket, None, None).await;
        let instances = tracker.list_instances("acme").await;
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].agent_name.as_deref(), Some("researcher"));
    }

    #[tokio::test]
    async fn disconnect_removes_session() {
        let tracker = AgentStatusTracker::new();
        tracker.heartbeat("acme", "i1", ConnectionType::Http, None, None).await;
        tracker.disconnect("acme", "i1").await;
        assert_eq!(tracker.count_connected("acme").await, 0);
    }

    #[tokio::test]
    async fn discovery_view_marks_store_only_agents_disconnected() {
        let tracker = AgentStatusTracker::new();
        tracker.heartbeat("acme", "i1", ConnectionType::Websocket, None, Some("researcher".into())).await;
        let historical = vec![
            AgentSummary {
                agent: "researcher".into(),
                agent_name: None,
                first_seen: Utc::now() - Duration::days(5),
                last_seen: Utc::now(),
                total_requests: 10,
                total_cost: rust_decimal::Decimal::ZERO,
            },
            AgentSummary {
                agent: "writer".into(),
                agent_name: None,
                first_seen: Utc::now() - Duration::days(3),
                last_seen: Utc::now() - Duration::days(2),
                total_requests: 3,
                total_cost: rust_decimal::Decimal::ZERO,
            },
        ];
        let view = tracker.discovery_view("acme", historical).await;
        let writer = view.iter().find(|e| e.summary.agent == "writer").unwrap();
        assert!(!writer.connected);
        let researcher = view.iter().find(|e| e.summary.agent == "researcher").unwrap();
        assert!(researcher.connected);
    }

    #[tokio::test]
    async fn discovery_view_appends_connected_instances_with_no_history() {
        let tracker = AgentStatusTracker::new();
        tracker.heartbeat("acme", "i1", ConnectionType::Websocket, None, Some("newcomer".into())).await;
        let view = tracker.discovery_view("acme", Vec::new()).await;
        assert_eq!(view.len(), 1);
        assert!(view[0].connected);
    }
}
