//! Structured audit trail for authorization-relevant writes (SPEC_FULL.md
//! Section B), grounded on the teacher's `auth::audit` module but narrowed to
//! the one surface this crate actually mutates under authority: policies.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub team_id: String,
    pub policy_id: String,
    pub action: AuditAction,
    pub version: String,
    pub actor: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PolicyUpdated,
    PolicyDeleted,
}

impl AuditEvent {
    pub fn policy_updated(team_id: &str, policy_id: &str, version: &str) -> Self {
        Self {
            team_id: team_id.to_string(),
            policy_id: policy_id.to_string(),
            action: AuditAction::PolicyUpdated,
            version: version.to_string(),
            actor: None,
            at: Utc::now(),
        }
    }

    pub fn policy_deleted(team_id: &str, policy_id: &str) -> Self {
        Self {
            team_id: team_id.to_string(),
            policy_id: policy_id.to_string(),
            action: AuditAction::PolicyDeleted,
            version: String::new(),
            actor: None,
            at: Utc::now(),
        }
    }
}

#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Bounded in-memory ring, default sink for dev/test (SPEC_FULL.md Section B).
pub struct InMemoryAuditSink {
    capacity: usize,
    events: RwLock<VecDeque<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, events: RwLock::new(VecDeque::with_capacity(capacity)) }
    }

    pub async fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        let events = self.events.read().await;
        events.iter().rev().take(limit).cloned().collect()
    }
}

#[async_trait::async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, event: AuditEvent) {
        let mut events = self.events.write().await;
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Emits each event as a structured `tracing` record instead of holding it in
/// memory; suitable for shipping to a log aggregator in production.
pub struct TracingAuditSink;

#[async_trait::async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) {
        tracing::info!(
            team_id = %event.team_id,
            policy_id = %event.policy_id,
            action = ?event.action,
            version = %event.version,
            actor = event.actor.as_deref().unwrap_or("system"),
            "audit"
        );
    }
}

/// Fans out to multiple sinks so a deployment can keep the in-memory tail for
/// `/admin` inspection while also shipping to logs.
pub struct CompositeAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait::async_trait]
impl AuditSink for CompositeAuditSink {
    async fn record(&self, event: AuditEvent) {
        for sink in &self.sinks {
            sink.record(event.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ring_evicts_oldest_past_capacity() {
        let sink = InMemoryAuditSink::new(2);
        sink.record(AuditEvent::policy_updated("acme", "default", "v1")).await;
        sink.record(AuditEvent::policy_updated("acme", "default", "v2")).await;
        sink.record(AuditEvent::policy_updated("acme", "default", "v3")).await;

        let recent = sink.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].version, "v3");
        assert_eq!(recent[1].version, "v2");
    }
}
