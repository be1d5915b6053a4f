//! Per-tenant room broadcast and instance-targeted delivery (C10, spec.md
//! §4.10).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::debug;

use crate::alerts::AlertEmitter;
use crate::domain::TeamId;
use crate::realtime::batcher::BatchEmitter;

const ROOM_CHANNEL_CAPACITY: usize = 256;

/// Cross-process fan-out, e.g. Redis pub/sub; pluggable so a single-process
/// deployment can run with [`LocalBridge`] instead (§4.10).
#[async_trait]
pub trait CrossProcessBridge: Send + Sync {
    async fn publish(&self, room: &str, payload: &serde_json::Value);
}

/// No-op bridge for single-process deployments; rooms are delivered
/// in-process only.
pub struct LocalBridge;

#[async_trait]
impl CrossProcessBridge for LocalBridge {
    async fn publish(&self, _room: &str, _payload: &serde_json::Value) {}
}

struct Room {
    sender: broadcast::Sender<serde_json::Value>,
}

impl Room {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(ROOM_CHANNEL_CAPACITY);
        Self { sender }
    }
}

/// One connected WebSocket or MCP SSE session, addressable by `instance_id`
/// for `EmitToInstance` and targeted MCP delivery.
pub struct InstanceChannel {
    pub team_id: String,
    pub sender: mpsc::UnboundedSender<serde_json::Value>,
}

pub struct FanoutHub {
    rooms: RwLock<HashMap<String, Room>>,
    instances: RwLock<HashMap<String, InstanceChannel>>,
    bridge: Arc<dyn CrossProcessBridge>,
}

impl FanoutHub {
    pub fn new(bridge: Arc<dyn CrossProcessBridge>) -> Arc<Self> {
        Arc::new(Self { rooms: RwLock::new(HashMap::new()), instances: RwLock::new(HashMap::new()), bridge })
    }

    pub fn local() -> Arc<Self> {
        Self::new(Arc::new(LocalBridge))
    }

    /// Subscribes to a room, creating it on first use. Dropped subscribers
    /// are reaped lazily on the next send failure (§4.10) — `broadcast`
    /// already does this via `RecvError::Lagged`/channel closure semantics.
    pub async fn subscribe(&self, room: &str) -> broadcast::Receiver<serde_json::Value> {
        let rooms = self.rooms.read().await;
        if let Some(r) = rooms.get(room) {
            return r.sender.subscribe();
        }
        drop(rooms);
        let mut rooms = self.rooms.write().await;
        rooms.entry(room.to_string()).or_insert_with(Room::new).sender.subscribe()
    }

    #[tracing::instrument(skip(self, payload), fields(room = %room))]
    async fn broadcast(&self, room: &str, payload: serde_json::Value) {
        self.bridge.publish(room, &payload).await;
        let rooms = self.rooms.read().await;
        if let Some(r) = rooms.get(room) {
            // Zero subscribers is a normal, expected state (no dashboard open).
            let _ = r.sender.send(payload);
        }
    }

    pub async fn register_instance(&self, instance_id: &str, team_id: &str) -> mpsc::UnboundedReceiver<serde_json::Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.instances
            .write()
            .await
            .insert(instance_id.to_string(), InstanceChannel { team_id: team_id.to_string(), sender: tx });
        rx
    }

    pub async fn evict_instance(&self, instance_id: &str) {
        self.instances.write().await.remove(instance_id);
    }

    pub async fn emit_policy_update(&self, team: &TeamId, policy_id: &str, policy: &crate::domain::Policy) {
        self.broadcast(&team.policy_room(), json!({"type": "policy-update", "policy_id": policy_id, "policy": policy})).await;
    }

    pub async fn emit_alert_payload(&self, team: &TeamId, payload: serde_json::Value) {
        self.broadcast(&team.alerts_room(), payload).await;
    }

    pub async fn emit_event_batch_envelope(&self, team: &TeamId, envelope: serde_json::Value) {
        self.broadcast(&team.llm_events_room(), envelope).await;
    }

    /// `EmitToInstance(team, instance_id, payload)` — delivery fails silently
    /// if the instance disconnected between lookup and send; the caller
    /// doesn't need to know, it just evicts on its own next heartbeat check.
    pub async fn emit_to_instance(&self, team_id: &str, instance_id: &str, payload: serde_json::Value) {
        let instances = self.instances.read().await;
        if let Some(channel) = instances.get(instance_id) {
            if channel.team_id == team_id {
                let _ = channel.sender.send(payload);
            }
        } else {
            debug!(instance_id, "emit_to_instance: no such session");
        }
    }
}

#[async_trait]
impl AlertEmitter for FanoutHub {
    async fn emit_alert(&self, team_id: &str, payload: serde_json::Value) {
        self.emit_alert_payload(&TeamId::new(team_id), payload).await;
    }
}

#[async_trait]
impl BatchEmitter for FanoutHub {
    async fn emit_event_batch(&self, team_id: &str, envelope: serde_json::Value) {
        self.emit_event_batch_envelope(&TeamId::new(team_id), envelope).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_broadcast_alert() {
        let hub = FanoutHub::local();
        let team = TeamId::new("acme");
        let mut rx = hub.subscribe(&team.alerts_room()).await;
        hub.emit_alert_payload(&team, json!({"hello": "world"})).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received["hello"], "world");
    }

    #[tokio::test]
    async fn rooms_are_isolated_per_tenant() {
        let hub = FanoutHub::local();
        let acme = TeamId::new("acme");
        let globex = TeamId::new("globex");
        let mut acme_rx = hub.subscribe(&acme.alerts_room()).await;
        let mut globex_rx = hub.subscribe(&globex.alerts_room()).await;
        hub.emit_alert_payload(&acme, json!({"team": "acme"})).await;
        assert_eq!(acme_rx.recv().await.unwrap()["team"], "acme");
        assert!(globex_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn emit_to_instance_delivers_only_to_matching_team() {
        let hub = FanoutHub::local();
        let mut rx = hub.register_instance("inst-1", "acme").await;
        hub.emit_to_instance("globex", "inst-1", json!({"x": 1})).await;
        assert!(rx.try_recv().is_err());
        hub.emit_to_instance("acme", "inst-1", json!({"x": 1})).await;
        assert_eq!(rx.recv().await.unwrap()["x"], 1);
    }

    #[tokio::test]
    async fn broadcast_with_no_subscribers_does_not_panic() {
        let hub = FanoutHub::local();
        let team = TeamId::new("acme");
        hub.emit_alert_payload(&team, json!({"ok": true})).await;
    }
}
