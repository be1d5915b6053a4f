//! Per-tenant in-memory event ring with timer/overflow/shutdown flushing (C9,
//! spec.md §4.9).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::config::BatcherConfig;
use crate::domain::LlmEvent;

#[derive(Debug, Clone, Serialize)]
pub struct EventSummary {
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
    pub model: String,
    pub provider: Option<String>,
    pub agent: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: rust_decimal::Decimal,
    pub latency_ms: Option<u64>,
}

impl From<&LlmEvent> for EventSummary {
    fn from(event: &LlmEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            trace_id: event.trace_id.clone(),
            model: event.model.clone(),
            provider: event.provider.clone(),
            agent: event.agent.clone(),
            input_tokens: event.usage.input,
            output_tokens: event.usage.output,
            cost: event.cost_total,
            latency_ms: event.latency_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    Timer,
    BufferFull,
    Manual,
}

/// Destination for flushed batches; implemented by [`crate::realtime::FanoutHub`].
#[async_trait]
pub trait BatchEmitter: Send + Sync {
    async fn emit_event_batch(&self, team_id: &str, envelope: serde_json::Value);
}

struct TenantBuffer {
    events: VecDeque<EventSummary>,
    dropped_count: u64,
    last_activity: DateTime<Utc>,
    flush_scheduled: bool,
}

impl TenantBuffer {
    fn new(now: DateTime<Utc>) -> Self {
        Self { events: VecDeque::new(), dropped_count: 0, last_activity: now, flush_scheduled: false }
    }
}

pub struct EventBatcher {
    config: BatcherConfig,
    emitter: Arc<dyn BatchEmitter>,
    tenants: Mutex<HashMap<String, TenantBuffer>>,
}

impl EventBatcher {
    pub fn new(config: BatcherConfig, emitter: Arc<dyn BatchEmitter>) -> Arc<Self> {
        Arc::new(Self { config, emitter, tenants: Mutex::new(HashMap::new()) })
    }

    /// Starts the idle-GC background loop; run once per process, e.g. from
    /// `main`. Evicts tenant buffers empty for more than `idle_ttl`.
    pub fn spawn_idle_gc(self: &Arc<Self>) {
        let batcher = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_millis(batcher.config.idle_gc_interval_ms)).await;
                batcher.collect_idle().await;
            }
        });
    }

    async fn collect_idle(&self) {
        let now = Utc::now();
        let ttl = chrono::Duration::milliseconds(self.config.idle_ttl_ms as i64);
        let mut tenants = self.tenants.lock().await;
        let before = tenants.len();
        tenants.retain(|_, buf| !(buf.events.is_empty() && now - buf.last_activity > ttl));
        let evicted = before - tenants.len();
        if evicted > 0 {
            debug!(evicted, "idle tenant buffers reclaimed");
        }
    }

    /// `Add(team, events)` (§4.9): converts to summaries, appends with
    /// drop-oldest backpressure, and schedules a flush timer if none pending.
    pub async fn add(self: &Arc<Self>, team_id: &str, events: &[LlmEvent]) {
        if events.is_empty() {
            return;
        }
        let now = Utc::now();
        let should_spawn_timer = {
            let mut tenants = self.tenants.lock().await;
            let buf = tenants.entry(team_id.to_string()).or_insert_with(|| TenantBuffer::new(now));
            buf.last_activity = now;

            for event in events {
                if buf.events.len() >= self.config.max_buffer {
                    buf.events.pop_front();
                    buf.dropped_count += 1;
                }
                buf.events.push_back(EventSummary::from(event));
            }

            if buf.flush_scheduled {
                false
            } else {
                buf.flush_scheduled = true;
                true
            }
        };

        if should_spawn_timer {
            let batcher = Arc::clone(self);
            let team_id = team_id.to_string();
            let interval = Duration::from_millis(self.config.flush_interval_ms);
            tokio::spawn(async move {
                sleep(interval).await;
                batcher.flush(&team_id, FlushReason::Timer).await;
            });
        }
    }

    /// Drains up to `max_per_flush` and emits to `team:{id}:llm-events`;
    /// reschedules a timer if events remain (§4.9).
    pub fn flush<'a>(
        self: &'a Arc<Self>,
        team_id: &'a str,
        reason: FlushReason,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let now = Utc::now();
            let (batch, dropped_count, window_start, remaining) = {
                let mut tenants = self.tenants.lock().await;
                let Some(buf) = tenants.get_mut(team_id) else {
                    return;
                };

                let window_start = buf.events.front().map(|e| e.timestamp).unwrap_or(now);
                let drain_count = buf.events.len().min(self.config.max_per_flush);
                let batch: Vec<EventSummary> = buf.events.drain(..drain_count).collect();
                let dropped_count = buf.dropped_count;
                buf.dropped_count = 0;
                let remaining = !buf.events.is_empty();
                buf.flush_scheduled = remaining;
                (batch, dropped_count, window_start, remaining)
            };

            if batch.is_empty() && dropped_count == 0 {
                return;
            }

            let envelope = json!({
                "type": "llm-events-batch",
                "team_id": team_id,
                "events": batch,
                "meta": {
                    "batchSize": batch.len(),
                    "droppedCount": dropped_count,
                    "windowStart": window_start,
                    "windowEnd": now,
                    "flushReason": reason,
                },
            });
            self.emitter.emit_event_batch(team_id, envelope).await;

            if remaining {
                let batcher = Arc::clone(self);
                let team_id = team_id.to_string();
                let interval = Duration::from_millis(self.config.flush_interval_ms);
                tokio::spawn(async move {
                    sleep(interval).await;
                    batcher.flush(&team_id, FlushReason::Timer).await;
                });
            }
        })
    }

    /// Flushes every tenant and clears timers; called on graceful shutdown.
    pub async fn shutdown(self: &Arc<Self>) {
        let team_ids: Vec<String> = self.tenants.lock().await.keys().cloned().collect();
        for team_id in team_ids {
            loop {
                let has_more = {
                    let tenants = self.tenants.lock().await;
                    tenants.get(&team_id).map(|b| !b.events.is_empty()).unwrap_or(false)
                };
                self.flush(&team_id, FlushReason::Manual).await;
                if !has_more {
                    break;
                }
            }
        }
    }

    #[cfg(test)]
    async fn buffered_len(&self, team_id: &str) -> usize {
        self.tenants.lock().await.get(team_id).map(|b| b.events.len()).unwrap_or(0)
    }

    #[cfg(test)]
    async fn dropped(&self, team_id: &str) -> u64 {
        self.tenants.lock().await.get(team_id).map(|b| b.dropped_count).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Usage;
    use tokio::sync::Mutex as TokioMutex;

    struct RecordingEmitter {
        envelopes: TokioMutex<Vec<serde_json::Value>>,
    }

    impl RecordingEmitter {
        fn new() -> Self {
            Self { envelopes: TokioMutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl BatchEmitter for RecordingEmitter {
        async fn emit_event_batch(&self, _team_id: &str, envelope: serde_json::Value) {
            self.envelopes.lock().await.push(envelope);
        }
    }

    fn event(trace_id: &str) -> LlmEvent {
        LlmEvent {
            timestamp: Utc::now(),
            team_id: "acme".into(),
            trace_id: trace_id.into(),
            call_sequence: 0,
            span_id: None,
            parent_span_id: None,
            request_id: None,
            provider: Some("openai".into()),
            model: "gpt-4o-mini".into(),
            stream: false,
            agent: None,
            agent_name: None,
            agent_stack: Vec::new(),
            user_id: None,
            latency_ms: Some(120),
            usage: Usage::default(),
            cost_total: rust_decimal::Decimal::ZERO,
            metadata: Default::default(),
            call_site: Default::default(),
            has_content: false,
            finish_reason: None,
            tool_call_count: 0,
        }
    }

    fn batcher_with(max_buffer: usize, max_per_flush: usize) -> (Arc<EventBatcher>, Arc<RecordingEmitter>) {
        let emitter = Arc::new(RecordingEmitter::new());
        let config = BatcherConfig { max_buffer, max_per_flush, flush_interval_ms: 60_000, ..Default::default() };
        (EventBatcher::new(config, emitter.clone()), emitter)
    }

    #[tokio::test]
    async fn add_appends_and_schedules_flush() {
        let (batcher, _emitter) = batcher_with(10, 5);
        batcher.add("acme", &[event("t1"), event("t2")]).await;
        assert_eq!(batcher.buffered_len("acme").await, 2);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts() {
        let (batcher, _emitter) = batcher_with(2, 5);
        batcher.add("acme", &[event("t1"), event("t2"), event("t3")]).await;
        assert_eq!(batcher.buffered_len("acme").await, 2);
        assert_eq!(batcher.dropped("acme").await, 1);
    }

    #[tokio::test]
    async fn manual_flush_drains_up_to_max_per_flush_and_reschedules() {
        let (batcher, emitter) = batcher_with(10, 2);
        batcher.add("acme", &[event("t1"), event("t2"), event("t3")]).await;
        batcher.flush("acme", FlushReason::Manual).await;
        assert_eq!(batcher.buffered_len("acme").await, 1);
        let envelopes = emitter.envelopes.lock().await;
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0]["meta"]["batchSize"], 2);
    }

    #[tokio::test]
    async fn shutdown_drains_every_tenant() {
        let (batcher, emitter) = batcher_with(10, 2);
        batcher.add("acme", &[event("t1"), event("t2"), event("t3")]).await;
        batcher.add("globex", &[event("t4")]).await;
        batcher.shutdown().await;
        assert_eq!(batcher.buffered_len("acme").await, 0);
        assert_eq!(batcher.buffered_len("globex").await, 0);
        assert_eq!(emitter.envelopes.lock().await.len(), 3);
    }
}
