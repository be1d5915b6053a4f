//! Raw SDK batch -> normalized events + deduplicated content (C3, spec.md §4.3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::{content_hash, ContentBlob, ContentReference, ContentType, LlmEvent, Usage};
use crate::error::{HiveError, Result};
use crate::pricing::PricingEngine;
use crate::storage::NormalizedBatch;

/// A raw event as received from the SDK batch, before field coercion.
pub type RawEvent = serde_json::Map<String, Value>;

pub struct EventNormalizer<'a> {
    pricing: &'a PricingEngine,
}

impl<'a> EventNormalizer<'a> {
    pub fn new(pricing: &'a PricingEngine) -> Self {
        Self { pricing }
    }

    /// Normalizes a raw SDK batch end to end (§4.3 steps 1-6), returning a
    /// [`NormalizedBatch`] ready for [`crate::storage::TieredStore::upsert`].
    pub async fn normalize_batch(&self, raw_events: Vec<RawEvent>) -> NormalizedBatch {
        let mut by_key: HashMap<(String, i64), LlmEvent> = HashMap::new();
        let mut content_blobs: HashMap<String, ContentBlob> = HashMap::new();
        let mut content_refs = Vec::new();

        for raw in raw_events {
            let event = match self.normalize_one(&raw, &mut content_blobs, &mut content_refs).await {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping invalid event from batch");
                    continue;
                }
            };

            let key = event.dedupe_key();
            match by_key.get(&key) {
                Some(existing) if existing.timestamp >= event.timestamp => {}
                _ => {
                    by_key.insert(key, event);
                }
            }
        }

        NormalizedBatch {
            events: by_key.into_values().collect(),
            content_refs,
            content_blobs: content_blobs.into_values().collect(),
        }
    }

    async fn normalize_one(
        &self,
        raw: &RawEvent,
        content_blobs: &mut HashMap<String, ContentBlob>,
        content_refs: &mut Vec<ContentReference>,
    ) -> Result<LlmEvent> {
        let timestamp = parse_timestamp(raw)?;
        let team_id = required_str(raw, "team_id")?;
        let trace_id = required_str(raw, "trace_id")?;
        let call_sequence = required_i64(raw, "call_sequence")?;

        let usage = parse_usage(raw);
        let model = raw.get("model").and_then(Value::as_str).unwrap_or("unknown").to_string();
        let provider = raw.get("provider").and_then(Value::as_str).map(str::to_string);

        let quote = self.pricing.quote(&model, provider.as_deref()).await;
        let cost = self.pricing.cost_with_quote(&quote, usage.input, usage.output, usage.cached);

        let mut has_content = false;
        for (field, content_type) in [
            ("system_prompt", ContentType::SystemPrompt),
            ("messages", ContentType::Messages),
            ("response_content", ContentType::Response),
            ("tools", ContentType::Tools),
            ("params", ContentType::Params),
        ] {
            if let Some(value) = raw.get(field) {
                if let Some(stringified) = stringify_non_empty(value) {
                    has_content = true;
                    let hash = content_hash(&stringified);
                    content_blobs.entry(hash.clone()).or_insert_with(|| ContentBlob {
                        content_hash: hash.clone(),
                        team_id: team_id.clone(),
                        content: stringified.clone(),
                        byte_size: stringified.len() as i64,
                        ref_count: 1,
                        first_seen_at: timestamp,
                        last_seen_at: timestamp,
                    });
                    content_refs.push(ContentReference {
                        timestamp,
                        trace_id: trace_id.clone(),
                        call_sequence,
                        team_id: team_id.clone(),
                        content_type,
                        content_hash: hash,
                        byte_size: stringified.len() as i64,
                        message_count: (content_type == ContentType::Messages)
                            .then(|| value.as_array().map(|a| a.len() as i64))
                            .flatten(),
                        truncated_preview: ContentReference::preview(&stringified),
                    });
                }
            }
        }

        let finish_reason = raw.get("finish_reason").and_then(Value::as_str).map(str::to_string);
        let tool_call_count = count_tool_calls(raw);

        let agent = raw.get("agent").and_then(Value::as_str).map(str::to_string);
        let metadata: HashMap<String, Value> = raw
            .get("metadata")
            .and_then(Value::as_object)
            .map(|m| m.clone().into_iter().collect())
            .unwrap_or_default();
        let mut agent_stack: Vec<String> = raw
            .get("agent_stack")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        // §3: metadata.agent overrides the top-level agent field; the effective
        // value leads agent_stack if not already present.
        let effective_agent = metadata.get("agent").and_then(Value::as_str).map(str::to_string).or_else(|| agent.clone());
        if let Some(effective) = &effective_agent {
            if !agent_stack.iter().any(|a| a == effective) {
                agent_stack.insert(0, effective.clone());
            }
        }

        Ok(LlmEvent {
            timestamp,
            team_id,
            trace_id,
            call_sequence,
            span_id: raw.get("span_id").and_then(Value::as_str).map(str::to_string),
            parent_span_id: raw.get("parent_span_id").and_then(Value::as_str).map(str::to_string),
            request_id: raw.get("request_id").and_then(Value::as_str).map(str::to_string),
            provider,
            model,
            stream: raw.get("stream").and_then(Value::as_bool).unwrap_or(false),
            agent,
            agent_name: raw.get("agent_name").and_then(Value::as_str).map(str::to_string),
            agent_stack,
            user_id: raw.get("user_id").and_then(Value::as_str).map(str::to_string),
            latency_ms: raw.get("latency_ms").and_then(Value::as_u64),
            usage,
            cost_total: cost.total,
            metadata,
            call_site: raw
                .get("call_site")
                .and_then(Value::as_object)
                .map(|m| m.clone().into_iter().collect())
                .unwrap_or_default(),
            has_content,
            finish_reason,
            tool_call_count,
        })
    }
}

fn parse_timestamp(raw: &RawEvent) -> Result<DateTime<Utc>> {
    let value = raw.get("timestamp").ok_or_else(|| HiveError::validation("missing timestamp"))?;
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| HiveError::validation(format!("invalid timestamp: {s}"))),
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| HiveError::validation("invalid numeric timestamp")),
        _ => Err(HiveError::validation("timestamp must be a string or number")),
    }
}

fn required_str(raw: &RawEvent, field: &str) -> Result<String> {
    raw.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| HiveError::validation(format!("missing or empty {field}")))
}

fn required_i64(raw: &RawEvent, field: &str) -> Result<i64> {
    raw.get(field).and_then(Value::as_i64).ok_or_else(|| HiveError::validation(format!("missing integer {field}")))
}

/// Accepts usage either nested under `usage` or flattened at the top level;
/// never coerces a string into a numeric field (§4.3 step 2).
fn parse_usage(raw: &RawEvent) -> Usage {
    let source = raw.get("usage").and_then(Value::as_object).unwrap_or(raw);
    let field = |name: &str| source.get(name).and_then(Value::as_u64).unwrap_or(0);
    Usage {
        input: field("input"),
        output: field("output"),
        total: {
            let total = field("total");
            if total > 0 {
                total
            } else {
                field("input") + field("output")
            }
        },
        cached: field("cached"),
        reasoning: field("reasoning"),
        accepted_prediction: field("accepted_prediction"),
        rejected_prediction: field("rejected_prediction"),
    }
}

fn stringify_non_empty(value: &Value) -> Option<String> {
    let stringified = match value {
        Value::String(s) => s.clone(),
        Value::Null => return None,
        other => serde_json::to_string(other).unwrap_or_default(),
    };
    if stringified.is_empty() || stringified == "[]" || stringified == "{}" {
        None
    } else {
        Some(stringified)
    }
}

/// Sum of `tool_calls[]` lengths across all messages (§4.3 step 5).
fn count_tool_calls(raw: &RawEvent) -> u64 {
    let Some(messages) = raw.get("messages").and_then(Value::as_array) else {
        return 0;
    };
    messages
        .iter()
        .filter_map(|m| m.get("tool_calls").and_then(Value::as_array))
        .map(|calls| calls.len() as u64)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn engine() -> PricingEngine {
        PricingEngine::new(Arc::new(crate::pricing::StaticCatalogueSource))
    }

    fn raw_event(trace: &str, seq: i64, ts: &str) -> RawEvent {
        json!({
            "timestamp": ts,
            "team_id": "acme",
            "trace_id": trace,
            "call_sequence": seq,
            "model": "gpt-4o-mini",
            "provider": "openai",
            "usage": {"input": 100, "output": 50},
            "messages": [{"role": "user", "content": "hi"}],
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[tokio::test]
    async fn rejects_event_without_timestamp() {
        let pricing = engine();
        let normalizer = EventNormalizer::new(&pricing);
        let mut raw = raw_event("t1", 0, "2026-01-01T00:00:00Z");
        raw.remove("timestamp");
        let batch = normalizer.normalize_batch(vec![raw]).await;
        assert!(batch.events.is_empty());
    }

    #[tokio::test]
    async fn dedupes_by_trace_and_sequence_keeping_later_timestamp() {
        let pricing = engine();
        let normalizer = EventNormalizer::new(&pricing);
        let first = raw_event("t1", 0, "2026-01-01T00:00:00Z");
        let mut second = raw_event("t1", 0, "2026-01-01T00:05:00Z");
        second.insert("finish_reason".into(), json!("stop"));

        let batch = normalizer.normalize_batch(vec![first, second]).await;
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn extracts_content_and_computes_hash() {
        let pricing = engine();
        let normalizer = EventNormalizer::new(&pricing);
        let raw = raw_event("t1", 0, "2026-01-01T00:00:00Z");
        let batch = normalizer.normalize_batch(vec![raw]).await;
        assert_eq!(batch.events.len(), 1);
        assert!(batch.events[0].has_content);
        assert_eq!(batch.content_blobs.len(), 1);
        assert_eq!(batch.content_refs.len(), 1);
    }

    #[tokio::test]
    async fn two_events_sharing_content_produce_one_blob() {
        let pricing = engine();
        let normalizer = EventNormalizer::new(&pricing);
        let first = raw_event("t1", 0, "2026-01-01T00:00:00Z");
        let second = raw_event("t2", 0, "2026-01-01T00:00:01Z");
        let batch = normalizer.normalize_batch(vec![first, second]).await;
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.content_blobs.len(), 1);
        assert_eq!(batch.content_refs.len(), 2);
    }

    #[tokio::test]
    async fn tool_call_count_sums_across_messages() {
        let pricing = engine();
        let normalizer = EventNormalizer::new(&pricing);
        let mut raw = raw_event("t1", 0, "2026-01-01T00:00:00Z");
        raw.insert(
            "messages".into(),
            json!([
                {"role": "assistant", "tool_calls": [{"id": "1"}, {"id": "2"}]},
                {"role": "assistant", "tool_calls": [{"id": "3"}]},
            ]),
        );
        let batch = normalizer.normalize_batch(vec![raw]).await;
        assert_eq!(batch.events[0].tool_call_count, 3);
    }

    #[tokio::test]
    async fn metadata_agent_is_folded_into_agent_stack() {
        let pricing = engine();
        let normalizer = EventNormalizer::new(&pricing);
        let mut raw = raw_event("t1", 0, "2026-01-01T00:00:00Z");
        raw.insert("agent".into(), json!("researcher"));
        raw.insert("agent_stack".into(), json!(["researcher"]));
        raw.insert("metadata".into(), json!({"agent": "planner"}));

        let batch = normalizer.normalize_batch(vec![raw]).await;
        let event = &batch.events[0];
        assert_eq!(event.agent.as_deref(), Some("researcher"));
        assert_eq!(event.effective_agent().as_deref(), Some("planner"));
        assert_eq!(event.agent_stack, vec!["planner".to_string(), "researcher".to_string()]);
    }

    #[tokio::test]
    async fn effective_agent_already_leading_the_stack_is_not_duplicated() {
        let pricing = engine();
        let normalizer = EventNormalizer::new(&pricing);
        let mut raw = raw_event("t1", 0, "2026-01-01T00:00:00Z");
        raw.insert("agent".into(), json!("planner"));
        raw.insert("agent_stack".into(), json!(["planner", "researcher"]));

        let batch = normalizer.normalize_batch(vec![raw]).await;
        assert_eq!(batch.events[0].agent_stack, vec!["planner".to_string(), "researcher".to_string()]);
    }
}
