//! Normalized LLM call events (spec.md §3).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub cached: u64,
    #[serde(default)]
    pub reasoning: u64,
    #[serde(default)]
    pub accepted_prediction: u64,
    #[serde(default)]
    pub rejected_prediction: u64,
}

/// Primary key is `(timestamp, trace_id, call_sequence)`; dedupe key within a
/// batch is `(trace_id, call_sequence)` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmEvent {
    pub timestamp: DateTime<Utc>,
    pub team_id: String,
    pub trace_id: String,
    pub call_sequence: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Ordered sequence of agent identifiers, leader first (§3).
    #[serde(default)]
    pub agent_stack: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub usage: Usage,
    pub cost_total: Decimal,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub call_site: HashMap<String, serde_json::Value>,
    pub has_content: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub tool_call_count: u64,
}

impl LlmEvent {
    /// `(trace_id, call_sequence)` — the dedupe key within a batch and the
    /// conflict target on upsert into the hot table (§3, §4.4).
    pub fn dedupe_key(&self) -> (String, i64) {
        (self.trace_id.clone(), self.call_sequence)
    }

    /// Effective agent per the precedence rule in §3:
    /// `metadata.agent` overrides the top-level `agent` field.
    pub fn effective_agent(&self) -> Option<String> {
        self.metadata
            .get("agent")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| self.agent.clone())
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    pub fn tags(&self) -> Vec<String> {
        self.metadata
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }
}

/// Lightweight validation-context view used by the budget evaluator and
/// analytics filters (§4.7); either constructed from a live request or derived
/// from a normalized event via `From<&LlmEvent>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl BudgetContext {
    pub fn effective_agent(&self) -> Option<String> {
        self.metadata
            .get("agent")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| self.agent.clone())
    }
}

impl From<&LlmEvent> for BudgetContext {
    fn from(event: &LlmEvent) -> Self {
        Self {
            agent: event.agent.clone(),
            tenant_id: event.metadata_str("tenant_id").map(str::to_string),
            customer_id: event.metadata_str("customer_id").map(str::to_string),
            feature: event.metadata_str("feature").map(str::to_string),
            tags: event.tags(),
            metadata: event.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with_metadata(agent: Option<&str>, meta_agent: Option<&str>) -> LlmEvent {
        let mut metadata = HashMap::new();
        if let Some(a) = meta_agent {
            metadata.insert("agent".to_string(), serde_json::Value::String(a.to_string()));
        }
        LlmEvent {
            timestamp: Utc::now(),
            team_id: "acme".into(),
            trace_id: "t1".into(),
            call_sequence: 0,
            span_id: None,
            parent_span_id: None,
            request_id: None,
            provider: None,
            model: "gpt-4o".into(),
            stream: false,
            agent: agent.map(str::to_string),
            agent_name: None,
            agent_stack: Vec::new(),
            user_id: None,
            latency_ms: None,
            usage: Usage::default(),
            cost_total: Decimal::ZERO,
            metadata,
            call_site: HashMap::new(),
            has_content: false,
            finish_reason: None,
            tool_call_count: 0,
        }
    }

    #[test]
    fn metadata_agent_overrides_top_level_agent() {
        let event = event_with_metadata(Some("researcher"), Some("planner"));
        assert_eq!(event.effective_agent().as_deref(), Some("planner"));
    }

    #[test]
    fn falls_back_to_top_level_agent() {
        let event = event_with_metadata(Some("researcher"), None);
        assert_eq!(event.effective_agent().as_deref(), Some("researcher"));
    }

    #[test]
    fn dedupe_key_is_trace_and_sequence() {
        let event = event_with_metadata(None, None);
        assert_eq!(event.dedupe_key(), ("t1".to_string(), 0));
    }
}
