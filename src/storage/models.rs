//! Row <-> domain-type conversions for the `Any`-backed tenant pools.
//!
//! `sqlx::Any` only guarantees encode/decode for primitive column types, so
//! timestamps and decimals are carried as RFC3339 / decimal-string `TEXT`
//! columns and parsed on the way out, following the same "store as text,
//! parse at the boundary" approach the teacher's `storage::models` module
//! uses for its SQLite fallback path.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::any::AnyRow;
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;

use crate::domain::{ContentBlob, ContentReference, ContentType, LlmEvent, Usage};
use crate::error::{HiveError, Result};

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| HiveError::storage(format!("invalid stored timestamp {raw:?}: {e}")))
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| HiveError::storage(format!("invalid stored decimal {raw:?}: {e}")))
}

fn parse_json_map(raw: &str) -> HashMap<String, serde_json::Value> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn parse_json_array(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub fn event_from_row(row: &AnyRow) -> Result<LlmEvent> {
    let ts: String = row.try_get("timestamp").map_err(HiveError::from)?;
    let cost: String = row.try_get("cost_total").map_err(HiveError::from)?;
    let agent_stack: String = row.try_get("agent_stack").map_err(HiveError::from)?;
    let metadata: String = row.try_get("metadata").map_err(HiveError::from)?;
    let call_site: String = row.try_get("call_site").map_err(HiveError::from)?;

    Ok(LlmEvent {
        timestamp: parse_timestamp(&ts)?,
        team_id: row.try_get("team_id").map_err(HiveError::from)?,
        trace_id: row.try_get("trace_id").map_err(HiveError::from)?,
        call_sequence: row.try_get("call_sequence").map_err(HiveError::from)?,
        span_id: row.try_get("span_id").ok(),
        parent_span_id: row.try_get("parent_span_id").ok(),
        request_id: row.try_get("request_id").ok(),
        provider: row.try_get("provider").ok(),
        model: row.try_get("model").map_err(HiveError::from)?,
        stream: row.try_get("stream").unwrap_or(false),
        agent: row.try_get("agent").ok(),
        agent_name: row.try_get("agent_name").ok(),
        agent_stack: parse_json_array(&agent_stack),
        user_id: row.try_get("user_id").ok(),
        latency_ms: row.try_get::<i64, _>("latency_ms").ok().map(|v| v as u64),
        usage: Usage {
            input: row.try_get::<i64, _>("usage_input").unwrap_or(0) as u64,
            output: row.try_get::<i64, _>("usage_output").unwrap_or(0) as u64,
            total: row.try_get::<i64, _>("usage_total").unwrap_or(0) as u64,
            cached: row.try_get::<i64, _>("usage_cached").unwrap_or(0) as u64,
            reasoning: row.try_get::<i64, _>("usage_reasoning").unwrap_or(0) as u64,
            accepted_prediction: row.try_get::<i64, _>("usage_accepted_prediction").unwrap_or(0) as u64,
            rejected_prediction: row.try_get::<i64, _>("usage_rejected_prediction").unwrap_or(0) as u64,
        },
        cost_total: parse_decimal(&cost)?,
        metadata: parse_json_map(&metadata),
        call_site: parse_json_map(&call_site),
        has_content: row.try_get("has_content").unwrap_or(false),
        finish_reason: row.try_get("finish_reason").ok(),
        tool_call_count: row.try_get::<i64, _>("tool_call_count").unwrap_or(0) as u64,
    })
}

pub fn content_type_from_str(raw: &str) -> Result<ContentType> {
    ContentType::ALL
        .into_iter()
        .find(|ct| ct.as_str() == raw)
        .ok_or_else(|| HiveError::storage(format!("unknown content_type {raw:?}")))
}

pub fn content_reference_from_row(row: &AnyRow) -> Result<ContentReference> {
    let ts: String = row.try_get("timestamp").map_err(HiveError::from)?;
    let content_type: String = row.try_get("content_type").map_err(HiveError::from)?;
    Ok(ContentReference {
        timestamp: parse_timestamp(&ts)?,
        trace_id: row.try_get("trace_id").map_err(HiveError::from)?,
        call_sequence: row.try_get("call_sequence").map_err(HiveError::from)?,
        team_id: row.try_get("team_id").map_err(HiveError::from)?,
        content_type: content_type_from_str(&content_type)?,
        content_hash: row.try_get("content_hash").map_err(HiveError::from)?,
        byte_size: row.try_get("byte_size").map_err(HiveError::from)?,
        message_count: row.try_get("message_count").ok(),
        truncated_preview: row.try_get("truncated_preview").map_err(HiveError::from)?,
    })
}

pub fn content_blob_from_row(row: &AnyRow) -> Result<ContentBlob> {
    let first_seen: String = row.try_get("first_seen_at").map_err(HiveError::from)?;
    let last_seen: String = row.try_get("last_seen_at").map_err(HiveError::from)?;
    Ok(ContentBlob {
        content_hash: row.try_get("content_hash").map_err(HiveError::from)?,
        team_id: row.try_get("team_id").map_err(HiveError::from)?,
        content: row.try_get("content").map_err(HiveError::from)?,
        byte_size: row.try_get("byte_size").map_err(HiveError::from)?,
        ref_count: row.try_get("ref_count").map_err(HiveError::from)?,
        first_seen_at: parse_timestamp(&first_seen)?,
        last_seen_at: parse_timestamp(&last_seen)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_roundtrips_through_text() {
        let d = Decimal::new(12345, 4);
        let parsed = parse_decimal(&d.to_string()).unwrap();
        assert_eq!(d, parsed);
    }

    #[test]
    fn timestamp_roundtrips_through_rfc3339() {
        let now = Utc::now();
        let parsed = parse_timestamp(&now.to_rfc3339()).unwrap();
        assert_eq!(now.timestamp_millis(), parsed.timestamp_millis());
    }

    #[test]
    fn content_type_round_trips_all_variants() {
        for ct in ContentType::ALL {
            assert_eq!(content_type_from_str(ct.as_str()).unwrap(), ct);
        }
    }
}
