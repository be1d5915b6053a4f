//! Hot/warm/cold persistence for normalized events (C4, spec.md §4.4).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::instrument;

use crate::domain::{ContentBlob, ContentReference, ContentType, LlmEvent, TeamId};
use crate::error::{HiveError, Result};

use super::models;
use super::schema::{COLD_TABLE, HOT_TABLE, WARM_TABLE};
use super::tenant_router::TenantRouter;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UpsertResult {
    pub rows_written: usize,
    pub content_stored: usize,
    pub content_deduplicated: usize,
}

/// A fully normalized batch ready for persistence: events plus the
/// deduplicated-within-batch content produced by the normalizer (§4.3 step 4).
pub struct NormalizedBatch {
    pub events: Vec<LlmEvent>,
    pub content_refs: Vec<ContentReference>,
    /// One blob per unique content hash in the batch.
    pub content_blobs: Vec<ContentBlob>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentSummary {
    pub agent: String,
    pub agent_name: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_requests: i64,
    pub total_cost: rust_decimal::Decimal,
}

pub struct TieredStore {
    router: Arc<TenantRouter>,
}

impl TieredStore {
    pub fn new(router: Arc<TenantRouter>) -> Self {
        Self { router }
    }

    /// Persists a normalized batch in one transaction (§4.4 step 5): hot-table
    /// upsert with event-time-wins conflict resolution, cold-blob upsert with
    /// ref-count bump, then append-only warm references.
    #[instrument(skip(self, batch), fields(team = %team, events = batch.events.len()))]
    pub async fn upsert(&self, team: &TeamId, batch: NormalizedBatch) -> Result<UpsertResult> {
        let pool = self.router.pool_for(team).await?;
        let mut tx = pool.begin().await.map_err(HiveError::from)?;

        let mut rows_written = 0usize;
        for event in &batch.events {
            let outcome = upsert_event(&mut tx, event).await?;
            if outcome {
                rows_written += 1;
            }
        }

        let mut content_stored = 0usize;
        let mut content_deduplicated = 0usize;
        for blob in &batch.content_blobs {
            if upsert_content_blob(&mut tx, blob).await? {
                content_stored += 1;
            } else {
                content_deduplicated += 1;
            }
        }

        for reference in &batch.content_refs {
            insert_content_reference(&mut tx, reference).await?;
        }

        tx.commit().await.map_err(HiveError::from)?;

        Ok(UpsertResult { rows_written, content_stored, content_deduplicated })
    }

    /// Joins warm references for one event with their cold content (§4.4).
    pub async fn fetch_event_content(
        &self,
        team: &TeamId,
        trace_id: &str,
        call_sequence: i64,
    ) -> Result<Vec<(ContentReference, Option<ContentBlob>)>> {
        let pool = self.router.pool_for(team).await?;
        let rows = sqlx::query(&format!(
            "SELECT w.*, c.content AS blob_content, c.ref_count AS blob_ref_count,
                    c.first_seen_at AS blob_first_seen_at, c.last_seen_at AS blob_last_seen_at
             FROM {WARM_TABLE} w
             LEFT JOIN {COLD_TABLE} c ON c.content_hash = w.content_hash AND c.team_id = w.team_id
             WHERE w.team_id = ? AND w.trace_id = ? AND w.call_sequence = ?"
        ))
        .bind(team.as_str())
        .bind(trace_id)
        .bind(call_sequence)
        .fetch_all(&pool)
        .await
        .map_err(HiveError::from)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let reference = models::content_reference_from_row(&row)?;
            let blob = row.try_get::<String, _>("blob_content").ok().map(|content| ContentBlob {
                content_hash: reference.content_hash.clone(),
                team_id: reference.team_id.clone(),
                content,
                byte_size: row.try_get("byte_size").unwrap_or(0),
                ref_count: row.try_get("blob_ref_count").unwrap_or(1),
                first_seen_at: reference.timestamp,
                last_seen_at: reference.timestamp,
            });
            out.push((reference, blob));
        }
        Ok(out)
    }

    pub async fn fetch_content_by_hash(&self, team: &TeamId, hash: &str) -> Result<Option<ContentBlob>> {
        let pool = self.router.pool_for(team).await?;
        let row = sqlx::query(&format!(
            "SELECT * FROM {COLD_TABLE} WHERE content_hash = ? AND team_id = ?"
        ))
        .bind(hash)
        .bind(team.as_str())
        .fetch_optional(&pool)
        .await
        .map_err(HiveError::from)?;

        row.as_ref().map(models::content_blob_from_row).transpose()
    }

    /// Lists recent hot-table rows for `GET /v1/control/events` (§6), newest first.
    pub async fn list_events(&self, team: &TeamId, limit: i64, offset: i64) -> Result<Vec<LlmEvent>> {
        let pool = self.router.pool_for(team).await?;
        let rows = sqlx::query(&format!(
            "SELECT * FROM {HOT_TABLE} WHERE team_id = ? ORDER BY timestamp DESC LIMIT ? OFFSET ?"
        ))
        .bind(team.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&pool)
        .await
        .map_err(HiveError::from)?;

        rows.iter().map(models::event_from_row).collect()
    }

    /// Aggregates the hot table for the agent discovery view (§4.4, §4.11).
    pub async fn list_distinct_agents(
        &self,
        team: &TeamId,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<AgentSummary>> {
        let pool = self.router.pool_for(team).await?;
        let sql = if since.is_some() {
            format!(
                "SELECT agent, agent_name, MIN(timestamp) AS first_seen, MAX(timestamp) AS last_seen,
                        COUNT(*) AS total_requests, SUM(CAST(cost_total AS REAL)) AS total_cost
                 FROM {HOT_TABLE}
                 WHERE team_id = ? AND agent IS NOT NULL AND timestamp >= ?
                 GROUP BY agent, agent_name
                 ORDER BY last_seen DESC
                 LIMIT ?"
            )
        } else {
            format!(
                "SELECT agent, agent_name, MIN(timestamp) AS first_seen, MAX(timestamp) AS last_seen,
                        COUNT(*) AS total_requests, SUM(CAST(cost_total AS REAL)) AS total_cost
                 FROM {HOT_TABLE}
                 WHERE team_id = ? AND agent IS NOT NULL
                 GROUP BY agent, agent_name
                 ORDER BY last_seen DESC
                 LIMIT ?"
            )
        };

        let mut query = sqlx::query(&sql).bind(team.as_str());
        if let Some(since) = since {
            query = query.bind(since.to_rfc3339());
        }
        let rows = query.bind(limit).fetch_all(&pool).await.map_err(HiveError::from)?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let first_seen: String = row.try_get("first_seen").map_err(HiveError::from)?;
            let last_seen: String = row.try_get("last_seen").map_err(HiveError::from)?;
            let total_cost: f64 = row.try_get("total_cost").unwrap_or(0.0);
            summaries.push(AgentSummary {
                agent: row.try_get("agent").map_err(HiveError::from)?,
                agent_name: row.try_get("agent_name").ok(),
                first_seen: DateTime::parse_from_rfc3339(&first_seen)
                    .map(|d| d.with_timezone(&Utc))
                    .map_err(|e| HiveError::storage(format!("bad first_seen: {e}")))?,
                last_seen: DateTime::parse_from_rfc3339(&last_seen)
                    .map(|d| d.with_timezone(&Utc))
                    .map_err(|e| HiveError::storage(format!("bad last_seen: {e}")))?,
                total_requests: row.try_get("total_requests").unwrap_or(0),
                total_cost: rust_decimal::Decimal::try_from(total_cost).unwrap_or_default(),
            });
        }
        Ok(summaries)
    }
}

/// Returns `true` if the row's timestamp advanced (the event was actually
/// written or overwritten), `false` if an existing, newer row was kept.
async fn upsert_event(tx: &mut sqlx::Transaction<'_, sqlx::Any>, event: &LlmEvent) -> Result<bool> {
    let agent_stack = serde_json::to_string(&event.agent_stack).unwrap_or_else(|_| "[]".to_string());
    let metadata = serde_json::to_string(&event.metadata).unwrap_or_else(|_| "{}".to_string());
    let call_site = serde_json::to_string(&event.call_site).unwrap_or_else(|_| "{}".to_string());

    let result = sqlx::query(&format!(
        "INSERT INTO {HOT_TABLE} (
            timestamp, team_id, trace_id, call_sequence, span_id, parent_span_id, request_id,
            provider, model, stream, agent, agent_name, agent_stack, user_id, latency_ms,
            usage_input, usage_output, usage_total, usage_cached, usage_reasoning,
            usage_accepted_prediction, usage_rejected_prediction, cost_total, metadata,
            call_site, has_content, finish_reason, tool_call_count
         ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
         ON CONFLICT (timestamp, trace_id, call_sequence) DO UPDATE SET
            span_id = excluded.span_id, parent_span_id = excluded.parent_span_id,
            request_id = excluded.request_id, provider = excluded.provider, model = excluded.model,
            stream = excluded.stream, agent = excluded.agent, agent_name = excluded.agent_name,
            agent_stack = excluded.agent_stack, user_id = excluded.user_id,
            latency_ms = excluded.latency_ms, usage_input = excluded.usage_input,
            usage_output = excluded.usage_output, usage_total = excluded.usage_total,
            usage_cached = excluded.usage_cached, usage_reasoning = excluded.usage_reasoning,
            usage_accepted_prediction = excluded.usage_accepted_prediction,
            usage_rejected_prediction = excluded.usage_rejected_prediction,
            cost_total = excluded.cost_total, metadata = excluded.metadata,
            call_site = excluded.call_site, has_content = excluded.has_content,
            finish_reason = excluded.finish_reason, tool_call_count = excluded.tool_call_count
         WHERE excluded.timestamp >= {HOT_TABLE}.timestamp"
    ))
    .bind(event.timestamp.to_rfc3339())
    .bind(&event.team_id)
    .bind(&event.trace_id)
    .bind(event.call_sequence)
    .bind(&event.span_id)
    .bind(&event.parent_span_id)
    .bind(&event.request_id)
    .bind(&event.provider)
    .bind(&event.model)
    .bind(event.stream)
    .bind(&event.agent)
    .bind(&event.agent_name)
    .bind(agent_stack)
    .bind(&event.user_id)
    .bind(event.latency_ms.map(|v| v as i64))
    .bind(event.usage.input as i64)
    .bind(event.usage.output as i64)
    .bind(event.usage.total as i64)
    .bind(event.usage.cached as i64)
    .bind(event.usage.reasoning as i64)
    .bind(event.usage.accepted_prediction as i64)
    .bind(event.usage.rejected_prediction as i64)
    .bind(event.cost_total.to_string())
    .bind(metadata)
    .bind(call_site)
    .bind(event.has_content)
    .bind(&event.finish_reason)
    .bind(event.tool_call_count as i64)
    .execute(&mut **tx)
    .await
    .map_err(HiveError::from)?;

    Ok(result.rows_affected() > 0)
}

/// Returns `true` if this call inserted a brand-new blob, `false` if it bumped
/// an existing one's `ref_count` (§4.4 step 3).
async fn upsert_content_blob(tx: &mut sqlx::Transaction<'_, sqlx::Any>, blob: &ContentBlob) -> Result<bool> {
    let existing = sqlx::query(&format!(
        "SELECT ref_count FROM {COLD_TABLE} WHERE content_hash = ? AND team_id = ?"
    ))
    .bind(&blob.content_hash)
    .bind(&blob.team_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(HiveError::from)?;

    if existing.is_some() {
        sqlx::query(&format!(
            "UPDATE {COLD_TABLE} SET ref_count = ref_count + 1, last_seen_at = ?
             WHERE content_hash = ? AND team_id = ?"
        ))
        .bind(blob.last_seen_at.to_rfc3339())
        .bind(&blob.content_hash)
        .bind(&blob.team_id)
        .execute(&mut **tx)
        .await
        .map_err(HiveError::from)?;
        Ok(false)
    } else {
        sqlx::query(&format!(
            "INSERT INTO {COLD_TABLE}
                (content_hash, team_id, content, byte_size, ref_count, first_seen_at, last_seen_at)
             VALUES (?,?,?,?,1,?,?)"
        ))
        .bind(&blob.content_hash)
        .bind(&blob.team_id)
        .bind(&blob.content)
        .bind(blob.byte_size)
        .bind(blob.first_seen_at.to_rfc3339())
        .bind(blob.last_seen_at.to_rfc3339())
        .execute(&mut **tx)
        .await
        .map_err(HiveError::from)?;
        Ok(true)
    }
}

async fn insert_content_reference(
    tx: &mut sqlx::Transaction<'_, sqlx::Any>,
    reference: &ContentReference,
) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO {WARM_TABLE}
            (timestamp, trace_id, call_sequence, team_id, content_type, content_hash,
             byte_size, message_count, truncated_preview)
         VALUES (?,?,?,?,?,?,?,?,?)"
    ))
    .bind(reference.timestamp.to_rfc3339())
    .bind(&reference.trace_id)
    .bind(reference.call_sequence)
    .bind(&reference.team_id)
    .bind(reference.content_type.as_str())
    .bind(&reference.content_hash)
    .bind(reference.byte_size)
    .bind(reference.message_count)
    .bind(&reference.truncated_preview)
    .execute(&mut **tx)
    .await
    .map_err(HiveError::from)?;
    Ok(())
}

/// Not dropped on trim: this acts as the content-type validity gate before a
/// reference row is ever constructed, exercised by the normalizer (C3).
pub fn validate_content_type(raw: &str) -> Result<ContentType> {
    models::content_type_from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Usage;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn sample_event(trace: &str, seq: i64, ts: DateTime<Utc>) -> LlmEvent {
        LlmEvent {
            timestamp: ts,
            team_id: "acme".into(),
            trace_id: trace.into(),
            call_sequence: seq,
            span_id: None,
            parent_span_id: None,
            request_id: None,
            provider: Some("openai".into()),
            model: "gpt-4o".into(),
            stream: false,
            agent: Some("researcher".into()),
            agent_name: None,
            agent_stack: vec!["researcher".into()],
            user_id: None,
            latency_ms: Some(120),
            usage: Usage { input: 100, output: 50, total: 150, ..Default::default() },
            cost_total: dec!(0.01),
            metadata: HashMap::new(),
            call_site: HashMap::new(),
            has_content: false,
            finish_reason: Some("stop".into()),
            tool_call_count: 0,
        }
    }

    async fn store() -> TieredStore {
        let router = Arc::new(TenantRouter::new("sqlite::memory:", 1));
        TieredStore::new(router)
    }

    #[tokio::test]
    async fn upsert_writes_event_rows() {
        let store = store().await;
        let team = TeamId::new("acme");
        let batch = NormalizedBatch {
            events: vec![sample_event("t1", 0, Utc::now())],
            content_refs: vec![],
            content_blobs: vec![],
        };
        let result = store.upsert(&team, batch).await.unwrap();
        assert_eq!(result.rows_written, 1);
        assert_eq!(result.content_stored, 0);
    }

    #[tokio::test]
    async fn later_timestamp_wins_on_replay() {
        let store = store().await;
        let team = TeamId::new("acme");
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(5);

        let mut first = sample_event("t1", 0, t0);
        first.cost_total = dec!(0.01);
        store
            .upsert(&team, NormalizedBatch { events: vec![first], content_refs: vec![], content_blobs: vec![] })
            .await
            .unwrap();

        let mut second = sample_event("t1", 0, t1);
        second.cost_total = dec!(0.02);
        store
            .upsert(&team, NormalizedBatch { events: vec![second], content_refs: vec![], content_blobs: vec![] })
            .await
            .unwrap();

        let agents = store.list_distinct_agents(&team, None, 10).await.unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].total_requests, 1);
    }

    #[tokio::test]
    async fn duplicate_content_blob_increments_ref_count_not_row_count() {
        let store = store().await;
        let team = TeamId::new("acme");
        let now = Utc::now();
        let blob = ContentBlob {
            content_hash: "abc123".into(),
            team_id: "acme".into(),
            content: "hello".into(),
            byte_size: 5,
            ref_count: 1,
            first_seen_at: now,
            last_seen_at: now,
        };

        let first = store
            .upsert(
                &team,
                NormalizedBatch { events: vec![], content_refs: vec![], content_blobs: vec![blob.clone()] },
            )
            .await
            .unwrap();
        assert_eq!(first.content_stored, 1);

        let second = store
            .upsert(&team, NormalizedBatch { events: vec![], content_refs: vec![], content_blobs: vec![blob] })
            .await
            .unwrap();
        assert_eq!(second.content_deduplicated, 1);

        let fetched = store.fetch_content_by_hash(&team, "abc123").await.unwrap().unwrap();
        assert_eq!(fetched.ref_count, 2);
    }
}
