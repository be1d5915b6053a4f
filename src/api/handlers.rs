//! Endpoint implementations for the `/v1/control` surface (spec.md §6).

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::api::types::{
    AgentsQuery, AppendBudgetRequest, BudgetValidateRequest, ContentBatchRequest, ContentBatchResponse,
    CreatePolicyRequest, DaysQuery, DegradationTargetsQuery, EventsIngestRequest, IngestResponse, LogsQuery,
    MetricsQuery, PaginationQuery, PolicyListResponse, RatesQuery, UpdatePolicyRequest, UsageQuery,
};
use crate::api::AppState;
use crate::auth::AuthContext;
use crate::budget::evaluator;
use crate::domain::{content_hash, BudgetContext, ContentBlob, Policy};
use crate::engine::analytics::{AnalyticsEngine, Resolution};
use crate::engine::normalizer::EventNormalizer;
use crate::error::{HiveError, Result};
use crate::storage::NormalizedBatch;

const POLICY_ID_HEADER: &str = "x-policy-id";

fn policy_id_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(POLICY_ID_HEADER)?.to_str().ok()
}

pub async fn get_policy(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
) -> Result<Json<Policy>> {
    let policy = state.policies.get(&auth.team(), policy_id_header(&headers)).await?;
    Ok(Json(policy))
}

pub async fn post_events(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<EventsIngestRequest>,
) -> Result<Json<IngestResponse>> {
    let team = auth.team();
    let batch = EventNormalizer::new(&state.pricing).normalize_batch(request.events).await;
    let processed = batch.events.len();
    let summaries = batch.events.clone();
    state.store.upsert(&team, batch).await?;
    state.batcher.add(auth.team_id.as_str(), &summaries).await;
    Ok(Json(IngestResponse { success: true, processed }))
}

pub async fn list_events(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<Vec<crate::domain::LlmEvent>>> {
    let events = state.store.list_events(&auth.team(), page.limit_or(100), page.offset_or()).await?;
    Ok(Json(events))
}

pub async fn get_event_content(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((trace_id, call_seq)): Path<(String, i64)>,
) -> Result<Json<Value>> {
    let entries = state.store.fetch_event_content(&auth.team(), &trace_id, call_seq).await?;
    let rendered: Vec<Value> = entries
        .into_iter()
        .map(|(reference, blob)| {
            json!({
                "reference": reference,
                "content": blob.map(|b| b.content),
            })
        })
        .collect();
    Ok(Json(json!({ "trace_id": trace_id, "call_sequence": call_seq, "content": rendered })))
}

pub async fn post_content(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<ContentBatchRequest>,
) -> Result<Json<ContentBatchResponse>> {
    if request.items.is_empty() {
        return Err(HiveError::validation("items must not be empty"));
    }
    let team = auth.team();
    let now = Utc::now();
    let mut blobs = Vec::with_capacity(request.items.len());
    for item in &request.items {
        if item.content.is_empty() {
            return Err(HiveError::validation("content must not be empty"));
        }
        let computed = content_hash(&item.content);
        if computed != item.content_hash {
            return Err(HiveError::validation(format!(
                "content_hash mismatch for {}: expected {computed}",
                item.content_id
            )));
        }
        blobs.push(ContentBlob {
            content_hash: computed,
            team_id: team.as_str().to_string(),
            content: item.content.clone(),
            byte_size: item.byte_size,
            ref_count: 1,
            first_seen_at: now,
            last_seen_at: now,
        });
    }

    let result = state
        .store
        .upsert(&team, NormalizedBatch { events: Vec::new(), content_refs: Vec::new(), content_blobs: blobs })
        .await?;

    Ok(Json(ContentBatchResponse { stored: result.content_stored, deduplicated: result.content_deduplicated }))
}

fn validate_sha256(hash: &str) -> Result<()> {
    if hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(HiveError::validation("content hash must be 64 hex characters"))
    }
}

pub async fn get_content_by_hash(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(sha256): Path<String>,
) -> Result<Json<ContentBlob>> {
    validate_sha256(&sha256)?;
    let blob = state
        .store
        .fetch_content_by_hash(&auth.team(), &sha256)
        .await?
        .ok_or_else(|| HiveError::not_found(format!("content {sha256}")))?;
    Ok(Json(blob))
}

/// This store's cold tier has no separate `content_id` index; a content
/// item's id and its content hash are the same lookup key here.
pub async fn get_content_by_id(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<ContentBlob>> {
    let blob = state
        .store
        .fetch_content_by_hash(&auth.team(), &id)
        .await?
        .ok_or_else(|| HiveError::not_found(format!("content {id}")))?;
    Ok(Json(blob))
}

pub async fn post_budget_validate(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<BudgetValidateRequest>,
) -> Result<Json<crate::domain::ValidationDecision>> {
    if request.estimated_cost.is_sign_negative() {
        return Err(HiveError::validation("estimated_cost must be non-negative"));
    }
    let team = auth.team();
    let policy = state.policies.get(&team, None).await?;
    let now = Utc::now();

    let decision = match (&request.budget_id, &request.context) {
        (Some(budget_id), _) => {
            let budget =
                policy.budgets.iter().find(|b| &b.id == budget_id).ok_or_else(|| {
                    HiveError::not_found(format!("budget {budget_id}"))
                })?;
            evaluator::validate(&[budget], request.estimated_cost, request.local_spend)
        }
        (None, Some(context)) => {
            evaluator::validate_for_context(&policy.budgets, context, request.estimated_cost, request.local_spend)
        }
        (None, None) => {
            evaluator::validate_for_context(
                &policy.budgets,
                &BudgetContext::default(),
                request.estimated_cost,
                request.local_spend,
            )
        }
    };

    for check in &decision.budgets_checked {
        if let Some(budget) = policy.budgets.iter().find(|b| b.id == check.budget_id) {
            state.alerts.evaluate(auth.team_id.as_str(), &policy.id, budget, check, now).await;
        }
    }

    Ok(Json(decision))
}

pub async fn list_policies(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<PolicyListResponse>> {
    let policies = state.policies.list(&auth.team(), page.limit_or(50), page.offset_or()).await?;
    Ok(Json(PolicyListResponse { policies }))
}

pub async fn create_policy(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<CreatePolicyRequest>,
) -> Result<Json<Policy>> {
    let team = auth.team();
    let id = request.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let policy = state
        .policies
        .update(&team, Some(&id), Some(auth.user_id.clone()), |policy| {
            if let Some(name) = request.name {
                policy.name = name;
            }
        })
        .await?;
    state.fanout.emit_policy_update(&team, &policy.id, &policy).await;
    Ok(Json(policy))
}

pub async fn get_policy_by_id(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<Policy>> {
    let policy = state.policies.get(&auth.team(), Some(&id)).await?;
    Ok(Json(policy))
}

pub async fn update_policy(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(request): Json<UpdatePolicyRequest>,
) -> Result<Json<Policy>> {
    let team = auth.team();
    let policy = state
        .policies
        .update(&team, Some(&id), Some(auth.user_id.clone()), |policy| {
            if let Some(name) = request.name {
                policy.name = name;
            }
        })
        .await?;
    state.fanout.emit_policy_update(&team, &policy.id, &policy).await;
    Ok(Json(policy))
}

pub async fn delete_policy(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    state.policies.delete(&auth.team(), &id).await?;
    Ok(Json(json!({ "deleted": id })))
}

pub async fn clear_policy_rules(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<Policy>> {
    let team = auth.team();
    let policy = state.policies.clear(&team, Some(&id), Some(auth.user_id.clone())).await?;
    state.fanout.emit_policy_update(&team, &policy.id, &policy).await;
    Ok(Json(policy))
}

pub async fn append_budget(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(request): Json<AppendBudgetRequest>,
) -> Result<Json<Policy>> {
    let team = auth.team();
    let policy = state.policies.append_rule(&team, Some(&id), Some(auth.user_id.clone()), request.rule).await?;
    state.fanout.emit_policy_update(&team, &policy.id, &policy).await;
    Ok(Json(policy))
}

async fn append_raw_rule(
    state: AppState,
    auth: AuthContext,
    id: String,
    value: Value,
    field: impl Fn(&mut Policy) -> &mut Vec<Value> + Send + 'static,
) -> Result<Json<Policy>> {
    let team = auth.team();
    let policy = state
        .policies
        .update(&team, Some(&id), Some(auth.user_id.clone()), |policy| field(policy).push(value))
        .await?;
    state.fanout.emit_policy_update(&team, &policy.id, &policy).await;
    Ok(Json(policy))
}

pub async fn append_throttle(
    state: State<AppState>,
    auth: AuthContext,
    path: Path<String>,
    Json(value): Json<Value>,
) -> Result<Json<Policy>> {
    append_raw_rule(state.0, auth, path.0, value, |p| &mut p.throttles).await
}

pub async fn append_block(
    state: State<AppState>,
    auth: AuthContext,
    path: Path<String>,
    Json(value): Json<Value>,
) -> Result<Json<Policy>> {
    append_raw_rule(state.0, auth, path.0, value, |p| &mut p.blocks).await
}

pub async fn append_degradation(
    state: State<AppState>,
    auth: AuthContext,
    path: Path<String>,
    Json(value): Json<Value>,
) -> Result<Json<Policy>> {
    append_raw_rule(state.0, auth, path.0, value, |p| &mut p.degradations).await
}

pub async fn append_alert(
    state: State<AppState>,
    auth: AuthContext,
    path: Path<String>,
    Json(value): Json<Value>,
) -> Result<Json<Policy>> {
    append_raw_rule(state.0, auth, path.0, value, |p| &mut p.alerts).await
}

pub async fn get_metrics(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<crate::engine::analytics::Analytics>> {
    let pool = state.router.pool_for(&auth.team()).await?;
    let window = query.window.as_deref().unwrap_or("today");
    let resolution = match query.resolution.as_deref() {
        Some("hour") => Resolution::Hour,
        _ => Resolution::Day,
    };
    let analytics = AnalyticsEngine::analytics(&pool, auth.team_id.as_str(), window, resolution, Utc::now()).await?;
    Ok(Json(analytics))
}

pub async fn get_metrics_usage(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<UsageQuery>,
) -> Result<Json<crate::engine::analytics::UsageBreakdown>> {
    let pool = state.router.pool_for(&auth.team()).await?;
    let days = query.days.filter(|d| *d > 0).unwrap_or(30);
    let breakdown =
        AnalyticsEngine::usage_breakdown(&pool, auth.team_id.as_str(), days, query.filter(), Utc::now()).await?;
    Ok(Json(breakdown))
}

pub async fn get_metrics_rates(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<RatesQuery>,
) -> Result<Json<crate::engine::analytics::RateMetrics>> {
    let pool = state.router.pool_for(&auth.team()).await?;
    let days = query.days.filter(|d| *d > 0).unwrap_or(7);
    let rates = AnalyticsEngine::rate_metrics(&pool, auth.team_id.as_str(), days, Utc::now()).await?;
    Ok(Json(rates))
}

pub async fn get_metrics_logs(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<LogsQuery>,
) -> Result<Json<crate::engine::analytics::Logs>> {
    let pool = state.router.pool_for(&auth.team()).await?;
    let now = Utc::now();
    let end = query.end.unwrap_or(now);
    let start = query.start.unwrap_or_else(|| end - chrono::Duration::days(7));
    let limit = query.limit.filter(|l| *l > 0).unwrap_or(100);
    let offset = query.offset.filter(|o| *o >= 0).unwrap_or(0);
    let logs = AnalyticsEngine::logs(&pool, auth.team_id.as_str(), start, end, query.group_by.as_deref(), limit, offset)
        .await?;
    Ok(Json(logs))
}

pub async fn get_metrics_insights(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<DaysQuery>,
) -> Result<Json<crate::engine::analytics::Insights>> {
    let pool = state.router.pool_for(&auth.team()).await?;
    let days = query.days.filter(|d| *d > 0).unwrap_or(30);
    let insights = AnalyticsEngine::insights(&pool, auth.team_id.as_str(), days, Utc::now()).await?;
    Ok(Json(insights))
}

pub async fn get_metrics_period(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<DaysQuery>,
) -> Result<Json<crate::engine::analytics::PeriodMetrics>> {
    let pool = state.router.pool_for(&auth.team()).await?;
    let days = query.days.filter(|d| *d > 0).unwrap_or(30);
    let metrics = AnalyticsEngine::metrics(&pool, auth.team_id.as_str(), days, Utc::now()).await?;
    Ok(Json(metrics))
}

pub async fn get_degradation_targets(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(query): Query<DegradationTargetsQuery>,
) -> Result<Json<crate::pricing::DegradationTargets>> {
    let mut targets = state.pricing.degradation_targets().await;
    if let Some(provider) = query.provider {
        targets.models.retain(|p, _| p == &provider);
        targets.providers.retain(|p| p == &provider);
    }
    Ok(Json(targets))
}

pub async fn get_agent_status(State(state): State<AppState>, auth: AuthContext) -> Result<Json<Value>> {
    let instances = state.agent_status.list_instances(auth.team_id.as_str()).await;
    let connected = state.agent_status.count_connected(auth.team_id.as_str()).await;
    Ok(Json(json!({ "connected": connected, "instances": instances })))
}

pub async fn get_agents(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<AgentsQuery>,
) -> Result<Json<Vec<crate::realtime::AgentDiscoveryEntry>>> {
    let team = auth.team();
    let historical = state.store.list_distinct_agents(&team, query.since, query.limit.unwrap_or(100)).await?;
    let merged = state.agent_status.discovery_view(auth.team_id.as_str(), historical).await;
    Ok(Json(merged))
}
