//! `AnalyticsEngine`'s §4.5 operations exercised against a real pool, since
//! they're SQL-heavy enough that the pure-function unit tests in
//! `engine::analytics` don't cover the query layer.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use hive_core::domain::{LlmEvent, TeamId, Usage};
use hive_core::engine::analytics::AnalyticsEngine;
use hive_core::storage::{NormalizedBatch, TenantRouter, TieredStore};
use rust_decimal_macros::dec;

fn event(trace: &str, model: &str, agent: Option<&str>, feature: Option<&str>, cost: rust_decimal::Decimal) -> LlmEvent {
    let mut metadata = HashMap::new();
    if let Some(f) = feature {
        metadata.insert("feature".to_string(), serde_json::Value::String(f.to_string()));
    }
    LlmEvent {
        timestamp: Utc::now(),
        team_id: "acme".into(),
        trace_id: trace.into(),
        call_sequence: 0,
        span_id: None,
        parent_span_id: None,
        request_id: None,
        provider: Some("openai".into()),
        model: model.into(),
        stream: false,
        agent: agent.map(str::to_string),
        agent_name: None,
        agent_stack: agent.map(|a| vec![a.to_string()]).unwrap_or_default(),
        user_id: None,
        latency_ms: Some(500),
        usage: Usage { input: 100, output: 50, total: 150, ..Default::default() },
        cost_total: cost,
        metadata,
        call_site: HashMap::new(),
        has_content: false,
        finish_reason: Some("stop".into()),
        tool_call_count: 0,
    }
}

async fn store_with_events(events: Vec<LlmEvent>) -> (TieredStore, Arc<TenantRouter>, TeamId) {
    let router = Arc::new(TenantRouter::new("sqlite::memory:", 1));
    let store = TieredStore::new(router.clone());
    let team = TeamId::new("acme");
    store.upsert(&team, NormalizedBatch { events, content_refs: vec![], content_blobs: vec![] }).await.unwrap();
    (store, router, team)
}

#[tokio::test]
async fn usage_breakdown_splits_by_model_and_feature() {
    let events = vec![
        event("t1", "gpt-4o", Some("researcher"), Some("chat"), dec!(1.00)),
        event("t2", "gpt-4o-mini", Some("writer"), Some("summarize"), dec!(0.50)),
    ];
    let (_store, router, team) = store_with_events(events).await;
    let pool = router.pool_for(&team).await.unwrap();

    let breakdown = AnalyticsEngine::usage_breakdown(&pool, team.as_str(), 7, None, Utc::now()).await.unwrap();
    assert_eq!(breakdown.by_model.len(), 2);
    assert_eq!(breakdown.by_feature.len(), 2);
    assert!(!breakdown.daily.is_empty());
    let total: rust_decimal::Decimal = breakdown.by_model.iter().map(|m| m.cost_total).sum();
    assert_eq!(total, dec!(1.50));
}

#[tokio::test]
async fn usage_breakdown_filter_narrows_to_matching_agent() {
    let events = vec![
        event("t1", "gpt-4o", Some("researcher"), None, dec!(1.00)),
        event("t2", "gpt-4o", Some("writer"), None, dec!(2.00)),
    ];
    let (_store, router, team) = store_with_events(events).await;
    let pool = router.pool_for(&team).await.unwrap();

    let breakdown =
        AnalyticsEngine::usage_breakdown(&pool, team.as_str(), 7, Some(("agent", "researcher")), Utc::now())
            .await
            .unwrap();
    let total: rust_decimal::Decimal = breakdown.by_model.iter().map(|m| m.cost_total).sum();
    assert_eq!(total, dec!(1.00));
}

#[tokio::test]
async fn logs_without_group_by_returns_raw_rows_newest_first() {
    let events = vec![event("t1", "gpt-4o", Some("researcher"), None, dec!(1.00))];
    let (_store, router, team) = store_with_events(events).await;
    let pool = router.pool_for(&team).await.unwrap();

    let start = Utc::now() - chrono::Duration::days(1);
    let logs = AnalyticsEngine::logs(&pool, team.as_str(), start, Utc::now(), None, 10, 0).await.unwrap();
    match logs {
        hive_core::engine::analytics::Logs::Rows(rows) => assert_eq!(rows.len(), 1),
        hive_core::engine::analytics::Logs::Grouped(_) => panic!("expected raw rows"),
    }
}

#[tokio::test]
async fn logs_groups_by_model_and_agent() {
    let events = vec![
        event("t1", "gpt-4o", Some("researcher"), None, dec!(1.00)),
        event("t2", "gpt-4o", Some("researcher"), None, dec!(1.00)),
        event("t3", "gpt-4o-mini", Some("writer"), None, dec!(0.50)),
    ];
    let (_store, router, team) = store_with_events(events).await;
    let pool = router.pool_for(&team).await.unwrap();

    let start = Utc::now() - chrono::Duration::days(1);
    let logs = AnalyticsEngine::logs(&pool, team.as_str(), start, Utc::now(), Some("model,agent"), 10, 0)
        .await
        .unwrap();
    match logs {
        hive_core::engine::analytics::Logs::Grouped(groups) => {
            assert_eq!(groups.len(), 2);
            let gpt4o = groups.iter().find(|g| g.key == "gpt-4o|researcher").unwrap();
            assert_eq!(gpt4o.requests, 2);
        }
        hive_core::engine::analytics::Logs::Rows(_) => panic!("expected grouped rows"),
    }
}

#[tokio::test]
async fn logs_rejects_unsupported_group_by() {
    let (_store, router, team) = store_with_events(vec![]).await;
    let pool = router.pool_for(&team).await.unwrap();
    let start = Utc::now() - chrono::Duration::days(1);
    let result = AnalyticsEngine::logs(&pool, team.as_str(), start, Utc::now(), Some("model,provider,agent"), 10, 0).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn metrics_reports_zero_delta_with_no_history() {
    let (_store, router, team) = store_with_events(vec![]).await;
    let pool = router.pool_for(&team).await.unwrap();
    let metrics = AnalyticsEngine::metrics(&pool, team.as_str(), 7, Utc::now()).await.unwrap();
    assert_eq!(metrics.cost.delta_percent, 0.0);
}

#[tokio::test]
async fn insights_produces_a_card_per_metric() {
    let events = vec![event("t1", "gpt-4o", Some("researcher"), None, dec!(1.00))];
    let (_store, router, team) = store_with_events(events).await;
    let pool = router.pool_for(&team).await.unwrap();
    let insights = AnalyticsEngine::insights(&pool, team.as_str(), 7, Utc::now()).await.unwrap();
    assert_eq!(insights.cards.len(), 4);
}
