//! HTTP, WebSocket, SSE, and MCP transports over the shared `Core` capability
//! set (policy, budget, analytics, agent status) — spec.md §6, §9.

pub mod handlers;
pub mod mcp;
pub mod sse;
pub mod types;
pub mod websocket;

use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::{BoxError, Router};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::alerts::AlertPipeline;
use crate::api::mcp::McpSessions;
use crate::auth::{require_auth, TokenVerifier};
use crate::observability::http_trace_layer;
use crate::pricing::PricingEngine;
use crate::realtime::{AgentStatusTracker, EventBatcher, FanoutHub};
use crate::storage::{PolicyStore, TenantRouter, TieredStore};

/// Shared application state, handed to every handler. Each field is its own
/// `Arc` rather than one monolithic lock, matching the per-component map
/// ownership called for in spec.md §9.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<TenantRouter>,
    pub store: Arc<TieredStore>,
    pub policies: Arc<PolicyStore>,
    pub pricing: Arc<PricingEngine>,
    pub batcher: Arc<EventBatcher>,
    pub fanout: Arc<FanoutHub>,
    pub alerts: Arc<AlertPipeline>,
    pub agent_status: Arc<AgentStatusTracker>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub mcp_sessions: Arc<McpSessions>,
}

pub fn build_router(state: AppState) -> Router {
    let verifier = state.verifier.clone();

    let control = Router::new()
        .route("/policy", get(handlers::get_policy))
        .route("/events", post(handlers::post_events))
        .route("/events", get(handlers::list_events))
        .route("/events/:trace_id/:call_seq/content", get(handlers::get_event_content))
        .route("/content", post(handlers::post_content))
        .route("/content/:id", get(handlers::get_content_by_id))
        .route("/content/hash/:sha256", get(handlers::get_content_by_hash))
        .route("/budget/validate", post(handlers::post_budget_validate))
        .route("/policies", get(handlers::list_policies).post(handlers::create_policy))
        .route(
            "/policies/:id",
            get(handlers::get_policy_by_id).put(handlers::update_policy).delete(handlers::delete_policy),
        )
        .route("/policies/:id/rules", delete(handlers::clear_policy_rules))
        .route("/policies/:id/budgets", post(handlers::append_budget))
        .route("/policies/:id/throttles", post(handlers::append_throttle))
        .route("/policies/:id/blocks", post(handlers::append_block))
        .route("/policies/:id/degradations", post(handlers::append_degradation))
        .route("/policies/:id/alerts", post(handlers::append_alert))
        .route("/metrics", get(handlers::get_metrics))
        .route("/metrics/usage", get(handlers::get_metrics_usage))
        .route("/metrics/rates", get(handlers::get_metrics_rates))
        .route("/metrics/logs", get(handlers::get_metrics_logs))
        .route("/metrics/insights", get(handlers::get_metrics_insights))
        .route("/metrics/period", get(handlers::get_metrics_period))
        .route("/degradation-targets", get(handlers::get_degradation_targets))
        .route("/agent-status", get(handlers::get_agent_status))
        .route("/agent-status/stream", get(sse::agent_status_stream))
        .route("/agents", get(handlers::get_agents))
        .route("/ws", get(websocket::ws_handler))
        .route_layer(middleware::from_fn_with_state(verifier.clone(), require_auth));

    let mcp_routes = Router::new()
        .route("/mcp", get(mcp::open_session))
        .route("/mcp/message", post(mcp::post_message))
        .route("/mcp/sessions", get(mcp::list_sessions))
        .route("/mcp/sessions/:id", delete(mcp::close_session))
        .route("/mcp/health", get(mcp::health))
        .route_layer(middleware::from_fn_with_state(verifier, require_auth));

    Router::new()
        .nest("/v1/control", control)
        .merge(mcp_routes)
        .layer(http_trace_layer())
        .layer(CorsLayer::permissive())
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|err: BoxError| async move {
                    if err.is::<tower::timeout::error::Elapsed>() {
                        (StatusCode::REQUEST_TIMEOUT, "request timed out".to_string())
                    } else {
                        (StatusCode::INTERNAL_SERVER_ERROR, format!("unhandled error: {err}"))
                    }
                }))
                .timeout(Duration::from_secs(30)),
        )
        .with_state(state)
}
