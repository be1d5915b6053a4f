use std::sync::Arc;
use std::time::Duration;

use hive_core::alerts::{AlertPipeline, NoopNotifier};
use hive_core::api::{build_router, AppState};
use hive_core::audit::{AuditSink, CompositeAuditSink, InMemoryAuditSink, TracingAuditSink};
use hive_core::auth::{JwtVerifier, TokenVerifier};
use hive_core::config::HiveConfig;
use hive_core::observability::init_tracing;
use hive_core::pricing::{PricingEngine, StaticCatalogueSource};
use hive_core::realtime::{AgentStatusTracker, EventBatcher, FanoutHub, LocalBridge};
use hive_core::storage::{PolicyStore, TenantRouter, TieredStore};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = HiveConfig::from_env()?;
    init_tracing(&config.logging);

    info!(version = hive_core::VERSION, port = config.port, "starting hive-core");

    let router = Arc::new(TenantRouter::new(config.timeseries_db_url.clone(), config.pool.max_connections_per_tenant));
    let store = Arc::new(TieredStore::new(router.clone()));

    let audit: Arc<dyn AuditSink> =
        Arc::new(CompositeAuditSink::new(vec![Arc::new(InMemoryAuditSink::new(1_000)), Arc::new(TracingAuditSink)]));
    let policies = Arc::new(PolicyStore::new(router.clone(), audit));

    let pricing = Arc::new(PricingEngine::new(Arc::new(StaticCatalogueSource)));

    let fanout = FanoutHub::new(Arc::new(LocalBridge));
    let batcher = EventBatcher::new(config.batcher.clone(), fanout.clone());

    let alerts = Arc::new(AlertPipeline::new(
        fanout.clone(),
        Arc::new(NoopNotifier),
        Duration::from_millis(config.pool.outbound_timeout_ms),
    ));
    let agent_status = Arc::new(AgentStatusTracker::new());

    let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtVerifier::new(&config.jwt_secret));

    let state = AppState {
        router,
        store,
        policies,
        pricing,
        batcher,
        fanout,
        alerts,
        agent_status,
        verifier,
        mcp_sessions: Arc::new(hive_core::api::mcp::McpSessions::new()),
    };

    let app = build_router(state.clone());
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    let shutdown_batcher = state.batcher.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, flushing batcher");
            shutdown_batcher.shutdown().await;
        })
        .await?;

    Ok(())
}
