//! Per-tenant connection pooling and schema bootstrap (C2, spec.md §4.2, §5).
//!
//! One [`AnyPool`] is kept per tenant schema so that a single binary can run
//! against SQLite in dev/test and Postgres in production without a
//! hand-duplicated query layer (the teacher's `#[cfg(feature = "postgres")]`
//! split would otherwise have to be mirrored across every repository
//! method). Schema bootstrap is memoized per schema with a
//! [`tokio::sync::OnceCell`]: concurrent callers for a brand-new tenant await
//! the same DDL future, and a failed attempt leaves the cell uninitialized so
//! the next caller retries rather than getting stuck on a poisoned memo.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::AnyPool;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};

use crate::domain::TeamId;
use crate::error::{HiveError, Result};

use super::schema;

/// How a tenant's base connection string maps to an isolated schema.
///
/// Postgres sets `search_path` via a connection option; SQLite (used in dev
/// and tests) isolates tenants by swapping in a per-schema file name.
fn tenant_connection_url(base_url: &str, schema: &str) -> String {
    if base_url.starts_with("sqlite:") {
        match base_url.rsplit_once(".db") {
            Some((prefix, _)) => format!("{prefix}.{schema}.db"),
            None => format!("{base_url}.{schema}"),
        }
    } else {
        let separator = if base_url.contains('?') { '&' } else { '?' };
        format!("{base_url}{separator}options=-csearch_path%3D{schema}")
    }
}

pub struct TenantRouter {
    base_url: String,
    max_connections: u32,
    pools: RwLock<HashMap<String, AnyPool>>,
    schema_init: RwLock<HashMap<String, Arc<OnceCell<()>>>>,
}

impl TenantRouter {
    pub fn new(base_url: impl Into<String>, max_connections: u32) -> Self {
        sqlx::any::install_default_drivers();
        Self {
            base_url: base_url.into(),
            max_connections,
            pools: RwLock::new(HashMap::new()),
            schema_init: RwLock::new(HashMap::new()),
        }
    }

    /// Returns a ready-to-use pool for `team`, bootstrapping its schema on
    /// first use. Safe to call concurrently for the same or different teams.
    pub async fn pool_for(&self, team: &TeamId) -> Result<AnyPool> {
        let schema = team.schema_name();
        let pool = self.get_or_create_pool(&schema).await?;
        self.ensure_schema(&pool, &schema).await?;
        Ok(pool)
    }

    async fn get_or_create_pool(&self, schema: &str) -> Result<AnyPool> {
        if let Some(pool) = self.pools.read().await.get(schema) {
            if !pool.is_closed() {
                return Ok(pool.clone());
            }
        }

        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(schema) {
            if !pool.is_closed() {
                return Ok(pool.clone());
            }
        }

        let url = tenant_connection_url(&self.base_url, schema);
        let pool = AnyPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&url)
            .await
            .map_err(|e| HiveError::storage(format!("failed to open pool for schema {schema}: {e}")))?;

        info!(schema, "opened tenant pool");
        pools.insert(schema.to_string(), pool.clone());
        Ok(pool)
    }

    /// Evicts a pool so the next `pool_for` call reconnects from scratch.
    /// Called by callers that observe a connection-level error mid-query.
    pub async fn evict(&self, team: &TeamId) {
        let schema = team.schema_name();
        self.pools.write().await.remove(&schema);
        self.schema_init.write().await.remove(&schema);
    }

    async fn ensure_schema(&self, pool: &AnyPool, schema: &str) -> Result<()> {
        let memo = {
            let mut init = self.schema_init.write().await;
            init.entry(schema.to_string()).or_insert_with(|| Arc::new(OnceCell::new())).clone()
        };

        memo.get_or_try_init(|| run_bootstrap(pool, schema)).await?;
        Ok(())
    }
}

async fn run_bootstrap(pool: &AnyPool, schema: &str) -> Result<()> {
    for statement in schema::bootstrap_statements() {
        if let Err(e) = sqlx::query(&statement).execute(pool).await {
            if let sqlx::Error::Database(_) = &e {
                if schema::is_duplicate_object_error(&e) {
                    continue;
                }
            }
            return Err(HiveError::storage(format!("bootstrap failed for schema {schema}: {e}")));
        }
    }

    for statement in schema::continuous_aggregate_statements() {
        if let Err(e) = sqlx::query(&statement).execute(pool).await {
            warn!(schema, error = %e, "continuous aggregate unavailable, falling back to base table");
        }
    }

    Ok(())
}

/// Returns the distinct agent identifiers ever seen for `team`, used by the
/// `/agents` discovery endpoint (C11) to merge with live heartbeats.
pub async fn list_distinct_agents(pool: &AnyPool) -> Result<Vec<String>> {
    let rows: Vec<AnyRow> = sqlx::query(&format!(
        "SELECT DISTINCT agent FROM {} WHERE agent IS NOT NULL",
        schema::HOT_TABLE
    ))
    .fetch_all(pool)
    .await
    .map_err(|e| HiveError::storage(format!("failed to list distinct agents: {e}")))?;

    use sqlx::Row;
    Ok(rows.into_iter().filter_map(|r| r.try_get::<String, _>("agent").ok()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_url_gets_schema_suffix() {
        let url = tenant_connection_url("sqlite://./data/hive.db", "hive_acme");
        assert_eq!(url, "sqlite://./data/hive.hive_acme.db");
    }

    #[test]
    fn postgres_url_gets_search_path_option() {
        let url = tenant_connection_url("postgres://localhost/hive", "hive_acme");
        assert!(url.contains("options=-csearch_path%3Dhive_acme"));
    }

    #[test]
    fn postgres_url_appends_to_existing_query() {
        let url = tenant_connection_url("postgres://localhost/hive?sslmode=require", "hive_acme");
        assert!(url.contains("sslmode=require&options="));
    }

    #[tokio::test]
    async fn pool_is_reused_for_the_same_team() {
        let router = TenantRouter::new("sqlite::memory:", 1);
        let team = TeamId::new("acme");
        let a = router.pool_for(&team).await.unwrap();
        let b = router.pool_for(&team).await.unwrap();
        assert_eq!(a.size(), b.size());
        assert_eq!(router.pools.read().await.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_bootstrap_for_new_tenant_runs_once() {
        let router = Arc::new(TenantRouter::new("sqlite::memory:", 5));
        let team = TeamId::new("concurrent-team");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let router = router.clone();
            let team = team.clone();
            handles.push(tokio::spawn(async move { router.pool_for(&team).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
    }
}
