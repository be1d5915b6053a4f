//! Environment-driven configuration, following the teacher's `DatabaseConfig`/`ApiConfig`
//! split: env vars are parsed once at startup into a typed struct and handed to
//! components, which never read the environment themselves.

use figment::{providers::Env, Figment};
use serde::{Deserialize, Serialize};

use crate::error::{HiveError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiveConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Time-series database URL (schema-per-tenant hot/warm/cold tables).
    #[serde(default = "default_timeseries_url")]
    pub timeseries_db_url: String,

    /// Document store URL (policies, content items, pricing catalogue).
    #[serde(default = "default_document_url")]
    pub document_db_url: String,

    /// Optional pub/sub URL enabling cross-process fan-out (§4.10).
    #[serde(default)]
    pub pubsub_url: Option<String>,

    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    #[serde(default = "default_user_db_type")]
    pub user_db_type: String,

    #[serde(default)]
    pub hive_host: Option<String>,

    #[serde(rename = "hive_env", default = "default_env")]
    pub env: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub batcher: BatcherConfig,

    #[serde(default)]
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatcherConfig {
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_max_buffer")]
    pub max_buffer: usize,
    #[serde(default = "default_max_per_flush")]
    pub max_per_flush: usize,
    #[serde(default = "default_idle_gc_ms")]
    pub idle_gc_interval_ms: u64,
    #[serde(default = "default_idle_ttl_ms")]
    pub idle_ttl_ms: u64,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            max_buffer: default_max_buffer(),
            max_per_flush: default_max_per_flush(),
            idle_gc_interval_ms: default_idle_gc_ms(),
            idle_ttl_ms: default_idle_ttl_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections_per_tenant: u32,
    #[serde(default = "default_outbound_timeout_ms")]
    pub outbound_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_tenant: default_max_connections(),
            outbound_timeout_ms: default_outbound_timeout_ms(),
        }
    }
}

fn default_port() -> u16 {
    4000
}
fn default_timeseries_url() -> String {
    "sqlite::memory:".to_string()
}
fn default_document_url() -> String {
    "sqlite::memory:".to_string()
}
fn default_jwt_secret() -> String {
    "dev-insecure-secret".to_string()
}
fn default_user_db_type() -> String {
    "none".to_string()
}
fn default_env() -> String {
    "production".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_flush_interval_ms() -> u64 {
    5_000
}
fn default_max_buffer() -> usize {
    500
}
fn default_max_per_flush() -> usize {
    100
}
fn default_idle_gc_ms() -> u64 {
    5 * 60 * 1_000
}
fn default_idle_ttl_ms() -> u64 {
    5 * 60 * 1_000
}
fn default_max_connections() -> u32 {
    10
}
fn default_outbound_timeout_ms() -> u64 {
    5_000
}

impl HiveConfig {
    /// Parse configuration from process environment variables, per spec.md §6.
    ///
    /// Env vars are matched case-insensitively and mapped to snake_case field names
    /// (`PORT` -> `port`, `JWT_SECRET` -> `jwt_secret`, `HIVE_HOST` -> `hive_host`,
    /// `NODE_ENV`/`HIVE_ENV` -> `hive_env`). Every field has a `#[serde(default)]`, so
    /// an otherwise-empty environment still produces a usable development config.
    pub fn from_env() -> Result<Self> {
        Figment::new()
            .merge(Env::raw())
            .extract()
            .map_err(|e| HiveError::config(format!("failed to load configuration: {e}")))
    }

    pub fn is_development(&self) -> bool {
        self.env == "development"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        std::env::remove_var("PORT");
        let cfg: HiveConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.batcher.max_buffer, 500);
        assert_eq!(cfg.pool.max_connections_per_tenant, 10);
        assert!(!cfg.is_development());
    }
}
