//! Per-tenant DDL (spec.md §4.2, §6 "Persisted state").
//!
//! Table names are not schema-qualified here: the caller already set the
//! connection's search path (Postgres) or is operating against a
//! per-tenant-prefixed SQLite file, so a bare `CREATE TABLE IF NOT EXISTS`
//! lands in the right place either way.

pub const HOT_TABLE: &str = "llm_events";
pub const WARM_TABLE: &str = "llm_event_content";
pub const COLD_TABLE: &str = "llm_content_store";
pub const POLICY_TABLE: &str = "llm_policies";

pub fn create_hot_table() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {HOT_TABLE} (
            timestamp TEXT NOT NULL,
            team_id TEXT NOT NULL,
            trace_id TEXT NOT NULL,
            call_sequence BIGINT NOT NULL,
            span_id TEXT,
            parent_span_id TEXT,
            request_id TEXT,
            provider TEXT,
            model TEXT NOT NULL,
            stream BOOLEAN NOT NULL DEFAULT FALSE,
            agent TEXT,
            agent_name TEXT,
            agent_stack TEXT NOT NULL DEFAULT '[]',
            user_id TEXT,
            latency_ms BIGINT,
            usage_input BIGINT NOT NULL DEFAULT 0,
            usage_output BIGINT NOT NULL DEFAULT 0,
            usage_total BIGINT NOT NULL DEFAULT 0,
            usage_cached BIGINT NOT NULL DEFAULT 0,
            usage_reasoning BIGINT NOT NULL DEFAULT 0,
            usage_accepted_prediction BIGINT NOT NULL DEFAULT 0,
            usage_rejected_prediction BIGINT NOT NULL DEFAULT 0,
            cost_total TEXT NOT NULL DEFAULT '0',
            metadata TEXT NOT NULL DEFAULT '{{}}',
            call_site TEXT NOT NULL DEFAULT '{{}}',
            has_content BOOLEAN NOT NULL DEFAULT FALSE,
            finish_reason TEXT,
            tool_call_count BIGINT NOT NULL DEFAULT 0,
            PRIMARY KEY (timestamp, trace_id, call_sequence)
        )"
    )
}

pub fn create_hot_indexes() -> Vec<String> {
    vec![
        format!("CREATE INDEX IF NOT EXISTS idx_{HOT_TABLE}_team_ts ON {HOT_TABLE} (team_id, timestamp)"),
        format!("CREATE INDEX IF NOT EXISTS idx_{HOT_TABLE}_agent ON {HOT_TABLE} (agent)"),
        format!("CREATE INDEX IF NOT EXISTS idx_{HOT_TABLE}_model ON {HOT_TABLE} (model)"),
    ]
}

pub fn create_warm_table() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {WARM_TABLE} (
            timestamp TEXT NOT NULL,
            trace_id TEXT NOT NULL,
            call_sequence BIGINT NOT NULL,
            team_id TEXT NOT NULL,
            content_type TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            byte_size BIGINT NOT NULL,
            message_count BIGINT,
            truncated_preview TEXT NOT NULL
        )"
    )
}

pub fn create_warm_indexes() -> Vec<String> {
    vec![format!(
        "CREATE INDEX IF NOT EXISTS idx_{WARM_TABLE}_event ON {WARM_TABLE} (team_id, trace_id, call_sequence)"
    )]
}

pub fn create_cold_table() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {COLD_TABLE} (
            content_hash TEXT NOT NULL,
            team_id TEXT NOT NULL,
            content TEXT NOT NULL,
            byte_size BIGINT NOT NULL,
            ref_count BIGINT NOT NULL DEFAULT 1,
            first_seen_at TEXT NOT NULL,
            last_seen_at TEXT NOT NULL,
            PRIMARY KEY (content_hash, team_id)
        )"
    )
}

/// Policy documents, keyed by `(team_id, id)` (§4.6). Modeled as a document
/// store the way the teacher's `governance::policy` module does — one JSON
/// blob column plus the fields needed to filter/list without deserializing.
pub fn create_policy_table() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {POLICY_TABLE} (
            team_id TEXT NOT NULL,
            id TEXT NOT NULL,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            document TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (team_id, id)
        )"
    )
}

/// All statements to run, in order, the first time a tenant schema is
/// touched (§4.2 step 3). Continuous aggregates are created separately
/// (`continuous_aggregate_statements`) since they are a Postgres/Timescale
/// extension and their absence must not fail tenant bootstrap.
pub fn bootstrap_statements() -> Vec<String> {
    let mut statements =
        vec![create_hot_table(), create_warm_table(), create_cold_table(), create_policy_table()];
    statements.extend(create_hot_indexes());
    statements.extend(create_warm_indexes());
    statements
}

/// Best-effort continuous-aggregate definitions (§6), refreshed every 15
/// minutes over the trailing 30 days. Failure to create these (e.g. running
/// against plain SQLite in tests) is not fatal — `AnalyticsEngine` always has
/// a base-table fallback (§4.5).
pub fn continuous_aggregate_statements() -> Vec<String> {
    vec![
        format!(
            "CREATE MATERIALIZED VIEW IF NOT EXISTS llm_events_daily_ca
             WITH (timescaledb.continuous) AS
             SELECT team_id, time_bucket('1 day', timestamp::timestamptz) AS bucket,
                    count(*) AS requests, sum(cost_total) AS cost,
                    sum(usage_total) AS tokens
             FROM {HOT_TABLE}
             GROUP BY team_id, bucket"
        ),
        format!(
            "CREATE MATERIALIZED VIEW IF NOT EXISTS llm_events_daily_by_model_ca
             WITH (timescaledb.continuous) AS
             SELECT team_id, model, time_bucket('1 day', timestamp::timestamptz) AS bucket,
                    count(*) AS requests, sum(cost_total) AS cost
             FROM {HOT_TABLE}
             GROUP BY team_id, model, bucket"
        ),
        format!(
            "CREATE MATERIALIZED VIEW IF NOT EXISTS llm_events_daily_by_agent_ca
             WITH (timescaledb.continuous) AS
             SELECT team_id, agent, time_bucket('1 day', timestamp::timestamptz) AS bucket,
                    count(*) AS requests, sum(cost_total) AS cost
             FROM {HOT_TABLE}
             GROUP BY team_id, agent, bucket"
        ),
    ]
}

/// True when the underlying driver reports a duplicate-object / unique
/// violation — treated as a successful bootstrap per §4.2 concurrency rules.
pub fn is_duplicate_object_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_lowercase();
            db_err.code().map(|c| c == "42P07" || c == "23505").unwrap_or(false)
                || message.contains("already exists")
                || message.contains("duplicate")
        }
        _ => false,
    }
}
