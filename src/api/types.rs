//! Request/response DTOs for the HTTP control surface (spec.md §6).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{BudgetContext, BudgetRule, Policy};
use crate::engine::normalizer::RawEvent;

#[derive(Debug, Deserialize)]
pub struct EventsIngestRequest {
    pub events: Vec<RawEvent>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub success: bool,
    pub processed: usize,
}

#[derive(Debug, Deserialize)]
pub struct ContentItemRequest {
    pub content_id: String,
    pub content_hash: String,
    pub content: String,
    pub byte_size: i64,
}

#[derive(Debug, Deserialize)]
pub struct ContentBatchRequest {
    pub items: Vec<ContentItemRequest>,
}

#[derive(Debug, Serialize)]
pub struct ContentBatchResponse {
    pub stored: usize,
    pub deduplicated: usize,
}

#[derive(Debug, Deserialize)]
pub struct BudgetValidateRequest {
    #[serde(default)]
    pub budget_id: Option<String>,
    #[serde(default)]
    pub context: Option<BudgetContext>,
    pub estimated_cost: Decimal,
    #[serde(default)]
    pub local_spend: Option<Decimal>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PaginationQuery {
    pub fn limit_or(&self, default: i64) -> i64 {
        self.limit.filter(|l| *l > 0).unwrap_or(default)
    }

    pub fn offset_or(&self) -> i64 {
        self.offset.filter(|o| *o >= 0).unwrap_or(0)
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct MetricsQuery {
    pub window: Option<String>,
    pub resolution: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RatesQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UsageQuery {
    pub days: Option<i64>,
    pub filter_type: Option<String>,
    pub filter_value: Option<String>,
}

impl UsageQuery {
    /// `(kind, value)` for [`crate::engine::analytics::AnalyticsEngine::usage_breakdown`]'s
    /// type-aware filter — present only when both query parameters are set.
    pub fn filter(&self) -> Option<(&str, &str)> {
        Some((self.filter_type.as_deref()?, self.filter_value.as_deref()?))
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct LogsQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub group_by: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DaysQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DegradationTargetsQuery {
    pub provider: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AgentsQuery {
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePolicyRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePolicyRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PolicyListResponse {
    pub policies: Vec<Policy>,
}

#[derive(Debug, Deserialize)]
pub struct AppendBudgetRequest {
    #[serde(flatten)]
    pub rule: BudgetRule,
}
