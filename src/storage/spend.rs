//! Budget-type-aware spend queries over the hot table, shared by `PolicyStore`
//! enrichment (§4.6) and `BudgetEvaluator`'s SQL filter table (§4.7).

use chrono::{DateTime, Datelike, TimeZone, Utc};
use sqlx::{AnyPool, Row};

use crate::domain::{BudgetAnalytics, BudgetHealth, BudgetRule, BudgetType};
use crate::error::{HiveError, Result};

use super::schema::HOT_TABLE;

/// Type-aware metadata predicate for a single `(kind, value)` pair, shared by
/// the budget spend predicate table below and `AnalyticsEngine::usage_breakdown`'s
/// filter (§4.5, §4.7). Probes the serialized metadata JSON with the keyed
/// form `"key":"value"` rather than a bare substring, so a name can't match
/// by appearing in an unrelated field.
pub fn metadata_predicate(kind: &str, value: &str) -> (String, Vec<String>) {
    match kind {
        "agent" => (
            "(agent = ? OR metadata LIKE ?)".to_string(),
            vec![value.to_string(), format!("%\"agent\":\"{value}\"%")],
        ),
        "tenant" => ("metadata LIKE ?".to_string(), vec![format!("%\"tenant_id\":\"{value}\"%")]),
        "customer" => ("metadata LIKE ?".to_string(), vec![format!("%\"customer_id\":\"{value}\"%")]),
        "feature" => (
            "(metadata LIKE ? OR agent = ?)".to_string(),
            vec![format!("%\"feature\":\"{value}\"%"), value.to_string()],
        ),
        "tag" => ("metadata LIKE ?".to_string(), vec![format!("%\"{value}\"%")]),
        _ => ("1 = 1".to_string(), Vec::new()),
    }
}

/// `(where_clause, bind_values)` in the order they appear as `?` placeholders
/// in the clause. `Tag` matches `budget.tags` (§4.7: `metadata->'tags' ?|
/// :tags`), not the budget's display name — one `LIKE` arm per tag, OR'd
/// together; every other type delegates to [`metadata_predicate`].
fn predicate_for(budget: &BudgetRule) -> (String, Vec<String>) {
    match budget.budget_type {
        BudgetType::Global => ("1 = 1".to_string(), Vec::new()),
        BudgetType::Agent => metadata_predicate("agent", &budget.name),
        BudgetType::Tenant => metadata_predicate("tenant", &budget.name),
        BudgetType::Customer => metadata_predicate("customer", &budget.name),
        BudgetType::Feature => metadata_predicate("feature", &budget.name),
        BudgetType::Tag => {
            let tags = budget.tags.as_deref().unwrap_or(&[]);
            if tags.is_empty() {
                return ("1 = 0".to_string(), Vec::new());
            }
            let clause = tags.iter().map(|_| "metadata LIKE ?").collect::<Vec<_>>().join(" OR ");
            let binds = tags.iter().map(|tag| format!("%\"{tag}\"%")).collect();
            (format!("({clause})"), binds)
        }
    }
}

/// Sums `cost_total` for rows matching `budget`'s type predicate within
/// `[start, end)`. Metadata predicates use a `LIKE` probe over the serialized
/// JSON column rather than a JSON-path operator, since the `Any` driver has
/// to work across both Postgres and SQLite (§4.2) and SQLite lacks `->>` entirely.
pub async fn spend_in_window(
    pool: &AnyPool,
    team_id: &str,
    budget: &BudgetRule,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<rust_decimal::Decimal> {
    let (predicate, binds) = predicate_for(budget);
    let sql = format!(
        "SELECT cost_total FROM {HOT_TABLE} WHERE team_id = ? AND timestamp >= ? AND timestamp < ? AND {predicate}"
    );
    let mut query = sqlx::query(&sql).bind(team_id).bind(start.to_rfc3339()).bind(end.to_rfc3339());
    for bind in binds {
        query = query.bind(bind);
    }

    let rows = query.fetch_all(pool).await.map_err(HiveError::from)?;
    let mut total = rust_decimal::Decimal::ZERO;
    for row in rows {
        let raw: String = row.try_get("cost_total").map_err(HiveError::from)?;
        total += raw.parse::<rust_decimal::Decimal>().unwrap_or_default();
    }
    Ok(total)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_of_next = Utc.with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0).unwrap();
    let first_of_this = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap();
    (first_of_next - first_of_this).num_days() as u32
}

/// Computes month-to-date spend and derived analytics for `budget` (§4.6).
/// `budget.limit == 0` degenerates every percentage to `Unknown` rather than
/// dividing by zero. Returns `(spent, analytics)` so callers can persist the
/// same spend figure the analytics were derived from.
pub async fn enrich(
    pool: &AnyPool,
    team_id: &str,
    budget: &BudgetRule,
    now: DateTime<Utc>,
) -> Result<(rust_decimal::Decimal, BudgetAnalytics)> {
    let month_start = Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0).unwrap();
    let spent = spend_in_window(pool, team_id, budget, month_start, now).await?;

    let days_elapsed = ((now - month_start).num_seconds() as f64 / 86_400.0).max(1.0 / 24.0);
    let total_days = days_in_month(now.year(), now.month()) as f64;
    let burn_rate = spent / rust_decimal::Decimal::try_from(days_elapsed).unwrap_or(rust_decimal::Decimal::ONE);
    let projected = burn_rate * rust_decimal::Decimal::try_from(total_days).unwrap_or(rust_decimal::Decimal::ONE);

    if budget.limit.is_zero() {
        return Ok((
            spent,
            BudgetAnalytics {
                burn_rate,
                projected_spend: projected,
                days_until_limit: None,
                usage_percent: 0.0,
                projected_percent: 0.0,
                status: BudgetHealth::Unknown,
                period: "month_to_date".to_string(),
            },
        ));
    }

    let usage_percent = (spent / budget.limit * rust_decimal::Decimal::from(100))
        .try_into()
        .unwrap_or(0.0);
    let projected_percent: f64 = (projected / budget.limit * rust_decimal::Decimal::from(100))
        .try_into()
        .unwrap_or(0.0);
    let remaining = (budget.limit - spent).max(rust_decimal::Decimal::ZERO);
    let days_until_limit = if burn_rate.is_zero() {
        None
    } else {
        (remaining / burn_rate).try_into().ok()
    };
    let days_remaining = total_days - days_elapsed;

    let status = if usage_percent >= 100.0 {
        BudgetHealth::Exceeded
    } else if projected_percent >= 100.0 || days_until_limit.map(|d: f64| d <= days_remaining).unwrap_or(false) {
        BudgetHealth::AtRisk
    } else if usage_percent >= 80.0 || projected_percent >= 80.0 {
        BudgetHealth::Warning
    } else {
        BudgetHealth::Healthy
    };

    Ok((
        spent,
        BudgetAnalytics {
            burn_rate,
            projected_spend: projected,
            days_until_limit,
            usage_percent,
            projected_percent,
            status,
            period: "month_to_date".to_string(),
        },
    ))
}
