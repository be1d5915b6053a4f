//! Windowed aggregations over the hot table (C5, spec.md §4.5).
//!
//! Continuous aggregates are a best-effort optimization created by
//! [`crate::storage::schema::continuous_aggregate_statements`]; every query
//! here reads the base table directly so correctness never depends on them
//! being present, matching the "AnalyticsEngine always has a base-table
//! fallback" rule.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc, Weekday};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{AnyPool, Row};

use crate::error::{HiveError, Result};
use crate::storage::schema::HOT_TABLE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Day,
    Hour,
}

/// Parses the window vocabulary from §4.5: `all_time, today, last_2_weeks,
/// this_week, this_month`. `this_week` starts Monday UTC.
pub fn parse_window(window: &str, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let today_midnight = Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0).unwrap();
    let start = match window {
        "all_time" => DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        "today" => today_midnight,
        "last_2_weeks" => today_midnight - chrono::Duration::days(14),
        "this_week" => {
            let days_since_monday = now.weekday().num_days_from_monday();
            today_midnight - chrono::Duration::days(days_since_monday as i64)
        }
        "this_month" => Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0).unwrap(),
        other => return Err(HiveError::validation(format!("unknown window: {other}"))),
    };
    Ok((start, now))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub total_cost: Decimal,
    pub total_requests: i64,
    pub total_tokens: i64,
    pub avg_latency_ms: f64,
    pub cache_savings: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostShare {
    pub model: String,
    pub cost_total: Decimal,
    pub share: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CostByModel {
    pub total_cost: Decimal,
    pub models: Vec<CostShare>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyBucket {
    pub bucket: &'static str,
    pub count: i64,
    pub share: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencyDistribution {
    pub total: i64,
    pub buckets: Vec<LatencyBucket>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Timeline {
    pub resolution: String,
    pub cost: Vec<Decimal>,
    pub requests: Vec<i64>,
    pub tokens: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Analytics {
    pub window: String,
    pub summary: Summary,
    pub timeline: Timeline,
    pub cost_by_model: CostByModel,
    pub cost_by_agent: CostByModel,
    pub latency_distribution: LatencyDistribution,
}

const LATENCY_BUCKETS: [(&str, i64, i64); 6] = [
    ("0-1s", 0, 1_000),
    ("1-2s", 1_000, 2_000),
    ("2-5s", 2_000, 5_000),
    ("5-10s", 5_000, 10_000),
    ("10-20s", 10_000, 20_000),
    ("20s+", 20_000, i64::MAX),
];

pub struct AnalyticsEngine;

struct Row_ {
    cost: Decimal,
    tokens: i64,
    cached_tokens: i64,
    input_tokens: i64,
    latency_ms: Option<i64>,
    model: String,
    agent: Option<String>,
    provider: Option<String>,
    metadata: serde_json::Value,
    timestamp: DateTime<Utc>,
}

impl Row_ {
    fn feature(&self) -> String {
        self.metadata.get("feature").and_then(|v| v.as_str()).unwrap_or("unspecified").to_string()
    }
}

impl AnalyticsEngine {
    async fn fetch_rows(pool: &AnyPool, team_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Row_>> {
        Self::fetch_rows_matching(pool, team_id, start, end, "1 = 1", &[]).await
    }

    /// Like [`Self::fetch_rows`] but narrowed by an additional `predicate`
    /// with its `?` placeholders bound from `binds`, in order — the same
    /// type-aware metadata predicate `UsageBreakdown`'s filter and the
    /// budget spend queries share (§4.5, §4.7).
    async fn fetch_rows_matching(
        pool: &AnyPool,
        team_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        predicate: &str,
        binds: &[String],
    ) -> Result<Vec<Row_>> {
        let sql = format!(
            "SELECT cost_total, usage_total, usage_cached, usage_input, latency_ms, model, agent, provider, metadata, timestamp
             FROM {HOT_TABLE} WHERE team_id = ? AND timestamp >= ? AND timestamp < ? AND {predicate}"
        );
        let mut query = sqlx::query(&sql).bind(team_id).bind(start.to_rfc3339()).bind(end.to_rfc3339());
        for bind in binds {
            query = query.bind(bind.clone());
        }
        let rows = query.fetch_all(pool).await.map_err(HiveError::from)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let cost_raw: String = row.try_get("cost_total").map_err(HiveError::from)?;
            let ts_raw: String = row.try_get("timestamp").map_err(HiveError::from)?;
            let metadata_raw: String = row.try_get("metadata").unwrap_or_else(|_| "{}".to_string());
            out.push(Row_ {
                cost: cost_raw.parse().unwrap_or_default(),
                tokens: row.try_get::<i64, _>("usage_total").unwrap_or(0),
                cached_tokens: row.try_get::<i64, _>("usage_cached").unwrap_or(0),
                input_tokens: row.try_get::<i64, _>("usage_input").unwrap_or(0),
                latency_ms: row.try_get::<i64, _>("latency_ms").ok(),
                model: row.try_get("model").unwrap_or_default(),
                agent: row.try_get("agent").ok(),
                provider: row.try_get("provider").ok(),
                metadata: serde_json::from_str(&metadata_raw).unwrap_or_else(|_| serde_json::json!({})),
                timestamp: DateTime::parse_from_rfc3339(&ts_raw).map(|d| d.with_timezone(&Utc)).unwrap_or(end),
            });
        }
        Ok(out)
    }

    /// `Analytics(window, resolution)` (§4.5).
    pub async fn analytics(
        pool: &AnyPool,
        team_id: &str,
        window: &str,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> Result<Analytics> {
        let (start, end) = parse_window(window, now)?;
        let rows = Self::fetch_rows(pool, team_id, start, end).await?;

        let total_cost: Decimal = rows.iter().map(|r| r.cost).sum();
        let total_tokens: i64 = rows.iter().map(|r| r.tokens).sum();
        let total_requests = rows.len() as i64;
        let latencies: Vec<i64> = rows.iter().filter_map(|r| r.latency_ms).collect();
        let avg_latency_ms =
            if latencies.is_empty() { 0.0 } else { latencies.iter().sum::<i64>() as f64 / latencies.len() as f64 };

        let summary =
            Summary { total_cost, total_requests, total_tokens, avg_latency_ms, cache_savings: cache_savings_total(&rows) };

        let timeline = bucket_timeline(&rows, resolution, start, end);
        let cost_by_model = group_cost(&rows, |r| r.model.clone());
        let cost_by_agent = group_cost(&rows, |r| r.agent.clone().unwrap_or_else(|| "unassigned".to_string()));
        let latency_distribution = bucket_latency(&rows);

        Ok(Analytics {
            window: window.to_string(),
            summary,
            timeline,
            cost_by_model,
            cost_by_agent,
            latency_distribution,
        })
    }

    /// `RateMetrics(days, filter)` (§4.5): one-minute request-rate buckets and
    /// a 5-second max-burst window.
    pub async fn rate_metrics(pool: &AnyPool, team_id: &str, days: i64, now: DateTime<Utc>) -> Result<RateMetrics> {
        let start = now - chrono::Duration::days(days);
        let rows = Self::fetch_rows(pool, team_id, start, now).await?;

        let mut per_minute: HashMap<i64, i64> = HashMap::new();
        let mut per_five_sec: HashMap<i64, i64> = HashMap::new();
        for r in &rows {
            *per_minute.entry(r.timestamp.timestamp() / 60).or_default() += 1;
            *per_five_sec.entry(r.timestamp.timestamp() / 5).or_default() += 1;
        }

        let mut rates: Vec<f64> = per_minute.values().map(|&c| c as f64 / 60.0).collect();
        rates.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let peak_rate = rates.last().copied().unwrap_or(0.0);
        let avg_rate = if rates.is_empty() { 0.0 } else { rates.iter().sum::<f64>() / rates.len() as f64 };
        let min_rate = rates.first().copied().unwrap_or(0.0);
        let p95_rate = percentile(&rates, 0.95);
        let max_burst = per_five_sec.values().copied().max().unwrap_or(0);

        Ok(RateMetrics { peak_rate, p95_rate, avg_rate, min_rate, max_burst })
    }

    /// `UsageBreakdown(days, filter)` (§4.5): `filter` is the same
    /// `(kind, value)` pair the budget filter table matches on (§4.7) —
    /// `agent | tenant | customer | feature | tag` — or `None` for the
    /// unfiltered tenant-wide breakdown.
    pub async fn usage_breakdown(
        pool: &AnyPool,
        team_id: &str,
        days: i64,
        filter: Option<(&str, &str)>,
        now: DateTime<Utc>,
    ) -> Result<UsageBreakdown> {
        let start = now - chrono::Duration::days(days.max(1));
        let (predicate, binds) = match filter {
            Some((kind, value)) => crate::storage::spend::metadata_predicate(kind, value),
            None => ("1 = 1".to_string(), Vec::new()),
        };
        let rows = Self::fetch_rows_matching(pool, team_id, start, now, &predicate, &binds).await?;

        Ok(UsageBreakdown {
            daily: daily_usage(&rows, start, now),
            by_model: group_cost(&rows, |r| r.model.clone()).models,
            by_feature: group_cost(&rows, |r| r.feature()).models,
        })
    }

    /// `Logs({start, end, groupBy?, limit, offset})` (§4.5): raw rows, most
    /// recent first, or grouped totals over `model | agent | provider |
    /// model,agent | model,provider` when `group_by` is set.
    pub async fn logs(
        pool: &AnyPool,
        team_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        group_by: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Logs> {
        let rows = Self::fetch_rows(pool, team_id, start, end).await?;
        let limit = limit.max(0) as usize;
        let offset = offset.max(0) as usize;

        match group_by {
            None => {
                let mut entries: Vec<LogEntry> = rows
                    .into_iter()
                    .map(|r| LogEntry {
                        timestamp: r.timestamp,
                        model: r.model.clone(),
                        agent: r.agent.clone(),
                        provider: r.provider.clone(),
                        cost_total: r.cost,
                        tokens: r.tokens,
                        latency_ms: r.latency_ms,
                    })
                    .collect();
                entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                Ok(Logs::Rows(entries.into_iter().skip(offset).take(limit).collect()))
            }
            Some(spec) => {
                if !matches!(spec, "model" | "agent" | "provider" | "model,agent" | "model,provider") {
                    return Err(HiveError::validation(format!("unsupported groupBy: {spec}")));
                }
                let fields: Vec<&str> = spec.split(',').collect();
                let mut totals: HashMap<String, (Decimal, i64, i64)> = HashMap::new();
                for r in &rows {
                    let key = fields
                        .iter()
                        .map(|field| match *field {
                            "model" => r.model.clone(),
                            "agent" => r.agent.clone().unwrap_or_else(|| "unassigned".to_string()),
                            "provider" => r.provider.clone().unwrap_or_else(|| "unknown".to_string()),
                            _ => unreachable!("validated above"),
                        })
                        .collect::<Vec<_>>()
                        .join("|");
                    let entry = totals.entry(key).or_default();
                    entry.0 += r.cost;
                    entry.1 += 1;
                    entry.2 += r.tokens;
                }
                let mut groups: Vec<LogGroup> = totals
                    .into_iter()
                    .map(|(key, (cost_total, requests, tokens))| LogGroup { key, cost_total, requests, tokens })
                    .collect();
                groups.sort_by(|a, b| b.cost_total.cmp(&a.cost_total));
                Ok(Logs::Grouped(groups.into_iter().skip(offset).take(limit).collect()))
            }
        }
    }

    /// `Metrics(days)` (§4.5): current vs. previous `days`-long period,
    /// each metric's percent change over the prior period.
    pub async fn metrics(pool: &AnyPool, team_id: &str, days: i64, now: DateTime<Utc>) -> Result<PeriodMetrics> {
        let period = chrono::Duration::days(days.max(1));
        let current_start = now - period;
        let previous_start = current_start - period;

        let current = Self::fetch_rows(pool, team_id, current_start, now).await?;
        let previous = Self::fetch_rows(pool, team_id, previous_start, current_start).await?;

        let summarize = |rows: &[Row_]| -> (f64, f64, f64, f64) {
            let cost: Decimal = rows.iter().map(|r| r.cost).sum();
            let tokens: i64 = rows.iter().map(|r| r.tokens).sum();
            let latencies: Vec<i64> = rows.iter().filter_map(|r| r.latency_ms).collect();
            let avg_latency = if latencies.is_empty() {
                0.0
            } else {
                latencies.iter().sum::<i64>() as f64 / latencies.len() as f64
            };
            (cost.try_into().unwrap_or(0.0), rows.len() as f64, tokens as f64, avg_latency)
        };

        let (cur_cost, cur_requests, cur_tokens, cur_latency) = summarize(&current);
        let (prev_cost, prev_requests, prev_tokens, prev_latency) = summarize(&previous);

        Ok(PeriodMetrics {
            days,
            cost: period_delta(cur_cost, prev_cost),
            requests: period_delta(cur_requests, prev_requests),
            tokens: period_delta(cur_tokens, prev_tokens),
            avg_latency_ms: period_delta(cur_latency, prev_latency),
        })
    }

    /// `Insights(days)` (§4.5): summary cards built on top of [`Self::metrics`].
    pub async fn insights(pool: &AnyPool, team_id: &str, days: i64, now: DateTime<Utc>) -> Result<Insights> {
        let metrics = Self::metrics(pool, team_id, days, now).await?;
        let card = |label: &str, delta: &PeriodDelta| InsightCard {
            label: label.to_string(),
            value: delta.current,
            delta_percent: delta.delta_percent,
            trend: trend_of(delta.delta_percent),
        };
        Ok(Insights {
            days,
            cards: vec![
                card("total_cost", &metrics.cost),
                card("requests", &metrics.requests),
                card("tokens", &metrics.tokens),
                card("avg_latency_ms", &metrics.avg_latency_ms),
            ],
        })
    }
}

fn daily_usage(rows: &[Row_], start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DailyUsage> {
    let mut buckets: HashMap<chrono::NaiveDate, (Decimal, i64, i64)> = HashMap::new();
    for r in rows {
        let entry = buckets.entry(r.timestamp.date_naive()).or_default();
        entry.0 += r.cost;
        entry.1 += 1;
        entry.2 += r.tokens;
    }

    let mut out = Vec::new();
    let mut cursor = start.date_naive();
    let end_date = end.date_naive();
    loop {
        let (cost, requests, tokens) = buckets.get(&cursor).copied().unwrap_or((Decimal::ZERO, 0, 0));
        out.push(DailyUsage { date: cursor.to_string(), cost, requests, tokens });
        if cursor >= end_date {
            break;
        }
        cursor = cursor.succ_opt().unwrap_or(end_date);
    }
    out
}

fn period_delta(current: f64, previous: f64) -> PeriodDelta {
    let delta_percent = if previous == 0.0 {
        if current == 0.0 {
            0.0
        } else {
            100.0
        }
    } else {
        (current - previous) / previous * 100.0
    };
    PeriodDelta { current, previous, delta_percent }
}

fn trend_of(delta_percent: f64) -> &'static str {
    if delta_percent > 1.0 {
        "up"
    } else if delta_percent < -1.0 {
        "down"
    } else {
        "flat"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyUsage {
    pub date: String,
    pub cost: Decimal,
    pub requests: i64,
    pub tokens: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageBreakdown {
    pub daily: Vec<DailyUsage>,
    pub by_model: Vec<CostShare>,
    pub by_feature: Vec<CostShare>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub agent: Option<String>,
    pub provider: Option<String>,
    pub cost_total: Decimal,
    pub tokens: i64,
    pub latency_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogGroup {
    pub key: String,
    pub cost_total: Decimal,
    pub requests: i64,
    pub tokens: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Logs {
    Rows(Vec<LogEntry>),
    Grouped(Vec<LogGroup>),
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodDelta {
    pub current: f64,
    pub previous: f64,
    pub delta_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodMetrics {
    pub days: i64,
    pub cost: PeriodDelta,
    pub requests: PeriodDelta,
    pub tokens: PeriodDelta,
    pub avg_latency_ms: PeriodDelta,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsightCard {
    pub label: String,
    pub value: f64,
    pub delta_percent: f64,
    pub trend: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Insights {
    pub days: i64,
    pub cards: Vec<InsightCard>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateMetrics {
    pub peak_rate: f64,
    pub p95_rate: f64,
    pub avg_rate: f64,
    pub min_rate: f64,
    pub max_burst: i64,
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Cache savings per model: `(cached_tokens / 1e6) * input_rate` summed across
/// models (§4.5). Since the hot table doesn't retain per-model input rates
/// after the fact, this approximates using the blended cost/non-cached-token
/// ratio observed in the window, which degrades gracefully to zero when no
/// cached tokens were used.
fn cache_savings_total(rows: &[Row_]) -> Decimal {
    let mut total = Decimal::ZERO;
    let mut by_model: HashMap<String, (Decimal, i64, i64)> = HashMap::new();
    for r in rows {
        let entry = by_model.entry(r.model.clone()).or_default();
        entry.0 += r.cost;
        entry.1 += r.input_tokens;
        entry.2 += r.cached_tokens;
    }
    for (cost, input_tokens, cached_tokens) in by_model.into_values() {
        if input_tokens == 0 || cached_tokens == 0 {
            continue;
        }
        let implied_rate_per_token = cost / Decimal::from(input_tokens.max(1));
        total += implied_rate_per_token * Decimal::from(cached_tokens);
    }
    total
}

fn group_cost(rows: &[Row_], key: impl Fn(&Row_) -> String) -> CostByModel {
    let mut totals: HashMap<String, Decimal> = HashMap::new();
    let mut grand_total = Decimal::ZERO;
    for r in rows {
        *totals.entry(key(r)).or_default() += r.cost;
        grand_total += r.cost;
    }
    let mut shares: Vec<CostShare> = totals
        .into_iter()
        .map(|(name, cost)| CostShare {
            model: name,
            cost_total: cost,
            share: if grand_total.is_zero() { 0.0 } else { (cost / grand_total).try_into().unwrap_or(0.0) },
        })
        .collect();
    shares.sort_by(|a, b| b.cost_total.cmp(&a.cost_total));
    CostByModel { total_cost: grand_total, models: shares }
}

fn bucket_latency(rows: &[Row_]) -> LatencyDistribution {
    let mut counts = [0i64; LATENCY_BUCKETS.len()];
    let mut total = 0i64;
    for r in rows {
        let Some(latency) = r.latency_ms else { continue };
        total += 1;
        for (i, (_, lo, hi)) in LATENCY_BUCKETS.iter().enumerate() {
            if latency >= *lo && latency < *hi {
                counts[i] += 1;
                break;
            }
        }
    }
    let buckets = LATENCY_BUCKETS
        .iter()
        .zip(counts)
        .map(|((label, _, _), count)| LatencyBucket {
            bucket: label,
            count,
            share: if total == 0 { 0.0 } else { count as f64 / total as f64 },
        })
        .collect();
    LatencyDistribution { total, buckets }
}

fn bucket_timeline(rows: &[Row_], resolution: Resolution, start: DateTime<Utc>, end: DateTime<Utc>) -> Timeline {
    let bucket_key = |ts: DateTime<Utc>| -> i64 {
        match resolution {
            Resolution::Day => ts.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp(),
            Resolution::Hour => ts.timestamp() / 3600 * 3600,
        }
    };

    let step = match resolution {
        Resolution::Day => chrono::Duration::days(1),
        Resolution::Hour => chrono::Duration::hours(1),
    };

    let mut buckets: HashMap<i64, (Decimal, i64, i64)> = HashMap::new();
    for r in rows {
        let entry = buckets.entry(bucket_key(r.timestamp)).or_default();
        entry.0 += r.cost;
        entry.1 += 1;
        entry.2 += r.tokens;
    }

    let mut cost = Vec::new();
    let mut requests = Vec::new();
    let mut tokens = Vec::new();
    let mut cursor = bucket_key(start);
    let end_key = bucket_key(end);
    while cursor <= end_key {
        let (c, r, t) = buckets.get(&cursor).copied().unwrap_or((Decimal::ZERO, 0, 0));
        cost.push(c);
        requests.push(r);
        tokens.push(t);
        cursor = (DateTime::<Utc>::from_timestamp(cursor, 0).unwrap() + step).timestamp();
    }

    Timeline {
        resolution: match resolution {
            Resolution::Day => "day".to_string(),
            Resolution::Hour => "hour".to_string(),
        },
        cost,
        requests,
        tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn this_week_starts_monday() {
        // 2026-01-08 is a Thursday.
        let thursday = Utc.with_ymd_and_hms(2026, 1, 8, 15, 0, 0).unwrap();
        let (start, _) = parse_window("this_week", thursday).unwrap();
        assert_eq!(start.weekday(), Weekday::Mon);
        assert_eq!(start.hour(), 0);
    }

    #[test]
    fn today_starts_at_midnight_utc() {
        let now = Utc.with_ymd_and_hms(2026, 3, 5, 17, 30, 0).unwrap();
        let (start, _) = parse_window("today", now).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap());
    }

    #[test]
    fn unknown_window_is_rejected() {
        assert!(parse_window("fortnight", Utc::now()).is_err());
    }

    #[test]
    fn percentile_of_empty_is_zero() {
        assert_eq!(percentile(&[], 0.95), 0.0);
    }

    #[test]
    fn percentile_picks_high_end_for_p95() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        assert!(percentile(&values, 0.95) >= 95.0);
    }

    #[test]
    fn period_delta_from_zero_previous_is_a_full_increase() {
        let delta = period_delta(10.0, 0.0);
        assert_eq!(delta.delta_percent, 100.0);
    }

    #[test]
    fn period_delta_flat_at_zero_stays_zero() {
        let delta = period_delta(0.0, 0.0);
        assert_eq!(delta.delta_percent, 0.0);
    }

    #[test]
    fn period_delta_percent_matches_relative_change() {
        let delta = period_delta(150.0, 100.0);
        assert_eq!(delta.delta_percent, 50.0);
    }

    #[test]
    fn trend_thresholds() {
        assert_eq!(trend_of(5.0), "up");
        assert_eq!(trend_of(-5.0), "down");
        assert_eq!(trend_of(0.2), "flat");
    }

    #[test]
    fn daily_usage_fills_every_day_in_range_even_without_rows() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 3, 12, 0, 0).unwrap();
        let days = daily_usage(&[], start, end);
        assert_eq!(days.len(), 3);
        assert_eq!(days[0].date, "2026-01-01");
        assert_eq!(days[2].date, "2026-01-03");
    }
}
