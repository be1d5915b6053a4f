//! Threshold tracking and multi-channel alert fan-out (C8, spec.md §4.8).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff, SystemClock};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::{AlertThreshold, BudgetCheckResult, BudgetRule, NotificationSettings};

/// Where an alert ultimately lands; implemented by [`crate::realtime::FanoutHub`]
/// in production and by an in-memory recorder in tests.
#[async_trait]
pub trait AlertEmitter: Send + Sync {
    async fn emit_alert(&self, team_id: &str, payload: serde_json::Value);
}

/// Outbound email delivery, collaborator named `Notifier` in §4.8.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipients: &[String], subject: &str, body: &str);
}

/// Never sends anything; the default when no SMTP transport is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, recipients: &[String], subject: &str, _body: &str) {
        info!(?recipients, subject, "email notification suppressed: no notifier configured");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AlertKind {
    /// Keyed by threshold alerts (`spent_percent >= T`).
    Threshold,
    /// Keyed by enforcement action (kill/throttle/degrade), namespaced
    /// separately from `Threshold` so a control action and a warning never
    /// suppress each other (§4.8).
    LimitAction,
}

type CooldownKey = (String, AlertKind, String);

const DEFAULT_COOLDOWN: chrono::Duration = chrono::Duration::minutes(15);

pub struct AlertPipeline {
    emitter: Arc<dyn AlertEmitter>,
    notifier: Arc<dyn Notifier>,
    http: reqwest::Client,
    cooldown: chrono::Duration,
    webhook_timeout: StdDuration,
    last_fired: Mutex<HashMap<CooldownKey, DateTime<Utc>>>,
}

impl AlertPipeline {
    pub fn new(emitter: Arc<dyn AlertEmitter>, notifier: Arc<dyn Notifier>, webhook_timeout: StdDuration) -> Self {
        Self {
            emitter,
            notifier,
            http: reqwest::Client::new(),
            cooldown: DEFAULT_COOLDOWN,
            webhook_timeout,
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn with_cooldown(mut self, cooldown: chrono::Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    async fn should_fire(&self, key: &CooldownKey, now: DateTime<Utc>) -> bool {
        let mut guard = self.last_fired.lock().await;
        match guard.get(key) {
            Some(last) if now - *last < self.cooldown => false,
            _ => {
                guard.insert(key.clone(), now);
                true
            }
        }
    }

    /// Evaluate one budget's alert thresholds and enforcement action against
    /// a freshly computed [`BudgetCheckResult`], firing every channel enabled
    /// in `notifications` whose cooldown has elapsed.
    #[tracing::instrument(skip(self, budget, check, now), fields(team_id = %team_id, policy_id = %policy_id, budget_id = %budget.id))]
    pub async fn evaluate(
        &self,
        team_id: &str,
        policy_id: &str,
        budget: &BudgetRule,
        check: &BudgetCheckResult,
        now: DateTime<Utc>,
    ) {
        for threshold in budget.alerts.iter().filter(|t| t.enabled) {
            if check.usage_percent >= threshold.threshold {
                let key = (budget.id.clone(), AlertKind::Threshold, format!("{:.1}", threshold.threshold));
                if self.should_fire(&key, now).await {
                    self.fire(team_id, policy_id, budget, threshold, check, now).await;
                }
            }
        }

        if check.action != crate::domain::BudgetAction::Allow {
            let key = (budget.id.clone(), AlertKind::LimitAction, format!("{:?}", check.action));
            if self.should_fire(&key, now).await {
                self.fire_limit_action(team_id, policy_id, budget, check, now).await;
            }
        }
    }

    async fn fire(
        &self,
        team_id: &str,
        policy_id: &str,
        budget: &BudgetRule,
        threshold: &AlertThreshold,
        check: &BudgetCheckResult,
        now: DateTime<Utc>,
    ) {
        let payload = json!({
            "type": "budget-alert",
            "alert_type": "threshold",
            "budget_id": budget.id,
            "budget_name": budget.name,
            "budget_type": budget.budget_type,
            "policy_id": policy_id,
            "threshold": threshold.threshold,
            "usage_percent": check.usage_percent,
            "authoritative_spend": check.authoritative_spend,
            "budget_limit": check.budget_limit,
            "timestamp": now,
        });
        self.dispatch(team_id, budget, &payload, &format!("budget \"{}\" reached {}%", budget.name, threshold.threshold))
            .await;
    }

    async fn fire_limit_action(
        &self,
        team_id: &str,
        policy_id: &str,
        budget: &BudgetRule,
        check: &BudgetCheckResult,
        now: DateTime<Utc>,
    ) {
        let payload = json!({
            "type": "budget-alert",
            "alert_type": "limit_action",
            "budget_id": budget.id,
            "budget_name": budget.name,
            "budget_type": budget.budget_type,
            "policy_id": policy_id,
            "action": check.action,
            "usage_percent": check.usage_percent,
            "authoritative_spend": check.authoritative_spend,
            "budget_limit": check.budget_limit,
            "timestamp": now,
        });
        self.dispatch(
            team_id,
            budget,
            &payload,
            &format!("budget \"{}\" triggered {:?}", budget.name, check.action),
        )
        .await;
    }

    async fn dispatch(&self, team_id: &str, budget: &BudgetRule, payload: &serde_json::Value, subject: &str) {
        let notifications = &budget.notifications;

        if notifications.in_app {
            self.emitter.emit_alert(team_id, payload.clone()).await;
        }

        if notifications.email && !notifications.email_recipients.is_empty() {
            self.notifier.notify(&notifications.email_recipients, subject, &payload.to_string()).await;
        }

        if notifications.webhook {
            if let Some(url) = &notifications.webhook_url {
                self.post_webhook(url, payload).await;
            }
        }
    }

    /// POSTs with one retry under exponential backoff, bounded by the
    /// configured outbound timeout; failures are logged and never propagate
    /// to the caller (§7: outbound webhook failures do not fail the request
    /// that triggered the alert).
    async fn post_webhook(&self, url: &str, payload: &serde_json::Value) {
        let backoff_policy: ExponentialBackoff<SystemClock> = ExponentialBackoff {
            initial_interval: StdDuration::from_millis(100),
            max_interval: self.webhook_timeout,
            max_elapsed_time: Some(self.webhook_timeout),
            multiplier: 2.0,
            ..ExponentialBackoff::<SystemClock>::default()
        };

        let op = || async {
            self.http
                .post(url)
                .timeout(self.webhook_timeout)
                .json(payload)
                .send()
                .await
                .map_err(backoff::Error::transient)
                .and_then(|resp| {
                    let status = resp.status();
                    if status.is_success() {
                        Ok(())
                    } else {
                        warn!(%status, url, "alert webhook returned non-2xx");
                        Err(backoff::Error::permanent(resp.error_for_status().unwrap_err()))
                    }
                })
        };

        let mut backoff_policy = backoff_policy;
        if let Err(_) = with_retry(op, &mut backoff_policy).await {
            warn!(url, "alert webhook delivery failed");
        }
    }
}

/// Minimal retry driver over `backoff`'s policy trait, since the crate's
/// `future::retry` helper expects `std::error::Error` bounds we don't want to
/// impose on the reqwest error path here.
async fn with_retry<F, Fut>(mut op: F, policy: &mut ExponentialBackoff<SystemClock>) -> std::result::Result<(), ()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<(), backoff::Error<reqwest::Error>>>,
{
    loop {
        match op().await {
            Ok(()) => return Ok(()),
            Err(backoff::Error::Permanent(_)) => return Err(()),
            Err(backoff::Error::Transient { .. }) => match policy.next_backoff() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Err(()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BudgetAction, BudgetType};
    use rust_decimal_macros::dec;
    use tokio::sync::Mutex as TokioMutex;

    struct RecordingEmitter {
        events: TokioMutex<Vec<(String, serde_json::Value)>>,
    }

    impl RecordingEmitter {
        fn new() -> Self {
            Self { events: TokioMutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl AlertEmitter for RecordingEmitter {
        async fn emit_alert(&self, team_id: &str, payload: serde_json::Value) {
            self.events.lock().await.push((team_id.to_string(), payload));
        }
    }

    fn budget_with_threshold(threshold: f64) -> BudgetRule {
        BudgetRule {
            id: "b1".into(),
            name: "global".into(),
            budget_type: BudgetType::Global,
            limit: dec!(100),
            spent: dec!(91),
            limit_action: crate::domain::LimitAction::Kill,
            degrade_to_model: None,
            degrade_to_provider: None,
            tag_category: None,
            tags: None,
            alerts: vec![AlertThreshold { threshold, enabled: true }],
            notifications: NotificationSettings { in_app: true, ..Default::default() },
            analytics: None,
        }
    }

    fn check(action: BudgetAction, usage_percent: f64) -> BudgetCheckResult {
        BudgetCheckResult {
            budget_id: "b1".into(),
            budget_name: "global".into(),
            action,
            authoritative_spend: dec!(91),
            budget_limit: dec!(100),
            usage_percent,
            projected_percent: usage_percent,
            degrade_to_model: None,
            degrade_to_provider: None,
            reason: None,
        }
    }

    #[tokio::test]
    async fn fires_in_app_alert_when_threshold_crossed() {
        let emitter = Arc::new(RecordingEmitter::new());
        let pipeline = AlertPipeline::new(emitter.clone(), Arc::new(NoopNotifier), StdDuration::from_secs(5));
        let budget = budget_with_threshold(90.0);
        let c = check(BudgetAction::Allow, 91.0);
        pipeline.evaluate("acme", "default", &budget, &c, Utc::now()).await;
        assert_eq!(emitter.events.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn does_not_fire_below_threshold() {
        let emitter = Arc::new(RecordingEmitter::new());
        let pipeline = AlertPipeline::new(emitter.clone(), Arc::new(NoopNotifier), StdDuration::from_secs(5));
        let budget = budget_with_threshold(95.0);
        let c = check(BudgetAction::Allow, 91.0);
        pipeline.evaluate("acme", "default", &budget, &c, Utc::now()).await;
        assert!(emitter.events.lock().await.is_empty());
    }

    #[tokio::test]
    async fn cooldown_suppresses_repeat_fires() {
        let emitter = Arc::new(RecordingEmitter::new());
        let pipeline =
            AlertPipeline::new(emitter.clone(), Arc::new(NoopNotifier), StdDuration::from_secs(5));
        let budget = budget_with_threshold(90.0);
        let c = check(BudgetAction::Allow, 91.0);
        let now = Utc::now();
        pipeline.evaluate("acme", "default", &budget, &c, now).await;
        pipeline.evaluate("acme", "default", &budget, &c, now + chrono::Duration::minutes(1)).await;
        assert_eq!(emitter.events.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn cooldown_expiry_allows_refire() {
        let emitter = Arc::new(RecordingEmitter::new());
        let pipeline = AlertPipeline::new(emitter.clone(), Arc::new(NoopNotifier), StdDuration::from_secs(5))
            .with_cooldown(chrono::Duration::seconds(1));
        let budget = budget_with_threshold(90.0);
        let c = check(BudgetAction::Allow, 91.0);
        let now = Utc::now();
        pipeline.evaluate("acme", "default", &budget, &c, now).await;
        pipeline.evaluate("acme", "default", &budget, &c, now + chrono::Duration::seconds(2)).await;
        assert_eq!(emitter.events.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn limit_action_and_threshold_use_separate_cooldown_namespaces() {
        let emitter = Arc::new(RecordingEmitter::new());
        let pipeline = AlertPipeline::new(emitter.clone(), Arc::new(NoopNotifier), StdDuration::from_secs(5));
        let budget = budget_with_threshold(90.0);
        let c = check(BudgetAction::Block, 100.0);
        pipeline.evaluate("acme", "default", &budget, &c, Utc::now()).await;
        // threshold (90%) and limit_action (block) both fire independently.
        assert_eq!(emitter.events.lock().await.len(), 2);
    }
}
