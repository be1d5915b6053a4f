//! Policy documents and budget rules (spec.md §3).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{HiveError, Result};

/// The tenant's mutable, versioned policy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub team_id: String,
    pub name: String,
    /// Short opaque token, rotated on every mutation (§3); SDKs use it to detect
    /// staleness without comparing full documents.
    pub version: String,
    #[serde(default)]
    pub budgets: Vec<BudgetRule>,
    #[serde(default)]
    pub throttles: Vec<serde_json::Value>,
    #[serde(default)]
    pub blocks: Vec<serde_json::Value>,
    #[serde(default)]
    pub degradations: Vec<serde_json::Value>,
    #[serde(default)]
    pub alerts: Vec<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

pub const DEFAULT_POLICY_ID: &str = "default";

impl Policy {
    /// Materialize an empty policy document the way `PolicyStore::Get` does on
    /// first read of a tenant (§4.6).
    pub fn scaffold(team_id: &str, id: &str, actor: Option<String>) -> Self {
        let now = Utc::now();
        let name = if id == DEFAULT_POLICY_ID {
            "Default Policy".to_string()
        } else {
            "New Policy".to_string()
        };
        Self {
            id: id.to_string(),
            team_id: team_id.to_string(),
            name,
            version: new_version_token(),
            budgets: Vec::new(),
            throttles: Vec::new(),
            blocks: Vec::new(),
            degradations: Vec::new(),
            alerts: Vec::new(),
            created_at: now,
            updated_at: now,
            created_by: actor,
            updated_by: None,
        }
    }

    /// Rotate the version token and touch `updated_at`; called on every
    /// successful mutation (§4.6).
    pub fn touch(&mut self, actor: Option<String>) {
        self.version = new_version_token();
        self.updated_at = Utc::now();
        if actor.is_some() {
            self.updated_by = actor;
        }
    }
}

/// 16 hex characters of randomness is plenty of entropy for a staleness token
/// that is never persisted as a security boundary.
pub fn new_version_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetType {
    Global,
    Agent,
    Tenant,
    Customer,
    Feature,
    Tag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitAction {
    Kill,
    Throttle,
    Degrade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertThreshold {
    pub threshold: f64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default)]
    pub in_app: bool,
    #[serde(default)]
    pub email: bool,
    #[serde(default)]
    pub email_recipients: Vec<String>,
    #[serde(default)]
    pub webhook: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetRule {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub budget_type: BudgetType,
    pub limit: Decimal,
    /// Derived, never persisted authoritatively (§3); callers should treat any
    /// value read from storage as a stale hint until re-enriched.
    #[serde(default)]
    pub spent: Decimal,
    pub limit_action: LimitAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degrade_to_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degrade_to_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub alerts: Vec<AlertThreshold>,
    #[serde(default)]
    pub notifications: NotificationSettings,
    /// Attached by `PolicyStore::Get` before a policy is returned (§4.6); never
    /// persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics: Option<BudgetAnalytics>,
}

impl BudgetRule {
    /// Validate the invariants from spec.md §3:
    /// `limitAction = degrade ⇒ degradeToModel and degradeToProvider present`;
    /// `type = tag ⇒ tags non-empty`.
    pub fn validate(&self) -> Result<()> {
        if matches!(self.limit_action, LimitAction::Degrade)
            && (self.degrade_to_model.is_none() || self.degrade_to_provider.is_none())
        {
            return Err(HiveError::validation(format!(
                "budget \"{}\": limitAction=degrade requires degradeToModel and degradeToProvider",
                self.name
            )));
        }
        if matches!(self.budget_type, BudgetType::Tag)
            && self.tags.as_ref().map(|t| t.is_empty()).unwrap_or(true)
        {
            return Err(HiveError::validation(format!(
                "budget \"{}\": type=tag requires a non-empty tags list",
                self.name
            )));
        }
        if self.limit < Decimal::ZERO {
            return Err(HiveError::validation(format!(
                "budget \"{}\": limit must be non-negative",
                self.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetHealth {
    Healthy,
    Warning,
    AtRisk,
    Exceeded,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAnalytics {
    pub burn_rate: Decimal,
    pub projected_spend: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_until_limit: Option<f64>,
    pub usage_percent: f64,
    pub projected_percent: f64,
    pub status: BudgetHealth,
    pub period: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_budget() -> BudgetRule {
        BudgetRule {
            id: "b1".into(),
            name: "global".into(),
            budget_type: BudgetType::Global,
            limit: dec!(100),
            spent: Decimal::ZERO,
            limit_action: LimitAction::Kill,
            degrade_to_model: None,
            degrade_to_provider: None,
            tag_category: None,
            tags: None,
            alerts: Vec::new(),
            notifications: NotificationSettings::default(),
            analytics: None,
        }
    }

    #[test]
    fn degrade_requires_target_model_and_provider() {
        let mut b = base_budget();
        b.limit_action = LimitAction::Degrade;
        assert!(b.validate().is_err());
        b.degrade_to_model = Some("gpt-4o-mini".into());
        b.degrade_to_provider = Some("openai".into());
        assert!(b.validate().is_ok());
    }

    #[test]
    fn tag_type_requires_nonempty_tags() {
        let mut b = base_budget();
        b.budget_type = BudgetType::Tag;
        assert!(b.validate().is_err());
        b.tags = Some(vec!["eval".into()]);
        assert!(b.validate().is_ok());
    }

    #[test]
    fn scaffold_names_default_and_named_policies_differently() {
        let default_policy = Policy::scaffold("acme", DEFAULT_POLICY_ID, None);
        assert_eq!(default_policy.name, "Default Policy");
        let named = Policy::scaffold("acme", "launch-2026", None);
        assert_eq!(named.name, "New Policy");
    }

    #[test]
    fn touch_rotates_version_and_timestamp() {
        let mut p = Policy::scaffold("acme", DEFAULT_POLICY_ID, None);
        let before = p.version.clone();
        std::thread::sleep(std::time::Duration::from_millis(2));
        p.touch(Some("user-1".into()));
        assert_ne!(before, p.version);
        assert_eq!(p.updated_by.as_deref(), Some("user-1"));
    }
}
