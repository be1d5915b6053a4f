//! Budget validation decisions (spec.md §3, §4.7, §8).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Enforcement action, ordered by restrictiveness per the priority lattice in
/// §4.7: `allow < throttle < degrade < block`. `Ord`/`PartialOrd` follow
/// declaration order so `max()` across a batch picks the most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetAction {
    Allow,
    Throttle,
    Degrade,
    Block,
}

/// Per-budget evaluation result, always present in `budgets_checked` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetCheckResult {
    pub budget_id: String,
    pub budget_name: String,
    pub action: BudgetAction,
    pub authoritative_spend: Decimal,
    pub budget_limit: Decimal,
    pub usage_percent: f64,
    pub projected_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degrade_to_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degrade_to_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationDecision {
    pub allowed: bool,
    pub action: BudgetAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub authoritative_spend: Decimal,
    pub budget_limit: Decimal,
    pub usage_percent: f64,
    pub projected_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degrade_to_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degrade_to_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restricting_budget_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restricting_budget_name: Option<String>,
    pub budgets_checked: Vec<BudgetCheckResult>,
}

impl ValidationDecision {
    /// `allow` with an explanatory reason and no budgets evaluated — used when
    /// there is nothing to check (empty policy, no matching budgets) per §4.7.
    pub fn allow_all(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            action: BudgetAction::Allow,
            reason: Some(reason.into()),
            authoritative_spend: Decimal::ZERO,
            budget_limit: Decimal::ZERO,
            usage_percent: 0.0,
            projected_percent: 0.0,
            degrade_to_model: None,
            degrade_to_provider: None,
            restricting_budget_id: None,
            restricting_budget_name: None,
            budgets_checked: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_priority_lattice_orders_correctly() {
        assert!(BudgetAction::Allow < BudgetAction::Throttle);
        assert!(BudgetAction::Throttle < BudgetAction::Degrade);
        assert!(BudgetAction::Degrade < BudgetAction::Block);
    }

    #[test]
    fn most_restrictive_is_max_of_batch() {
        let actions = [BudgetAction::Throttle, BudgetAction::Degrade, BudgetAction::Allow];
        assert_eq!(actions.into_iter().max().unwrap(), BudgetAction::Degrade);
    }
}
