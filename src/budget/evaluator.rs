//! Budget matching and validation (C7, spec.md §4.7).

use rust_decimal::Decimal;

use crate::domain::{
    BudgetAction, BudgetCheckResult, BudgetContext, BudgetRule, BudgetType, LimitAction, LlmEvent,
    ValidationDecision,
};

fn matches(budget: &BudgetRule, effective_agent: Option<&str>, context: &BudgetContext) -> bool {
    match budget.budget_type {
        BudgetType::Global => true,
        BudgetType::Agent => effective_agent == Some(budget.name.as_str()),
        BudgetType::Tenant => context.tenant_id.as_deref() == Some(budget.name.as_str()),
        BudgetType::Customer => context.customer_id.as_deref() == Some(budget.name.as_str()),
        BudgetType::Feature => context.feature.as_deref() == Some(budget.name.as_str()),
        BudgetType::Tag => {
            budget.tags.as_ref().map(|tags| tags.iter().any(|t| context.tags.contains(t))).unwrap_or(false)
        }
    }
}

/// `MatchByContext` (§4.7): budgets whose type predicate matches `context`.
pub fn match_by_context<'a>(budgets: &'a [BudgetRule], context: &BudgetContext) -> Vec<&'a BudgetRule> {
    let effective_agent = context.effective_agent();
    budgets.iter().filter(|b| matches(b, effective_agent.as_deref(), context)).collect()
}

/// `MatchEvent` (§4.7): same predicate logic applied to a normalized event.
pub fn match_event<'a>(budgets: &'a [BudgetRule], event: &LlmEvent) -> Vec<&'a BudgetRule> {
    let context = BudgetContext::from(event);
    match_by_context(budgets, &context)
}

fn percent(numerator: Decimal, denominator: Decimal) -> f64 {
    if denominator.is_zero() {
        return 0.0;
    }
    (numerator / denominator * Decimal::from(100)).try_into().unwrap_or(0.0)
}

fn evaluate_one(budget: &BudgetRule, estimated_cost: Decimal, local_spend: Option<Decimal>) -> BudgetCheckResult {
    let authoritative_spend = budget.spent.max(local_spend.unwrap_or(Decimal::ZERO));
    let projected = authoritative_spend + estimated_cost;
    let projected_percent = percent(projected, budget.limit);
    let usage_percent = percent(authoritative_spend, budget.limit);

    let (action, reason) = if projected_percent >= 100.0 {
        match budget.limit_action {
            LimitAction::Kill => (BudgetAction::Block, Some(format!("Budget \"{}\" exceeded", budget.name))),
            LimitAction::Degrade => {
                (BudgetAction::Degrade, Some(format!("Budget \"{}\" exceeded, degrading", budget.name)))
            }
            LimitAction::Throttle => {
                (BudgetAction::Throttle, Some(format!("Budget \"{}\" exceeded, throttling", budget.name)))
            }
        }
    } else if (90.0..100.0).contains(&projected_percent)
        && matches!(budget.limit_action, LimitAction::Degrade)
        && budget.degrade_to_model.is_some()
    {
        (BudgetAction::Degrade, Some(format!("Budget \"{}\" approaching limit, pre-emptive degrade", budget.name)))
    } else {
        (BudgetAction::Allow, None)
    };

    BudgetCheckResult {
        budget_id: budget.id.clone(),
        budget_name: budget.name.clone(),
        action,
        authoritative_spend,
        budget_limit: budget.limit,
        usage_percent,
        projected_percent,
        degrade_to_model: matches!(action, BudgetAction::Degrade).then(|| budget.degrade_to_model.clone()).flatten(),
        degrade_to_provider: matches!(action, BudgetAction::Degrade)
            .then(|| budget.degrade_to_provider.clone())
            .flatten(),
        reason,
    }
}

/// `Validate` (§4.7): evaluate every matched budget and combine by the
/// `allow < throttle < degrade < block` priority lattice.
pub fn validate(
    budgets: &[&BudgetRule],
    estimated_cost: Decimal,
    local_spend: Option<Decimal>,
) -> ValidationDecision {
    if budgets.is_empty() {
        return ValidationDecision::allow_all("No budgets to validate");
    }

    let checked: Vec<BudgetCheckResult> =
        budgets.iter().map(|b| evaluate_one(b, estimated_cost, local_spend)).collect();

    let winner = checked.iter().max_by_key(|c| c.action).expect("non-empty checked list");

    ValidationDecision {
        allowed: winner.action != BudgetAction::Block,
        action: winner.action,
        reason: winner.reason.clone(),
        authoritative_spend: winner.authoritative_spend,
        budget_limit: winner.budget_limit,
        usage_percent: winner.usage_percent,
        projected_percent: winner.projected_percent,
        degrade_to_model: winner.degrade_to_model.clone(),
        degrade_to_provider: winner.degrade_to_provider.clone(),
        restricting_budget_id: Some(winner.budget_id.clone()),
        restricting_budget_name: Some(winner.budget_name.clone()),
        budgets_checked: checked,
    }
}

/// Full pipeline entry point: match then validate, returning the
/// "no budgets match" reason when the context matched nothing (§4.7).
#[tracing::instrument(skip(all_budgets, context), fields(budgets = all_budgets.len()))]
pub fn validate_for_context(
    all_budgets: &[BudgetRule],
    context: &BudgetContext,
    estimated_cost: Decimal,
    local_spend: Option<Decimal>,
) -> ValidationDecision {
    if all_budgets.is_empty() {
        return ValidationDecision::allow_all("No budgets to validate");
    }
    let matched = match_by_context(all_budgets, context);
    if matched.is_empty() {
        return ValidationDecision::allow_all("No budgets match the provided context");
    }
    validate(&matched, estimated_cost, local_spend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlertThreshold, NotificationSettings};
    use rust_decimal_macros::dec;

    fn budget(id: &str, name: &str, budget_type: BudgetType, limit: Decimal, action: LimitAction) -> BudgetRule {
        BudgetRule {
            id: id.into(),
            name: name.into(),
            budget_type,
            limit,
            spent: Decimal::ZERO,
            limit_action: action,
            degrade_to_model: None,
            degrade_to_provider: None,
            tag_category: None,
            tags: None,
            alerts: Vec::<AlertThreshold>::new(),
            notifications: NotificationSettings::default(),
            analytics: None,
        }
    }

    #[test]
    fn empty_budgets_allow_with_reason() {
        let decision = validate_for_context(&[], &BudgetContext::default(), dec!(1), None);
        assert!(decision.allowed);
        assert_eq!(decision.reason.as_deref(), Some("No budgets to validate"));
    }

    #[test]
    fn no_matching_budget_allows_with_reason() {
        let budgets = vec![budget("b1", "researcher", BudgetType::Agent, dec!(100), LimitAction::Kill)];
        let context = BudgetContext { agent: Some("writer".into()), ..Default::default() };
        let decision = validate_for_context(&budgets, &context, dec!(1), None);
        assert!(decision.allowed);
        assert_eq!(decision.reason.as_deref(), Some("No budgets match the provided context"));
    }

    #[test]
    fn kill_action_blocks_when_projected_exceeds_limit() {
        let mut b = budget("b1", "global", BudgetType::Global, dec!(100), LimitAction::Kill);
        b.spent = dec!(95);
        let decision = validate(&[&b], dec!(10), None);
        assert!(!decision.allowed);
        assert_eq!(decision.action, BudgetAction::Block);
        assert_eq!(decision.reason.as_deref(), Some("Budget \"global\" exceeded"));
    }

    #[test]
    fn degrade_action_is_allowed_and_carries_targets() {
        let mut b = budget("b1", "global", BudgetType::Global, dec!(100), LimitAction::Degrade);
        b.degrade_to_model = Some("gpt-4o-mini".into());
        b.degrade_to_provider = Some("openai".into());
        b.spent = dec!(95);
        let decision = validate(&[&b], dec!(10), None);
        assert!(decision.allowed);
        assert_eq!(decision.action, BudgetAction::Degrade);
        assert_eq!(decision.degrade_to_model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn preemptive_degrade_between_90_and_100_percent() {
        let mut b = budget("b1", "global", BudgetType::Global, dec!(100), LimitAction::Degrade);
        b.degrade_to_model = Some("gpt-4o-mini".into());
        b.degrade_to_provider = Some("openai".into());
        b.spent = dec!(85);
        let decision = validate(&[&b], dec!(10), None);
        assert_eq!(decision.action, BudgetAction::Degrade);
    }

    #[test]
    fn most_restrictive_budget_wins_combination() {
        let mut throttled = budget("b1", "global", BudgetType::Global, dec!(1000), LimitAction::Throttle);
        throttled.spent = dec!(950);
        let mut blocked = budget("b2", "agent-x", BudgetType::Agent, dec!(10), LimitAction::Kill);
        blocked.spent = dec!(9);
        let decision = validate(&[&throttled, &blocked], dec!(5), None);
        assert_eq!(decision.action, BudgetAction::Block);
        assert_eq!(decision.restricting_budget_id.as_deref(), Some("b2"));
    }

    #[test]
    fn local_spend_overrides_stale_stored_spend_when_higher() {
        let mut b = budget("b1", "global", BudgetType::Global, dec!(100), LimitAction::Kill);
        b.spent = dec!(10);
        let decision = validate(&[&b], dec!(5), Some(dec!(96)));
        assert_eq!(decision.action, BudgetAction::Block);
    }
}
