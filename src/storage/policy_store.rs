//! Tenant policy document CRUD and budget enrichment (C6, spec.md §4.6).

use std::sync::Arc;

use chrono::Utc;
use sqlx::Row;
use tracing::instrument;

use crate::audit::{AuditEvent, AuditSink};
use crate::domain::{Policy, TeamId, DEFAULT_POLICY_ID};
use crate::error::{HiveError, Result};

use super::schema::POLICY_TABLE;
use super::spend;
use super::tenant_router::TenantRouter;

pub struct PolicyStore {
    router: Arc<TenantRouter>,
    audit: Arc<dyn AuditSink>,
}

fn resolve_id(policy_id: Option<&str>) -> &str {
    policy_id.filter(|id| !id.is_empty()).unwrap_or(DEFAULT_POLICY_ID)
}

impl PolicyStore {
    pub fn new(router: Arc<TenantRouter>, audit: Arc<dyn AuditSink>) -> Self {
        Self { router, audit }
    }

    /// Reads a policy, materializing a scaffold on first access and enriching
    /// every budget with live spend before returning (§4.6).
    #[instrument(skip(self), fields(team = %team))]
    pub async fn get(&self, team: &TeamId, policy_id: Option<&str>) -> Result<Policy> {
        let id = resolve_id(policy_id);
        let pool = self.router.pool_for(team).await?;

        let row = sqlx::query(&format!("SELECT document FROM {POLICY_TABLE} WHERE team_id = ? AND id = ?"))
            .bind(team.as_str())
            .bind(id)
            .fetch_optional(&pool)
            .await
            .map_err(HiveError::from)?;

        let mut policy = match row {
            Some(row) => {
                let document: String = row.try_get("document").map_err(HiveError::from)?;
                serde_json::from_str(&document)?
            }
            None => {
                let scaffold = Policy::scaffold(team.as_str(), id, None);
                self.persist(&pool, team, &scaffold, true).await?;
                scaffold
            }
        };

        self.enrich(&pool, team, &mut policy).await?;
        Ok(policy)
    }

    #[instrument(skip(self), fields(team = %team))]
    pub async fn list(&self, team: &TeamId, limit: i64, offset: i64) -> Result<Vec<Policy>> {
        let pool = self.router.pool_for(team).await?;
        let rows = sqlx::query(&format!(
            "SELECT document FROM {POLICY_TABLE} WHERE team_id = ? ORDER BY updated_at DESC LIMIT ? OFFSET ?"
        ))
        .bind(team.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&pool)
        .await
        .map_err(HiveError::from)?;

        let mut policies = Vec::with_capacity(rows.len());
        for row in rows {
            let document: String = row.try_get("document").map_err(HiveError::from)?;
            let mut policy: Policy = serde_json::from_str(&document)?;
            self.enrich(&pool, team, &mut policy).await?;
            policies.push(policy);
        }
        Ok(policies)
    }

    /// Applies `mutate` to the current (or scaffolded) policy, validates every
    /// budget, rotates the version token, and persists (§4.6: "every mutation
    /// updates version").
    #[instrument(skip(self, mutate), fields(team = %team))]
    pub async fn update(
        &self,
        team: &TeamId,
        policy_id: Option<&str>,
        actor: Option<String>,
        mutate: impl FnOnce(&mut Policy),
    ) -> Result<Policy> {
        let id = resolve_id(policy_id).to_string();
        let pool = self.router.pool_for(team).await?;

        let existing = sqlx::query(&format!("SELECT document FROM {POLICY_TABLE} WHERE team_id = ? AND id = ?"))
            .bind(team.as_str())
            .bind(&id)
            .fetch_optional(&pool)
            .await
            .map_err(HiveError::from)?;

        let (mut policy, is_insert) = match existing {
            Some(row) => {
                let document: String = row.try_get("document").map_err(HiveError::from)?;
                (serde_json::from_str::<Policy>(&document)?, false)
            }
            None => (Policy::scaffold(team.as_str(), &id, actor.clone()), true),
        };

        mutate(&mut policy);
        for budget in &policy.budgets {
            budget.validate()?;
        }
        policy.touch(actor);

        self.persist(&pool, team, &policy, is_insert).await?;
        self.audit
            .record(AuditEvent::policy_updated(team.as_str(), &policy.id, &policy.version))
            .await;

        self.enrich(&pool, team, &mut policy).await?;
        Ok(policy)
    }

    /// `AppendRule` (§4.6): add a budget rule without replacing the whole
    /// mutable field set.
    pub async fn append_rule(
        &self,
        team: &TeamId,
        policy_id: Option<&str>,
        actor: Option<String>,
        rule: crate::domain::BudgetRule,
    ) -> Result<Policy> {
        rule.validate()?;
        self.update(team, policy_id, actor, |policy| policy.budgets.push(rule)).await
    }

    /// Resets a policy's rule sets to empty while keeping its identity and id.
    pub async fn clear(&self, team: &TeamId, policy_id: Option<&str>, actor: Option<String>) -> Result<Policy> {
        self.update(team, policy_id, actor, |policy| {
            policy.budgets.clear();
            policy.throttles.clear();
            policy.blocks.clear();
            policy.degradations.clear();
            policy.alerts.clear();
        })
        .await
    }

    /// Deletes a non-default policy document. `Delete("default")` is rejected
    /// (§4.6).
    #[instrument(skip(self), fields(team = %team))]
    pub async fn delete(&self, team: &TeamId, policy_id: &str) -> Result<()> {
        if resolve_id(Some(policy_id)) == DEFAULT_POLICY_ID {
            return Err(HiveError::validation("the default policy cannot be deleted"));
        }
        let pool = self.router.pool_for(team).await?;
        sqlx::query(&format!("DELETE FROM {POLICY_TABLE} WHERE team_id = ? AND id = ?"))
            .bind(team.as_str())
            .bind(policy_id)
            .execute(&pool)
            .await
            .map_err(HiveError::from)?;
        self.audit.record(AuditEvent::policy_deleted(team.as_str(), policy_id)).await;
        Ok(())
    }

    async fn persist(&self, pool: &sqlx::AnyPool, team: &TeamId, policy: &Policy, is_insert: bool) -> Result<()> {
        let document = serde_json::to_string(policy)?;
        if is_insert {
            sqlx::query(&format!(
                "INSERT INTO {POLICY_TABLE} (team_id, id, name, version, document, created_at, updated_at)
                 VALUES (?,?,?,?,?,?,?)"
            ))
            .bind(team.as_str())
            .bind(&policy.id)
            .bind(&policy.name)
            .bind(&policy.version)
            .bind(document)
            .bind(policy.created_at.to_rfc3339())
            .bind(policy.updated_at.to_rfc3339())
            .execute(pool)
            .await
            .map_err(HiveError::from)?;
        } else {
            sqlx::query(&format!(
                "UPDATE {POLICY_TABLE} SET name = ?, version = ?, document = ?, updated_at = ?
                 WHERE team_id = ? AND id = ?"
            ))
            .bind(&policy.name)
            .bind(&policy.version)
            .bind(document)
            .bind(policy.updated_at.to_rfc3339())
            .bind(team.as_str())
            .bind(&policy.id)
            .execute(pool)
            .await
            .map_err(HiveError::from)?;
        }
        Ok(())
    }

    async fn enrich(&self, pool: &sqlx::AnyPool, team: &TeamId, policy: &mut Policy) -> Result<()> {
        let now = Utc::now();
        for budget in &mut policy.budgets {
            let (spent, analytics) = spend::enrich(pool, team.as_str(), budget, now).await?;
            budget.spent = spent;
            budget.analytics = Some(analytics);
        }
        Ok(())
    }
}
