//! Tenant (team) identity and schema naming.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque tenant identifier. Owns an isolated logical schema in the time-series
/// store and identifies the unit of fan-out and budget evaluation (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(pub String);

impl TeamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive a sanitized schema name prefix for this team (§4.2). Only
    /// alphanumerics and underscores survive; everything else is dropped so the
    /// result is always a safe unquoted SQL identifier component.
    pub fn schema_name(&self) -> String {
        let mut sanitized: String = self
            .0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        if sanitized.is_empty() || !sanitized.chars().next().unwrap().is_ascii_alphabetic() {
            sanitized = format!("t_{sanitized}");
        }
        sanitized.truncate(48);
        format!("hive_{sanitized}")
    }

    /// Room name for the tenant's primary fan-out channel (§4.10).
    pub fn room(&self) -> String {
        format!("team:{}", self.0)
    }

    pub fn llm_events_room(&self) -> String {
        format!("team:{}:llm-events", self.0)
    }

    pub fn alerts_room(&self) -> String {
        format!("team:{}:alerts", self.0)
    }

    pub fn policy_room(&self) -> String {
        format!("team:{}:policy", self.0)
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TeamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TeamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_name_sanitizes_punctuation() {
        let team = TeamId::new("acme-corp.prod!!");
        assert_eq!(team.schema_name(), "hive_acme_corp_prod__");
    }

    #[test]
    fn schema_name_handles_leading_digit() {
        let team = TeamId::new("123abc");
        assert_eq!(team.schema_name(), "hive_t_123abc");
    }

    #[test]
    fn rooms_are_namespaced_per_tenant() {
        let team = TeamId::new("acme");
        assert_eq!(team.room(), "team:acme");
        assert_eq!(team.llm_events_room(), "team:acme:llm-events");
        assert_eq!(team.alerts_room(), "team:acme:alerts");
        assert_eq!(team.policy_room(), "team:acme:policy");
    }
}
