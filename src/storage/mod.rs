//! Persistence layer: per-tenant pooling, schema DDL, and the hot/warm/cold
//! event store plus the policy document store (C2, C4, C6).

pub mod models;
pub mod policy_store;
pub mod schema;
pub mod spend;
pub mod tenant_router;
pub mod tiered_store;

pub use policy_store::PolicyStore;
pub use tenant_router::TenantRouter;
pub use tiered_store::{AgentSummary, NormalizedBatch, TieredStore, UpsertResult};
