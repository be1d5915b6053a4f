//! Event batching, room fan-out, and connected-instance tracking (C9, C10, C11).

pub mod agent_status;
pub mod batcher;
pub mod fanout;

pub use agent_status::{AgentDiscoveryEntry, AgentStatusTracker};
pub use batcher::{BatchEmitter, EventBatcher, EventSummary, FlushReason};
pub use fanout::{CrossProcessBridge, FanoutHub, LocalBridge};
