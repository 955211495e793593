//! # marshal-orchestrator
//!
//! Runtime side of Marshal: drives generated strategies through the node
//! state machine, enforces dependency order and budget approval, and keeps
//! per-strategy progress.

pub mod budget;
pub mod state_machine;
pub mod tracker;

pub use budget::{BudgetAuthority, BudgetDecision, SpendLimit, Unlimited};
pub use state_machine::transition;
pub use tracker::ExecutionTracker;
