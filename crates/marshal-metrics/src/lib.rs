//! # marshal-metrics
//!
//! Historical agent performance for Marshal planning.
//!
//! This crate provides:
//! - An append-only outcome log (in memory or JSONL on disk)
//! - Trailing-window aggregation per agent
//! - Point-in-time snapshots consumed by the strategy planner

mod aggregate;
mod storage;
mod store;

pub use aggregate::{aggregate, window_cutoff, RollingAverage};
pub use storage::{LogMode, OutcomeLog};
pub use store::{Outcome, PerformanceStore};
