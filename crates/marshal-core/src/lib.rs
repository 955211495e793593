//! # marshal-core
//!
//! Core types for the Marshal campaign orchestration system.
//!
//! Marshal turns a marketing goal into a dependency-ordered graph of agent
//! actions, picks the best agent per action from historical performance,
//! mines reusable patterns from finished campaigns and tracks execution.
//!
//! ## Core Paradigm
//!
//! - Strategies ARE immutable DAGs (only node status changes, and only through the tracker)
//! - Stages ARE parallel groups (every node depends on the whole previous stage)
//! - Persistence IS a repository trait (in-memory for tests, JSON files on disk)
//! - History IS an append-only outcome log

mod error;
mod types;

pub mod config;
pub mod dag;
pub mod execution;
pub mod fail_open;
pub mod performance;
pub mod storage;
pub mod strategy;

pub use error::{MarshalError, Result};
pub use execution::{ActionEvent, ExecutionEvent, ExecutionState, BUDGET_EXCEEDED_REASON};
pub use performance::{AgentPerformanceRecord, LearningProfile, MetricsSnapshot, OutcomeRecord};
pub use strategy::{ActionNode, Stage, Strategy};
pub use types::*;
