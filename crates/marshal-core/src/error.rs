//! Unified error types for Marshal

use thiserror::Error;

use crate::types::NodeStatus;

/// Unified error type for all Marshal operations
#[derive(Error, Debug)]
pub enum MarshalError {
    // Planning errors
    #[error("Invalid goal: no stage template for campaign type '{0}'")]
    InvalidGoal(String),

    #[error("Insufficient agents: stage '{stage}' has no candidate for capability '{capability}'")]
    InsufficientAgents { stage: String, capability: String },

    #[error(
        "Timeline conflict: template needs {required_days:.1} days, window allows {available_days:.1}"
    )]
    TimelineConflict {
        required_days: f64,
        available_days: f64,
    },

    #[error("Estimated cost {estimated:.2} exceeds budget {budget:.2}")]
    BudgetExceeded { estimated: f64, budget: f64 },

    #[error("Invalid strategy: {0}")]
    InvalidStrategy(String),

    // Execution errors
    #[error("Dependencies of node '{node_id}' not completed: {pending:?}")]
    DependencyNotSatisfied {
        node_id: String,
        pending: Vec<String>,
    },

    #[error("Invalid transition for node '{node_id}': {from} cannot handle '{event}'")]
    InvalidTransition {
        node_id: String,
        from: NodeStatus,
        event: String,
    },

    #[error("Execution closed for strategy: {0}")]
    ExecutionClosed(String),

    #[error("Strategy not found: {0}")]
    StrategyNotFound(String),

    #[error("Execution not initialized for strategy: {0}")]
    ExecutionNotFound(String),

    #[error("Node '{node_id}' not found in strategy '{strategy_id}'")]
    NodeNotFound {
        strategy_id: String,
        node_id: String,
    },

    // Infrastructure errors
    #[error("Budget denied for '{capability}': requested {requested:.2}, remaining {remaining:.2}")]
    BudgetDenied {
        capability: String,
        requested: f64,
        remaining: f64,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid id '{0}': must name a single entry inside the store")]
    InvalidId(String),

    // Mining errors
    #[error("Pattern error: {0}")]
    Pattern(String),

    // Configuration
    #[error("Config error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl MarshalError {
    /// Planning errors are caller-actionable and raised synchronously
    pub fn is_planning(&self) -> bool {
        matches!(
            self,
            Self::InvalidGoal(_)
                | Self::InsufficientAgents { .. }
                | Self::TimelineConflict { .. }
                | Self::BudgetExceeded { .. }
        )
    }

    /// Infrastructure errors are left to the calling orchestrator (retry/backoff)
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::BudgetDenied { .. } | Self::StoreUnavailable(_) | Self::Io(_)
        )
    }
}

/// Result type alias using MarshalError
pub type Result<T> = std::result::Result<T, MarshalError>;
