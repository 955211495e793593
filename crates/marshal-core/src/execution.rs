//! Runtime execution state of a strategy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::NodeStatus;

/// Reason attached to a failure caused by a budget denial
pub const BUDGET_EXCEEDED_REASON: &str = "budget_exceeded";

/// Events that drive node status transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionEvent {
    /// The agent started working on the node
    Start,
    /// The agent finished successfully
    Complete { actual_cost: Option<f64> },
    /// The agent failed
    Fail {
        reason: String,
        actual_cost: Option<f64>,
    },
    /// A transitive dependency failed (tracker-generated)
    Block { failed_node: String },
    /// The strategy was cancelled (tracker-generated)
    Cancel,
}

impl ActionEvent {
    pub fn complete() -> Self {
        Self::Complete { actual_cost: None }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self::Fail {
            reason: reason.into(),
            actual_cost: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete { .. } => "complete",
            Self::Fail { .. } => "fail",
            Self::Block { .. } => "block",
            Self::Cancel => "cancel",
        }
    }

    pub fn actual_cost(&self) -> Option<f64> {
        match self {
            Self::Complete { actual_cost } | Self::Fail { actual_cost, .. } => *actual_cost,
            _ => None,
        }
    }
}

/// A logged, timestamped transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub event: ActionEvent,
    pub from: NodeStatus,
    pub to: NodeStatus,
}

/// Runtime status/progress tracker for a strategy's nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub strategy_id: String,
    pub node_status: BTreeMap<String, NodeStatus>,
    pub events: Vec<ExecutionEvent>,
    /// completed / total * 100
    pub progress: f64,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionState {
    /// All nodes start PENDING
    pub fn new<I, S>(strategy_id: impl Into<String>, node_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Utc::now();
        Self {
            strategy_id: strategy_id.into(),
            node_status: node_ids
                .into_iter()
                .map(|id| (id.into(), NodeStatus::Pending))
                .collect(),
            events: Vec::new(),
            progress: 0.0,
            cancelled: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        self.node_status.get(node_id).copied()
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.node_status.values().filter(|s| **s == status).count()
    }

    /// Apply an already-validated transition and log it
    pub fn apply(&mut self, node_id: &str, event: ActionEvent, to: NodeStatus) {
        let from = self.status(node_id).unwrap_or_default();
        let now = Utc::now();
        self.node_status.insert(node_id.to_string(), to);
        self.events.push(ExecutionEvent {
            timestamp: now,
            node_id: node_id.to_string(),
            event,
            from,
            to,
        });
        self.updated_at = now;
        self.recompute_progress();
    }

    pub fn recompute_progress(&mut self) {
        let total = self.node_status.len();
        self.progress = if total == 0 {
            0.0
        } else {
            self.count(NodeStatus::Completed) as f64 / total as f64 * 100.0
        };
    }

    /// Every node reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.node_status.values().all(|s| s.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_all_pending() {
        let state = ExecutionState::new("s-1", ["a", "b", "c"]);
        assert_eq!(state.count(NodeStatus::Pending), 3);
        assert_eq!(state.progress, 0.0);
        assert!(!state.is_finished());
    }

    #[test]
    fn test_apply_recomputes_progress() {
        let mut state = ExecutionState::new("s-1", ["a", "b", "c", "d"]);
        state.apply("a", ActionEvent::Start, NodeStatus::Running);
        state.apply("a", ActionEvent::complete(), NodeStatus::Completed);

        assert_eq!(state.progress, 25.0);
        assert_eq!(state.events.len(), 2);
        assert_eq!(state.events[1].from, NodeStatus::Running);
        assert_eq!(state.events[1].to, NodeStatus::Completed);
    }

    #[test]
    fn test_event_serde_tagged() {
        let json = serde_json::to_value(ActionEvent::fail(BUDGET_EXCEEDED_REASON)).unwrap();
        assert_eq!(json["type"], "fail");
        assert_eq!(json["reason"], "budget_exceeded");
    }
}
