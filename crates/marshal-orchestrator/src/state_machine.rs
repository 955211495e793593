//! Pure state machine for action nodes
//!
//! No I/O and no async: `transition(node, status, event)` either yields the
//! next status or an `InvalidTransition` error. Statuses only move forward:
//!
//! ```text
//! PENDING -> RUNNING -> COMPLETED
//!                    -> FAILED
//! PENDING | RUNNING  -> BLOCKED | CANCELLED
//! ```
//!
//! Terminal statuses reject every event.

use marshal_core::{ActionEvent, MarshalError, NodeStatus, Result};

/// Next status of `node_id` when `event` arrives in status `from`
pub fn transition(node_id: &str, from: NodeStatus, event: &ActionEvent) -> Result<NodeStatus> {
    use ActionEvent::*;
    use NodeStatus::*;

    match (from, event) {
        (Pending, Start) => Ok(Running),
        (Running, Complete { .. }) => Ok(Completed),
        (Running, Fail { .. }) => Ok(Failed),
        (Pending | Running, Block { .. }) => Ok(Blocked),
        (Pending | Running, Cancel) => Ok(Cancelled),
        (from, event) => Err(MarshalError::InvalidTransition {
            node_id: node_id.to_string(),
            from,
            event: event.name().to_string(),
        }),
    }
}
