//! Budget authority: approves node starts and records spend
//!
//! # Invariants (SpendLimit)
//! - `spent + reserved <= limit` after every approval
//! - an approval reserves the estimate until spend for that capability is
//!   recorded or the reservation is released

use async_trait::async_trait;
use marshal_core::{NodeStatus, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;

/// Answer to a budget check
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetDecision {
    pub approved: bool,
    pub remaining: f64,
}

/// External gate consulted before a node starts running
#[async_trait]
pub trait BudgetAuthority: Send + Sync {
    async fn check_budget(&self, capability: &str, estimated_cost: f64) -> Result<BudgetDecision>;

    /// Called once a node reaches COMPLETED or FAILED
    async fn record_spend(&self, capability: &str, actual_cost: f64, outcome: NodeStatus) -> Result<()>;

    /// Return an approved estimate that will never be spent (node cancelled
    /// while running, or its start could not be persisted)
    async fn release(&self, capability: &str, estimated_cost: f64) -> Result<()>;
}

#[derive(Debug, Default)]
struct Ledger {
    spent: f64,
    reservations: HashMap<String, VecDeque<f64>>,
}

impl Ledger {
    fn reserved(&self) -> f64 {
        self.reservations.values().flat_map(|r| r.iter()).sum()
    }

    /// Drop one reservation for `capability`, preferring an exact estimate match
    fn take_reservation(&mut self, capability: &str, estimate: Option<f64>) -> Option<f64> {
        let queue = self.reservations.get_mut(capability)?;
        let index = estimate
            .and_then(|e| queue.iter().position(|r| *r == e))
            .unwrap_or(0);
        let taken = queue.remove(index);
        if queue.is_empty() {
            self.reservations.remove(capability);
        }
        taken
    }
}

/// In-memory authority with a fixed spending limit
#[derive(Debug)]
pub struct SpendLimit {
    limit: f64,
    ledger: Mutex<Ledger>,
}

impl SpendLimit {
    pub fn new(limit: f64) -> Self {
        Self {
            limit: limit.max(0.0),
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn limit(&self) -> f64 {
        self.limit
    }

    pub async fn spent(&self) -> f64 {
        self.ledger.lock().await.spent
    }

    /// Limit minus spend and outstanding reservations
    pub async fn remaining(&self) -> f64 {
        let ledger = self.ledger.lock().await;
        (self.limit - ledger.spent - ledger.reserved()).max(0.0)
    }
}

#[async_trait]
impl BudgetAuthority for SpendLimit {
    async fn check_budget(&self, capability: &str, estimated_cost: f64) -> Result<BudgetDecision> {
        let mut ledger = self.ledger.lock().await;
        let estimate = estimated_cost.max(0.0);
        let remaining = (self.limit - ledger.spent - ledger.reserved()).max(0.0);

        if estimate > remaining {
            debug!(capability, estimate, remaining, "Budget denied");
            return Ok(BudgetDecision {
                approved: false,
                remaining,
            });
        }

        ledger
            .reservations
            .entry(capability.to_string())
            .or_default()
            .push_back(estimate);

        Ok(BudgetDecision {
            approved: true,
            remaining: remaining - estimate,
        })
    }

    async fn record_spend(&self, capability: &str, actual_cost: f64, outcome: NodeStatus) -> Result<()> {
        let mut ledger = self.ledger.lock().await;
        ledger.take_reservation(capability, None);
        ledger.spent += actual_cost.max(0.0);
        debug!(capability, actual_cost, %outcome, spent = ledger.spent, "Recorded spend");
        Ok(())
    }

    async fn release(&self, capability: &str, estimated_cost: f64) -> Result<()> {
        let mut ledger = self.ledger.lock().await;
        let released = ledger.take_reservation(capability, Some(estimated_cost.max(0.0)));
        debug!(capability, ?released, "Released reservation");
        Ok(())
    }
}

/// Authority that approves everything
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

#[async_trait]
impl BudgetAuthority for Unlimited {
    async fn check_budget(&self, _capability: &str, _estimated_cost: f64) -> Result<BudgetDecision> {
        Ok(BudgetDecision {
            approved: true,
            remaining: f64::MAX,
        })
    }

    async fn record_spend(&self, _capability: &str, _actual_cost: f64, _outcome: NodeStatus) -> Result<()> {
        Ok(())
    }

    async fn release(&self, _capability: &str, _estimated_cost: f64) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reservations_count_against_limit() {
        let budget = SpendLimit::new(1000.0);

        let first = budget.check_budget("ads", 600.0).await.unwrap();
        assert!(first.approved);
        assert_eq!(first.remaining, 400.0);

        let second = budget.check_budget("social", 500.0).await.unwrap();
        assert!(!second.approved);
        assert_eq!(second.remaining, 400.0);
    }

    #[tokio::test]
    async fn test_record_spend_releases_reservation() {
        let budget = SpendLimit::new(1000.0);
        budget.check_budget("ads", 600.0).await.unwrap();
        budget
            .record_spend("ads", 450.0, NodeStatus::Completed)
            .await
            .unwrap();

        assert_eq!(budget.spent().await, 450.0);
        assert_eq!(budget.remaining().await, 550.0);
        assert!(budget.check_budget("social", 500.0).await.unwrap().approved);
    }

    #[tokio::test]
    async fn test_release_returns_headroom() {
        let budget = SpendLimit::new(1000.0);
        budget.check_budget("ads", 200.0).await.unwrap();
        budget.check_budget("ads", 700.0).await.unwrap();
        assert_eq!(budget.remaining().await, 100.0);

        budget.release("ads", 700.0).await.unwrap();
        assert_eq!(budget.remaining().await, 800.0);
        assert_eq!(budget.spent().await, 0.0);

        // Nothing left to release for this capability
        budget.release("social", 500.0).await.unwrap();
        assert_eq!(budget.remaining().await, 800.0);
    }

    #[tokio::test]
    async fn test_unlimited_always_approves() {
        let decision = Unlimited.check_budget("ads", 1e12).await.unwrap();
        assert!(decision.approved);
    }
}
