//! Execution tracker: owns node status for generated strategies
//!
//! Events for one strategy are serialized through a per-strategy async
//! mutex; different strategies proceed in parallel. A rejected event never
//! changes stored state, with one exception: a budget denial is itself
//! recorded as a FAILED node.

use marshal_core::dag::{transitive_dependents, validate_strategy};
use marshal_core::fail_open::fail_open;
use marshal_core::storage::{Repository, SharedRepository};
use marshal_core::{
    ActionEvent, ActionNode, ExecutionState, MarshalError, NodeStatus, Result, Strategy,
    BUDGET_EXCEEDED_REASON,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::budget::BudgetAuthority;
use crate::state_machine::transition;

pub struct ExecutionTracker {
    strategies: SharedRepository<Strategy>,
    states: SharedRepository<ExecutionState>,
    budget: Option<Arc<dyn BudgetAuthority>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ExecutionTracker {
    pub fn new(strategies: SharedRepository<Strategy>, states: SharedRepository<ExecutionState>) -> Self {
        Self {
            strategies,
            states,
            budget: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Gate node starts through a budget authority
    pub fn with_budget(mut self, authority: Arc<dyn BudgetAuthority>) -> Self {
        self.budget = Some(authority);
        self
    }

    /// Per-strategy critical section
    ///
    /// Entries nobody holds or waits on are pruned on each call; a holder or
    /// waiter keeps its own `Arc`, so a pruned entry is never in use.
    async fn lock_strategy(&self, strategy_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|id, lock| id == strategy_id || Arc::strong_count(lock) > 1);
            locks.entry(strategy_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked_locks(&self) -> usize {
        self.locks.lock().await.len()
    }

    async fn load_strategy(&self, strategy_id: &str) -> Result<Strategy> {
        self.strategies
            .get(strategy_id)
            .await?
            .ok_or_else(|| MarshalError::StrategyNotFound(strategy_id.to_string()))
    }

    async fn load_state(&self, strategy_id: &str) -> Result<ExecutionState> {
        self.states
            .get(strategy_id)
            .await?
            .ok_or_else(|| MarshalError::ExecutionNotFound(strategy_id.to_string()))
    }

    /// Store a generated strategy and initialize its execution
    pub async fn register_strategy(&self, strategy: Strategy) -> Result<ExecutionState> {
        validate_strategy(&strategy)?;
        let strategy_id = strategy.id.clone();
        self.strategies.save(strategy).await?;
        self.initialize_execution(&strategy_id).await
    }

    /// All nodes start PENDING; an existing execution is returned unchanged
    #[instrument(skip(self))]
    pub async fn initialize_execution(&self, strategy_id: &str) -> Result<ExecutionState> {
        let _guard = self.lock_strategy(strategy_id).await;
        let strategy = self.load_strategy(strategy_id).await?;
        validate_strategy(&strategy)?;

        if let Some(existing) = self.states.get(strategy_id).await? {
            debug!("Execution already initialized");
            return Ok(existing);
        }

        let state = ExecutionState::new(strategy_id, strategy.nodes().map(|n| n.id.clone()));
        self.states.save(state.clone()).await?;
        info!(nodes = strategy.node_count(), "Initialized execution");
        Ok(state)
    }

    /// Initialize if needed and return the nodes that may start now
    pub async fn execute_strategy(&self, strategy_id: &str) -> Result<Vec<ActionNode>> {
        self.initialize_execution(strategy_id).await?;
        self.ready_nodes(strategy_id).await
    }

    /// PENDING nodes whose dependencies are all COMPLETED, in stage order
    pub async fn ready_nodes(&self, strategy_id: &str) -> Result<Vec<ActionNode>> {
        let strategy = self.load_strategy(strategy_id).await?;
        let state = self.load_state(strategy_id).await?;
        if state.cancelled {
            return Ok(Vec::new());
        }

        Ok(strategy
            .nodes()
            .filter(|node| state.status(&node.id) == Some(NodeStatus::Pending))
            .filter(|node| {
                node.depends_on
                    .iter()
                    .all(|dep| state.status(dep) == Some(NodeStatus::Completed))
            })
            .cloned()
            .collect())
    }

    /// Apply an agent event to a node
    ///
    /// Rejects illegal transitions, starts with unfinished dependencies and
    /// anything after cancellation. A failure blocks every transitive
    /// dependent.
    #[instrument(skip(self, event), fields(event = event.name()))]
    pub async fn log_action_event(
        &self,
        strategy_id: &str,
        node_id: &str,
        event: ActionEvent,
    ) -> Result<ExecutionState> {
        let _guard = self.lock_strategy(strategy_id).await;
        let strategy = self.load_strategy(strategy_id).await?;
        let mut state = self.load_state(strategy_id).await?;

        if state.cancelled {
            return Err(MarshalError::ExecutionClosed(strategy_id.to_string()));
        }

        let node = strategy
            .node(node_id)
            .ok_or_else(|| MarshalError::NodeNotFound {
                strategy_id: strategy_id.to_string(),
                node_id: node_id.to_string(),
            })?
            .clone();

        let from = state.status(node_id).unwrap_or_default();
        if matches!(event, ActionEvent::Block { .. } | ActionEvent::Cancel) {
            // Only the tracker itself blocks or cancels nodes
            return Err(MarshalError::InvalidTransition {
                node_id: node_id.to_string(),
                from,
                event: event.name().to_string(),
            });
        }
        let to = transition(node_id, from, &event)?;

        let mut reserved = None;
        if matches!(event, ActionEvent::Start) {
            let pending: Vec<String> = node
                .depends_on
                .iter()
                .filter(|dep| state.status(dep) != Some(NodeStatus::Completed))
                .cloned()
                .collect();
            if !pending.is_empty() {
                return Err(MarshalError::DependencyNotSatisfied {
                    node_id: node_id.to_string(),
                    pending,
                });
            }

            if let Some(authority) = &self.budget {
                let decision = authority
                    .check_budget(&node.capability, node.estimated_cost)
                    .await?;
                if !decision.approved {
                    warn!(
                        node = node_id,
                        requested = node.estimated_cost,
                        remaining = decision.remaining,
                        "Budget denied, failing node"
                    );
                    state.apply(node_id, ActionEvent::fail(BUDGET_EXCEEDED_REASON), NodeStatus::Failed);
                    Self::block_dependents(&strategy, &mut state, node_id);
                    self.states.save(state).await?;
                    return Err(MarshalError::BudgetDenied {
                        capability: node.capability.clone(),
                        requested: node.estimated_cost,
                        remaining: decision.remaining,
                    });
                }
                reserved = Some(node.estimated_cost);
            }
        }

        let actual_cost = event.actual_cost();
        state.apply(node_id, event, to);
        if to == NodeStatus::Failed {
            Self::block_dependents(&strategy, &mut state, node_id);
        }
        if let Err(e) = self.states.save(state.clone()).await {
            // The node never left PENDING, so its approval must not hold headroom
            if let (Some(authority), Some(estimate)) = (&self.budget, reserved) {
                fail_open("budget::release", || authority.release(&node.capability, estimate)).await;
            }
            return Err(e);
        }

        debug!(node = node_id, %from, %to, progress = state.progress, "Applied event");

        if matches!(to, NodeStatus::Completed | NodeStatus::Failed) {
            if let Some(authority) = &self.budget {
                let spend = actual_cost.unwrap_or(node.estimated_cost);
                fail_open("budget::record_spend", || {
                    authority.record_spend(&node.capability, spend, to)
                })
                .await;
            }
        }

        Ok(state)
    }

    fn block_dependents(strategy: &Strategy, state: &mut ExecutionState, failed_node: &str) {
        for dependent in transitive_dependents(&strategy.dependency_map(), failed_node) {
            let from = state.status(&dependent).unwrap_or_default();
            let event = ActionEvent::Block {
                failed_node: failed_node.to_string(),
            };
            if let Ok(to) = transition(&dependent, from, &event) {
                state.apply(&dependent, event, to);
            }
        }
    }

    pub async fn get_execution_state(&self, strategy_id: &str) -> Result<ExecutionState> {
        let mut state = self.load_state(strategy_id).await?;
        state.recompute_progress();
        Ok(state)
    }

    /// Cancel every non-terminal node and close the execution to new events
    ///
    /// Budget reservations held by RUNNING nodes are released.
    #[instrument(skip(self))]
    pub async fn cancel_execution(&self, strategy_id: &str) -> Result<ExecutionState> {
        let _guard = self.lock_strategy(strategy_id).await;
        let mut state = self.load_state(strategy_id).await?;
        if state.cancelled {
            return Ok(state);
        }

        let live: Vec<(String, NodeStatus)> = state
            .node_status
            .iter()
            .filter(|(_, status)| !status.is_terminal())
            .map(|(id, status)| (id.clone(), *status))
            .collect();

        for (node_id, from) in &live {
            if let Ok(to) = transition(node_id, *from, &ActionEvent::Cancel) {
                state.apply(node_id, ActionEvent::Cancel, to);
            }
        }
        state.cancelled = true;
        self.states.save(state.clone()).await?;

        if let Some(authority) = &self.budget {
            // Cancellation is already persisted; a missing strategy only skips the release
            let strategy = match self.load_strategy(strategy_id).await {
                Ok(strategy) => strategy,
                Err(e) => {
                    warn!(error = %e, "Could not release reservations for cancelled nodes");
                    return Ok(state);
                }
            };
            for (node_id, _) in live.iter().filter(|(_, from)| *from == NodeStatus::Running) {
                if let Some(node) = strategy.node(node_id) {
                    fail_open("budget::release", || {
                        authority.release(&node.capability, node.estimated_cost)
                    })
                    .await;
                }
            }
        }

        info!(cancelled_nodes = live.len(), "Cancelled execution");
        Ok(state)
    }

    /// The stored strategy with node statuses filled in from its execution
    pub async fn annotated_strategy(&self, strategy_id: &str) -> Result<Strategy> {
        let mut strategy = self.load_strategy(strategy_id).await?;
        let state = self.load_state(strategy_id).await?;
        for stage in &mut strategy.stages {
            for node in &mut stage.nodes {
                node.status = state.status(&node.id).unwrap_or_default();
            }
        }
        Ok(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::SpendLimit;
    use chrono::{Duration, Utc};
    use marshal_core::storage::InMemoryRepository;
    use marshal_core::{CampaignType, Priority, Stage};
    use std::collections::BTreeSet;

    fn node(id: &str, stage: &str, deps: &[&str], cost: f64) -> ActionNode {
        ActionNode {
            id: id.to_string(),
            capability: id.to_string(),
            agent_id: format!("{}-agent", id),
            action: format!("do_{}", id),
            stage: stage.to_string(),
            depends_on: deps.iter().map(|d| d.to_string()).collect::<BTreeSet<_>>(),
            estimated_duration_hours: 1.0,
            estimated_cost: cost,
            priority: Priority::Medium,
            performance_score: 70.0,
            status: NodeStatus::Pending,
        }
    }

    /// a -> {b, c} -> d
    fn diamond(cost: f64) -> Strategy {
        let t0 = Utc::now();
        let stage = |index: usize, name: &str, nodes: Vec<ActionNode>| Stage {
            index,
            name: name.to_string(),
            nodes,
            start: t0 + Duration::hours(index as i64),
            end: t0 + Duration::hours(index as i64 + 1),
        };
        Strategy {
            id: "s-1".to_string(),
            campaign_type: CampaignType::ProductLaunch,
            objective: "test".to_string(),
            stages: vec![
                stage(0, "research", vec![node("a", "research", &[], cost)]),
                stage(
                    1,
                    "content",
                    vec![node("b", "content", &["a"], cost), node("c", "content", &["a"], cost)],
                ),
                stage(2, "conversion", vec![node("d", "conversion", &["b", "c"], cost)]),
            ],
            total_estimated_cost: cost * 4.0,
            total_estimated_duration_hours: 3.0,
            brand_alignment_score: 75.0,
            success_probability: 60.0,
            created_at: t0,
        }
    }

    async fn tracker_with(strategy: Strategy) -> ExecutionTracker {
        let tracker = ExecutionTracker::new(InMemoryRepository::shared(), InMemoryRepository::shared());
        tracker.register_strategy(strategy).await.unwrap();
        tracker
    }

    #[tokio::test]
    async fn test_initialize_all_pending() {
        let tracker = tracker_with(diamond(10.0)).await;
        let state = tracker.get_execution_state("s-1").await.unwrap();
        assert_eq!(state.count(NodeStatus::Pending), 4);
        assert_eq!(state.progress, 0.0);

        // Idempotent
        let again = tracker.initialize_execution("s-1").await.unwrap();
        assert_eq!(again, state);
    }

    #[tokio::test]
    async fn test_start_complete_updates_progress() {
        let tracker = tracker_with(diamond(10.0)).await;
        tracker.log_action_event("s-1", "a", ActionEvent::Start).await.unwrap();
        let state = tracker
            .log_action_event("s-1", "a", ActionEvent::complete())
            .await
            .unwrap();

        assert_eq!(state.status("a"), Some(NodeStatus::Completed));
        assert_eq!(state.progress, 25.0);
        assert_eq!(state.events.len(), 2);
        assert_eq!(tracker.get_execution_state("s-1").await.unwrap().progress, 25.0);
    }

    #[tokio::test]
    async fn test_complete_without_start_is_rejected() {
        let tracker = tracker_with(diamond(10.0)).await;
        let err = tracker
            .log_action_event("s-1", "a", ActionEvent::complete())
            .await
            .unwrap_err();
        assert!(matches!(err, MarshalError::InvalidTransition { .. }));

        let state = tracker.get_execution_state("s-1").await.unwrap();
        assert_eq!(state.status("a"), Some(NodeStatus::Pending));
        assert!(state.events.is_empty());
    }

    #[tokio::test]
    async fn test_dependency_not_satisfied_keeps_pending() {
        let tracker = tracker_with(diamond(10.0)).await;
        let err = tracker
            .log_action_event("s-1", "b", ActionEvent::Start)
            .await
            .unwrap_err();

        match err {
            MarshalError::DependencyNotSatisfied { node_id, pending } => {
                assert_eq!(node_id, "b");
                assert_eq!(pending, vec!["a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        let state = tracker.get_execution_state("s-1").await.unwrap();
        assert_eq!(state.status("b"), Some(NodeStatus::Pending));
    }

    #[tokio::test]
    async fn test_failure_blocks_dependents() {
        let tracker = tracker_with(diamond(10.0)).await;
        tracker.log_action_event("s-1", "a", ActionEvent::Start).await.unwrap();
        let state = tracker
            .log_action_event("s-1", "a", ActionEvent::fail("agent crashed"))
            .await
            .unwrap();

        assert_eq!(state.status("a"), Some(NodeStatus::Failed));
        for id in ["b", "c", "d"] {
            assert_eq!(state.status(id), Some(NodeStatus::Blocked));
        }
        assert!(state.is_finished());
        assert_eq!(state.progress, 0.0);
    }

    #[tokio::test]
    async fn test_ready_nodes_follow_dependencies() {
        let tracker = tracker_with(diamond(10.0)).await;
        let ready = tracker.execute_strategy("s-1").await.unwrap();
        assert_eq!(ready.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(), vec!["a"]);

        tracker.log_action_event("s-1", "a", ActionEvent::Start).await.unwrap();
        assert!(tracker.ready_nodes("s-1").await.unwrap().is_empty());

        tracker.log_action_event("s-1", "a", ActionEvent::complete()).await.unwrap();
        let ready = tracker.ready_nodes("s-1").await.unwrap();
        assert_eq!(ready.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_cancel_closes_execution() {
        let tracker = tracker_with(diamond(10.0)).await;
        tracker.log_action_event("s-1", "a", ActionEvent::Start).await.unwrap();
        tracker.log_action_event("s-1", "a", ActionEvent::complete()).await.unwrap();
        tracker.log_action_event("s-1", "b", ActionEvent::Start).await.unwrap();

        let state = tracker.cancel_execution("s-1").await.unwrap();
        assert!(state.cancelled);
        assert_eq!(state.status("a"), Some(NodeStatus::Completed));
        for id in ["b", "c", "d"] {
            assert_eq!(state.status(id), Some(NodeStatus::Cancelled));
        }

        let err = tracker
            .log_action_event("s-1", "b", ActionEvent::complete())
            .await
            .unwrap_err();
        assert!(matches!(err, MarshalError::ExecutionClosed(_)));
        assert!(tracker.ready_nodes("s-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_budget_denial_fails_node() {
        let budget = Arc::new(SpendLimit::new(1000.0));
        let tracker = ExecutionTracker::new(InMemoryRepository::shared(), InMemoryRepository::shared())
            .with_budget(budget.clone());
        tracker.register_strategy(diamond(800.0)).await.unwrap();

        tracker.log_action_event("s-1", "a", ActionEvent::Start).await.unwrap();
        tracker
            .log_action_event("s-1", "a", ActionEvent::Complete { actual_cost: Some(700.0) })
            .await
            .unwrap();
        assert_eq!(budget.spent().await, 700.0);

        let err = tracker
            .log_action_event("s-1", "b", ActionEvent::Start)
            .await
            .unwrap_err();
        assert!(matches!(err, MarshalError::BudgetDenied { remaining, .. } if remaining == 300.0));
        assert!(err.is_infrastructure());

        let state = tracker.get_execution_state("s-1").await.unwrap();
        assert_eq!(state.status("b"), Some(NodeStatus::Failed));
        assert_eq!(state.status("d"), Some(NodeStatus::Blocked));
        assert_eq!(state.status("c"), Some(NodeStatus::Pending));

        let denial = state.events.iter().find(|e| e.node_id == "b").unwrap();
        assert_eq!(denial.event, ActionEvent::fail(BUDGET_EXCEEDED_REASON));
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let tracker = tracker_with(diamond(10.0)).await;
        assert!(matches!(
            tracker.log_action_event("s-1", "zz", ActionEvent::Start).await,
            Err(MarshalError::NodeNotFound { .. })
        ));
        assert!(matches!(
            tracker.initialize_execution("missing").await,
            Err(MarshalError::StrategyNotFound(_))
        ));
        assert!(matches!(
            tracker.get_execution_state("missing").await,
            Err(MarshalError::ExecutionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_external_block_rejected() {
        let tracker = tracker_with(diamond(10.0)).await;
        let err = tracker
            .log_action_event("s-1", "a", ActionEvent::Cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, MarshalError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_events_are_serialized() {
        let tracker = Arc::new(tracker_with(diamond(10.0)).await);
        tracker.log_action_event("s-1", "a", ActionEvent::Start).await.unwrap();
        tracker.log_action_event("s-1", "a", ActionEvent::complete()).await.unwrap();

        let handles: Vec<_> = ["b", "c"]
            .into_iter()
            .map(|id| {
                let tracker = tracker.clone();
                tokio::spawn(async move { tracker.log_action_event("s-1", id, ActionEvent::Start).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let state = tracker.get_execution_state("s-1").await.unwrap();
        assert_eq!(state.count(NodeStatus::Running), 2);
        assert_eq!(state.events.len(), 4);
    }

    #[tokio::test]
    async fn test_annotated_strategy() {
        let tracker = tracker_with(diamond(10.0)).await;
        tracker.log_action_event("s-1", "a", ActionEvent::Start).await.unwrap();

        let annotated = tracker.annotated_strategy("s-1").await.unwrap();
        assert_eq!(annotated.node("a").unwrap().status, NodeStatus::Running);
        assert_eq!(annotated.node("d").unwrap().status, NodeStatus::Pending);
    }

    fn renamed(mut strategy: Strategy, id: &str) -> Strategy {
        strategy.id = id.to_string();
        strategy
    }

    /// State repository whose saves can be switched off
    struct FlakyStates {
        inner: InMemoryRepository<ExecutionState>,
        failing: std::sync::atomic::AtomicBool,
    }

    impl FlakyStates {
        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl Repository<ExecutionState> for FlakyStates {
        async fn save(&self, entity: ExecutionState) -> Result<()> {
            if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(MarshalError::StoreUnavailable("state store offline".into()));
            }
            self.inner.save(entity).await
        }

        async fn get(&self, id: &str) -> Result<Option<ExecutionState>> {
            self.inner.get(id).await
        }

        async fn list(&self) -> Result<Vec<ExecutionState>> {
            self.inner.list().await
        }

        async fn delete(&self, id: &str) -> Result<bool> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn test_cancel_releases_running_reservations() {
        let budget = Arc::new(SpendLimit::new(1000.0));
        let tracker = ExecutionTracker::new(InMemoryRepository::shared(), InMemoryRepository::shared())
            .with_budget(budget.clone());
        tracker.register_strategy(diamond(800.0)).await.unwrap();
        tracker.register_strategy(renamed(diamond(800.0), "s-2")).await.unwrap();

        tracker.log_action_event("s-1", "a", ActionEvent::Start).await.unwrap();
        assert_eq!(budget.remaining().await, 200.0);

        tracker.cancel_execution("s-1").await.unwrap();
        assert_eq!(budget.spent().await, 0.0);
        assert_eq!(budget.remaining().await, 1000.0);

        // Another strategy sharing the authority gets the headroom back
        let state = tracker.log_action_event("s-2", "a", ActionEvent::Start).await.unwrap();
        assert_eq!(state.status("a"), Some(NodeStatus::Running));
    }

    #[tokio::test]
    async fn test_failed_save_releases_reservation() {
        let budget = Arc::new(SpendLimit::new(1000.0));
        let states = Arc::new(FlakyStates {
            inner: InMemoryRepository::new(),
            failing: std::sync::atomic::AtomicBool::new(false),
        });
        let tracker = ExecutionTracker::new(InMemoryRepository::shared(), states.clone())
            .with_budget(budget.clone());
        tracker.register_strategy(diamond(800.0)).await.unwrap();

        states.set_failing(true);
        let err = tracker
            .log_action_event("s-1", "a", ActionEvent::Start)
            .await
            .unwrap_err();
        assert!(matches!(err, MarshalError::StoreUnavailable(_)));
        assert_eq!(budget.remaining().await, 1000.0);

        states.set_failing(false);
        let state = tracker.log_action_event("s-1", "a", ActionEvent::Start).await.unwrap();
        assert_eq!(state.status("a"), Some(NodeStatus::Running));
        assert_eq!(budget.remaining().await, 200.0);
    }

    #[tokio::test]
    async fn test_idle_locks_are_pruned() {
        let tracker = tracker_with(diamond(10.0)).await;
        for id in ["s-2", "s-3"] {
            tracker.register_strategy(renamed(diamond(10.0), id)).await.unwrap();
        }
        tracker.log_action_event("s-1", "a", ActionEvent::Start).await.unwrap();
        tracker.cancel_execution("s-2").await.unwrap();

        // Only the strategy being locked keeps an entry
        tracker.log_action_event("s-3", "a", ActionEvent::Start).await.unwrap();
        assert_eq!(tracker.tracked_locks().await, 1);
    }
}
