//! Append-only performance store

use chrono::{DateTime, Utc};
use marshal_core::{AgentPerformanceRecord, MetricsSnapshot, OutcomeRecord, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::aggregate::{aggregate, window_cutoff};
use crate::storage::OutcomeLog;

/// Outcome payload reported for an agent invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub capability: String,
    pub success: bool,
    pub cost: f64,
    pub duration_hours: f64,
    pub brand_score: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Outcome {
    pub fn success(capability: impl Into<String>, cost: f64, duration_hours: f64) -> Self {
        Self {
            capability: capability.into(),
            success: true,
            cost,
            duration_hours,
            brand_score: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(capability: impl Into<String>, cost: f64, duration_hours: f64) -> Self {
        Self {
            success: false,
            ..Self::success(capability, cost, duration_hours)
        }
    }

    pub fn with_brand_score(mut self, score: f64) -> Self {
        self.brand_score = Some(score);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Append-only log of per-agent outcomes with on-demand rolling metrics
pub struct PerformanceStore {
    outcomes: Arc<RwLock<Vec<OutcomeRecord>>>,
    log: OutcomeLog,
    total_recorded: AtomicU64,
}

impl PerformanceStore {
    /// Purely in-memory store
    pub fn new() -> Self {
        Self {
            outcomes: Arc::new(RwLock::new(Vec::new())),
            log: OutcomeLog::memory(),
            total_recorded: AtomicU64::new(0),
        }
    }

    /// Open a store backed by `log`, replaying what it already holds
    pub async fn open(log: OutcomeLog) -> Result<Self> {
        let existing = log.load_all().await?;
        info!("Replayed {} outcomes from {:?}", existing.len(), log.mode());

        Ok(Self {
            total_recorded: AtomicU64::new(existing.len() as u64),
            outcomes: Arc::new(RwLock::new(existing)),
            log,
        })
    }

    /// Append an outcome for an agent
    pub async fn record_outcome(&self, agent_id: &str, outcome: Outcome) -> Result<()> {
        self.record(OutcomeRecord {
            agent_id: agent_id.to_string(),
            capability: outcome.capability,
            success: outcome.success,
            cost: outcome.cost,
            duration_hours: outcome.duration_hours,
            brand_score: outcome.brand_score,
            timestamp: outcome.timestamp,
        })
        .await
    }

    /// Append a fully-formed outcome record
    pub async fn record(&self, record: OutcomeRecord) -> Result<()> {
        // Persist first so memory never holds what the log lost
        self.log.append(&record).await?;

        debug!(
            agent = %record.agent_id,
            capability = %record.capability,
            success = record.success,
            "Recorded outcome"
        );
        self.outcomes.write().await.push(record);
        self.total_recorded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Metrics for one agent over the trailing window ending now
    pub async fn get_metrics(&self, agent_id: &str, window_days: u32) -> AgentPerformanceRecord {
        self.get_metrics_at(agent_id, window_days, Utc::now()).await
    }

    /// Metrics for one agent over the trailing window ending at `now`
    ///
    /// Unknown agents yield a zero-count record, never an error.
    pub async fn get_metrics_at(
        &self,
        agent_id: &str,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> AgentPerformanceRecord {
        let cutoff = window_cutoff(now, window_days);
        let outcomes = self.outcomes.read().await;
        aggregate(
            agent_id,
            window_days,
            outcomes
                .iter()
                .filter(|o| o.agent_id == agent_id && o.timestamp >= cutoff && o.timestamp <= now),
        )
    }

    /// Metrics for every agent with outcomes in the window ending now
    pub async fn get_all_metrics(&self, window_days: u32) -> HashMap<String, AgentPerformanceRecord> {
        self.get_all_metrics_at(window_days, Utc::now()).await
    }

    pub async fn get_all_metrics_at(
        &self,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> HashMap<String, AgentPerformanceRecord> {
        let cutoff = window_cutoff(now, window_days);
        let outcomes = self.outcomes.read().await;

        let mut by_agent: HashMap<&str, Vec<&OutcomeRecord>> = HashMap::new();
        for outcome in outcomes
            .iter()
            .filter(|o| o.timestamp >= cutoff && o.timestamp <= now)
        {
            by_agent.entry(outcome.agent_id.as_str()).or_default().push(outcome);
        }

        by_agent
            .into_iter()
            .map(|(agent, records)| {
                (
                    agent.to_string(),
                    aggregate(agent, window_days, records.into_iter()),
                )
            })
            .collect()
    }

    /// Immutable point-in-time view for planning
    pub async fn snapshot(&self, window_days: u32) -> MetricsSnapshot {
        MetricsSnapshot::new(window_days, self.get_all_metrics(window_days).await)
    }

    /// Total outcomes ever recorded (including replayed ones)
    pub fn total_recorded(&self) -> u64 {
        self.total_recorded.load(Ordering::Relaxed)
    }
}

impl Default for PerformanceStore {
    fn default() -> Self {
        Self::new()
    }
}
