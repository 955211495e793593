//! Historical agent performance types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::types::{AgentId, CapabilityId};

/// One observed outcome of an agent invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub agent_id: AgentId,
    pub capability: CapabilityId,
    pub success: bool,
    pub cost: f64,
    pub duration_hours: f64,
    /// Brand compliance score 0-100, when the outcome was reviewed
    pub brand_score: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn new(
        agent_id: impl Into<String>,
        capability: impl Into<String>,
        success: bool,
        cost: f64,
        duration_hours: f64,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            capability: capability.into(),
            success,
            cost,
            duration_hours,
            brand_score: None,
            timestamp: Utc::now(),
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

/// Rolling metrics for one agent over a trailing window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformanceRecord {
    pub agent_id: AgentId,
    /// Capability of the most recent outcome (empty when there is no history)
    pub capability: CapabilityId,
    pub window_days: u32,
    /// 0.0 - 1.0
    pub success_rate: f64,
    pub avg_cost: f64,
    pub avg_duration_hours: f64,
    pub avg_brand_score: Option<f64>,
    pub sample_count: usize,
}

impl AgentPerformanceRecord {
    /// Zero-count record for an agent with no history in the window
    pub fn empty(agent_id: impl Into<String>, window_days: u32) -> Self {
        Self {
            agent_id: agent_id.into(),
            capability: String::new(),
            window_days,
            success_rate: 0.0,
            avg_cost: 0.0,
            avg_duration_hours: 0.0,
            avg_brand_score: None,
            sample_count: 0,
        }
    }

    /// Zero-count means "no history, use template defaults"
    pub fn has_history(&self) -> bool {
        self.sample_count > 0
    }
}

/// Point-in-time view of all agent metrics, handed to the planner
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub window_days: u32,
    pub taken_at: Option<DateTime<Utc>>,
    pub records: HashMap<AgentId, AgentPerformanceRecord>,
}

impl MetricsSnapshot {
    pub fn new(window_days: u32, records: HashMap<AgentId, AgentPerformanceRecord>) -> Self {
        Self {
            window_days,
            taken_at: Some(Utc::now()),
            records,
        }
    }

    /// Metrics for an agent; zero-count default when unknown
    pub fn get(&self, agent_id: &str) -> AgentPerformanceRecord {
        self.records
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| AgentPerformanceRecord::empty(agent_id, self.window_days))
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Per-capability score adjustments learned from past campaigns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningProfile {
    pub adjustments: BTreeMap<CapabilityId, f64>,
    pub derived_from: usize,
}

impl LearningProfile {
    /// Score points to add for a capability (0 when nothing was learned)
    pub fn adjustment(&self, capability: &str) -> f64 {
        self.adjustments.get(capability).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.adjustments.is_empty()
    }
}
