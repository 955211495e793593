//! Planned strategies: stages of parallel action nodes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::types::{AgentId, CampaignType, CapabilityId, NodeStatus, Priority};

/// One schedulable unit of work mapped to an agent capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionNode {
    pub id: String,
    pub capability: CapabilityId,
    /// Agent selected for this node
    pub agent_id: AgentId,
    pub action: String,
    /// Label of the stage this node belongs to
    pub stage: String,
    pub depends_on: BTreeSet<String>,
    pub estimated_duration_hours: f64,
    pub estimated_cost: f64,
    pub priority: Priority,
    /// Campaign score of the selected agent, 0-100
    pub performance_score: f64,
    #[serde(default)]
    pub status: NodeStatus,
}

/// A group of nodes that can run in parallel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub index: usize,
    pub name: String,
    pub nodes: Vec<ActionNode>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Stage {
    pub fn duration_hours(&self) -> f64 {
        (self.end - self.start).num_minutes() as f64 / 60.0
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }
}

/// The planned DAG + timeline + cost/success estimate for a campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub campaign_type: CampaignType,
    pub objective: String,
    /// Stages in topological order
    pub stages: Vec<Stage>,
    pub total_estimated_cost: f64,
    pub total_estimated_duration_hours: f64,
    /// 0-100
    pub brand_alignment_score: f64,
    /// 0-100
    pub success_probability: f64,
    pub created_at: DateTime<Utc>,
}

impl Strategy {
    /// All nodes in stage order
    pub fn nodes(&self) -> impl Iterator<Item = &ActionNode> {
        self.stages.iter().flat_map(|s| s.nodes.iter())
    }

    pub fn node(&self, node_id: &str) -> Option<&ActionNode> {
        self.nodes().find(|n| n.id == node_id)
    }

    pub fn node_count(&self) -> usize {
        self.stages.iter().map(|s| s.nodes.len()).sum()
    }

    pub fn stage_labels(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Node id -> ids it depends on
    pub fn dependency_map(&self) -> HashMap<String, Vec<String>> {
        self.nodes()
            .map(|n| (n.id.clone(), n.depends_on.iter().cloned().collect()))
            .collect()
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.stages.first().map(|s| s.start)
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.stages.last().map(|s| s.end)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Strategy {} ({})", self.id, self.campaign_type)?;
        writeln!(f, "  Objective: {}", self.objective)?;
        writeln!(f, "  Cost: {:.2}", self.total_estimated_cost)?;
        writeln!(f, "  Duration: {:.1}h", self.total_estimated_duration_hours)?;
        writeln!(f, "  Success probability: {:.1}", self.success_probability)?;
        writeln!(f, "  Brand alignment: {:.1}", self.brand_alignment_score)?;
        writeln!(f)?;
        writeln!(f, "Stages:")?;
        for stage in &self.stages {
            writeln!(
                f,
                "  {} {} ({} -> {})",
                stage.index,
                stage.name,
                stage.start.format("%Y-%m-%d %H:%M"),
                stage.end.format("%Y-%m-%d %H:%M")
            )?;
            for node in &stage.nodes {
                writeln!(
                    f,
                    "    - {} [{} via {}] score {:.1}, {:.1}h, {:.2}",
                    node.id,
                    node.capability,
                    node.agent_id,
                    node.performance_score,
                    node.estimated_duration_hours,
                    node.estimated_cost
                )?;
            }
        }
        Ok(())
    }
}
