//! Strategy generation
//!
//! Planning is a pure computation: a goal, its audience and context plus a
//! point-in-time metrics snapshot go in, a validated [`Strategy`] comes out.

use chrono::{DateTime, Duration, Utc};
use marshal_core::config::PlannerConfig;
use marshal_core::dag::{longest_chain, validate_strategy};
use marshal_core::{
    clamp_score, ActionNode, CampaignAudience, CampaignContext, CampaignGoal, LearningProfile,
    MarshalError, MetricsSnapshot, NodeStatus, Result, Stage, Strategy, TimelineFlexibility,
};
use marshal_metrics::{PerformanceStore, RollingAverage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::boost::{BoostPolicy, BoostTable};
use crate::registry::{CapabilityRegistry, StaticCapabilityRegistry};
use crate::scoring::{score_candidates, select_agent, CandidateScore};
use crate::templates::{RequiredCapability, StageTemplate, TemplateCatalog};

/// Expected effort relative to a typical campaign
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl Complexity {
    /// Factor applied to every node's cost estimate
    pub fn multiplier(&self) -> f64 {
        match self {
            Self::Low => 0.8,
            Self::Medium => 1.0,
            Self::High => 1.5,
        }
    }
}

impl std::str::FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Invalid complexity: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrandCompliance {
    #[default]
    Standard,
    /// Candidates with a brand score below the strict threshold are never selected
    Strict,
}

impl std::str::FromStr for BrandCompliance {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "strict" => Ok(Self::Strict),
            _ => Err(format!("Invalid brand compliance: {}", s)),
        }
    }
}

/// Per-request planning options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanningOptions {
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub brand_compliance: BrandCompliance,
    /// Accept strategies estimated above the goal budget
    #[serde(default)]
    pub allow_budget_overrun: bool,
    /// Overrides the configured metrics window
    #[serde(default)]
    pub window_days: Option<u32>,
    /// Adjustments learned from mined patterns
    #[serde(default)]
    pub learning: Option<LearningProfile>,
}

/// Turns campaign goals into staged strategies
pub struct StrategyPlanner {
    config: PlannerConfig,
    templates: TemplateCatalog,
    registry: Arc<dyn CapabilityRegistry>,
    boosts: Arc<dyn BoostPolicy>,
}

impl StrategyPlanner {
    /// Planner with built-in templates, registry and boost table
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            config,
            templates: TemplateCatalog::builtin(),
            registry: Arc::new(StaticCapabilityRegistry::builtin()),
            boosts: Arc::new(BoostTable::builtin()),
        }
    }

    pub fn with_templates(mut self, templates: TemplateCatalog) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn CapabilityRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_boosts(mut self, boosts: Arc<dyn BoostPolicy>) -> Self {
        self.boosts = boosts;
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Metrics window used for a request
    pub fn window_days(&self, options: &PlanningOptions) -> u32 {
        options.window_days.unwrap_or(self.config.window_days)
    }

    /// Snapshot the store and plan against it
    #[instrument(skip_all, fields(campaign_type = %goal.campaign_type))]
    pub async fn plan(
        &self,
        store: &PerformanceStore,
        goal: &CampaignGoal,
        audience: &CampaignAudience,
        context: &CampaignContext,
        options: &PlanningOptions,
    ) -> Result<Strategy> {
        let snapshot = store.snapshot(self.window_days(options)).await;
        self.generate_strategy(goal, audience, context, options, &snapshot)
    }

    /// Build a strategy for `goal` from a metrics snapshot
    ///
    /// Every node of a stage depends on every node of the previous stage, so
    /// stages run one after another and nodes inside a stage run in parallel.
    pub fn generate_strategy(
        &self,
        goal: &CampaignGoal,
        audience: &CampaignAudience,
        context: &CampaignContext,
        options: &PlanningOptions,
        snapshot: &MetricsSnapshot,
    ) -> Result<Strategy> {
        let template = self.templates.lookup(&goal.campaign_type)?;
        let window = &context.timeline;
        let available_days = window.duration_days();
        let rigid = context.timeline_flexibility == TimelineFlexibility::Rigid;

        if rigid && available_days < template.min_duration_days {
            return Err(MarshalError::TimelineConflict {
                required_days: template.min_duration_days,
                available_days,
            });
        }

        let multiplier = options.complexity.multiplier();
        let mut stages = Vec::with_capacity(template.stages.len());
        let mut previous: BTreeSet<String> = BTreeSet::new();
        let mut cursor = window.start;
        let mut brand = RollingAverage::default();

        for (index, stage_template) in template.stages.iter().enumerate() {
            let mut nodes = Vec::new();

            for required in stage_template.capabilities_for(&context.channels) {
                let chosen = self.choose_agent(goal, stage_template, required, options, snapshot)?;
                if let Some(score) = chosen.brand_score {
                    brand.push(score);
                }

                nodes.push(ActionNode {
                    id: format!("{}-{}", stage_template.name, required.capability),
                    capability: required.capability.clone(),
                    agent_id: chosen.agent_id,
                    action: required.action.clone(),
                    stage: stage_template.name.clone(),
                    depends_on: previous.clone(),
                    estimated_duration_hours: chosen.avg_duration_hours,
                    estimated_cost: chosen.avg_cost * multiplier,
                    priority: required.priority,
                    performance_score: chosen.score,
                    status: NodeStatus::Pending,
                });
            }

            let start = cursor.max(window.start);
            let longest = nodes
                .iter()
                .map(|n| n.estimated_duration_hours)
                .fold(0.0, f64::max);
            let end = start + hours(longest);

            previous = nodes.iter().map(|n| n.id.clone()).collect();
            cursor = end;

            stages.push(Stage {
                index,
                name: stage_template.name.clone(),
                nodes,
                start,
                end,
            });
        }

        let plan_end = stages.last().map(|s| s.end).unwrap_or(window.start);
        if rigid && plan_end > window.end {
            return Err(MarshalError::TimelineConflict {
                required_days: days_between(window.start, plan_end),
                available_days,
            });
        }

        let total_cost: f64 = stages
            .iter()
            .flat_map(|s| s.nodes.iter())
            .map(|n| n.estimated_cost)
            .sum::<f64>()
            .max(0.0);

        if total_cost > goal.budget.total && !options.allow_budget_overrun {
            return Err(MarshalError::BudgetExceeded {
                estimated: total_cost,
                budget: goal.budget.total,
            });
        }

        let total_duration: f64 = stages.iter().map(|s| s.duration_hours()).sum();
        let brand_alignment = if brand.count() > 0 {
            brand.mean()
        } else {
            self.config.default_brand_score
        };

        let mut strategy = Strategy {
            id: uuid::Uuid::new_v4().to_string(),
            campaign_type: goal.campaign_type.clone(),
            objective: goal.objective.clone(),
            stages,
            total_estimated_cost: total_cost,
            total_estimated_duration_hours: total_duration,
            brand_alignment_score: clamp_score(brand_alignment),
            success_probability: 0.0,
            created_at: Utc::now(),
        };

        validate_strategy(&strategy)?;
        strategy.success_probability = self.success_probability(&strategy)?;

        info!(
            strategy_id = %strategy.id,
            campaign_type = %strategy.campaign_type,
            segment = %audience.segment,
            stages = strategy.stages.len(),
            nodes = strategy.node_count(),
            cost = strategy.total_estimated_cost,
            "Generated strategy"
        );

        Ok(strategy)
    }

    fn choose_agent(
        &self,
        goal: &CampaignGoal,
        stage: &StageTemplate,
        required: &RequiredCapability,
        options: &PlanningOptions,
        snapshot: &MetricsSnapshot,
    ) -> Result<CandidateScore> {
        let capability = required.capability.as_str();

        let mut agents = self.registry.implementations(capability);
        agents.sort();
        agents.dedup();
        if agents.is_empty() {
            if let Some(default_agent) = &required.default_agent {
                agents.push(default_agent.clone());
            }
        }

        let defaults = self.registry.describe_capability(capability).unwrap_or_default();
        let mut candidates: Vec<CandidateScore> = agents
            .iter()
            .map(|agent| {
                CandidateScore::from_snapshot(
                    agent,
                    snapshot,
                    defaults,
                    self.config.baseline_success_rate,
                )
            })
            .collect();

        if options.brand_compliance == BrandCompliance::Strict {
            let threshold = self.config.strict_brand_threshold;
            candidates.retain(|c| c.brand_score.map_or(true, |score| score >= threshold));
        }

        let insufficient = || MarshalError::InsufficientAgents {
            stage: stage.name.clone(),
            capability: capability.to_string(),
        };

        if candidates.is_empty() {
            return Err(insufficient());
        }

        let bonus = self.boosts.boost(&goal.campaign_type, capability)
            + options
                .learning
                .as_ref()
                .map_or(0.0, |profile| profile.adjustment(capability));
        score_candidates(&mut candidates, &self.config, bonus);

        let chosen = select_agent(&candidates).cloned().ok_or_else(insufficient)?;
        debug!(
            stage = %stage.name,
            capability,
            agent = %chosen.agent_id,
            score = chosen.score,
            candidates = candidates.len(),
            "Selected agent"
        );
        Ok(chosen)
    }

    /// Priority-weighted mean node score, discounted per dependency hop
    fn success_probability(&self, strategy: &Strategy) -> Result<f64> {
        let (weighted, weights) = strategy
            .nodes()
            .fold((0.0, 0.0), |(sum, total), node| {
                let w = node.priority.weight();
                (sum + node.performance_score * w, total + w)
            });

        if weights == 0.0 {
            return Ok(0.0);
        }

        let chain = longest_chain(&strategy.dependency_map())?;
        let discount = self.config.risk_discount_per_stage * chain.saturating_sub(1) as f64;
        Ok(clamp_score(weighted / weights - discount))
    }
}

fn hours(value: f64) -> Duration {
    Duration::minutes((value.max(0.0) * 60.0).round() as i64)
}

fn days_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_minutes() as f64 / (24.0 * 60.0)
}
