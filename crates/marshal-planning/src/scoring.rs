//! Campaign scoring and agent selection

use marshal_core::config::PlannerConfig;
use marshal_core::{clamp_score, AgentId, MetricsSnapshot};
use std::cmp::Ordering;

use crate::registry::CapabilityDefaults;

/// One candidate agent for a capability, with its campaign score
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateScore {
    pub agent_id: AgentId,
    pub success_rate: f64,
    pub avg_cost: f64,
    pub avg_duration_hours: f64,
    pub brand_score: Option<f64>,
    /// False when the numbers above come from registry defaults
    pub has_history: bool,
    /// 0-100
    pub score: f64,
}

impl CandidateScore {
    /// Candidate numbers from the snapshot, or defaults when the agent has no history
    pub fn from_snapshot(
        agent_id: &str,
        snapshot: &MetricsSnapshot,
        defaults: CapabilityDefaults,
        baseline_success_rate: f64,
    ) -> Self {
        let record = snapshot.get(agent_id);
        if record.has_history() {
            Self {
                agent_id: agent_id.to_string(),
                success_rate: record.success_rate,
                avg_cost: record.avg_cost,
                avg_duration_hours: record.avg_duration_hours,
                brand_score: record.avg_brand_score,
                has_history: true,
                score: 0.0,
            }
        } else {
            Self {
                agent_id: agent_id.to_string(),
                success_rate: baseline_success_rate.clamp(0.0, 1.0),
                avg_cost: defaults.avg_cost.max(0.0),
                avg_duration_hours: defaults.avg_duration_hours.max(0.0),
                brand_score: None,
                has_history: false,
                score: 0.0,
            }
        }
    }
}

/// Fill in `score` for every candidate of one capability
///
/// `score = (success_rate * w_s + cost_efficiency * w_c) * 100 + bonus`,
/// where cost efficiency is the cheapest candidate's cost over this one's
/// and the weights are normalized to sum to one. `bonus` carries the
/// campaign-type boost and any learned adjustment.
pub fn score_candidates(candidates: &mut [CandidateScore], config: &PlannerConfig, bonus: f64) {
    let min_cost = candidates
        .iter()
        .map(|c| c.avg_cost)
        .filter(|cost| *cost > 0.0)
        .fold(f64::INFINITY, f64::min);

    let weight_sum = config.success_weight + config.cost_weight;
    let (success_weight, cost_weight) = if weight_sum > 0.0 {
        (config.success_weight / weight_sum, config.cost_weight / weight_sum)
    } else {
        (0.5, 0.5)
    };

    for candidate in candidates.iter_mut() {
        let efficiency = if candidate.avg_cost <= 0.0 || !min_cost.is_finite() {
            1.0
        } else {
            min_cost / candidate.avg_cost
        };
        let blended = candidate.success_rate * success_weight + efficiency * cost_weight;
        candidate.score = clamp_score(blended * 100.0 + bonus);
    }
}

/// Highest score wins; ties go to the cheaper agent, then the lower id
pub fn select_agent(candidates: &[CandidateScore]) -> Option<&CandidateScore> {
    candidates.iter().min_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.avg_cost.partial_cmp(&b.avg_cost).unwrap_or(Ordering::Equal))
            .then_with(|| a.agent_id.cmp(&b.agent_id))
    })
}
