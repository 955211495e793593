//! # marshal-evolution
//!
//! Learning from completed Marshal campaigns.
//!
//! This crate provides:
//! - Pattern extraction from high-scoring campaigns
//! - Similarity clustering and merging of stored patterns
//! - Collaboration, timing and segment insights
//! - A scheduled, single-flight mining task
//! - Learning profiles fed back into the planner

mod insights;
mod miner;
mod patterns;
mod schedule;
mod source;

pub use insights::{
    collaboration_pairs, recommendations, segment_scores, timing_buckets, CollaborationInsight,
    MiningInsights, TimingInsight,
};
pub use miner::{ConsolidationReport, MiningReport, PatternMiner, REUSABLE_SCORE_FLOOR};
pub use patterns::{extract_pattern, merge, similarity, CampaignPattern, VariantSet};
pub use schedule::{MiningScheduler, SchedulerHandle};
pub use source::{AgentStep, CampaignSource, CompletedCampaign, InMemoryCampaignSource};
