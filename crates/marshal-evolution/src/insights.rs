//! Cross-campaign insights: collaboration, timing and segments

use chrono::Timelike;
use marshal_metrics::RollingAverage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::source::CompletedCampaign;

/// Collaborations reported at most
const TOP_PAIRS: usize = 5;

/// Pairs seen in fewer campaigns than this are noise
const MIN_PAIR_FREQUENCY: usize = 3;

/// Two capabilities that ran in the same campaigns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationInsight {
    pub first: String,
    pub second: String,
    /// Number of campaigns both appeared in
    pub frequency: usize,
    pub avg_performance: f64,
}

/// Average step performance for executions starting in one UTC hour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingInsight {
    pub hour: u32,
    pub executions: usize,
    pub avg_performance: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MiningInsights {
    pub collaborations: Vec<CollaborationInsight>,
    pub timing: Vec<TimingInsight>,
    /// Segment -> average campaign score
    pub segments: BTreeMap<String, f64>,
}

impl MiningInsights {
    pub fn analyze(campaigns: &[CompletedCampaign]) -> Self {
        Self {
            collaborations: collaboration_pairs(campaigns),
            timing: timing_buckets(campaigns),
            segments: segment_scores(campaigns),
        }
    }

    pub fn best_hour(&self) -> Option<&TimingInsight> {
        self.timing.iter().max_by(|a, b| {
            a.avg_performance
                .partial_cmp(&b.avg_performance)
                .unwrap_or(std::cmp::Ordering::Equal)
                // Earlier hour wins a tie
                .then_with(|| b.hour.cmp(&a.hour))
        })
    }

    pub fn best_segment(&self) -> Option<(&str, f64)> {
        self.segments
            .iter()
            .map(|(segment, score)| (segment.as_str(), *score))
            .fold(None, |best, current| match best {
                Some((_, score)) if score >= current.1 => best,
                _ => Some(current),
            })
    }
}

/// Top capability pairs by co-occurrence
///
/// Each campaign counts a pair once; its performance is the mean of the two
/// capabilities' step performances in that campaign.
pub fn collaboration_pairs(campaigns: &[CompletedCampaign]) -> Vec<CollaborationInsight> {
    let mut pairs: BTreeMap<(String, String), RollingAverage> = BTreeMap::new();

    for campaign in campaigns {
        let mut per_capability: BTreeMap<&str, RollingAverage> = BTreeMap::new();
        for step in &campaign.steps {
            per_capability
                .entry(step.capability.as_str())
                .or_default()
                .push(step.performance);
        }

        let capabilities: Vec<_> = per_capability.iter().collect();
        for (i, (first, first_perf)) in capabilities.iter().enumerate() {
            for (second, second_perf) in &capabilities[i + 1..] {
                let performance = (first_perf.mean() + second_perf.mean()) / 2.0;
                pairs
                    .entry((first.to_string(), second.to_string()))
                    .or_default()
                    .push(performance);
            }
        }
    }

    let mut insights: Vec<CollaborationInsight> = pairs
        .into_iter()
        .filter(|(_, avg)| avg.count() >= MIN_PAIR_FREQUENCY)
        .map(|((first, second), avg)| CollaborationInsight {
            first,
            second,
            frequency: avg.count(),
            avg_performance: avg.mean(),
        })
        .collect();

    insights.sort_by(|a, b| {
        b.frequency
            .cmp(&a.frequency)
            .then_with(|| {
                b.avg_performance
                    .partial_cmp(&a.avg_performance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| (&a.first, &a.second).cmp(&(&b.first, &b.second)))
    });
    insights.truncate(TOP_PAIRS);
    insights
}

/// Step performance bucketed by start hour, ordered by hour
pub fn timing_buckets(campaigns: &[CompletedCampaign]) -> Vec<TimingInsight> {
    let mut buckets: BTreeMap<u32, RollingAverage> = BTreeMap::new();
    for step in campaigns.iter().flat_map(|c| c.steps.iter()) {
        buckets
            .entry(step.started_at.hour())
            .or_default()
            .push(step.performance);
    }

    buckets
        .into_iter()
        .map(|(hour, avg)| TimingInsight {
            hour,
            executions: avg.count(),
            avg_performance: avg.mean(),
        })
        .collect()
}

pub fn segment_scores(campaigns: &[CompletedCampaign]) -> BTreeMap<String, f64> {
    let mut segments: BTreeMap<String, RollingAverage> = BTreeMap::new();
    for campaign in campaigns {
        segments
            .entry(campaign.segment.clone())
            .or_default()
            .push(campaign.score);
    }
    segments
        .into_iter()
        .map(|(segment, avg)| (segment, avg.mean()))
        .collect()
}

/// One recommendation per insight category, from its top entry
pub fn recommendations(insights: &MiningInsights, patterns_found: usize) -> Vec<String> {
    let mut out = Vec::new();

    if patterns_found > 0 {
        out.push(format!(
            "Reuse the {} newly mined pattern(s) when planning similar campaigns",
            patterns_found
        ));
    }

    if let Some(pair) = insights.collaborations.first() {
        out.push(format!(
            "Pair '{}' with '{}': together in {} campaigns, averaging {:.1}",
            pair.first, pair.second, pair.frequency, pair.avg_performance
        ));
    }

    if let Some(slot) = insights.best_hour() {
        out.push(format!(
            "Schedule executions around {:02}:00 UTC (average performance {:.1} over {} runs)",
            slot.hour, slot.avg_performance, slot.executions
        ));
    }

    if let Some((segment, score)) = insights.best_segment() {
        out.push(format!(
            "Segment '{}' responds best (average campaign score {:.1})",
            segment, score
        ));
    }

    out
}

/// Distinct capabilities across campaigns (for reporting)
pub(crate) fn capabilities_seen(campaigns: &[CompletedCampaign]) -> BTreeSet<&str> {
    campaigns
        .iter()
        .flat_map(|c| c.steps.iter().map(|s| s.capability.as_str()))
        .collect()
}
