//! Campaign patterns: extraction, similarity and merging

use chrono::{DateTime, Timelike, Utc};
use marshal_core::storage::Entity;
use marshal_core::{clamp_score, CampaignType, MarshalError, Result};
use marshal_metrics::RollingAverage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::source::CompletedCampaign;

/// Winning variants observed across the source campaigns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSet {
    #[serde(default)]
    pub content_styles: BTreeSet<String>,
    #[serde(default)]
    pub subjects: BTreeSet<String>,
    #[serde(default)]
    pub cta_types: BTreeSet<String>,
    #[serde(default)]
    pub timing_windows: BTreeSet<String>,
    /// Capability sequences ordered by execution start
    #[serde(default)]
    pub agent_sequences: BTreeSet<Vec<String>>,
}

impl VariantSet {
    /// Set-union with another variant set
    pub fn union(&mut self, other: &VariantSet) {
        self.content_styles.extend(other.content_styles.iter().cloned());
        self.subjects.extend(other.subjects.iter().cloned());
        self.cta_types.extend(other.cta_types.iter().cloned());
        self.timing_windows.extend(other.timing_windows.iter().cloned());
        self.agent_sequences.extend(other.agent_sequences.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.content_styles.is_empty()
            && self.subjects.is_empty()
            && self.cta_types.is_empty()
            && self.timing_windows.is_empty()
            && self.agent_sequences.is_empty()
    }
}

/// A reusable successful campaign configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignPattern {
    pub id: String,
    pub summary: String,
    pub campaign_type: CampaignType,
    pub segment: String,
    pub variants: VariantSet,
    /// 0-100
    pub pattern_score: f64,
    /// Segment -> average campaign score
    #[serde(default)]
    pub segment_correlations: BTreeMap<String, f64>,
    pub source_campaigns: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for CampaignPattern {
    const KIND: &'static str = "pattern";

    fn entity_id(&self) -> &str {
        &self.id
    }
}

impl CampaignPattern {
    /// Capabilities appearing in any agent sequence
    pub fn capabilities(&self) -> BTreeSet<&str> {
        self.variants
            .agent_sequences
            .iter()
            .flat_map(|seq| seq.iter().map(|c| c.as_str()))
            .collect()
    }

    fn describe(&self) -> String {
        let sequences: Vec<String> = self
            .variants
            .agent_sequences
            .iter()
            .map(|seq| seq.join(" -> "))
            .collect();
        format!(
            "{} for {}: {} ({} campaigns)",
            self.campaign_type,
            self.segment,
            sequences.join(" | "),
            self.source_campaigns.len()
        )
    }
}

/// Extract a pattern from one completed campaign
pub fn extract_pattern(campaign: &CompletedCampaign) -> Result<CampaignPattern> {
    if !campaign.score.is_finite() || !(0.0..=100.0).contains(&campaign.score) {
        return Err(MarshalError::Pattern(format!(
            "campaign '{}' has score {} outside 0-100",
            campaign.id, campaign.score
        )));
    }
    if campaign.steps.is_empty() {
        return Err(MarshalError::Pattern(format!(
            "campaign '{}' has no executed steps",
            campaign.id
        )));
    }

    let mut steps: Vec<_> = campaign.steps.iter().collect();
    steps.sort_by(|a, b| {
        a.started_at
            .cmp(&b.started_at)
            .then_with(|| a.capability.cmp(&b.capability))
    });
    let sequence: Vec<String> = steps.iter().map(|s| s.capability.clone()).collect();

    let timing_window = campaign
        .timing_window
        .clone()
        .unwrap_or_else(|| day_part(steps[0].started_at.hour()).to_string());

    let mut variants = VariantSet::default();
    variants.content_styles.extend(campaign.content_style.clone());
    variants.subjects.extend(campaign.subject.clone());
    variants.cta_types.extend(campaign.cta_type.clone());
    variants.timing_windows.insert(timing_window);
    variants.agent_sequences.insert(sequence);

    let now = Utc::now();
    let mut pattern = CampaignPattern {
        id: uuid::Uuid::new_v4().to_string(),
        summary: String::new(),
        campaign_type: campaign.campaign_type.clone(),
        segment: campaign.segment.clone(),
        variants,
        pattern_score: campaign.score,
        segment_correlations: BTreeMap::from([(campaign.segment.clone(), campaign.score)]),
        source_campaigns: BTreeSet::from([campaign.id.clone()]),
        created_at: now,
        updated_at: now,
    };
    pattern.summary = pattern.describe();
    Ok(pattern)
}

/// Name of the part of day an hour (UTC) falls in
pub(crate) fn day_part(hour: u32) -> &'static str {
    match hour {
        0..=5 => "night",
        6..=11 => "morning",
        12..=17 => "afternoon",
        _ => "evening",
    }
}

fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> Option<f64> {
    if a.is_empty() && b.is_empty() {
        return None;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    Some(intersection / union)
}

/// Mean set overlap over the variant fields either pattern fills
///
/// Reflexive and symmetric; two patterns with no variants at all are identical.
pub fn similarity(a: &CampaignPattern, b: &CampaignPattern) -> f64 {
    let (x, y) = (&a.variants, &b.variants);
    let overlaps = [
        jaccard(&x.content_styles, &y.content_styles),
        jaccard(&x.subjects, &y.subjects),
        jaccard(&x.cta_types, &y.cta_types),
        jaccard(&x.timing_windows, &y.timing_windows),
        jaccard(&x.agent_sequences, &y.agent_sequences),
    ];

    let mut avg = RollingAverage::default();
    for overlap in overlaps.into_iter().flatten() {
        avg.push(overlap);
    }

    if avg.count() == 0 {
        1.0
    } else {
        avg.mean()
    }
}

/// Merge patterns into one: set-union of variants, arithmetic-mean score
///
/// The result keeps the id of the best-scoring member (ties by id), so
/// merging identical patterns gives the same pattern back.
pub fn merge(patterns: &[CampaignPattern]) -> Option<CampaignPattern> {
    let mut members: Vec<&CampaignPattern> = patterns.iter().collect();
    members.sort_by(|a, b| {
        b.pattern_score
            .partial_cmp(&a.pattern_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    let first = members.first()?;
    let mut merged = (*first).clone();
    let mut score = RollingAverage::default();
    let mut correlations: BTreeMap<String, RollingAverage> = BTreeMap::new();

    for member in &members {
        merged.variants.union(&member.variants);
        merged
            .source_campaigns
            .extend(member.source_campaigns.iter().cloned());
        merged.created_at = merged.created_at.min(member.created_at);
        merged.updated_at = merged.updated_at.max(member.updated_at);
        score.push(member.pattern_score);
        for (segment, value) in &member.segment_correlations {
            correlations.entry(segment.clone()).or_default().push(*value);
        }
    }

    merged.pattern_score = clamp_score(score.mean());
    merged.segment_correlations = correlations
        .into_iter()
        .map(|(segment, avg)| (segment, avg.mean()))
        .collect();
    merged.summary = merged.describe();
    Some(merged)
}
