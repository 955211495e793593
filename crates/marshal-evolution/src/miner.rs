//! Pattern mining over completed campaigns

use chrono::{DateTime, Utc};
use marshal_core::config::MiningConfig;
use marshal_core::fail_open::fail_open_sync;
use marshal_core::storage::{Repository, SharedRepository};
use marshal_core::{LearningProfile, Result};
use marshal_metrics::{window_cutoff, RollingAverage};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::insights::{capabilities_seen, recommendations, MiningInsights};
use crate::patterns::{extract_pattern, merge, similarity, CampaignPattern};
use crate::source::CampaignSource;

/// Stored patterns below this score are never reused
pub const REUSABLE_SCORE_FLOOR: f64 = 60.0;

/// Upper bound on a learned per-capability adjustment
const MAX_LEARNED_ADJUSTMENT: f64 = 10.0;

/// Outcome of one mining cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MiningReport {
    pub campaigns_analyzed: usize,
    /// Patterns persisted this cycle
    pub patterns: Vec<CampaignPattern>,
    /// Campaigns whose extraction failed
    pub skipped: usize,
    /// Campaigns already covered by a stored pattern
    pub already_mined: usize,
    pub capabilities_seen: usize,
    pub insights: MiningInsights,
    pub recommendations: Vec<String>,
    pub insufficient_data: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// What `consolidate` changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub clusters: usize,
    /// Ids of patterns written as merged clusters
    pub merged: Vec<String>,
    /// Ids of superseded patterns that were deleted
    pub removed: Vec<String>,
}

/// Discovers and merges reusable campaign patterns
pub struct PatternMiner {
    source: Arc<dyn CampaignSource>,
    patterns: SharedRepository<CampaignPattern>,
    running: AtomicBool,
}

/// Clears the running flag when a cycle ends, however it ends
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PatternMiner {
    pub fn new(source: Arc<dyn CampaignSource>, patterns: SharedRepository<CampaignPattern>) -> Self {
        Self {
            source,
            patterns,
            running: AtomicBool::new(false),
        }
    }

    pub fn patterns(&self) -> &SharedRepository<CampaignPattern> {
        &self.patterns
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run a cycle unless one is already in progress
    ///
    /// Returns `Ok(None)` when the cycle was skipped.
    pub async fn try_mine(&self, config: &MiningConfig) -> Result<Option<MiningReport>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Mining cycle already running, skipping");
            return Ok(None);
        }
        let _guard = CycleGuard(&self.running);
        self.mine_patterns(config).await.map(Some)
    }

    /// One full mining cycle
    ///
    /// Too few campaigns is not an error: the report carries an
    /// "insufficient data" recommendation instead. A campaign that fails
    /// extraction is skipped; a failing source or pattern store aborts.
    #[instrument(skip_all, fields(days = config.days_to_analyze))]
    pub async fn mine_patterns(&self, config: &MiningConfig) -> Result<MiningReport> {
        let started_at = Utc::now();
        let cutoff = window_cutoff(started_at, config.days_to_analyze);
        let campaigns = self.source.completed_since(cutoff).await?;

        let mut report = MiningReport {
            campaigns_analyzed: campaigns.len(),
            started_at: Some(started_at),
            ..Default::default()
        };

        if campaigns.len() < config.min_campaigns {
            info!(
                found = campaigns.len(),
                required = config.min_campaigns,
                "Insufficient campaigns to mine"
            );
            report.insufficient_data = true;
            report.recommendations.push(format!(
                "Insufficient data: {} completed campaign(s) in the last {} days, need at least {}",
                campaigns.len(),
                config.days_to_analyze,
                config.min_campaigns
            ));
            report.finished_at = Some(Utc::now());
            return Ok(report);
        }

        let known: BTreeSet<String> = self
            .patterns
            .list()
            .await?
            .into_iter()
            .flat_map(|p| p.source_campaigns.into_iter())
            .collect();

        for campaign in campaigns.iter().filter(|c| c.score >= config.score_threshold) {
            if known.contains(&campaign.id) {
                report.already_mined += 1;
                continue;
            }

            let Some(pattern) = fail_open_sync("mining::extract_pattern", || extract_pattern(campaign))
            else {
                report.skipped += 1;
                continue;
            };

            if pattern.pattern_score >= config.score_threshold {
                debug!(campaign = %campaign.id, pattern = %pattern.id, "Extracted pattern");
                self.patterns.save(pattern.clone()).await?;
                report.patterns.push(pattern);
            }
        }

        report.capabilities_seen = capabilities_seen(&campaigns).len();
        report.insights = MiningInsights::analyze(&campaigns);
        report.recommendations = recommendations(&report.insights, report.patterns.len());
        report.finished_at = Some(Utc::now());

        info!(
            campaigns = report.campaigns_analyzed,
            patterns = report.patterns.len(),
            skipped = report.skipped,
            "Mining cycle finished"
        );
        Ok(report)
    }

    /// Stored patterns (score >= 60) clustered by similarity and merged
    ///
    /// Clusters are connected components of the "similarity >= min_similarity"
    /// graph, so a pattern without similar peers forms its own cluster.
    /// Sorted by merged score, best first.
    pub async fn find_reusable_sequences(&self, min_similarity: f64) -> Result<Vec<CampaignPattern>> {
        Ok(self
            .clusters(min_similarity)
            .await?
            .into_iter()
            .map(|(merged, _)| merged)
            .collect())
    }

    /// Persist merged clusters and delete the patterns they supersede
    #[instrument(skip(self))]
    pub async fn consolidate(&self, min_similarity: f64) -> Result<ConsolidationReport> {
        let mut report = ConsolidationReport::default();

        for (merged, members) in self.clusters(min_similarity).await? {
            report.clusters += 1;
            if members.len() < 2 {
                continue;
            }

            let merged_id = merged.id.clone();
            self.patterns.save(merged).await?;
            for id in members.into_iter().filter(|id| *id != merged_id) {
                if self.patterns.delete(&id).await? {
                    report.removed.push(id);
                }
            }
            report.merged.push(merged_id);
        }

        info!(
            clusters = report.clusters,
            merged = report.merged.len(),
            removed = report.removed.len(),
            "Consolidated patterns"
        );
        Ok(report)
    }

    /// Per-capability score adjustments from stored reusable patterns
    ///
    /// A capability gets the mean of `(score - 60) / 4` over the patterns
    /// whose sequences contain it, capped at 10 points.
    pub async fn learning_profile(&self) -> Result<LearningProfile> {
        let reusable: Vec<CampaignPattern> = self
            .patterns
            .list()
            .await?
            .into_iter()
            .filter(|p| p.pattern_score >= REUSABLE_SCORE_FLOOR)
            .collect();

        let mut per_capability: BTreeMap<String, RollingAverage> = BTreeMap::new();
        for pattern in &reusable {
            let lift = (pattern.pattern_score - REUSABLE_SCORE_FLOOR) / 4.0;
            for capability in pattern.capabilities() {
                per_capability
                    .entry(capability.to_string())
                    .or_default()
                    .push(lift);
            }
        }

        Ok(LearningProfile {
            adjustments: per_capability
                .into_iter()
                .map(|(capability, avg)| (capability, avg.mean().clamp(0.0, MAX_LEARNED_ADJUSTMENT)))
                .collect(),
            derived_from: reusable.len(),
        })
    }

    /// Merged pattern + member ids per cluster, best merged score first
    async fn clusters(&self, min_similarity: f64) -> Result<Vec<(CampaignPattern, Vec<String>)>> {
        let reusable: Vec<CampaignPattern> = self
            .patterns
            .list()
            .await?
            .into_iter()
            .filter(|p| p.pattern_score >= REUSABLE_SCORE_FLOOR)
            .collect();

        let mut sets = DisjointSet::new(reusable.len());
        for i in 0..reusable.len() {
            for j in (i + 1)..reusable.len() {
                if similarity(&reusable[i], &reusable[j]) >= min_similarity {
                    sets.union(i, j);
                }
            }
        }

        let mut groups: BTreeMap<usize, Vec<CampaignPattern>> = BTreeMap::new();
        for (index, pattern) in reusable.into_iter().enumerate() {
            groups.entry(sets.find(index)).or_default().push(pattern);
        }

        let mut clusters: Vec<(CampaignPattern, Vec<String>)> = groups
            .into_values()
            .filter_map(|members| {
                let ids: Vec<String> = members.iter().map(|p| p.id.clone()).collect();
                merge(&members).map(|merged| (merged, ids))
            })
            .collect();

        clusters.sort_by(|(a, _), (b, _)| {
            b.pattern_score
                .partial_cmp(&a.pattern_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(clusters)
    }
}

/// Union-find over pattern indices
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = x;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb.max(ra)] = ra.min(rb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{AgentStep, CompletedCampaign, InMemoryCampaignSource};
    use chrono::Duration;
    use marshal_core::storage::{InMemoryRepository, JsonDirRepository};
    use marshal_core::CampaignType;
    use tempfile::tempdir;

    fn campaign(id: &str, score: f64, sequence: &[&str]) -> CompletedCampaign {
        let start = Utc::now() - Duration::days(2);
        let mut c = CompletedCampaign::new(id, CampaignType::ProductLaunch, "smb", score)
            .with_variants("playful", "Meet the new thing", "buy_now")
            .with_timing_window("morning");
        for (i, capability) in sequence.iter().enumerate() {
            c = c.with_step(AgentStep::new(
                *capability,
                format!("{}-agent", capability),
                start + Duration::hours(i as i64),
                score,
            ));
        }
        c
    }

    fn miner_with(campaigns: Vec<CompletedCampaign>) -> PatternMiner {
        PatternMiner::new(
            Arc::new(InMemoryCampaignSource::with_campaigns(campaigns)),
            InMemoryRepository::shared(),
        )
    }

    #[tokio::test]
    async fn test_insufficient_data_is_not_an_error() {
        let miner = miner_with(vec![
            campaign("1", 90.0, &["trend"]),
            campaign("2", 90.0, &["trend"]),
            campaign("3", 90.0, &["trend"]),
        ]);

        let report = miner.mine_patterns(&MiningConfig::default()).await.unwrap();
        assert!(report.insufficient_data);
        assert!(report.patterns.is_empty());
        assert_eq!(report.recommendations.len(), 1);
        assert!(report.recommendations[0].starts_with("Insufficient data"));
        assert!(miner.patterns().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mining_extracts_high_scoring_campaigns() {
        let broken = campaign("broken", 95.0, &[]);

        let miner = miner_with(vec![
            campaign("a", 85.0, &["trend", "content", "social"]),
            campaign("b", 90.0, &["trend", "content", "social"]),
            campaign("c", 72.0, &["trend", "content", "email"]),
            campaign("d", 40.0, &["ads"]),
            broken,
        ]);

        let report = miner.mine_patterns(&MiningConfig::default()).await.unwrap();
        assert!(!report.insufficient_data);
        assert_eq!(report.campaigns_analyzed, 5);
        assert_eq!(report.patterns.len(), 3);
        assert_eq!(report.skipped, 1);
        assert!(!report.recommendations.is_empty());
        assert_eq!(miner.patterns().list().await.unwrap().len(), 3);

        // Second cycle does not duplicate
        let again = miner.mine_patterns(&MiningConfig::default()).await.unwrap();
        assert!(again.patterns.is_empty());
        assert_eq!(again.already_mined, 3);
    }

    #[tokio::test]
    async fn test_reusable_sequences_merge() {
        let miner = miner_with(vec![
            campaign("a", 85.0, &["trend", "content", "social"]),
            campaign("b", 90.0, &["trend", "content", "social"]),
            campaign("c", 70.0, &["trend", "content", "social"]),
            campaign("d", 70.0, &["trend", "content", "social"]),
            campaign("e", 70.0, &["trend", "content", "social"]),
        ]);
        let config = MiningConfig {
            score_threshold: 80.0,
            ..Default::default()
        };
        miner.mine_patterns(&config).await.unwrap();

        let reusable = miner.find_reusable_sequences(0.75).await.unwrap();
        assert_eq!(reusable.len(), 1);
        let merged = &reusable[0];
        assert_eq!(merged.pattern_score, 87.5);
        assert_eq!(merged.variants.agent_sequences.len(), 1);
        assert_eq!(
            merged.variants.agent_sequences.iter().next().unwrap(),
            &vec!["trend", "content", "social"]
        );
    }

    #[tokio::test]
    async fn test_dissimilar_patterns_stay_apart() {
        let repo: SharedRepository<CampaignPattern> = InMemoryRepository::shared();
        let mut a = extract_pattern(&campaign("a", 80.0, &["trend"])).unwrap();
        let mut b = extract_pattern(&campaign("b", 90.0, &["ads"])).unwrap();
        b.variants.content_styles = BTreeSet::from(["serious".to_string()]);
        b.variants.subjects = BTreeSet::from(["Last chance".to_string()]);
        let low = extract_pattern(&campaign("low", 50.0, &["trend"])).unwrap();
        a.id = "a".into();
        b.id = "b".into();
        for p in [a, b, low] {
            repo.save(p).await.unwrap();
        }

        let miner = PatternMiner::new(Arc::new(InMemoryCampaignSource::new()), repo);
        let reusable = miner.find_reusable_sequences(0.75).await.unwrap();
        let scores: Vec<_> = reusable.iter().map(|p| p.pattern_score).collect();
        assert_eq!(scores, vec![90.0, 80.0]);
    }

    #[tokio::test]
    async fn test_consolidate_prunes_superseded() {
        let dir = tempdir().unwrap();
        let repo: SharedRepository<CampaignPattern> =
            Arc::new(JsonDirRepository::<CampaignPattern>::under(dir.path()));
        let miner = PatternMiner::new(
            Arc::new(InMemoryCampaignSource::with_campaigns(vec![
                campaign("a", 85.0, &["trend", "content", "social"]),
                campaign("b", 90.0, &["trend", "content", "social"]),
                campaign("c", 20.0, &["trend"]),
                campaign("d", 20.0, &["trend"]),
                campaign("e", 20.0, &["trend"]),
            ])),
            repo.clone(),
        );
        miner.mine_patterns(&MiningConfig::default()).await.unwrap();
        assert_eq!(repo.list().await.unwrap().len(), 2);

        let report = miner.consolidate(0.75).await.unwrap();
        assert_eq!(report.clusters, 1);
        assert_eq!(report.merged.len(), 1);
        assert_eq!(report.removed.len(), 1);

        let remaining = repo.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].pattern_score, 87.5);
        assert_eq!(remaining[0].source_campaigns.len(), 2);

        // Nothing left to merge
        let again = miner.consolidate(0.75).await.unwrap();
        assert!(again.removed.is_empty());
    }

    #[tokio::test]
    async fn test_learning_profile() {
        let repo: SharedRepository<CampaignPattern> = InMemoryRepository::shared();
        repo.save(extract_pattern(&campaign("a", 100.0, &["trend", "content"])).unwrap())
            .await
            .unwrap();
        repo.save(extract_pattern(&campaign("b", 80.0, &["content"])).unwrap())
            .await
            .unwrap();
        repo.save(extract_pattern(&campaign("c", 40.0, &["ads"])).unwrap())
            .await
            .unwrap();

        let miner = PatternMiner::new(Arc::new(InMemoryCampaignSource::new()), repo);
        let profile = miner.learning_profile().await.unwrap();

        assert_eq!(profile.derived_from, 2);
        assert_eq!(profile.adjustment("trend"), 10.0);
        // (10 + 5) / 2
        assert_eq!(profile.adjustment("content"), 7.5);
        assert_eq!(profile.adjustment("ads"), 0.0);
    }

    #[tokio::test]
    async fn test_try_mine_skips_while_running() {
        let miner = miner_with(Vec::new());
        miner.running.store(true, Ordering::Release);
        assert!(miner.try_mine(&MiningConfig::default()).await.unwrap().is_none());

        miner.running.store(false, Ordering::Release);
        let report = miner.try_mine(&MiningConfig::default()).await.unwrap();
        assert!(report.unwrap().insufficient_data);
        assert!(!miner.is_running());
    }

    #[test]
    fn test_disjoint_set() {
        let mut sets = DisjointSet::new(4);
        sets.union(0, 2);
        sets.union(2, 3);
        assert_eq!(sets.find(3), sets.find(0));
        assert_ne!(sets.find(1), sets.find(0));
    }
}
