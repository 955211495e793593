//! Background mining task

use marshal_core::config::{MiningConfig, ScheduleConfig};
use marshal_core::fail_open::fail_open;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::miner::{MiningReport, PatternMiner};

/// Drives mining cycles on a fixed interval and on demand
pub struct MiningScheduler;

/// Handle to a spawned mining task
pub struct SchedulerHandle {
    miner: Arc<PatternMiner>,
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: watch::Sender<bool>,
    cycles: Arc<AtomicU64>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Request an immediate cycle
    ///
    /// Returns false when a cycle is running or a request is already queued;
    /// the request is then dropped rather than queued behind it.
    pub fn trigger(&self) -> bool {
        if self.miner.is_running() {
            debug!("Mining cycle in progress, trigger skipped");
            return false;
        }
        self.trigger_tx.try_send(()).is_ok()
    }

    /// Cycles that ran to completion (successful or not) so far
    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }

    /// Stop the task and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            debug!("Mining task ended abnormally: {}", e);
        }
    }
}

impl MiningScheduler {
    /// Spawn the mining loop on the current tokio runtime
    pub fn spawn(miner: Arc<PatternMiner>, mining: MiningConfig, schedule: ScheduleConfig) -> SchedulerHandle {
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(1);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let cycles = Arc::new(AtomicU64::new(0));
        let counter = cycles.clone();
        let handle_miner = miner.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(schedule.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            // The first tick completes immediately
            if !schedule.run_on_start {
                ticker.tick().await;
            }

            info!(interval_hours = schedule.interval_hours, "Mining scheduler started");

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    _ = ticker.tick() => {
                        debug!("Scheduled mining cycle");
                    }
                    Some(()) = trigger_rx.recv() => {
                        debug!("Triggered mining cycle");
                    }
                }

                Self::run_cycle(&miner, &mining).await;
                counter.fetch_add(1, Ordering::AcqRel);

                // Requests and ticks that arrived mid-cycle are skipped, not run next
                let mut skipped = 0;
                while trigger_rx.try_recv().is_ok() {
                    skipped += 1;
                }
                if skipped > 0 {
                    debug!(skipped, "Dropped triggers received during cycle");
                }
                ticker.reset();
            }

            info!("Mining scheduler stopped");
        });

        SchedulerHandle {
            miner: handle_miner,
            trigger_tx,
            shutdown_tx,
            cycles,
            join,
        }
    }

    /// Run one cycle now, failing open
    ///
    /// Returns `None` when the cycle failed or another cycle was in progress.
    pub async fn run_cycle(miner: &PatternMiner, mining: &MiningConfig) -> Option<MiningReport> {
        fail_open("mining::cycle", || miner.try_mine(mining))
            .await
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{AgentStep, CampaignSource, CompletedCampaign, InMemoryCampaignSource};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use marshal_core::storage::{InMemoryRepository, Repository};
    use marshal_core::{CampaignType, MarshalError, Result};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct BrokenSource;

    #[async_trait]
    impl CampaignSource for BrokenSource {
        async fn completed_since(&self, _cutoff: DateTime<Utc>) -> Result<Vec<CompletedCampaign>> {
            Err(MarshalError::StoreUnavailable("campaign db offline".into()))
        }
    }

    /// Source that takes a while to answer and counts its calls
    #[derive(Default)]
    struct SlowSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CampaignSource for SlowSource {
        async fn completed_since(&self, _cutoff: DateTime<Utc>) -> Result<Vec<CompletedCampaign>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(Vec::new())
        }
    }

    fn sample_source() -> Arc<InMemoryCampaignSource> {
        let campaigns = (0..5)
            .map(|i| {
                CompletedCampaign::new(format!("c{}", i), CampaignType::ProductLaunch, "smb", 85.0)
                    .with_step(AgentStep::new("trend", "trend-scout", Utc::now(), 85.0))
            })
            .collect();
        Arc::new(InMemoryCampaignSource::with_campaigns(campaigns))
    }

    #[tokio::test]
    async fn test_run_cycle_synchronously() {
        let miner = PatternMiner::new(sample_source(), InMemoryRepository::shared());
        let report = MiningScheduler::run_cycle(&miner, &MiningConfig::default())
            .await
            .unwrap();
        assert_eq!(report.patterns.len(), 5);
    }

    #[tokio::test]
    async fn test_failed_cycle_is_fail_open() {
        let miner = PatternMiner::new(Arc::new(BrokenSource), InMemoryRepository::shared());
        assert!(MiningScheduler::run_cycle(&miner, &MiningConfig::default())
            .await
            .is_none());
        assert!(!miner.is_running());
    }

    #[tokio::test]
    async fn test_trigger_and_shutdown() {
        let miner = Arc::new(PatternMiner::new(sample_source(), InMemoryRepository::shared()));
        let handle = MiningScheduler::spawn(
            miner.clone(),
            MiningConfig::default(),
            ScheduleConfig {
                interval_hours: 24,
                run_on_start: false,
            },
        );

        assert!(handle.trigger());
        for _ in 0..100 {
            if handle.cycles_completed() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handle.cycles_completed(), 1);
        assert_eq!(miner.patterns().list().await.unwrap().len(), 5);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_on_start() {
        let miner = Arc::new(PatternMiner::new(sample_source(), InMemoryRepository::shared()));
        let handle = MiningScheduler::spawn(
            miner.clone(),
            MiningConfig::default(),
            ScheduleConfig {
                interval_hours: 24,
                run_on_start: true,
            },
        );

        for _ in 0..100 {
            if handle.cycles_completed() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handle.cycles_completed() >= 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_trigger_during_cycle_is_skipped() {
        let source = Arc::new(SlowSource::default());
        let miner = Arc::new(PatternMiner::new(source.clone(), InMemoryRepository::shared()));
        let handle = MiningScheduler::spawn(
            miner.clone(),
            MiningConfig::default(),
            ScheduleConfig {
                interval_hours: 24,
                run_on_start: false,
            },
        );

        assert!(handle.trigger());
        for _ in 0..100 {
            if source.calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(miner.is_running());
        assert!(!handle.trigger());

        for _ in 0..100 {
            if handle.cycles_completed() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(handle.cycles_completed(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        // Idle again: the next request runs
        assert!(handle.trigger());
        handle.shutdown().await;
    }
}
