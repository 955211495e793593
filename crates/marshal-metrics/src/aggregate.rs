//! Trailing-window aggregation

use chrono::{DateTime, Duration, Utc};
use marshal_core::{AgentPerformanceRecord, OutcomeRecord};
use serde::{Deserialize, Serialize};

/// Oldest timestamp still inside a window ending at `now`
pub fn window_cutoff(now: DateTime<Utc>, window_days: u32) -> DateTime<Utc> {
    now - Duration::days(window_days as i64)
}

/// Fold outcomes of one agent into a performance record
///
/// The caller filters by agent and window; zero outcomes yields the
/// zero-count default.
pub fn aggregate<'a, I>(agent_id: &str, window_days: u32, outcomes: I) -> AgentPerformanceRecord
where
    I: IntoIterator<Item = &'a OutcomeRecord>,
{
    let mut record = AgentPerformanceRecord::empty(agent_id, window_days);
    let mut successes = 0usize;
    let mut cost = RollingAverage::default();
    let mut duration = RollingAverage::default();
    let mut brand = RollingAverage::default();
    let mut latest: Option<DateTime<Utc>> = None;

    for outcome in outcomes {
        record.sample_count += 1;
        if outcome.success {
            successes += 1;
        }
        cost.push(outcome.cost.max(0.0));
        duration.push(outcome.duration_hours.max(0.0));
        if let Some(score) = outcome.brand_score {
            brand.push(score);
        }
        if latest.map_or(true, |t| outcome.timestamp >= t) {
            latest = Some(outcome.timestamp);
            record.capability = outcome.capability.clone();
        }
    }

    if record.sample_count > 0 {
        record.success_rate = successes as f64 / record.sample_count as f64;
        record.avg_cost = cost.mean();
        record.avg_duration_hours = duration.mean();
        record.avg_brand_score = (brand.count() > 0).then(|| brand.mean());
    }

    record
}

/// Incremental arithmetic mean
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RollingAverage {
    count: usize,
    mean: f64,
}

impl RollingAverage {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_average() {
        let mut avg = RollingAverage::default();
        for v in [80.0, 60.0, 100.0] {
            avg.push(v);
        }
        assert_eq!(avg.count(), 3);
        assert!((avg.mean() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_outcomes() {
        let now = Utc::now();
        let outcomes = vec![
            OutcomeRecord::new("writer-1", "content", true, 100.0, 4.0)
                .with_brand_score(90.0)
                .at(now - Duration::days(2)),
            OutcomeRecord::new("writer-1", "content", false, 300.0, 8.0).at(now - Duration::days(1)),
        ];

        let record = aggregate("writer-1", 90, &outcomes);
        assert_eq!(record.sample_count, 2);
        assert_eq!(record.success_rate, 0.5);
        assert_eq!(record.avg_cost, 200.0);
        assert_eq!(record.avg_duration_hours, 6.0);
        assert_eq!(record.avg_brand_score, Some(90.0));
        assert_eq!(record.capability, "content");
    }

    #[test]
    fn test_aggregate_empty_is_zero_count() {
        let record = aggregate("nobody", 30, std::iter::empty());
        assert_eq!(record.sample_count, 0);
        assert_eq!(record.avg_brand_score, None);
        assert!(!record.has_history());
    }
}
