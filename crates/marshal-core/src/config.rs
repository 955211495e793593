//! Configuration management for Marshal
//!
//! This module provides configuration structures for planner tuning, pattern
//! mining thresholds and the mining schedule.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{MarshalError, Result};

/// Repository-level Marshal configuration
///
/// Loaded from `.marshal/config.toml` in the project root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarshalConfig {
    /// Strategy planner tuning
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Pattern mining thresholds
    #[serde(default)]
    pub mining: MiningConfig,

    /// Background mining schedule
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Strategy planner tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Trailing window for agent metrics
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// Success rate assumed for agents without history (0.0 - 1.0)
    #[serde(default = "default_baseline_success_rate")]
    pub baseline_success_rate: f64,

    /// Weight of success rate in the campaign score
    #[serde(default = "default_success_weight")]
    pub success_weight: f64,

    /// Weight of cost efficiency in the campaign score
    #[serde(default = "default_cost_weight")]
    pub cost_weight: f64,

    /// Points removed from success probability per dependency hop
    #[serde(default = "default_risk_discount_per_stage")]
    pub risk_discount_per_stage: f64,

    /// Minimum brand score an agent needs under strict compliance
    #[serde(default = "default_strict_brand_threshold")]
    pub strict_brand_threshold: f64,

    /// Brand alignment assumed when no selected agent has brand history
    #[serde(default = "default_brand_score")]
    pub default_brand_score: f64,
}

/// Pattern mining thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningConfig {
    /// Fewer completed campaigns than this yields an "insufficient data" result
    #[serde(default = "default_min_campaigns")]
    pub min_campaigns: usize,

    /// Campaigns (and patterns) must score at least this to be kept
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,

    /// Similarity above which stored patterns are clustered
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// How far back to look for completed campaigns
    #[serde(default = "default_days_to_analyze")]
    pub days_to_analyze: u32,
}

/// Background mining schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Hours between scheduled mining cycles
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Run one cycle immediately on startup
    #[serde(default)]
    pub run_on_start: bool,
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours.max(1) * 3600)
    }
}

// Default value providers
fn default_window_days() -> u32 {
    90
}

fn default_baseline_success_rate() -> f64 {
    0.5
}

fn default_success_weight() -> f64 {
    0.7
}

fn default_cost_weight() -> f64 {
    0.3
}

fn default_risk_discount_per_stage() -> f64 {
    2.5
}

fn default_strict_brand_threshold() -> f64 {
    70.0
}

fn default_brand_score() -> f64 {
    75.0
}

fn default_min_campaigns() -> usize {
    5
}

fn default_score_threshold() -> f64 {
    70.0
}

fn default_similarity_threshold() -> f64 {
    0.75
}

fn default_days_to_analyze() -> u32 {
    30
}

fn default_interval_hours() -> u64 {
    6
}

impl MarshalConfig {
    /// Load configuration from `.marshal/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(".marshal/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| MarshalError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Write default configuration to `.marshal/config.toml`
    pub fn write_default(root: &Path) -> Result<()> {
        let config_dir = root.join(".marshal");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| MarshalError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            baseline_success_rate: default_baseline_success_rate(),
            success_weight: default_success_weight(),
            cost_weight: default_cost_weight(),
            risk_discount_per_stage: default_risk_discount_per_stage(),
            strict_brand_threshold: default_strict_brand_threshold(),
            default_brand_score: default_brand_score(),
        }
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            min_campaigns: default_min_campaigns(),
            score_threshold: default_score_threshold(),
            similarity_threshold: default_similarity_threshold(),
            days_to_analyze: default_days_to_analyze(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            run_on_start: false,
        }
    }
}
