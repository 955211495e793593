//! Core type definitions for campaign planning

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Capability identifier (e.g. "trend", "content", "social")
pub type CapabilityId = String;

/// Agent identifier
pub type AgentId = String;

/// Priority levels for goals and action nodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
}

impl Priority {
    /// Weight used when averaging node scores
    pub fn weight(&self) -> f64 {
        match self {
            Self::Critical => 4.0,
            Self::High => 3.0,
            Self::Medium => 2.0,
            Self::Low => 1.0,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" | "0" => Ok(Self::Critical),
            "high" | "1" => Ok(Self::High),
            "medium" | "2" => Ok(Self::Medium),
            "low" | "3" => Ok(Self::Low),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// Kind of campaign being planned
///
/// Unknown types parse into `Custom` so that the planner, not the parser,
/// decides whether a template exists.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CampaignType {
    ProductLaunch,
    BrandAwareness,
    LeadGeneration,
    Retention,
    Custom(String),
}

impl std::fmt::Display for CampaignType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProductLaunch => write!(f, "product_launch"),
            Self::BrandAwareness => write!(f, "brand_awareness"),
            Self::LeadGeneration => write!(f, "lead_generation"),
            Self::Retention => write!(f, "retention"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

impl std::str::FromStr for CampaignType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().replace('-', "_").as_str() {
            "product_launch" => Self::ProductLaunch,
            "brand_awareness" => Self::BrandAwareness,
            "lead_generation" => Self::LeadGeneration,
            "retention" => Self::Retention,
            other => Self::Custom(other.to_string()),
        })
    }
}

impl From<String> for CampaignType {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(t) => t,
            Err(never) => match never {},
        }
    }
}

impl From<CampaignType> for String {
    fn from(value: CampaignType) -> Self {
        value.to_string()
    }
}

/// Campaign budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub total: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Budget {
    pub fn new(total: f64) -> Self {
        Self {
            total,
            currency: default_currency(),
        }
    }
}

/// What the campaign is trying to achieve
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignGoal {
    pub campaign_type: CampaignType,
    pub objective: String,
    /// KPI name -> target value
    #[serde(default)]
    pub kpi_targets: BTreeMap<String, f64>,
    pub budget: Budget,
    #[serde(default)]
    pub priority: Priority,
}

impl CampaignGoal {
    pub fn new(campaign_type: CampaignType, objective: impl Into<String>, budget: f64) -> Self {
        Self {
            campaign_type,
            objective: objective.into(),
            kpi_targets: BTreeMap::new(),
            budget: Budget::new(budget),
            priority: Priority::default(),
        }
    }

    pub fn with_kpi(mut self, name: impl Into<String>, target: f64) -> Self {
        self.kpi_targets.insert(name.into(), target);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Who the campaign addresses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignAudience {
    pub segment: String,
    #[serde(default)]
    pub personas: Vec<String>,
}

impl CampaignAudience {
    pub fn new(segment: impl Into<String>) -> Self {
        Self {
            segment: segment.into(),
            personas: Vec::new(),
        }
    }
}

/// How strictly the timeline window must be honored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineFlexibility {
    Rigid,
    #[default]
    Flexible,
}

impl std::str::FromStr for TimelineFlexibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rigid" => Ok(Self::Rigid),
            "flexible" => Ok(Self::Flexible),
            _ => Err(format!("Invalid timeline flexibility: {}", s)),
        }
    }
}

/// Calendar window the campaign has to fit in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimelineWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window starting at `start` and lasting `days`
    pub fn days_from(start: DateTime<Utc>, days: i64) -> Self {
        Self::new(start, start + chrono::Duration::days(days))
    }

    pub fn duration_days(&self) -> f64 {
        (self.end - self.start).num_minutes() as f64 / (24.0 * 60.0)
    }
}

/// Execution context for a planning request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignContext {
    pub timeline: TimelineWindow,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub timeline_flexibility: TimelineFlexibility,
}

impl CampaignContext {
    pub fn new(timeline: TimelineWindow) -> Self {
        Self {
            timeline,
            channels: Vec::new(),
            timeline_flexibility: TimelineFlexibility::default(),
        }
    }

    pub fn rigid(mut self) -> Self {
        self.timeline_flexibility = TimelineFlexibility::Rigid;
        self
    }

    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }
}

/// Runtime status of an action node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    /// A transitive dependency failed
    Blocked,
    /// The strategy was cancelled before this node finished
    Cancelled,
}

impl NodeStatus {
    /// Terminal states never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Blocked | Self::Cancelled
        )
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Blocked => write!(f, "BLOCKED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "BLOCKED" => Ok(Self::Blocked),
            "CANCELLED" | "CANCELED" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

/// Clamp a score into the [0, 100] range used everywhere
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);
        assert!(Priority::Critical.weight() > Priority::Low.weight());
    }

    #[test]
    fn test_campaign_type_parsing() {
        let t: CampaignType = "product_launch".parse().unwrap();
        assert_eq!(t, CampaignType::ProductLaunch);
        let t: CampaignType = "Lead-Generation".parse().unwrap();
        assert_eq!(t, CampaignType::LeadGeneration);
        let t: CampaignType = "podcast_tour".parse().unwrap();
        assert_eq!(t, CampaignType::Custom("podcast_tour".to_string()));
        assert_eq!(t.to_string(), "podcast_tour");
    }

    #[test]
    fn test_campaign_type_serde_as_string() {
        let json = serde_json::to_string(&CampaignType::BrandAwareness).unwrap();
        assert_eq!(json, "\"brand_awareness\"");
        let parsed: CampaignType = serde_json::from_str("\"retention\"").unwrap();
        assert_eq!(parsed, CampaignType::Retention);
    }

    #[test]
    fn test_node_status_terminal() {
        assert!(!NodeStatus::Pending.is_terminal());
        assert!(!NodeStatus::Running.is_terminal());
        assert!(NodeStatus::Completed.is_terminal());
        assert!(NodeStatus::Blocked.is_terminal());
        assert_eq!("cancelled".parse::<NodeStatus>().unwrap(), NodeStatus::Cancelled);
    }

    #[test]
    fn test_timeline_window_days() {
        let start = Utc::now();
        let window = TimelineWindow::days_from(start, 14);
        assert!((window.duration_days() - 14.0).abs() < 0.001);
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(120.0), 100.0);
        assert_eq!(clamp_score(-3.0), 0.0);
        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_score(42.5), 42.5);
    }
}
