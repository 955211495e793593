//! Completed campaigns fed to the miner

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marshal_core::{AgentId, CampaignType, CapabilityId, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One agent execution inside a completed campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    pub capability: CapabilityId,
    pub agent_id: AgentId,
    pub started_at: DateTime<Utc>,
    /// 0-100
    pub performance: f64,
}

impl AgentStep {
    pub fn new(
        capability: impl Into<String>,
        agent_id: impl Into<String>,
        started_at: DateTime<Utc>,
        performance: f64,
    ) -> Self {
        Self {
            capability: capability.into(),
            agent_id: agent_id.into(),
            started_at,
            performance,
        }
    }
}

/// A finished campaign with its winning variants and executed steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedCampaign {
    pub id: String,
    pub campaign_type: CampaignType,
    pub segment: String,
    /// 0-100
    pub score: f64,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub content_style: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub cta_type: Option<String>,
    #[serde(default)]
    pub timing_window: Option<String>,
    #[serde(default)]
    pub steps: Vec<AgentStep>,
}

impl CompletedCampaign {
    pub fn new(
        id: impl Into<String>,
        campaign_type: CampaignType,
        segment: impl Into<String>,
        score: f64,
    ) -> Self {
        Self {
            id: id.into(),
            campaign_type,
            segment: segment.into(),
            score,
            completed_at: Utc::now(),
            content_style: None,
            subject: None,
            cta_type: None,
            timing_window: None,
            steps: Vec::new(),
        }
    }

    pub fn with_variants(
        mut self,
        content_style: impl Into<String>,
        subject: impl Into<String>,
        cta_type: impl Into<String>,
    ) -> Self {
        self.content_style = Some(content_style.into());
        self.subject = Some(subject.into());
        self.cta_type = Some(cta_type.into());
        self
    }

    pub fn with_timing_window(mut self, window: impl Into<String>) -> Self {
        self.timing_window = Some(window.into());
        self
    }

    pub fn with_step(mut self, step: AgentStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = at;
        self
    }
}

/// Supplies completed campaigns to the miner
#[async_trait]
pub trait CampaignSource: Send + Sync {
    /// Campaigns completed at or after `cutoff`
    async fn completed_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<CompletedCampaign>>;
}

/// In-memory campaign source
#[derive(Default)]
pub struct InMemoryCampaignSource {
    campaigns: RwLock<Vec<CompletedCampaign>>,
}

impl InMemoryCampaignSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_campaigns(campaigns: Vec<CompletedCampaign>) -> Self {
        Self {
            campaigns: RwLock::new(campaigns),
        }
    }

    pub async fn add(&self, campaign: CompletedCampaign) {
        self.campaigns.write().await.push(campaign);
    }
}

#[async_trait]
impl CampaignSource for InMemoryCampaignSource {
    async fn completed_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<CompletedCampaign>> {
        Ok(self
            .campaigns
            .read()
            .await
            .iter()
            .filter(|c| c.completed_at >= cutoff)
            .cloned()
            .collect())
    }
}
