//! Campaign-type specific capability boosts

use marshal_core::{CampaignType, CapabilityId};
use std::collections::HashMap;

/// Score points added to a capability for a campaign type
pub trait BoostPolicy: Send + Sync {
    fn boost(&self, campaign_type: &CampaignType, capability: &str) -> f64;
}

/// Table-driven boosts
#[derive(Debug, Clone, Default)]
pub struct BoostTable {
    entries: HashMap<(CampaignType, CapabilityId), f64>,
}

impl BoostTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        Self::empty()
            .with(CampaignType::ProductLaunch, "trend", 20.0)
            .with(CampaignType::BrandAwareness, "content", 10.0)
            .with(CampaignType::BrandAwareness, "design", 10.0)
            .with(CampaignType::LeadGeneration, "landing", 15.0)
            .with(CampaignType::LeadGeneration, "ads", 10.0)
            .with(CampaignType::Retention, "email", 15.0)
            .with(CampaignType::Retention, "analytics", 10.0)
    }

    pub fn with(mut self, campaign_type: CampaignType, capability: impl Into<String>, points: f64) -> Self {
        self.entries.insert((campaign_type, capability.into()), points);
        self
    }
}

impl BoostPolicy for BoostTable {
    fn boost(&self, campaign_type: &CampaignType, capability: &str) -> f64 {
        self.entries
            .get(&(campaign_type.clone(), capability.to_string()))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Policy that never boosts
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBoost;

impl BoostPolicy for NoBoost {
    fn boost(&self, _campaign_type: &CampaignType, _capability: &str) -> f64 {
        0.0
    }
}
