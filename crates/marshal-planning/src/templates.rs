//! Stage templates for the supported campaign types

use marshal_core::{AgentId, CampaignType, CapabilityId, MarshalError, Priority, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A capability a stage needs, with the action it performs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredCapability {
    pub capability: CapabilityId,
    pub action: String,
    #[serde(default)]
    pub priority: Priority,
    /// Channel this capability publishes to, if any
    #[serde(default)]
    pub channel: Option<String>,
    /// Used when the registry knows no agent for the capability
    #[serde(default)]
    pub default_agent: Option<AgentId>,
}

impl RequiredCapability {
    pub fn new(capability: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            action: action.into(),
            priority: Priority::default(),
            channel: None,
            default_agent: None,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn default_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.default_agent = Some(agent_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTemplate {
    pub name: String,
    pub capabilities: Vec<RequiredCapability>,
}

impl StageTemplate {
    pub fn new(name: impl Into<String>, capabilities: Vec<RequiredCapability>) -> Self {
        Self {
            name: name.into(),
            capabilities,
        }
    }

    /// Capabilities to plan for the given channels
    ///
    /// Channel-bound capabilities outside `channels` are dropped, unless that
    /// would leave the stage empty. An empty channel list keeps everything.
    pub fn capabilities_for(&self, channels: &[String]) -> Vec<&RequiredCapability> {
        if channels.is_empty() {
            return self.capabilities.iter().collect();
        }

        let selected: Vec<_> = self
            .capabilities
            .iter()
            .filter(|c| match &c.channel {
                Some(channel) => channels.iter().any(|wanted| wanted.eq_ignore_ascii_case(channel)),
                None => true,
            })
            .collect();

        if selected.is_empty() {
            self.capabilities.iter().collect()
        } else {
            selected
        }
    }
}

/// Ordered stages for one campaign type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignTemplate {
    pub campaign_type: CampaignType,
    pub stages: Vec<StageTemplate>,
    /// Shortest calendar window the campaign can be run in
    pub min_duration_days: f64,
}

/// Lookup of stage templates by campaign type
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: HashMap<CampaignType, CampaignTemplate>,
}

impl TemplateCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in templates for the known campaign types
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();

        catalog.insert(CampaignTemplate {
            campaign_type: CampaignType::ProductLaunch,
            min_duration_days: 14.0,
            stages: vec![
                StageTemplate::new(
                    "research",
                    vec![RequiredCapability::new("trend", "analyze_market_trends")
                        .priority(Priority::High)
                        .default_agent("trend-scout")],
                ),
                StageTemplate::new(
                    "content",
                    vec![RequiredCapability::new("content", "produce_launch_content")
                        .priority(Priority::High)
                        .default_agent("copywriter")],
                ),
                StageTemplate::new(
                    "distribution",
                    vec![
                        RequiredCapability::new("social", "publish_social_posts")
                            .channel("social")
                            .default_agent("social-publisher"),
                        RequiredCapability::new("email", "send_launch_email")
                            .channel("email")
                            .default_agent("email-sender"),
                    ],
                ),
                StageTemplate::new(
                    "conversion",
                    vec![RequiredCapability::new("ads", "run_conversion_ads")
                        .priority(Priority::Critical)
                        .channel("ads")
                        .default_agent("ads-buyer")],
                ),
            ],
        });

        catalog.insert(CampaignTemplate {
            campaign_type: CampaignType::BrandAwareness,
            min_duration_days: 21.0,
            stages: vec![
                StageTemplate::new(
                    "research",
                    vec![RequiredCapability::new("audience", "map_audience_segments")
                        .default_agent("audience-analyst")],
                ),
                StageTemplate::new(
                    "content",
                    vec![
                        RequiredCapability::new("content", "produce_brand_story")
                            .priority(Priority::High)
                            .default_agent("copywriter"),
                        RequiredCapability::new("design", "produce_brand_visuals")
                            .default_agent("designer"),
                    ],
                ),
                StageTemplate::new(
                    "distribution",
                    vec![
                        RequiredCapability::new("social", "publish_social_posts")
                            .channel("social")
                            .default_agent("social-publisher"),
                        RequiredCapability::new("influencer", "brief_influencers")
                            .channel("influencer"),
                    ],
                ),
            ],
        });

        catalog.insert(CampaignTemplate {
            campaign_type: CampaignType::LeadGeneration,
            min_duration_days: 14.0,
            stages: vec![
                StageTemplate::new(
                    "research",
                    vec![RequiredCapability::new("audience", "qualify_target_accounts")
                        .default_agent("audience-analyst")],
                ),
                StageTemplate::new(
                    "content",
                    vec![
                        RequiredCapability::new("content", "produce_lead_magnet")
                            .priority(Priority::High)
                            .default_agent("copywriter"),
                        RequiredCapability::new("landing", "build_landing_page")
                            .default_agent("page-builder"),
                    ],
                ),
                StageTemplate::new(
                    "distribution",
                    vec![
                        RequiredCapability::new("email", "run_nurture_sequence")
                            .channel("email")
                            .default_agent("email-sender"),
                        RequiredCapability::new("ads", "run_lead_ads")
                            .channel("ads")
                            .default_agent("ads-buyer"),
                    ],
                ),
                StageTemplate::new(
                    "conversion",
                    vec![RequiredCapability::new("analytics", "score_leads")
                        .priority(Priority::High)
                        .default_agent("analyst")],
                ),
            ],
        });

        catalog.insert(CampaignTemplate {
            campaign_type: CampaignType::Retention,
            min_duration_days: 10.0,
            stages: vec![
                StageTemplate::new(
                    "analysis",
                    vec![RequiredCapability::new("analytics", "find_churn_risk")
                        .priority(Priority::High)
                        .default_agent("analyst")],
                ),
                StageTemplate::new(
                    "content",
                    vec![RequiredCapability::new("content", "produce_winback_offer")
                        .default_agent("copywriter")],
                ),
                StageTemplate::new(
                    "distribution",
                    vec![RequiredCapability::new("email", "send_winback_email")
                        .channel("email")
                        .default_agent("email-sender")],
                ),
            ],
        });

        catalog
    }

    pub fn insert(&mut self, template: CampaignTemplate) {
        self.templates.insert(template.campaign_type.clone(), template);
    }

    /// Template for a campaign type, or InvalidGoal
    pub fn lookup(&self, campaign_type: &CampaignType) -> Result<&CampaignTemplate> {
        self.templates
            .get(campaign_type)
            .ok_or_else(|| MarshalError::InvalidGoal(campaign_type.to_string()))
    }

    pub fn campaign_types(&self) -> Vec<&CampaignType> {
        let mut types: Vec<_> = self.templates.keys().collect();
        types.sort();
        types
    }
}
