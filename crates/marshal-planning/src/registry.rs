//! Agent capability registry

use marshal_core::{AgentId, CapabilityId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Estimates used for agents without history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDefaults {
    pub avg_cost: f64,
    pub avg_duration_hours: f64,
}

impl Default for CapabilityDefaults {
    fn default() -> Self {
        Self {
            avg_cost: 0.0,
            avg_duration_hours: 8.0,
        }
    }
}

/// Resolves capabilities to the agents implementing them
pub trait CapabilityRegistry: Send + Sync {
    /// Agent ids implementing `capability`, possibly empty
    fn implementations(&self, capability: &str) -> Vec<AgentId>;

    fn describe_capability(&self, capability: &str) -> Option<CapabilityDefaults>;
}

#[derive(Debug, Clone)]
struct CapabilityEntry {
    agents: Vec<AgentId>,
    defaults: CapabilityDefaults,
}

/// Fixed registry built in code or from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilityRegistry {
    capabilities: BTreeMap<CapabilityId, CapabilityEntry>,
}

impl StaticCapabilityRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Marketing capabilities and the agents shipped for them
    pub fn builtin() -> Self {
        Self::empty()
            .register("trend", &["trend-scout", "trend-radar"], 800.0, 8.0)
            .register("audience", &["audience-analyst"], 600.0, 6.0)
            .register("content", &["copywriter", "content-studio"], 1500.0, 24.0)
            .register("design", &["designer"], 1200.0, 16.0)
            .register("social", &["social-publisher", "social-scheduler"], 1200.0, 12.0)
            .register("email", &["email-sender"], 600.0, 6.0)
            .register("ads", &["ads-buyer", "ads-optimizer"], 5000.0, 48.0)
            .register("influencer", &["influencer-scout"], 3000.0, 72.0)
            .register("landing", &["page-builder"], 900.0, 10.0)
            .register("analytics", &["analyst"], 400.0, 4.0)
    }

    pub fn register(
        mut self,
        capability: impl Into<String>,
        agents: &[&str],
        avg_cost: f64,
        avg_duration_hours: f64,
    ) -> Self {
        self.capabilities.insert(
            capability.into(),
            CapabilityEntry {
                agents: agents.iter().map(|a| a.to_string()).collect(),
                defaults: CapabilityDefaults {
                    avg_cost,
                    avg_duration_hours,
                },
            },
        );
        self
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &str> {
        self.capabilities.keys().map(|c| c.as_str())
    }
}

impl CapabilityRegistry for StaticCapabilityRegistry {
    fn implementations(&self, capability: &str) -> Vec<AgentId> {
        self.capabilities
            .get(capability)
            .map(|e| e.agents.clone())
            .unwrap_or_default()
    }

    fn describe_capability(&self, capability: &str) -> Option<CapabilityDefaults> {
        self.capabilities.get(capability).map(|e| e.defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = StaticCapabilityRegistry::builtin();
        assert_eq!(registry.implementations("trend"), vec!["trend-scout", "trend-radar"]);
        assert!(registry.implementations("telepathy").is_empty());

        let defaults = registry.describe_capability("ads").unwrap();
        assert_eq!(defaults.avg_cost, 5000.0);
        assert!(registry.describe_capability("telepathy").is_none());
    }
}
