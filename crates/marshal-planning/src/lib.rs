//! Marshal Planning - goal-driven strategy generation
//!
//! This crate turns a campaign goal into a staged DAG of agent actions:
//! stage templates per campaign type, a capability registry to find
//! candidate agents, a boost policy per campaign type and the scoring that
//! picks one agent per action from historical performance.

pub mod boost;
pub mod planner;
pub mod registry;
pub mod scoring;
pub mod templates;

pub use boost::{BoostPolicy, BoostTable, NoBoost};
pub use planner::{BrandCompliance, Complexity, PlanningOptions, StrategyPlanner};
pub use registry::{CapabilityDefaults, CapabilityRegistry, StaticCapabilityRegistry};
pub use scoring::{select_agent, CandidateScore};
pub use templates::{CampaignTemplate, RequiredCapability, StageTemplate, TemplateCatalog};
