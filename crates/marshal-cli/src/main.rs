//! Marshal CLI - campaign strategy planning and execution tracking
//!
//! Usage:
//!   marshal init                        Initialize Marshal in a project
//!   marshal plan <type> <objective>     Generate and register a strategy
//!   marshal record <agent> <capability> Record an agent outcome
//!   marshal track <command>             Drive strategy execution
//!   marshal mine                        Mine patterns from completed campaigns
//!   marshal sequences                   Show reusable agent sequences

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use marshal_core::config::MarshalConfig;
use marshal_core::storage::{JsonDirRepository, SharedRepository};
use marshal_core::{
    ActionEvent, CampaignAudience, CampaignContext, CampaignGoal, CampaignType, ExecutionState,
    NodeStatus, Strategy, TimelineWindow,
};
use marshal_evolution::{CampaignPattern, CompletedCampaign, InMemoryCampaignSource, PatternMiner};
use marshal_metrics::{OutcomeLog, Outcome, PerformanceStore};
use marshal_orchestrator::ExecutionTracker;
use marshal_planning::{BrandCompliance, Complexity, PlanningOptions, StrategyPlanner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "marshal")]
#[command(author, version, about = "Campaign strategy planning and execution tracking")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Project root holding the .marshal directory
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize Marshal in the project root
    Init,

    /// Generate a strategy and register it for execution
    Plan {
        /// Campaign type (product_launch, brand_awareness, lead_generation, retention)
        campaign_type: CampaignType,

        /// Campaign objective
        objective: String,

        /// Total budget
        #[arg(short, long)]
        budget: f64,

        /// Target audience segment
        #[arg(short, long, default_value = "general")]
        segment: String,

        /// Timeline length in days, starting now
        #[arg(short, long, default_value = "30")]
        days: i64,

        /// Fail instead of stretching past the timeline
        #[arg(long)]
        rigid: bool,

        /// Restrict channel-bound actions (repeatable)
        #[arg(long = "channel")]
        channels: Vec<String>,

        /// Complexity (low, medium, high)
        #[arg(long, default_value = "medium")]
        complexity: Complexity,

        /// Brand compliance (standard, strict)
        #[arg(long, default_value = "standard")]
        brand: BrandCompliance,

        /// Accept strategies estimated above the budget
        #[arg(long)]
        allow_overrun: bool,

        /// Apply adjustments learned from mined patterns
        #[arg(long)]
        learn: bool,

        /// Print the strategy as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record an agent outcome in the performance history
    Record {
        /// Agent identifier
        agent: String,

        /// Capability the agent performed
        capability: String,

        /// Actual cost
        #[arg(long, default_value = "0")]
        cost: f64,

        /// Duration in hours
        #[arg(long, default_value = "0")]
        hours: f64,

        /// Brand compliance score (0-100)
        #[arg(long)]
        brand_score: Option<f64>,

        /// Record a failure instead of a success
        #[arg(long)]
        failed: bool,
    },

    /// Execution tracking
    Track {
        #[command(subcommand)]
        action: TrackCommands,
    },

    /// Mine patterns from completed campaigns
    Mine {
        /// JSON array of completed campaigns (defaults to .marshal/campaigns.json)
        #[arg(long)]
        campaigns: Option<PathBuf>,

        /// Merge similar stored patterns after mining
        #[arg(long)]
        consolidate: bool,
    },

    /// Show reusable agent sequences from stored patterns
    Sequences {
        /// Similarity needed to cluster patterns (defaults to config)
        #[arg(long)]
        min_similarity: Option<f64>,
    },
}

#[derive(Subcommand)]
enum TrackCommands {
    /// Show node statuses and progress
    Status { strategy_id: String },

    /// List nodes that can start now
    Ready { strategy_id: String },

    /// Mark a node as started
    Start { strategy_id: String, node_id: String },

    /// Mark a running node as completed
    Complete {
        strategy_id: String,
        node_id: String,

        /// Actual cost (defaults to the estimate)
        #[arg(long)]
        cost: Option<f64>,
    },

    /// Mark a running node as failed
    Fail {
        strategy_id: String,
        node_id: String,

        /// Failure reason
        #[arg(long, default_value = "agent reported failure")]
        reason: String,

        /// Actual cost (defaults to the estimate)
        #[arg(long)]
        cost: Option<f64>,
    },

    /// Cancel every unfinished node
    Cancel { strategy_id: String },
}

/// Paths and stores under `<root>/.marshal`
struct Workspace {
    root: PathBuf,
    config: MarshalConfig,
}

impl Workspace {
    fn open(root: &Path) -> Result<Self> {
        let config = MarshalConfig::load_or_default(root).context("Failed to load .marshal/config.toml")?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    fn dir(&self) -> PathBuf {
        self.root.join(".marshal")
    }

    fn outcomes_path(&self) -> PathBuf {
        self.dir().join("outcomes.jsonl")
    }

    async fn performance(&self) -> Result<PerformanceStore> {
        PerformanceStore::open(OutcomeLog::append_file(self.outcomes_path()))
            .await
            .context("Failed to load outcome history")
    }

    fn tracker(&self) -> ExecutionTracker {
        let dir = self.dir();
        ExecutionTracker::new(
            Arc::new(JsonDirRepository::<Strategy>::under(&dir)),
            Arc::new(JsonDirRepository::<ExecutionState>::under(&dir)),
        )
    }

    fn patterns(&self) -> SharedRepository<CampaignPattern> {
        Arc::new(JsonDirRepository::<CampaignPattern>::under(&self.dir()))
    }

    fn miner(&self, campaigns: Vec<CompletedCampaign>) -> PatternMiner {
        PatternMiner::new(
            Arc::new(InMemoryCampaignSource::with_campaigns(campaigns)),
            self.patterns(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG overrides --verbose
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init => cmd_init(&cli.root).await,
        Commands::Plan {
            campaign_type,
            objective,
            budget,
            segment,
            days,
            rigid,
            channels,
            complexity,
            brand,
            allow_overrun,
            learn,
            json,
        } => {
            let goal = CampaignGoal::new(campaign_type, objective, budget);
            let audience = CampaignAudience::new(segment);
            let mut context = CampaignContext::new(TimelineWindow::days_from(Utc::now(), days))
                .with_channels(channels);
            if rigid {
                context = context.rigid();
            }
            let options = PlanningOptions {
                complexity,
                brand_compliance: brand,
                allow_budget_overrun: allow_overrun,
                ..Default::default()
            };
            cmd_plan(&cli.root, goal, audience, context, options, learn, json).await
        }
        Commands::Record {
            agent,
            capability,
            cost,
            hours,
            brand_score,
            failed,
        } => {
            let mut outcome = if failed {
                Outcome::failure(capability, cost, hours)
            } else {
                Outcome::success(capability, cost, hours)
            };
            if let Some(score) = brand_score {
                outcome = outcome.with_brand_score(score);
            }
            cmd_record(&cli.root, agent, outcome).await
        }
        Commands::Track { action } => cmd_track(&cli.root, action).await,
        Commands::Mine {
            campaigns,
            consolidate,
        } => cmd_mine(&cli.root, campaigns, consolidate).await,
        Commands::Sequences { min_similarity } => cmd_sequences(&cli.root, min_similarity).await,
    }
}

async fn cmd_init(root: &Path) -> Result<()> {
    info!("Initializing Marshal in {:?}", root);

    MarshalConfig::write_default(root).context("Failed to write default config")?;
    let dir = root.join(".marshal");
    for sub in ["strategys", "executions", "patterns"] {
        tokio::fs::create_dir_all(dir.join(sub)).await?;
    }
    tokio::fs::write(dir.join("campaigns.json"), "[]\n").await?;

    println!("Initialized Marshal in {:?}", root);
    println!("Created:");
    println!("  .marshal/config.toml");
    println!("  .marshal/campaigns.json");
    println!("  .marshal/strategys/");
    println!("  .marshal/executions/");
    println!("  .marshal/patterns/");
    println!("\nNext steps:");
    println!("  1. Record agent outcomes with 'marshal record'");
    println!("  2. Run 'marshal plan <type> <objective> --budget <n>'");
    println!("  3. Drive execution with 'marshal track'");

    Ok(())
}

async fn cmd_plan(
    root: &Path,
    goal: CampaignGoal,
    audience: CampaignAudience,
    context: CampaignContext,
    mut options: PlanningOptions,
    learn: bool,
    json: bool,
) -> Result<()> {
    let workspace = Workspace::open(root)?;
    let store = workspace.performance().await?;

    if learn {
        let profile = workspace
            .miner(Vec::new())
            .learning_profile()
            .await
            .context("Failed to derive learning profile")?;
        info!(patterns = profile.derived_from, "Applying learned adjustments");
        options.learning = Some(profile);
    }

    let planner = StrategyPlanner::new(workspace.config.planner.clone());
    let strategy = planner
        .plan(&store, &goal, &audience, &context, &options)
        .await
        .context("Planning failed")?;

    let tracker = workspace.tracker();
    tracker
        .register_strategy(strategy.clone())
        .await
        .context("Failed to store strategy")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&strategy)?);
        return Ok(());
    }

    println!("Strategy {}", strategy.id);
    println!("==========");
    println!("Type:         {}", strategy.campaign_type);
    println!("Cost:         {:.2} / {:.2}", strategy.total_estimated_cost, goal.budget.total);
    println!("Duration:     {:.1}h", strategy.total_estimated_duration_hours);
    println!("Brand:        {:.1}", strategy.brand_alignment_score);
    println!("Success:      {:.1}%", strategy.success_probability);

    for stage in &strategy.stages {
        println!(
            "\n[{}] {} ({} -> {})",
            stage.index,
            stage.name,
            stage.start.format("%Y-%m-%d %H:%M"),
            stage.end.format("%Y-%m-%d %H:%M")
        );
        for node in &stage.nodes {
            println!(
                "  {:<28} {:<20} score {:>5.1}  cost {:>9.2}  {:>5.1}h",
                node.id, node.agent_id, node.performance_score, node.estimated_cost, node.estimated_duration_hours
            );
        }
    }

    println!("\nUse 'marshal track ready {}' to see startable nodes", strategy.id);
    Ok(())
}

async fn cmd_record(root: &Path, agent: String, outcome: Outcome) -> Result<()> {
    let workspace = Workspace::open(root)?;
    let store = workspace.performance().await?;
    store
        .record_outcome(&agent, outcome)
        .await
        .context("Failed to record outcome")?;

    let metrics = store.get_metrics(&agent, workspace.config.planner.window_days).await;
    println!(
        "{}: {} sample(s), success {:.0}%, avg cost {:.2}",
        agent,
        metrics.sample_count,
        metrics.success_rate * 100.0,
        metrics.avg_cost
    );
    Ok(())
}

async fn cmd_track(root: &Path, action: TrackCommands) -> Result<()> {
    let workspace = Workspace::open(root)?;
    let tracker = workspace.tracker();

    match action {
        TrackCommands::Status { strategy_id } => {
            let strategy = tracker.annotated_strategy(&strategy_id).await?;
            let state = tracker.get_execution_state(&strategy_id).await?;

            println!("Strategy {} ({})", strategy.id, strategy.campaign_type);
            println!("Progress: {:.1}%{}", state.progress, if state.cancelled { " (cancelled)" } else { "" });
            for stage in &strategy.stages {
                println!("\n{}:", stage.name);
                for node in &stage.nodes {
                    println!("  {:<28} {:<10} {}", node.id, node.status, node.agent_id);
                }
            }
        }
        TrackCommands::Ready { strategy_id } => {
            let ready = tracker.execute_strategy(&strategy_id).await?;
            if ready.is_empty() {
                println!("No nodes ready");
            }
            for node in ready {
                println!("{:<28} {:<20} {}", node.id, node.agent_id, node.action);
            }
        }
        TrackCommands::Start { strategy_id, node_id } => {
            let state = tracker
                .log_action_event(&strategy_id, &node_id, ActionEvent::Start)
                .await?;
            print_transition(&state, &node_id);
        }
        TrackCommands::Complete {
            strategy_id,
            node_id,
            cost,
        } => {
            let state = tracker
                .log_action_event(&strategy_id, &node_id, ActionEvent::Complete { actual_cost: cost })
                .await?;
            print_transition(&state, &node_id);
            record_node_outcome(&workspace, &tracker, &state, &node_id, true, cost).await?;
        }
        TrackCommands::Fail {
            strategy_id,
            node_id,
            reason,
            cost,
        } => {
            let state = tracker
                .log_action_event(
                    &strategy_id,
                    &node_id,
                    ActionEvent::Fail {
                        reason,
                        actual_cost: cost,
                    },
                )
                .await?;
            print_transition(&state, &node_id);
            record_node_outcome(&workspace, &tracker, &state, &node_id, false, cost).await?;
        }
        TrackCommands::Cancel { strategy_id } => {
            let state = tracker.cancel_execution(&strategy_id).await?;
            println!(
                "Cancelled {} node(s); progress {:.1}%",
                state.count(NodeStatus::Cancelled),
                state.progress
            );
        }
    }

    Ok(())
}

fn print_transition(state: &ExecutionState, node_id: &str) {
    let blocked = state
        .events
        .iter()
        .filter(|e| matches!(&e.event, ActionEvent::Block { failed_node } if failed_node == node_id))
        .count();

    if let Some(status) = state.status(node_id) {
        println!("{} -> {} (progress {:.1}%)", node_id, status, state.progress);
    }
    if blocked > 0 {
        println!("Blocked {} dependent node(s)", blocked);
    }
}

/// Feed a finished node back into the performance history
async fn record_node_outcome(
    workspace: &Workspace,
    tracker: &ExecutionTracker,
    state: &ExecutionState,
    node_id: &str,
    success: bool,
    cost: Option<f64>,
) -> Result<()> {
    let strategy = tracker.annotated_strategy(&state.strategy_id).await?;
    let Some(node) = strategy.node(node_id) else {
        bail!("Node {} not found in strategy {}", node_id, state.strategy_id);
    };

    let started = state
        .events
        .iter()
        .rev()
        .find(|e| e.node_id == node_id && e.to == NodeStatus::Running)
        .map(|e| e.timestamp);
    let hours = started
        .map(|at| (Utc::now() - at).num_seconds().max(0) as f64 / 3600.0)
        .unwrap_or(node.estimated_duration_hours);
    let cost = cost.unwrap_or(node.estimated_cost);

    let outcome = if success {
        Outcome::success(&node.capability, cost, hours)
    } else {
        Outcome::failure(&node.capability, cost, hours)
    };
    workspace
        .performance()
        .await?
        .record_outcome(&node.agent_id, outcome)
        .await
        .context("Failed to record node outcome")?;
    Ok(())
}

async fn cmd_mine(root: &Path, campaigns: Option<PathBuf>, consolidate: bool) -> Result<()> {
    let workspace = Workspace::open(root)?;
    let path = campaigns.unwrap_or_else(|| workspace.dir().join("campaigns.json"));

    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read campaigns from {:?}", path))?;
    let completed: Vec<CompletedCampaign> =
        serde_json::from_str(&content).context("Failed to parse campaigns JSON")?;

    let miner = workspace.miner(completed);
    let report = miner
        .mine_patterns(&workspace.config.mining)
        .await
        .context("Mining failed")?;

    println!("Mining Report");
    println!("=============");
    println!("Campaigns analyzed: {}", report.campaigns_analyzed);
    println!("New patterns:       {}", report.patterns.len());
    println!("Already mined:      {}", report.already_mined);
    println!("Skipped:            {}", report.skipped);

    for pattern in &report.patterns {
        println!("  [{:.1}] {}", pattern.pattern_score, pattern.summary);
    }

    if let Some(best) = report.insights.best_hour() {
        println!("\nBest start hour: {:02}:00 UTC (avg {:.1})", best.hour, best.avg_performance);
    }
    if !report.recommendations.is_empty() {
        println!("\nRecommendations:");
        for rec in &report.recommendations {
            println!("  - {}", rec);
        }
    }

    if consolidate {
        let merged = miner
            .consolidate(workspace.config.mining.similarity_threshold)
            .await
            .context("Consolidation failed")?;
        println!(
            "\nConsolidated {} cluster(s): {} merged, {} removed",
            merged.clusters,
            merged.merged.len(),
            merged.removed.len()
        );
    }

    Ok(())
}

async fn cmd_sequences(root: &Path, min_similarity: Option<f64>) -> Result<()> {
    let workspace = Workspace::open(root)?;
    let threshold = min_similarity.unwrap_or(workspace.config.mining.similarity_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        bail!("Similarity must be between 0 and 1, got {}", threshold);
    }

    let sequences = workspace
        .miner(Vec::new())
        .find_reusable_sequences(threshold)
        .await
        .context("Failed to load patterns")?;

    if sequences.is_empty() {
        println!("No reusable sequences yet. Run 'marshal mine' first.");
        return Ok(());
    }

    println!("Reusable Sequences (similarity >= {:.2})", threshold);
    println!("==========");
    for pattern in sequences {
        println!(
            "\n[{:.1}] {} / {} ({} campaign(s))",
            pattern.pattern_score,
            pattern.campaign_type,
            pattern.segment,
            pattern.source_campaigns.len()
        );
        for sequence in &pattern.variants.agent_sequences {
            println!("  {}", sequence.join(" -> "));
        }
    }

    Ok(())
}
