use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use maestro_agent::CompletionClient;
use maestro_learning::{Learner, PatternMemory};
use maestro_orchestrator::{
    default_agents, AggregatedResult, AutonomousPlanner, Orchestrator, OrchestratorConfig,
    PlannerConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "maestro.toml";

#[derive(Parser)]
#[command(name = "maestro", about = "Maestro: multi-agent task orchestration")]
struct Cli {
    /// Path to config file (defaults to ./maestro.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Decompose a goal, run it with the agent team and print the result
    Run {
        goal: String,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
        /// Stream orchestration events to stderr as JSON lines
        #[arg(long)]
        events: bool,
        /// Pattern memory file, loaded before and saved after the run
        #[arg(long)]
        memory: Option<PathBuf>,
    },
    /// Decompose a goal and print its phases without executing anything
    Plan { goal: String },
    /// Run a goal with the single-agent step planner
    Autonomous {
        goal: String,
        /// Use the extended timeout table
        #[arg(long)]
        extended: bool,
    },
    /// List the agent roster
    Agents,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            goal,
            json,
            events,
            memory,
        } => {
            let learner = Arc::new(load_memory(memory.as_deref())?);
            let orchestrator = Arc::new(
                Orchestrator::new(config)?.with_learner(learner.clone()),
            );

            if events {
                let mut rx = orchestrator.subscribe();
                tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if let Ok(line) = serde_json::to_string(&event) {
                            eprintln!("{line}");
                        }
                    }
                });
            }

            let watcher = orchestrator.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received; cancelling after in-flight tasks");
                    watcher.cancel();
                }
            });

            let result = orchestrator.orchestrate(&goal).await?;
            let stats = orchestrator.stats();
            info!(
                completed = stats.completed_tasks,
                failed = stats.failed_tasks,
                retries = stats.total_retries,
                self_heals = stats.self_heals,
                "Run statistics"
            );

            if let Some(path) = &memory {
                save_memory(path, &learner.snapshot())?;
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
            if !result.success {
                anyhow::bail!(result.error.unwrap_or_else(|| "run failed".into()));
            }
        }
        Commands::Plan { goal } => {
            let orchestrator = Orchestrator::new(config)?;
            let preview = orchestrator.preview(&goal).await?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
        }
        Commands::Autonomous { goal, extended } => {
            let model = config
                .model
                .clone()
                .context("autonomous mode needs a [model] section")?;
            let client = CompletionClient::new(model, config.completion_timeout())?;
            let planner_config = if extended {
                PlannerConfig::extended()
            } else {
                config.planner.clone()
            };
            let planner = AutonomousPlanner::new(planner_config, Some(client));
            let run = planner.run(&goal).await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        Commands::Agents => {
            println!("{}", serde_json::to_string_pretty(&default_agents())?);
        }
    }

    Ok(())
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

/// An explicit path must exist; the default path is optional.
fn load_config(path: Option<&Path>) -> anyhow::Result<OrchestratorConfig> {
    let path = match path {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG).exists() => Path::new(DEFAULT_CONFIG),
        None => {
            info!("No {DEFAULT_CONFIG} found; using defaults");
            return Ok(OrchestratorConfig::default());
        }
    };
    OrchestratorConfig::load(path)
        .with_context(|| format!("Failed to load config file '{}'", path.display()))
}

fn load_memory(path: Option<&Path>) -> anyhow::Result<Learner> {
    let Some(path) = path else {
        return Ok(Learner::new());
    };
    if !path.exists() {
        return Ok(Learner::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read memory file '{}'", path.display()))?;
    let memory: PatternMemory = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid memory file '{}'", path.display()))?;
    Ok(Learner::with_memory(memory))
}

fn save_memory(path: &Path, memory: &PatternMemory) -> anyhow::Result<()> {
    let raw = serde_json::to_string_pretty(memory)?;
    std::fs::write(path, raw)
        .with_context(|| format!("Failed to write memory file '{}'", path.display()))?;
    Ok(())
}

fn print_result(result: &AggregatedResult) {
    println!("# {}\n", result.goal);
    if !result.summary.is_empty() {
        println!("{}\n", result.summary);
    }
    if !result.content.is_empty() {
        println!("{}\n", result.content);
    }
    if !result.next_steps.is_empty() {
        println!("Next steps:");
        for step in &result.next_steps {
            println!("- {step}");
        }
    }
    if !result.artifacts.is_empty() {
        println!("\nArtifacts:");
        for artifact in &result.artifacts {
            println!("- {} ({:?})", artifact.name, artifact.kind);
        }
    }
}
