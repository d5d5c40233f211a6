//! `hive` binary: runs a manager/worker topology described in a TOML file.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use hive_core::{TaskId, TaskPriority};
use hive_scheduler::{HiveSystem, SchedulerConfig, SystemStats, TaskSpec};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hive", about = "Hierarchical task scheduler")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "hive.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the configured managers and workers and submit the configured tasks
    Run {
        /// Stop after this many seconds even if tasks are still running
        #[arg(short, long, default_value_t = 60)]
        duration: u64,
        /// Seconds between progress reports
        #[arg(long, default_value_t = 5)]
        report_every: u64,
    },
    /// Validate the config file and print it with defaults filled in
    Config,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HiveConfig {
    #[serde(default)]
    scheduler: SchedulerConfig,
    #[serde(default)]
    managers: Vec<ManagerEntry>,
    #[serde(default)]
    workers: Vec<WorkerEntry>,
    #[serde(default)]
    tasks: Vec<TaskEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManagerEntry {
    id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WorkerEntry {
    id: String,
    agent_type: String,
    capabilities: Vec<String>,
    manager: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TaskEntry {
    title: String,
    #[serde(default)]
    description: String,
    task_type: String,
    #[serde(default)]
    priority: TaskPriority,
    manager: String,
    #[serde(default)]
    estimated_duration: Option<f64>,
    /// Titles of earlier tasks of the same manager.
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default = "default_retryable")]
    retryable: bool,
}

fn default_retryable() -> bool {
    true
}

impl HiveConfig {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: HiveConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.scheduler.validate()?;

        let mut managers = HashSet::new();
        for manager in &self.managers {
            if !managers.insert(manager.id.as_str()) {
                bail!("manager '{}' is declared twice", manager.id);
            }
        }

        let mut workers = HashSet::new();
        for worker in &self.workers {
            if !workers.insert(worker.id.as_str()) {
                bail!("worker '{}' is declared twice", worker.id);
            }
            if !managers.contains(worker.manager.as_str()) {
                bail!(
                    "worker '{}' reports to unknown manager '{}'",
                    worker.id,
                    worker.manager
                );
            }
        }

        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        for task in &self.tasks {
            if !managers.contains(task.manager.as_str()) {
                bail!(
                    "task '{}' belongs to unknown manager '{}'",
                    task.title,
                    task.manager
                );
            }
            for dep in &task.depends_on {
                if !seen.contains(&(task.manager.as_str(), dep.as_str())) {
                    bail!(
                        "task '{}' depends on '{}', which is not an earlier task of manager '{}'",
                        task.title,
                        dep,
                        task.manager
                    );
                }
            }
            if !seen.insert((task.manager.as_str(), task.title.as_str())) {
                bail!(
                    "task title '{}' is used twice for manager '{}'",
                    task.title,
                    task.manager
                );
            }
        }
        Ok(())
    }
}

async fn load_config(path: &Path) -> anyhow::Result<HiveConfig> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    HiveConfig::parse(&raw).with_context(|| format!("Invalid config file '{}'", path.display()))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(&cli.config).await?;

    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Run {
            duration,
            report_every,
        } => {
            let stats = run(
                config,
                Duration::from_secs(duration),
                Duration::from_secs(report_every.max(1)),
            )
            .await?;
            println!("{}", stats.to_json()?);
        }
    }

    Ok(())
}

async fn run(
    config: HiveConfig,
    limit: Duration,
    report_every: Duration,
) -> anyhow::Result<SystemStats> {
    let mut system = HiveSystem::new(config.scheduler)?;
    for manager in &config.managers {
        system.create_manager(manager.id.as_str())?;
    }
    for worker in config.workers {
        system
            .create_worker(
                worker.id,
                worker.agent_type,
                worker.capabilities,
                &worker.manager,
            )
            .await?;
    }

    let mut ids: HashMap<(String, String), TaskId> = HashMap::new();
    for task in config.tasks {
        let Some(manager) = system.manager(&task.manager) else {
            bail!("unknown manager '{}'", task.manager);
        };
        let dependencies = task
            .depends_on
            .iter()
            .filter_map(|dep| ids.get(&(task.manager.clone(), dep.clone())).copied())
            .collect();
        let mut spec = TaskSpec::new(
            task.title.as_str(),
            task.description,
            task.task_type,
            task.priority,
        )
        .with_dependencies(dependencies)
        .retryable(task.retryable);
        if let Some(estimate) = task.estimated_duration {
            spec = spec.with_estimated_duration(estimate);
        }
        let task_id = manager.try_create_task(spec).await?;
        ids.insert((task.manager, task.title), task_id);
    }
    info!(
        managers = config.managers.len(),
        tasks = ids.len(),
        "Topology started"
    );

    let deadline = tokio::time::sleep(limit);
    tokio::pin!(deadline);
    let mut report = tokio::time::interval(report_every);
    loop {
        tokio::select! {
            _ = &mut deadline => {
                warn!(limit_secs = limit.as_secs(), "Time limit reached with tasks outstanding");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted");
                break;
            }
            _ = report.tick() => {
                let stats = system.get_system_stats();
                info!(
                    queued = stats.queued_tasks,
                    completed = stats.completed_tasks,
                    failed = stats.failed_tasks,
                    blocked = stats.blocked_tasks,
                    total = stats.total_tasks,
                    "Progress"
                );
                if stats.is_settled() {
                    if stats.blocked_tasks > 0 {
                        warn!(
                            blocked = stats.blocked_tasks,
                            "Stopping with tasks blocked behind failed or cancelled dependencies"
                        );
                    }
                    break;
                }
            }
        }
    }

    let stats = system.get_system_stats();
    system.shutdown().await;
    Ok(stats)
}
