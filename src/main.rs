//! # JobClaw: durable job orchestration
//!
//! Usage:
//!   jobclaw serve                          # Scheduler + workers in one process
//!   jobclaw scheduler                      # Scheduler loop only
//!   jobclaw worker --workers 8             # Workers only
//!   jobclaw job save digest.toml --actor ops
//!   jobclaw job trigger digest --inputs '{"dry": true}'
//!   jobclaw approvals list --status pending
//!   jobclaw health

mod builtin;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use jobclaw_core::config::JobClawConfig;
use jobclaw_core::traits::{InputValidator, Store};
use jobclaw_core::types::{ApprovalStatus, JobSpec};
use jobclaw_scheduler::{
    CronSchedule, Dispatch, Provenance, Runner, Scheduler, Services, SkillRegistry, Toolbox,
};
use jobclaw_store::{FallbackStore, StoreHealth};
use jobclaw_tools::{ToolPolicy, ToolRegistry};

#[derive(Parser)]
#[command(
    name = "jobclaw",
    version,
    about = "⏰ JobClaw: schedules, queues, retries, approvals and cooldowns"
)]
struct Cli {
    /// Config file (defaults to $JOBCLAW_CONFIG or ~/.jobclaw/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and workers together
    Serve {
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Run only the scheduler loop
    Scheduler,
    /// Run only workers
    Worker {
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Manage job specs
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
    /// Inspect and decide approval requests
    Approvals {
        #[command(subcommand)]
        action: ApprovalAction,
    },
    /// Most recent runs
    Runs {
        /// Only runs of this job (from its history ring)
        #[arg(long)]
        job: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Observability log, newest first
    Events {
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Only events from the last N minutes
        #[arg(long)]
        since_mins: Option<i64>,
    },
    /// Store, queue and heartbeat status
    Health,
}

#[derive(Subcommand)]
enum JobAction {
    /// Save a spec from a TOML or JSON file as a new version
    Save {
        file: PathBuf,
        #[arg(long, default_value = "cli")]
        actor: String,
        #[arg(long, default_value = "")]
        note: String,
        /// Enable the job right away
        #[arg(long)]
        enable: bool,
    },
    Show { job_id: String },
    Enable { job_id: String },
    Disable { job_id: String },
    Versions {
        job_id: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    Rollback {
        job_id: String,
        version_id: String,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
    /// Dispatch now, bypassing schedule, cooldown and pressure
    Trigger {
        job_id: String,
        /// JSON object merged over the spec's inputs
        #[arg(long)]
        inputs: Option<String>,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
}

#[derive(Subcommand)]
enum ApprovalAction {
    List {
        /// pending | approved | rejected
        #[arg(long)]
        status: Option<ApprovalStatus>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    Decide {
        approval_id: String,
        /// approved | rejected
        decision: ApprovalStatus,
        #[arg(long, default_value = "cli")]
        actor: String,
        #[arg(long)]
        note: Option<String>,
    },
}

/// Everything a process role needs, built once from config.
struct App {
    config: JobClawConfig,
    store: Arc<FallbackStore>,
    services: Services,
    toolbox: Toolbox,
    instance: String,
}

impl App {
    fn build(config: JobClawConfig) -> Result<Self> {
        let store = jobclaw_store::open(&config.store).context("opening store")?;
        let skills = Arc::new(SkillRegistry::from_config(&config));
        let handlers = Arc::new(builtin::handlers(skills.clone()));
        let validator: Arc<dyn InputValidator> = handlers.clone();
        let shared: Arc<dyn Store> = store.clone();
        let services = Services::new(shared, &config, Some(validator));
        let toolbox = Toolbox {
            handlers,
            tools: Arc::new(ToolRegistry::new()),
            policy: Arc::new(ToolPolicy::from_config(&config)),
            skills,
        };
        let instance = config.scheduler.instance_id.clone().unwrap_or_else(host_name);
        Ok(Self {
            config,
            store,
            services,
            toolbox,
            instance,
        })
    }

    fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.services.clone(), self.config.scheduler.clone(), &self.instance)
    }

    fn worker_id(&self, n: usize) -> String {
        format!("{}-{n}", self.instance)
    }

    fn runners(&self, count: usize) -> Vec<Runner> {
        (0..count)
            .map(|n| {
                Runner::new(
                    &self.worker_id(n),
                    self.services.clone(),
                    self.toolbox.clone(),
                    self.config.failure,
                    self.config.runner.clone(),
                )
                .with_heartbeat_ttl(self.config.scheduler.heartbeat_ttl_sec)
            })
            .collect()
    }
}

#[derive(Serialize)]
struct HealthReport {
    store: StoreHealth,
    queue_depth: usize,
    delayed: usize,
    scheduler: Option<String>,
    workers: Vec<(String, Option<String>)>,
}

fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "jobclaw".to_string())
}

fn init_tracing(config: &JobClawConfig, json: bool, verbose: bool) {
    let level = if verbose { "debug" } else { config.log.level.as_str() };
    let default = ["jobclaw", "jobclaw_core", "jobclaw_store", "jobclaw_tools", "jobclaw_scheduler"]
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if json || config.log.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

fn load_config(path: Option<&str>) -> Result<JobClawConfig> {
    let config = match path {
        Some(p) => {
            let expanded = shellexpand::tilde(p).to_string();
            JobClawConfig::load_from(Path::new(&expanded))?
        }
        None => JobClawConfig::load()?,
    };
    Ok(config)
}

fn read_spec(file: &Path) -> Result<JobSpec> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let spec = match file.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?,
        _ => serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?,
    };
    Ok(spec)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("❌ Failed to listen for Ctrl-C: {e}");
            return;
        }
        tracing::info!("🛑 Shutdown requested");
        let _ = tx.send(true);
    });
    rx
}

async fn run_processes(app: &App, scheduler: bool, workers: usize) -> Result<()> {
    let shutdown = shutdown_signal();
    let mut tasks = Vec::new();
    if scheduler {
        let sched = app.scheduler();
        let rx = shutdown.clone();
        tasks.push(tokio::spawn(async move { sched.run(rx).await }));
    }
    for runner in app.runners(workers) {
        let rx = shutdown.clone();
        tasks.push(tokio::spawn(async move { runner.run(rx).await }));
    }
    tracing::info!(
        "🚀 JobClaw '{}' running on {} store ({} worker(s){})",
        app.instance,
        app.store.name(),
        workers,
        if scheduler { " + scheduler" } else { "" }
    );
    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            tracing::error!("❌ Task ended abnormally: {e}");
        }
    }
    Ok(())
}

fn run_job(app: &App, action: JobAction) -> Result<()> {
    let registry = &app.services.registry;
    match action {
        JobAction::Save { file, actor, note, enable } => {
            let spec = read_spec(&file)?;
            let job_id = spec.job_id.clone();
            let version = registry.save(&job_id, spec, &Provenance::new("cli", &actor, &note))?;
            if enable {
                registry.enable(&job_id)?;
            }
            println!("✅ Saved '{job_id}' as version {}", version.version_id);
        }
        JobAction::Show { job_id } => match registry.get(&job_id)? {
            Some(spec) => {
                print_json(&spec)?;
                println!("enabled: {}", registry.is_enabled(&job_id)?);
                if let Some(expr) = spec.cron_expression() {
                    match CronSchedule::parse(expr).and_then(|c| c.next_after(Utc::now())) {
                        Some(next) => println!("next cron fire: {}", next.format("%Y-%m-%d %H:%M UTC")),
                        None => println!("next cron fire: none within a year"),
                    }
                }
                let failures = app.services.failures.get(&job_id)?;
                println!(
                    "consecutive failures: {}, cooldown: {}s",
                    failures.consecutive_failures,
                    app.services.failures.get_cooldown_remaining(&job_id)?
                );
            }
            None => bail!("job '{job_id}' not found"),
        },
        JobAction::Enable { job_id } => {
            registry.enable(&job_id)?;
            println!("▶️ Enabled '{job_id}'");
        }
        JobAction::Disable { job_id } => {
            if registry.disable(&job_id)? {
                println!("⏸️ Disabled '{job_id}'");
            } else {
                println!("'{job_id}' was not enabled");
            }
        }
        JobAction::Versions { job_id, limit } => {
            for v in registry.list_versions(&job_id, limit)? {
                println!(
                    "{}  {}  {} via {}  {}",
                    v.version_id,
                    v.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    v.actor,
                    v.source,
                    v.note
                );
            }
        }
        JobAction::Rollback { job_id, version_id, actor } => {
            registry.rollback(&job_id, &version_id, &Provenance::new("cli", &actor, "rollback"))?;
            println!("⏪ '{job_id}' rolled back to {version_id}");
        }
        JobAction::Trigger { job_id, inputs, actor } => {
            let inputs = inputs
                .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
                .transpose()
                .context("--inputs must be JSON")?;
            match app.scheduler().trigger(&job_id, inputs, &actor)? {
                Dispatch::Dispatched { run_id } => println!("🚀 Dispatched run {run_id}"),
                Dispatch::Skipped(reason) => println!("⏭️ Not dispatched: {reason}"),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config, cli.json_logs, cli.verbose);

    let app = App::build(config)?;
    match cli.command {
        Command::Serve { workers } => {
            let n = workers.unwrap_or(app.config.runner.workers);
            run_processes(&app, true, n).await?;
        }
        Command::Scheduler => run_processes(&app, true, 0).await?,
        Command::Worker { workers } => {
            let n = workers.unwrap_or(app.config.runner.workers);
            if n == 0 {
                bail!("--workers must be at least 1");
            }
            run_processes(&app, false, n).await?;
        }
        Command::Job { action } => run_job(&app, action)?,
        Command::Approvals { action } => match action {
            ApprovalAction::List { status, limit } => {
                print_json(&app.services.approvals.list(status, limit)?)?;
            }
            ApprovalAction::Decide { approval_id, decision, actor, note } => {
                let decided = app
                    .services
                    .approvals
                    .decide(&approval_id, decision, &actor, note.as_deref())?;
                println!("✅ Approval {} is now {}", decided.approval_id, decided.status);
            }
        },
        Command::Runs { job, limit } => match job {
            Some(job_id) => print_json(&app.services.queue.job_history(&job_id, limit)?)?,
            None => print_json(&app.services.queue.recent_runs(limit)?)?,
        },
        Command::Events { limit, since_mins } => {
            let since = since_mins.map(|m| chrono::Utc::now() - chrono::Duration::minutes(m));
            print_json(&app.services.queue.get_events(limit, since)?)?;
        }
        Command::Health => {
            let queue = &app.services.queue;
            let scheduler_name = format!("scheduler:{}", app.instance);
            let mut workers = Vec::new();
            for n in 0..app.config.runner.workers {
                let name = format!("worker:{}", app.worker_id(n));
                let seen = queue.last_heartbeat(&name)?.map(|t| t.to_rfc3339());
                workers.push((name, seen));
            }
            print_json(&HealthReport {
                store: app.store.health(),
                queue_depth: queue.depth()?,
                delayed: queue.delayed_count()?,
                scheduler: queue.last_heartbeat(&scheduler_name)?.map(|t| t.to_rfc3339()),
                workers,
            })?;
        }
    }
    Ok(())
}
