//! cadence - A scheduled-job controller.
//!
//! Usage:
//!   cadence run <schedules-dir>       Reconcile schedules from the directory until stopped
//!   cadence validate <schedules-dir>  Validate schedule manifests without running
//!   cadence list <schedules-dir>      List schedules and their upcoming firings
//!   cadence evaluate <expression>     Show which firings of an expression are unmet

use cadence::config::CONTROLLER_CONFIG_FILE;
use cadence::core::evaluator::latest_missed_binary_search;
use cadence::metrics::{MetricsHandler, describe_metrics};
use cadence::{
    ControllerConfig, Event, EventBus, EventHandler, InMemoryStorage, Schedule,
    ScheduleManifestBuilder, Scheduler, Storage, YamlLoader, load_schedules_from_directory,
    unmet_firings,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// cadence - A scheduled-job controller
#[derive(Parser)]
#[command(name = "cadence")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile schedules from a directory until interrupted
    Run {
        /// Path to the directory containing schedule YAML files
        #[arg(value_name = "SCHEDULES_DIR")]
        schedules_dir: PathBuf,

        /// Controller settings file (default: <SCHEDULES_DIR>/cadence.yaml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Schedules reconciled concurrently
        #[arg(short = 'w', long)]
        workers: Option<usize>,

        /// Seconds between reconciliation passes
        #[arg(long)]
        tick_interval: Option<u64>,

        /// Time budget for one pass in seconds
        #[arg(long)]
        pass_timeout: Option<u64>,
    },

    /// Validate schedule manifests without running
    Validate {
        /// Path to the directory containing schedule YAML files
        #[arg(value_name = "SCHEDULES_DIR")]
        schedules_dir: PathBuf,
    },

    /// List schedules and their upcoming firings
    List {
        /// Path to the directory containing schedule YAML files
        #[arg(value_name = "SCHEDULES_DIR")]
        schedules_dir: PathBuf,

        /// Number of upcoming firings to show per schedule
        #[arg(short = 'n', long, default_value = "3")]
        count: usize,
    },

    /// Show the unmet firings of an expression between two instants
    Evaluate {
        /// Cron expression or shortcut
        #[arg(value_name = "EXPRESSION")]
        expression: String,

        /// Last time the schedule was acted on (RFC 3339)
        #[arg(long)]
        since: DateTime<Utc>,

        /// Evaluation time (RFC 3339, default: now)
        #[arg(long)]
        now: Option<DateTime<Utc>>,

        /// IANA time zone the expression is evaluated in
        #[arg(long, default_value = "UTC")]
        time_zone: String,

        /// Starting deadline in seconds
        #[arg(long)]
        deadline: Option<u64>,

        /// Unmet firings tolerated before giving up
        #[arg(long, default_value = "100")]
        max_missed: usize,
    },
}

/// Logging event handler for decisions and finished children.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::FiringInvoked {
                schedule,
                child,
                scheduled_time,
                replaced,
                ..
            } => {
                if replaced.is_empty() {
                    info!("'{}' launched '{}' for {}", schedule, child, scheduled_time);
                } else {
                    info!(
                        "'{}' launched '{}' for {}, replacing {}",
                        schedule,
                        child,
                        scheduled_time,
                        replaced.join(", ")
                    );
                }
            }
            Event::FiringSkipped {
                schedule,
                reason,
                scheduled_time,
                detail,
                ..
            } => {
                let when = scheduled_time
                    .map(|t| format!(" for {}", t))
                    .unwrap_or_default();
                let detail = detail
                    .as_deref()
                    .map(|d| format!(": {}", d))
                    .unwrap_or_default();
                warn!("'{}' skipped{} ({}){}", schedule, when, reason, detail);
            }
            Event::ChildFinished {
                schedule,
                child,
                outcome,
                ..
            } => {
                info!("'{}' child '{}' {}", schedule, child, outcome.as_str());
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            schedules_dir,
            config,
            workers,
            tick_interval,
            pass_timeout,
        } => {
            let mut settings = load_controller_config(&schedules_dir, config.as_deref())?;
            if let Some(workers) = workers {
                settings.workers = workers;
            }
            if let Some(secs) = tick_interval {
                settings.tick_interval_secs = secs;
            }
            if pass_timeout.is_some() {
                settings.pass_timeout_secs = pass_timeout;
            }
            run_controller(schedules_dir, settings).await?;
        }
        Commands::Validate { schedules_dir } => {
            validate_schedules(schedules_dir)?;
        }
        Commands::List {
            schedules_dir,
            count,
        } => {
            list_schedules(schedules_dir, count)?;
        }
        Commands::Evaluate {
            expression,
            since,
            now,
            time_zone,
            deadline,
            max_missed,
        } => {
            evaluate(
                &expression,
                &time_zone,
                since,
                now.unwrap_or_else(Utc::now),
                deadline,
                max_missed,
            )?;
        }
    }

    Ok(())
}

/// Controller settings from an explicit file, the directory default, or built-in defaults.
fn load_controller_config(
    schedules_dir: &Path,
    explicit: Option<&Path>,
) -> Result<ControllerConfig, Box<dyn std::error::Error>> {
    if let Some(path) = explicit {
        return Ok(YamlLoader::load_controller_config(path)?);
    }
    let default_path = schedules_dir.join(CONTROLLER_CONFIG_FILE);
    if default_path.is_file() {
        info!("Using controller settings from {}", default_path.display());
        return Ok(YamlLoader::load_controller_config(default_path)?);
    }
    Ok(ControllerConfig::default())
}

/// Run the controller with schedules from a directory.
async fn run_controller(
    schedules_dir: PathBuf,
    settings: ControllerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading schedules from: {}", schedules_dir.display());

    let builder = ScheduleManifestBuilder::new(Utc::now())
        .with_default_time_zone(settings.default_time_zone.clone());
    let schedules = load_schedules_from_directory(&schedules_dir, &builder)?;

    if schedules.is_empty() {
        warn!("No schedule files found in {}", schedules_dir.display());
        return Ok(());
    }

    let storage = InMemoryStorage::new();
    info!("Loaded {} schedule(s):", schedules.len());
    for schedule in schedules {
        let suspended = if schedule.spec.suspend {
            " (suspended)"
        } else {
            ""
        };
        info!(
            "  - {}: '{}' ({}){}",
            schedule.key,
            schedule.spec.schedule,
            schedule.spec.concurrency_policy.as_str(),
            suspended
        );
        storage.upsert_schedule(schedule).await?;
    }

    describe_metrics();
    let event_bus = EventBus::new();
    event_bus.register(Arc::new(LoggingHandler)).await;
    event_bus.register(Arc::new(MetricsHandler::new())).await;

    let mut scheduler = Scheduler::new(storage)
        .with_event_bus(event_bus)
        .with_tick_interval(Duration::from_secs(settings.tick_interval_secs))
        .with_workers(settings.workers)
        .with_max_missed_schedules(settings.max_missed_schedules);
    if let Some(secs) = settings.pass_timeout_secs {
        scheduler = scheduler.with_pass_timeout(Duration::from_secs(secs));
    }

    info!(
        "Starting controller (tick interval: {}s, workers: {})...",
        settings.tick_interval_secs, settings.workers
    );
    info!("Press Ctrl+C to stop");

    let (handle, scheduler_task) = scheduler.start();

    // Wait for Ctrl+C
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            handle.shutdown().await?;
        }
        _ = scheduler_task => {
            info!("Controller stopped");
        }
    }

    Ok(())
}

/// Validate schedule manifests without running.
fn validate_schedules(schedules_dir: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating schedules in: {}", schedules_dir.display());

    match load_schedules_from_directory(&schedules_dir, &ScheduleManifestBuilder::new(Utc::now()))
    {
        Ok(schedules) => {
            info!("All {} schedule(s) are valid:", schedules.len());
            for schedule in &schedules {
                info!("  - {}: OK", schedule.key);
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// List schedules and their next firings.
fn list_schedules(schedules_dir: PathBuf, count: usize) -> Result<(), Box<dyn std::error::Error>> {
    let schedules =
        load_schedules_from_directory(&schedules_dir, &ScheduleManifestBuilder::new(Utc::now()))?;

    if schedules.is_empty() {
        println!("No schedules found in {}", schedules_dir.display());
        return Ok(());
    }

    println!("Schedules in {}:", schedules_dir.display());
    println!();

    let now = Utc::now();
    for schedule in &schedules {
        let spec = &schedule.spec;
        println!("{}", schedule.key);
        println!(
            "  Schedule: {} ({})",
            spec.schedule,
            spec.time_zone.as_deref().unwrap_or("UTC")
        );
        println!("  Concurrency: {}", spec.concurrency_policy.as_str());
        println!("  Suspended: {}", spec.suspend);
        if let Some(deadline) = spec.starting_deadline_seconds {
            println!("  Starting deadline: {}s", deadline);
        }
        println!(
            "  History: {} succeeded, {} failed",
            spec.successful_history_limit(),
            spec.failed_history_limit()
        );

        let parsed = spec.parse_schedule()?;
        println!("  Next firings:");
        for at in parsed.upcoming(now, count) {
            println!("    - {}", at);
        }
        println!();
    }

    Ok(())
}

/// Print the unmet firings of `expression` between `since` and `now`.
fn evaluate(
    expression: &str,
    time_zone: &str,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
    deadline: Option<u64>,
    max_missed: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let schedule = Schedule::with_timezone(expression, time_zone)?;
    let starting_deadline = deadline
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(chrono::Duration::try_seconds);

    println!("Expression: {} ({})", schedule.expression(), schedule.timezone());
    println!("Window: ({}, {}]", since, now);

    match latest_missed_binary_search(&schedule, since, now) {
        Some(latest) => println!("Latest firing in window: {}", latest),
        None => println!("No firing in window"),
    }

    let unmet = unmet_firings(&schedule, since, now, starting_deadline, max_missed)?;
    if let Some(expired) = unmet.expired {
        println!("Latest firing past the starting deadline: {}", expired);
    }
    println!("Unmet firings: {}", unmet.firings.len());
    for at in &unmet.firings {
        println!("  - {}", at);
    }
    if let Some(latest) = unmet.latest() {
        println!("Would act on: {}", latest);
    }
    if let Some(next) = schedule.next_after(now) {
        println!("Next firing: {}", next);
    }

    Ok(())
}
