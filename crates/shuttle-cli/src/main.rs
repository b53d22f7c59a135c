//! shuttle - runs a demo workload through the scheduler.
//!
//! Ctrl-C stops the scheduler cooperatively: running bodies finish, then
//! checkpoints and the summary report are written.

mod cli;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use serde_json::json;
use tracing::{info, warn};

use shuttle_core::{
    Config, RateLimitConfig, RateLimiter, Scheduler, SchedulerBuilder, Task, TaskFailure,
};

use cli::{Cli, Command};

const UPSTREAM_LIMIT: &str = "upstream";

fn setup_logging(verbose: bool) {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => Config::load(path).context(format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(workers) = cli.workers {
        config.scheduler.max_workers = workers;
    }
    config.validate().context("Invalid configuration")?;

    match cli.command.unwrap_or_default() {
        Command::Demo { fanout, timeout_secs } => {
            cmd_demo(&config, fanout, Duration::from_secs(timeout_secs)).await
        }
        Command::ClearCheckpoints => cmd_clear_checkpoints(&config).await,
    }
}

async fn cmd_demo(config: &Config, fanout: usize, timeout: Duration) -> Result<()> {
    let scheduler = SchedulerBuilder::from_config(config.scheduler.clone())
        .build()
        .context("Failed to build scheduler")?;

    let limiters = config.rate_limiters()?;
    let upstream = match limiters.get(UPSTREAM_LIMIT) {
        Some(limiter) => Arc::clone(limiter),
        None => Arc::new(RateLimiter::new(RateLimitConfig::sliding_window(
            5,
            Duration::from_secs(1),
        ))?),
    };

    add_demo_tasks(&scheduler, upstream, fanout)?;

    scheduler.start().await.context("Failed to start scheduler")?;
    tokio::select! {
        res = scheduler.wait_for_idle(timeout) => match res {
            Ok(()) => info!("workload idle"),
            Err(e) => warn!(error = %e, "workload did not settle"),
        },
        _ = tokio::signal::ctrl_c() => info!("interrupted, stopping"),
    }
    scheduler.stop().await.context("Failed to stop scheduler")?;

    let counts = scheduler.counts();
    println!(
        "completed={} failed={} pending={} retrying={}",
        counts.completed, counts.failed, counts.pending, counts.retrying
    );
    for id in scheduler.blocked_tasks() {
        println!("blocked: {id}");
    }
    if let Some(path) = scheduler.generate_summary_report().await.context("Failed to write report")? {
        println!("report: {}", path.display());
    }
    Ok(())
}

async fn cmd_clear_checkpoints(config: &Config) -> Result<()> {
    let scheduler = SchedulerBuilder::from_config(config.scheduler.clone()).build()?;
    scheduler.clear_checkpoints().await.context("Failed to clear checkpoints")?;
    println!("checkpoints cleared");
    Ok(())
}

/// Dependency chain, a flaky task, a blocking task and a rate-limited fan-out.
fn add_demo_tasks(scheduler: &Scheduler, upstream: Arc<RateLimiter>, fanout: usize) -> Result<()> {
    let extract = scheduler.add_task(Task::new("extract", || async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(json!({"rows": 42}))
    })?)?;
    let transform = scheduler.add_task(
        Task::builder("transform", || async { Ok(json!({"rows": 40, "dropped": 2})) })
            .depends_on(extract)
            .build()?,
    )?;

    // Fails twice, then succeeds on the third attempt.
    let remaining_failures = Arc::new(AtomicU32::new(2));
    let flaky = scheduler.add_task(
        Task::builder("flaky", move || {
            let remaining_failures = Arc::clone(&remaining_failures);
            async move {
                let left = remaining_failures.load(Ordering::SeqCst);
                if left > 0 {
                    remaining_failures.fetch_sub(1, Ordering::SeqCst);
                    return Err(TaskFailure::new(format!("intentional failure (left={left})")));
                }
                Ok(json!("recovered"))
            }
        })
        .max_retries(3)
        .retry_interval(Duration::from_millis(200))
        .priority(5)
        .build()?,
    )?;

    let checksum = scheduler.add_task(
        Task::blocking("checksum", || {
            let sum: u64 = (1..=1_000_000u64).sum();
            Ok(json!(sum))
        })
        .build()?,
    )?;

    let mut fetches = Vec::with_capacity(fanout);
    for i in 0..fanout {
        let upstream = Arc::clone(&upstream);
        let id = scheduler.add_task(
            Task::builder(format!("fetch-{i}"), move || {
                let upstream = Arc::clone(&upstream);
                async move {
                    if let Err(e) = upstream.wait(Some(Duration::from_secs(30))).await {
                        return Err(TaskFailure::from(e));
                    }
                    Ok(json!({"page": i}))
                }
            })
            .build()?,
        )?;
        fetches.push(id);
    }

    scheduler.add_task(
        Task::builder("load", || async { Ok(json!("loaded")) })
            .depends_on(transform)
            .depends_on(flaky)
            .depends_on(checksum)
            .dependencies(fetches)
            .build()?,
    )?;
    Ok(())
}
