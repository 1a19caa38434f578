use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use epm_process_management::{ExeProcessManager, ProcmanConfig};
use epm_resource_monitor::SysinfoMetrics;
use epm_scheduler::{Scheduler, SchedulerConfig};

/// EPM Process Manager - supervises the executables listed in a YAML file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Run duration in seconds (for testing)
    #[arg(long)]
    run_duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration first so its log level can apply
    let config = ProcmanConfig::load_from_file(&args.config)?;
    let level = if args.debug {
        "debug"
    } else {
        config.process_manager.log_level.as_str()
    };
    initialize_logging(level)?;

    info!("Starting EPM Process Manager");
    info!("Config file: {}", args.config);
    info!("Loaded configuration for {} processes", config.processes.len());

    let options = &config.process_manager;
    let mut manager = ExeProcessManager::with_os_controller(options.to_manager_options());
    if options.metrics_enabled {
        manager = manager.with_metrics(Arc::new(SysinfoMetrics::new()));
    }
    let manager = Arc::new(manager);

    for record in config.records() {
        manager
            .add_process(record)
            .context("Failed to register process")?;
    }

    let scheduler = Arc::new(
        Scheduler::new(SchedulerConfig {
            poll_interval: options.scheduler_poll_interval,
            ..Default::default()
        })
        .with_target(manager.clone()),
    );
    for schedule in &config.schedules {
        let trigger = schedule.trigger()?;
        manager
            .schedule(&scheduler, &schedule.process, schedule.action, trigger)
            .with_context(|| format!("Failed to schedule {} of {}", schedule.action, schedule.process))?;
    }

    let started = manager.start_many(config.autostart_names()).await;
    for (name, e) in &started.failed {
        error!("Failed to start process {}: {}", name, e);
    }
    info!("Started {} processes", started.succeeded.len());

    let monitor = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run_monitor().await })
    };
    let scheduler_token = CancellationToken::new();
    let scheduler_task = {
        let scheduler = Arc::clone(&scheduler);
        let token = scheduler_token.clone();
        tokio::spawn(async move { scheduler.run(token).await })
    };

    // Wait for shutdown signal or run duration
    if let Some(duration) = args.run_duration {
        info!("Running for {} seconds (test mode)", duration);
        tokio::time::sleep(Duration::from_secs(duration)).await;
    } else {
        wait_for_shutdown_signal().await?;
    }

    info!("Shutting down process manager...");
    scheduler_token.cancel();
    if let Err(e) = scheduler_task.await {
        warn!("Scheduler task ended abnormally: {}", e);
    }

    let report = manager.graceful_shutdown(options.shutdown_timeout).await;
    if let Err(e) = monitor.await {
        warn!("Monitor task ended abnormally: {}", e);
    }

    if !report.is_success() {
        for (name, e) in &report.failed {
            error!("Failed to stop process {}: {}", name, e);
        }
        anyhow::bail!("{} processes did not stop cleanly", report.failed.len());
    }

    info!("Process manager shut down successfully");
    Ok(())
}

fn initialize_logging(level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .with_thread_ids(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM signal"),
        _ = sigint.recv() => info!("Received SIGINT signal"),
    }
    Ok(())
}
