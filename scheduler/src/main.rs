// Scheduler binary entry point
// Runs the job pipeline on its recurring schedule until SIGINT/SIGTERM

use anyhow::Context;
use chrono::Utc;
use common::bootstrap::{init_observability, init_pipeline, load_settings};
use common::scheduler::{Scheduler, SchedulerConfig, SchedulerEngine};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let settings = load_settings()?;

    // Initialize tracing/logging and metrics
    init_observability(&settings)?;

    info!(
        job = %settings.job.name,
        cron = %settings.schedule.cron,
        timezone = %settings.schedule.timezone,
        "Starting job scheduler"
    );

    // Assemble the job pipeline
    let pipeline = init_pipeline(&settings).map_err(|e| {
        error!(error = %e, "Failed to initialize job pipeline");
        e
    })?;

    // Create scheduler engine
    let scheduler_config = SchedulerConfig::from_settings(&settings.schedule)
        .context("Invalid schedule configuration")?;
    let scheduler = Arc::new(
        SchedulerEngine::new(scheduler_config, Arc::new(pipeline), Utc::now())
            .context("Failed to create scheduler engine")?,
    );
    let next_due = scheduler.next_due().await;
    info!(next_due = %next_due, "Scheduler engine created");

    // Set up graceful shutdown
    let scheduler_for_shutdown = scheduler.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal, finishing in-flight run");
        scheduler_for_shutdown.stop().await;
    });

    // Start the scheduler
    info!("Starting scheduler polling loop");
    scheduler.start().await;

    info!("Scheduler stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
