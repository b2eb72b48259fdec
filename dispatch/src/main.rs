// Manual dispatch binary entry point
// Runs the job pipeline once and exits with the run's exit code

use common::bootstrap::{init_observability, init_pipeline, load_settings};
use common::models::TriggerSource;
use common::pipeline::JobRunner;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings()?;
    init_observability(&settings)?;

    info!(job = %settings.job.name, "Manual dispatch requested");

    let pipeline = init_pipeline(&settings).map_err(|e| {
        error!(error = %e, "Failed to initialize job pipeline");
        e
    })?;

    let run = pipeline.run(TriggerSource::Manual).await;
    let code = run.process_exit_code();

    if run.is_success() {
        info!(run_id = %run.id, "Manual dispatch finished");
    } else {
        error!(
            run_id = %run.id,
            exit_code = code,
            error = run.error.as_deref().unwrap_or_default(),
            "Manual dispatch failed"
        );
    }

    std::process::exit(code);
}
