// Bootstrap utilities for binary initialization
// Shared by the scheduler and dispatch binaries

use crate::cache::DependencyCache;
use crate::config::{Settings, StoreConfig};
use crate::environment::{Provisioner, RuntimeProbe};
use crate::installer::CommandInstaller;
use crate::launcher::CommandLauncher;
use crate::pipeline::{JobPipeline, PipelineParts};
use crate::stores::{EnvStore, LayeredStore, MemoryStore, ValueStore};
use crate::telemetry;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Load settings from `config/` (or `APP_CONFIG_DIR`) and validate them
pub fn load_settings() -> Result<Settings> {
    let config_dir = std::env::var("APP_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let settings =
        Settings::load_from_path(&config_dir).context("Failed to load configuration")?;
    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

/// Initialize logging and, when a port is configured, the metrics exporter
pub fn init_observability(settings: &Settings) -> Result<()> {
    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.json,
    )?;

    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    Ok(())
}

/// Build a store: process environment first, then the optional JSON file
fn build_store(prefix: &str, file: Option<&Path>) -> Result<LayeredStore> {
    let mut store = LayeredStore::new().layer(EnvStore::new(prefix));

    if let Some(path) = file {
        let file_store = MemoryStore::from_json_file(path)?;
        info!(path = %path.display(), entries = file_store.len(), "Loaded store file");
        store = store.layer(file_store);
    }

    Ok(store)
}

/// Initialize the secret and variable stores
#[tracing::instrument(skip(config))]
pub fn init_stores(config: &StoreConfig) -> Result<(Arc<dyn ValueStore>, Arc<dyn ValueStore>)> {
    let secrets = build_store(&config.secret_env_prefix, config.secrets_file.as_deref())
        .context("Failed to initialize secret store")?;
    let variables = build_store(&config.variable_env_prefix, config.variables_file.as_deref())
        .context("Failed to initialize variable store")?;

    Ok((Arc::new(secrets), Arc::new(variables)))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("Failed to resolve {}", path.display()))
}

/// Assemble the job pipeline from settings
///
/// Workspace and cache paths are made absolute because the install and
/// program commands run with the workspace as their working directory.
#[tracing::instrument(skip(settings), fields(job = %settings.job.name))]
pub fn init_pipeline(settings: &Settings) -> Result<JobPipeline> {
    let (secrets, variables) = init_stores(&settings.stores)?;

    let mut workspace = settings.workspace.clone();
    workspace.project_dir = absolute(&workspace.project_dir)?;
    workspace.root = absolute(&workspace.root)?;
    let cache_root = absolute(&settings.dependencies.cache_dir)?;

    let installer = CommandInstaller::new(
        settings.dependencies.install_command.clone(),
        settings.dependencies.cache_env.clone(),
    );
    let launcher = CommandLauncher::new(
        settings.job.program.clone(),
        settings.job.timeout_seconds.map(Duration::from_secs),
    );

    info!(
        workspace_root = %workspace.root.display(),
        cache_root = %cache_root.display(),
        bindings = settings.env.len(),
        "Job pipeline initialized"
    );

    Ok(JobPipeline::new(PipelineParts {
        job_name: settings.job.name.clone(),
        manifest: settings.dependencies.manifest.clone(),
        cache_prefix: settings.dependencies.cache_prefix.clone(),
        bindings: settings.env.clone(),
        provisioner: Provisioner::new(workspace),
        runtime_probe: RuntimeProbe::new(settings.runtime.clone()),
        cache: DependencyCache::new(cache_root),
        installer: Arc::new(installer),
        launcher: Arc::new(launcher),
        secrets,
        variables,
    }))
}
