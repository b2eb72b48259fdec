// Dependency installation
// Runs the configured install command inside the run workspace

use crate::errors::DependencyError;
use crate::models::RunContext;
use crate::substitution::expand_command;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info, instrument};

/// DependencyInstaller installs the manifest's packages for a run
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    async fn install(&self, ctx: &RunContext) -> Result<(), DependencyError>;
}

/// Installs dependencies by running an external command such as pip
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    command: Vec<String>,
    cache_env: String,
}

impl CommandInstaller {
    pub fn new(command: Vec<String>, cache_env: impl Into<String>) -> Self {
        Self {
            command,
            cache_env: cache_env.into(),
        }
    }
}

#[async_trait]
impl DependencyInstaller for CommandInstaller {
    #[instrument(skip(self, ctx), fields(run_id = %ctx.run_id))]
    async fn install(&self, ctx: &RunContext) -> Result<(), DependencyError> {
        let argv = expand_command(&self.command, &ctx.placeholders())
            .map_err(|e| DependencyError::InvalidCommand(e.to_string()))?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| DependencyError::InvalidCommand("command is empty".to_string()))?;

        info!(command = %argv.join(" "), "Installing dependencies");

        let status = Command::new(program)
            .args(args)
            .current_dir(&ctx.workspace)
            .env(&self.cache_env, &ctx.cache_dir)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| DependencyError::SpawnFailed {
                command: program.clone(),
                reason: e.to_string(),
            })?;

        if !status.success() {
            let code = crate::launcher::exit_code(&status);
            error!(code, "Dependency installation failed");
            return Err(DependencyError::InstallFailed { code });
        }

        info!("Dependencies installed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn context(workspace: &Path, cache_dir: &Path) -> RunContext {
        RunContext {
            run_id: Uuid::new_v4(),
            runtime: "sh".to_string(),
            workspace: workspace.to_path_buf(),
            manifest: workspace.join("requirements.txt"),
            cache_dir: cache_dir.to_path_buf(),
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["{runtime}".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_install_runs_in_workspace_with_cache_env() {
        let workspace = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let installer = CommandInstaller::new(
            sh("echo \"$PIP_CACHE_DIR\" > installed.txt"),
            "PIP_CACHE_DIR",
        );

        installer
            .install(&context(workspace.path(), cache.path()))
            .await
            .unwrap();

        let written = std::fs::read_to_string(workspace.path().join("installed.txt")).unwrap();
        assert_eq!(written.trim(), cache.path().display().to_string());
    }

    #[tokio::test]
    async fn test_install_failure_reports_code() {
        let workspace = TempDir::new().unwrap();
        let installer = CommandInstaller::new(sh("exit 3"), "PIP_CACHE_DIR");

        let result = installer
            .install(&context(workspace.path(), workspace.path()))
            .await;
        assert!(matches!(result, Err(DependencyError::InstallFailed { code: 3 })));
    }

    #[tokio::test]
    async fn test_install_unknown_placeholder() {
        let workspace = TempDir::new().unwrap();
        let installer = CommandInstaller::new(vec!["{pip}".to_string()], "PIP_CACHE_DIR");

        let result = installer
            .install(&context(workspace.path(), workspace.path()))
            .await;
        assert!(matches!(result, Err(DependencyError::InvalidCommand(_))));
    }
}
