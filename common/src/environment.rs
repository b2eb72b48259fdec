// Execution environment provisioning
//
// Every run gets a fresh copy of the project directory and a verified
// runtime. Nothing from a previous run's workspace is visible to the next.

use crate::config::{RuntimeConfig, WorkspaceConfig};
use crate::errors::ProvisionError;
use lazy_static::lazy_static;
use regex::Regex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

lazy_static! {
    static ref VERSION_PATTERN: Regex =
        Regex::new(r"(\d+(?:\.\d+)+)").expect("Invalid regex pattern");
}

/// A provisioned, run-private copy of the project
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    keep: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the workspace directory unless configured to keep it
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn cleanup(self) {
        if self.keep {
            info!("Keeping workspace");
            return;
        }
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            warn!(error = %e, "Failed to remove workspace");
        } else {
            debug!("Workspace removed");
        }
    }
}

/// Provisioner creates run workspaces from the project directory
#[derive(Debug, Clone)]
pub struct Provisioner {
    config: WorkspaceConfig,
}

impl Provisioner {
    pub fn new(config: WorkspaceConfig) -> Self {
        Self { config }
    }

    /// Create `<root>/<run_id>` and copy the project into it
    #[instrument(skip(self), fields(project_dir = %self.config.project_dir.display()))]
    pub async fn provision(&self, run_id: Uuid) -> Result<Workspace, ProvisionError> {
        let project_dir = &self.config.project_dir;
        if !tokio::fs::metadata(project_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(ProvisionError::ProjectDirMissing(project_dir.clone()));
        }

        let path = self.config.root.join(run_id.to_string());
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ProvisionError::WorkspaceIo {
                path,
                reason: "workspace already exists".to_string(),
            });
        }
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| workspace_error(&path, e))?;

        // The workspace root may live inside the project; never copy it into itself
        let skip_root = tokio::fs::canonicalize(&self.config.root).await.ok();
        let workspace = Workspace {
            path: path.clone(),
            keep: self.config.keep,
        };

        if let Err(e) = copy_tree(
            project_dir.clone(),
            path.clone(),
            self.config.exclude.clone(),
            skip_root,
        )
        .await
        {
            workspace.cleanup().await;
            return Err(e);
        }

        info!(workspace = %path.display(), "Workspace provisioned");
        Ok(workspace)
    }
}

fn copy_tree(
    from: PathBuf,
    to: PathBuf,
    exclude: Vec<String>,
    skip: Option<PathBuf>,
) -> Pin<Box<dyn Future<Output = Result<(), ProvisionError>> + Send>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(&from)
            .await
            .map_err(|e| workspace_error(&from, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| workspace_error(&from, e))?
        {
            let name = entry.file_name();
            if exclude.iter().any(|ex| name.to_str() == Some(ex.as_str())) {
                continue;
            }

            let source = entry.path();
            let target = to.join(&name);
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| workspace_error(&source, e))?;

            if file_type.is_dir() {
                if let Some(skip) = &skip {
                    if tokio::fs::canonicalize(&source).await.ok().as_ref() == Some(skip) {
                        continue;
                    }
                }
                tokio::fs::create_dir_all(&target)
                    .await
                    .map_err(|e| workspace_error(&target, e))?;
                copy_tree(source, target, exclude.clone(), skip.clone()).await?;
            } else {
                // Files and symlinks are copied by content
                tokio::fs::copy(&source, &target)
                    .await
                    .map_err(|e| workspace_error(&source, e))?;
            }
        }

        Ok(())
    })
}

fn workspace_error(path: &Path, e: std::io::Error) -> ProvisionError {
    ProvisionError::WorkspaceIo {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// A runtime whose version matched the pin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedRuntime {
    pub interpreter: String,
    pub version: String,
}

/// RuntimeProbe checks that the configured interpreter has the pinned version
#[derive(Debug, Clone)]
pub struct RuntimeProbe {
    config: RuntimeConfig,
}

impl RuntimeProbe {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    #[instrument(skip(self), fields(interpreter = %self.config.interpreter, pinned = %self.config.version))]
    pub async fn verify(&self) -> Result<VerifiedRuntime, ProvisionError> {
        let output = Command::new(&self.config.interpreter)
            .args(&self.config.version_args)
            .output()
            .await
            .map_err(|e| ProvisionError::RuntimeUnavailable {
                interpreter: self.config.interpreter.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ProvisionError::RuntimeUnavailable {
                interpreter: self.config.interpreter.clone(),
                reason: format!("version probe exited with {}", output.status),
            });
        }

        // Older interpreters print their version on stderr
        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let found = extract_version(&text)
            .ok_or_else(|| ProvisionError::VersionUnreadable(text.trim().to_string()))?;

        if !version_matches(&self.config.version, &found) {
            return Err(ProvisionError::RuntimeVersionMismatch {
                expected: self.config.version.clone(),
                found,
            });
        }

        info!(version = %found, "Runtime verified");
        Ok(VerifiedRuntime {
            interpreter: self.config.interpreter.clone(),
            version: found,
        })
    }
}

/// First dotted version number in `text`
pub fn extract_version(text: &str) -> Option<String> {
    VERSION_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Component-wise prefix match: "3.10" matches "3.10.12" but not "3.1.0" or "3.11"
pub fn version_matches(pinned: &str, found: &str) -> bool {
    let pinned: Vec<&str> = pinned.split('.').collect();
    let found: Vec<&str> = found.split('.').collect();

    pinned.len() <= found.len()
        && pinned.iter().zip(found.iter()).all(|(p, f)| {
            match (p.parse::<u64>(), f.parse::<u64>()) {
                (Ok(p), Ok(f)) => p == f,
                _ => p == f,
            }
        })
}
