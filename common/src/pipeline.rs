// Job pipeline: provision → runtime → install → run
//
// Steps run strictly in order on one workspace. The first failure ends the
// run; nothing is retried and the program never starts after a failed step.

use crate::cache::{cache_key, DependencyCache};
use crate::environment::{Provisioner, RuntimeProbe, Workspace};
use crate::errors::{DependencyError, JobError};
use crate::installer::DependencyInstaller;
use crate::launcher::ProgramLauncher;
use crate::manifest::Manifest;
use crate::models::{CacheStatus, EnvBinding, JobRun, RunContext, RunStatus, TriggerSource};
use crate::stores::{resolve_env, ValueStore};
use crate::telemetry;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// JobRunner executes one complete job run for a trigger
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, trigger: TriggerSource) -> JobRun;
}

/// Everything the pipeline needs, assembled by the binaries
pub struct PipelineParts {
    pub job_name: String,
    /// Manifest path relative to the workspace
    pub manifest: PathBuf,
    pub cache_prefix: String,
    pub bindings: Vec<EnvBinding>,
    pub provisioner: Provisioner,
    pub runtime_probe: RuntimeProbe,
    pub cache: DependencyCache,
    pub installer: Arc<dyn DependencyInstaller>,
    pub launcher: Arc<dyn ProgramLauncher>,
    pub secrets: Arc<dyn ValueStore>,
    pub variables: Arc<dyn ValueStore>,
}

/// JobPipeline runs the scheduled job once per call
pub struct JobPipeline {
    parts: PipelineParts,
}

impl JobPipeline {
    pub fn new(parts: PipelineParts) -> Self {
        Self { parts }
    }

    pub fn job_name(&self) -> &str {
        &self.parts.job_name
    }

    async fn execute(&self, run: &mut JobRun) -> Result<(), JobError> {
        run.status = RunStatus::Provisioning;
        let workspace = self.parts.provisioner.provision(run.id).await?;

        let result = self.execute_in(run, &workspace).await;
        workspace.cleanup().await;
        result
    }

    async fn execute_in(&self, run: &mut JobRun, workspace: &Workspace) -> Result<(), JobError> {
        let runtime = self.parts.runtime_probe.verify().await?;

        run.status = RunStatus::Installing;
        let manifest_path = workspace.path().join(&self.parts.manifest);
        let manifest = Manifest::load(&manifest_path).map_err(DependencyError::from)?;
        info!(
            requirements = manifest.requirements().len(),
            manifest = %manifest_path.display(),
            "Manifest parsed"
        );

        let key = cache_key(&self.parts.cache_prefix, &manifest);
        let (cache_dir, cache_status) = match self.parts.cache.restore(&key).await {
            Ok(lookup) => (lookup.data_dir, Some(lookup.status)),
            Err(e) => {
                // Cache is an optimisation only; install from scratch
                warn!(error = %e, cache_key = %key, "Dependency cache unavailable");
                (workspace.path().join(".dependency-cache"), None)
            }
        };
        run.cache = cache_status;
        if let Some(status) = cache_status {
            telemetry::record_cache_lookup(status);
        }

        let ctx = RunContext {
            run_id: run.id,
            runtime: runtime.interpreter,
            workspace: workspace.path().to_path_buf(),
            manifest: manifest_path,
            cache_dir,
        };

        self.parts.installer.install(&ctx).await?;

        if cache_status == Some(CacheStatus::Miss) {
            if let Err(e) = self.parts.cache.save(&key, &manifest.digest()).await {
                warn!(error = %e, cache_key = %key, "Failed to save dependency cache");
            }
        }

        run.status = RunStatus::Running;
        let env = resolve_env(
            &self.parts.bindings,
            self.parts.secrets.as_ref(),
            self.parts.variables.as_ref(),
        );

        let code = self.parts.launcher.launch(&ctx, &env).await?;
        if code != 0 {
            return Err(JobError::ProgramFailed { code });
        }

        Ok(())
    }
}

#[async_trait]
impl JobRunner for JobPipeline {
    #[instrument(skip(self, trigger), fields(job = %self.parts.job_name, trigger = %trigger))]
    async fn run(&self, trigger: TriggerSource) -> JobRun {
        let mut run = JobRun::new(&self.parts.job_name, trigger);
        info!(run_id = %run.id, "Job run started");

        match self.execute(&mut run).await {
            Ok(()) => run.succeed(),
            Err(e) => {
                error!(
                    run_id = %run.id,
                    stage = e.stage(),
                    exit_code = e.exit_code(),
                    error = %e,
                    "Job run failed"
                );
                run.fail(&e);
            }
        }

        telemetry::record_run(&run);
        info!(
            run_id = %run.id,
            status = ?run.status,
            exit_code = run.process_exit_code(),
            cache = ?run.cache,
            duration_seconds = run.duration_seconds(),
            record = %serde_json::to_string(&run).unwrap_or_default(),
            "Job run finished"
        );
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RuntimeConfig, WorkspaceConfig};
    use crate::errors::ExecutionError;
    use crate::installer::MockDependencyInstaller;
    use crate::launcher::MockProgramLauncher;
    use crate::models::default_bindings;
    use crate::stores::MemoryStore;
    use tempfile::TempDir;

    struct Fixture {
        project: TempDir,
        root: TempDir,
        cache: TempDir,
    }

    impl Fixture {
        fn new(manifest: &str) -> Self {
            let project = TempDir::new().unwrap();
            std::fs::write(project.path().join("requirements.txt"), manifest).unwrap();
            std::fs::write(project.path().join("summarizer.py"), "").unwrap();
            Self {
                project,
                root: TempDir::new().unwrap(),
                cache: TempDir::new().unwrap(),
            }
        }

        fn pipeline(
            &self,
            installer: MockDependencyInstaller,
            launcher: MockProgramLauncher,
        ) -> JobPipeline {
            JobPipeline::new(PipelineParts {
                job_name: "summarize".to_string(),
                manifest: PathBuf::from("requirements.txt"),
                cache_prefix: "pip".to_string(),
                bindings: default_bindings(),
                provisioner: Provisioner::new(WorkspaceConfig {
                    project_dir: self.project.path().to_path_buf(),
                    root: self.root.path().to_path_buf(),
                    exclude: Vec::new(),
                    keep: false,
                }),
                runtime_probe: RuntimeProbe::new(RuntimeConfig {
                    interpreter: "sh".to_string(),
                    version: "3.10".to_string(),
                    version_args: vec!["-c".to_string(), "echo Python 3.10.12".to_string()],
                }),
                cache: DependencyCache::new(self.cache.path()),
                installer: Arc::new(installer),
                launcher: Arc::new(launcher),
                secrets: Arc::new(MemoryStore::default().with("OPEN_AI_TOKEN", "sk-test")),
                variables: Arc::new(MemoryStore::default().with("TEMPERATURE", "0.5")),
            })
        }
    }

    #[tokio::test]
    async fn test_successful_run() {
        let fixture = Fixture::new("openai==0.27.2\n");

        let mut installer = MockDependencyInstaller::new();
        installer.expect_install().times(1).returning(|_| Ok(()));

        let mut launcher = MockProgramLauncher::new();
        launcher
            .expect_launch()
            .times(1)
            .withf(|_, env| env.get("TEMPERATURE") == Some("0.5") && env.get("OPEN_AI_TOKEN") == Some("sk-test"))
            .returning(|_, _| Ok(0));

        let run = fixture.pipeline(installer, launcher).run(TriggerSource::Manual).await;

        assert!(run.is_success());
        assert_eq!(run.process_exit_code(), 0);
        assert_eq!(run.cache, Some(CacheStatus::Miss));
    }

    #[tokio::test]
    async fn test_malformed_manifest_never_launches_program() {
        let fixture = Fixture::new("openai\n==broken\n");

        let mut installer = MockDependencyInstaller::new();
        installer.expect_install().times(0);
        let mut launcher = MockProgramLauncher::new();
        launcher.expect_launch().times(0);

        let run = fixture.pipeline(installer, launcher).run(TriggerSource::Manual).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.process_exit_code(), 1);
    }

    #[tokio::test]
    async fn test_install_failure_never_launches_program() {
        let fixture = Fixture::new("openai\n");

        let mut installer = MockDependencyInstaller::new();
        installer
            .expect_install()
            .times(1)
            .returning(|_| Err(DependencyError::InstallFailed { code: 1 }));
        let mut launcher = MockProgramLauncher::new();
        launcher.expect_launch().times(0);

        let run = fixture.pipeline(installer, launcher).run(TriggerSource::Manual).await;
        assert!(!run.is_success());
        assert_eq!(run.process_exit_code(), 1);
    }

    #[tokio::test]
    async fn test_program_failure_is_not_retried() {
        let fixture = Fixture::new("openai\n");

        let mut installer = MockDependencyInstaller::new();
        installer.expect_install().times(1).returning(|_| Ok(()));
        let mut launcher = MockProgramLauncher::new();
        launcher.expect_launch().times(1).returning(|_, _| Ok(42));

        let run = fixture.pipeline(installer, launcher).run(TriggerSource::Manual).await;
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.process_exit_code(), 42);
    }

    #[tokio::test]
    async fn test_program_timeout_maps_exit_code() {
        let fixture = Fixture::new("openai\n");

        let mut installer = MockDependencyInstaller::new();
        installer.expect_install().returning(|_| Ok(()));
        let mut launcher = MockProgramLauncher::new();
        launcher
            .expect_launch()
            .returning(|_, _| Err(ExecutionError::Timeout(60)));

        let run = fixture.pipeline(installer, launcher).run(TriggerSource::Manual).await;
        assert_eq!(run.process_exit_code(), 124);
    }

    #[tokio::test]
    async fn test_second_run_hits_cache() {
        let fixture = Fixture::new("openai\n");

        let mut installer = MockDependencyInstaller::new();
        installer.expect_install().times(2).returning(|_| Ok(()));
        let mut launcher = MockProgramLauncher::new();
        launcher.expect_launch().times(2).returning(|_, _| Ok(0));

        let pipeline = fixture.pipeline(installer, launcher);
        let first = pipeline.run(TriggerSource::Manual).await;
        let second = pipeline.run(TriggerSource::Manual).await;

        assert_eq!(first.cache, Some(CacheStatus::Miss));
        assert_eq!(second.cache, Some(CacheStatus::Hit));
    }

    #[tokio::test]
    async fn test_workspace_removed_after_run() {
        let fixture = Fixture::new("openai\n");

        let mut installer = MockDependencyInstaller::new();
        installer.expect_install().returning(|_| Ok(()));
        let mut launcher = MockProgramLauncher::new();
        launcher.expect_launch().returning(|_, _| Ok(0));

        fixture.pipeline(installer, launcher).run(TriggerSource::Manual).await;

        let leftovers = std::fs::read_dir(fixture.root.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
