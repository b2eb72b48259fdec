// External program launch
// Runs the job's program once, to completion, with the resolved environment

use crate::errors::{ExecutionError, RUNNER_FAILURE_EXIT_CODE};
use crate::models::{ResolvedEnv, RunContext};
use crate::substitution::expand_command;
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, instrument, warn};

/// ProgramLauncher starts the external program and returns its exit code
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProgramLauncher: Send + Sync {
    async fn launch(&self, ctx: &RunContext, env: &ResolvedEnv) -> Result<i32, ExecutionError>;
}

/// Launches the configured argument vector as a child process
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandLauncher {
    pub fn new(program: Vec<String>, timeout: Option<Duration>) -> Self {
        Self { program, timeout }
    }
}

#[async_trait]
impl ProgramLauncher for CommandLauncher {
    #[instrument(skip(self, ctx, env), fields(run_id = %ctx.run_id, env_count = env.len()))]
    async fn launch(&self, ctx: &RunContext, env: &ResolvedEnv) -> Result<i32, ExecutionError> {
        let argv = expand_command(&self.program, &ctx.placeholders())
            .map_err(|e| ExecutionError::InvalidCommand(e.to_string()))?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ExecutionError::InvalidCommand("command is empty".to_string()))?;

        info!(
            command = %argv.join(" "),
            env = ?env.names(),
            "Launching program"
        );

        // The runner's own environment is inherited; bindings override it
        let mut child = Command::new(program)
            .args(args)
            .current_dir(&ctx.workspace)
            .envs(env.iter())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed {
                program: program.clone(),
                reason: e.to_string(),
            })?;

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(result) => result.map_err(|e| ExecutionError::WaitFailed(e.to_string()))?,
                Err(_) => {
                    error!(timeout_seconds = limit.as_secs(), "Program timed out, killing it");
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill timed out program");
                    }
                    return Err(ExecutionError::Timeout(limit.as_secs()));
                }
            },
            None => child
                .wait()
                .await
                .map_err(|e| ExecutionError::WaitFailed(e.to_string()))?,
        };

        let code = exit_code(&status);
        info!(code, "Program exited");
        Ok(code)
    }
}

/// Numeric exit code of a finished process; signals map to 128 + signal
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    RUNNER_FAILURE_EXIT_CODE
}
