// Error handling framework
// One enum per pipeline stage, folded into JobError for exit-code mapping

use std::path::PathBuf;
use thiserror::Error;

/// Exit code reported when the runner itself fails (provisioning, install)
pub const RUNNER_FAILURE_EXIT_CODE: i32 = 1;

/// Exit code reported when the program exceeds the configured timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported when the program could not be started at all
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Schedule-related errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("No execution time available after {after}")]
    NoNextExecution { after: String },
}

/// Configuration validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Environment variable '{0}' is bound more than once")]
    DuplicateBinding(String),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Dependency manifest errors
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed manifest entry on line {line}: '{content}'")]
    MalformedEntry { line: usize, content: String },

    #[error("Manifest is not valid UTF-8 (line {line})")]
    InvalidEncoding { line: usize },
}

/// Dependency cache errors
///
/// Never fatal for a run: the pipeline logs them and installs without the cache.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O failed for {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Invalid cache entry {key}: {reason}")]
    InvalidEntry { key: String, reason: String },
}

/// Execution environment provisioning errors
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Project directory not found: {0}")]
    ProjectDirMissing(PathBuf),

    #[error("Workspace operation failed for {path}: {reason}")]
    WorkspaceIo { path: PathBuf, reason: String },

    #[error("Runtime '{interpreter}' is not available: {reason}")]
    RuntimeUnavailable { interpreter: String, reason: String },

    #[error("Runtime version mismatch: expected {expected}, found {found}")]
    RuntimeVersionMismatch { expected: String, found: String },

    #[error("Could not read a version from runtime output: '{0}'")]
    VersionUnreadable(String),
}

/// Dependency installation errors
#[derive(Error, Debug)]
pub enum DependencyError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Install command is invalid: {0}")]
    InvalidCommand(String),

    #[error("Failed to start install command '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("Install command exited with status {code}")]
    InstallFailed { code: i32 },
}

/// External program execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Program command is invalid: {0}")]
    InvalidCommand(String),

    #[error("Failed to start program '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Program timed out after {0} seconds")]
    Timeout(u64),

    #[error("Failed to wait for program: {0}")]
    WaitFailed(String),
}

/// Template placeholder errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SubstitutionError {
    #[error("Unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),
}

/// Terminal outcome of a failed job run
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Dependency installation failed: {0}")]
    Dependency(#[from] DependencyError),

    #[error("Program execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Program exited with status {code}")]
    ProgramFailed { code: i32 },
}

impl JobError {
    /// Process exit code that reports this failure
    ///
    /// Program failures pass the program's own code through unchanged.
    pub fn exit_code(&self) -> i32 {
        match self {
            JobError::Provision(_) | JobError::Dependency(_) => RUNNER_FAILURE_EXIT_CODE,
            JobError::Execution(ExecutionError::Timeout(_)) => TIMEOUT_EXIT_CODE,
            JobError::Execution(ExecutionError::SpawnFailed { .. }) => SPAWN_FAILURE_EXIT_CODE,
            JobError::Execution(_) => RUNNER_FAILURE_EXIT_CODE,
            JobError::ProgramFailed { code } => *code,
        }
    }

    /// Short label used for metrics and logs
    pub fn stage(&self) -> &'static str {
        match self {
            JobError::Provision(_) => "provision",
            JobError::Dependency(_) => "dependencies",
            JobError::Execution(_) | JobError::ProgramFailed { .. } => "program",
        }
    }
}
