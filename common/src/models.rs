use crate::errors::JobError;
use crate::substitution::Placeholders;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

// ============================================================================
// Trigger Models
// ============================================================================

/// TriggerSource records what started a job run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSource {
    /// Manual dispatch, takes no parameters
    Manual,
    /// Calendar schedule, carries the recurrence instance that fired
    Scheduled { instance: DateTime<Utc> },
}

impl TriggerSource {
    pub fn label(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::Scheduled { .. } => "scheduled",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Manual => write!(f, "manual"),
            TriggerSource::Scheduled { instance } => write!(f, "scheduled@{}", instance.to_rfc3339()),
        }
    }
}

// ============================================================================
// Environment Contract Models
// ============================================================================

/// Secret names of the summarizer contract
pub const SECRET_NAMES: [&str; 2] = ["OPEN_AI_TOKEN", "SLACK_BOT_TOKEN"];

/// Plain variable names of the summarizer contract
pub const VARIABLE_NAMES: [&str; 12] = [
    "SLACK_POST_CHANNEL_ID",
    "LANGUAGE",
    "TIMEZONE",
    "TEMPERATURE",
    "CHAT_MODEL",
    "ENCODING_MODEL",
    "DEBUG",
    "MAX_BODY_TOKENS",
    "REQUEST_INTERVAL",
    "SUMMARIZE_PROMPT",
    "OUTPUT_SLACK",
    "API_WAIT_TIME",
];

/// Where the value of an environment binding comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    Secret,
    Variable,
    Literal,
}

/// EnvBinding maps one environment variable name of the program to its source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvBinding {
    pub name: String,
    pub from: ValueSource,
    /// Lookup key in the store, defaults to `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Fixed value for literal bindings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl EnvBinding {
    pub fn secret(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            from: ValueSource::Secret,
            key: None,
            value: None,
        }
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            from: ValueSource::Variable,
            key: None,
            value: None,
        }
    }

    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            from: ValueSource::Literal,
            key: None,
            value: Some(value.into()),
        }
    }

    /// Key used to look the value up in the secret or variable store
    pub fn lookup_key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.name)
    }
}

/// The default binding list handed to the summarizer program
pub fn default_bindings() -> Vec<EnvBinding> {
    SECRET_NAMES
        .iter()
        .map(|name| EnvBinding::secret(*name))
        .chain(VARIABLE_NAMES.iter().map(|name| EnvBinding::variable(*name)))
        .collect()
}

/// SecretValue wraps an access-controlled string so it never reaches logs
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// A resolved binding value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    Plain(String),
    Secret(SecretValue),
}

impl EnvValue {
    pub fn as_str(&self) -> &str {
        match self {
            EnvValue::Plain(value) => value,
            EnvValue::Secret(secret) => secret.expose(),
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, EnvValue::Secret(_))
    }
}

/// ResolvedEnv is the ordered name -> value map passed to the program
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedEnv {
    entries: Vec<(String, EnvValue)>,
}

impl ResolvedEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing an earlier one with the same name
    pub fn insert(&mut self, name: impl Into<String>, value: EnvValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    /// Iterate over name/value pairs with secrets exposed, for process spawning
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn secret_count(&self) -> usize {
        self.entries.iter().filter(|(_, v)| v.is_secret()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Run Models
// ============================================================================

/// Result of consulting the dependency cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStatus::Hit => write!(f, "hit"),
            CacheStatus::Miss => write!(f, "miss"),
        }
    }
}

/// RunStatus tracks which stage a job run has reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Provisioning,
    Installing,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

/// JobRun is the record of one job execution
///
/// Lives for the duration of a single run and is logged when the run ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub job_name: String,
    pub trigger: TriggerSource,
    pub status: RunStatus,
    pub cache: Option<CacheStatus>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl JobRun {
    /// Create a new pending run
    pub fn new(job_name: impl Into<String>, trigger: TriggerSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.into(),
            trigger,
            status: RunStatus::Pending,
            cache: None,
            started_at: Utc::now(),
            completed_at: None,
            exit_code: None,
            error: None,
        }
    }

    pub fn succeed(&mut self) {
        self.status = RunStatus::Succeeded;
        self.exit_code = Some(0);
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: &JobError) {
        self.status = RunStatus::Failed;
        self.exit_code = Some(error.exit_code());
        self.error = Some(error.to_string());
        self.completed_at = Some(Utc::now());
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Exit code the hosting process should report
    pub fn process_exit_code(&self) -> i32 {
        self.exit_code.unwrap_or(crate::errors::RUNNER_FAILURE_EXIT_CODE)
    }

    pub fn duration_seconds(&self) -> f64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// RunContext carries the paths of a provisioned run to the install and launch steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: Uuid,
    /// Interpreter of the verified runtime
    pub runtime: String,
    pub workspace: PathBuf,
    pub manifest: PathBuf,
    pub cache_dir: PathBuf,
}

impl RunContext {
    /// Values for `{runtime}`, `{manifest}`, `{cache_dir}` and `{workspace}`
    pub fn placeholders(&self) -> Placeholders {
        Placeholders::new()
            .set("runtime", self.runtime.clone())
            .set("manifest", self.manifest.display().to_string())
            .set("cache_dir", self.cache_dir.display().to_string())
            .set("workspace", self.workspace.display().to_string())
    }
}
