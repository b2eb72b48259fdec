// Configuration management with layered configuration (defaults, file, env)

use crate::errors::ValidationError;
use crate::models::{default_bindings, EnvBinding, ValueSource};
use crate::schedule::{parse_cron_expression, parse_timezone};
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub job: JobConfig,
    pub runtime: RuntimeConfig,
    pub dependencies: DependencyConfig,
    pub workspace: WorkspaceConfig,
    pub schedule: ScheduleConfig,
    pub stores: StoreConfig,
    /// Environment-variable contract of the program, in order
    pub env: Vec<EnvBinding>,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    /// Program argument vector, placeholders allowed
    pub program: Vec<String>,
    /// Kill the program after this many seconds; unset means no limit
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub interpreter: String,
    /// Pinned version prefix, e.g. "3.10"
    pub version: String,
    pub version_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    /// Manifest path relative to the project directory
    pub manifest: PathBuf,
    pub install_command: Vec<String>,
    pub cache_dir: PathBuf,
    pub cache_prefix: String,
    /// Variable pointing the installer at the cache data directory
    pub cache_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub project_dir: PathBuf,
    pub root: PathBuf,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub keep: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Five-field cron expression
    pub cron: String,
    pub timezone: String,
    pub poll_interval_seconds: u64,
}

impl ScheduleConfig {
    pub fn tz(&self) -> Result<Tz, ValidationError> {
        Ok(parse_timezone(&self.timezone)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub secrets_file: Option<PathBuf>,
    #[serde(default)]
    pub variables_file: Option<PathBuf>,
    pub secret_env_prefix: String,
    pub variable_env_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default = "default_json_logs")]
    pub json: bool,
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_json_logs() -> bool {
    true
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with built-in defaults so config files may be partial
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.job.name.trim().is_empty() {
            return Err(ValidationError::MissingField("job.name".to_string()));
        }
        if self.job.program.is_empty() || self.job.program[0].trim().is_empty() {
            return Err(ValidationError::MissingField("job.program".to_string()));
        }
        if self.job.timeout_seconds == Some(0) {
            return Err(invalid("job.timeout_seconds", "must be greater than 0"));
        }

        if self.runtime.interpreter.trim().is_empty() {
            return Err(ValidationError::MissingField("runtime.interpreter".to_string()));
        }
        if !is_dotted_version(&self.runtime.version) {
            return Err(invalid(
                "runtime.version",
                "must be a dotted numeric version such as 3.10",
            ));
        }

        if self.dependencies.install_command.is_empty() {
            return Err(ValidationError::MissingField(
                "dependencies.install_command".to_string(),
            ));
        }
        if self.dependencies.manifest.as_os_str().is_empty() {
            return Err(ValidationError::MissingField("dependencies.manifest".to_string()));
        }
        if self.dependencies.cache_prefix.is_empty() {
            return Err(ValidationError::MissingField(
                "dependencies.cache_prefix".to_string(),
            ));
        }

        parse_cron_expression(&self.schedule.cron)?;
        self.schedule.tz()?;
        if self.schedule.poll_interval_seconds == 0 {
            return Err(invalid(
                "schedule.poll_interval_seconds",
                "must be greater than 0",
            ));
        }

        let mut seen = HashSet::new();
        for binding in &self.env {
            if !is_env_name(&binding.name) {
                return Err(invalid(
                    "env.name",
                    &format!("'{}' is not a valid environment variable name", binding.name),
                ));
            }
            if !seen.insert(binding.name.as_str()) {
                return Err(ValidationError::DuplicateBinding(binding.name.clone()));
            }
            if binding.from == ValueSource::Literal && binding.value.is_none() {
                return Err(invalid(
                    "env.value",
                    &format!("literal binding '{}' needs a value", binding.name),
                ));
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidFieldValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn is_dotted_version(version: &str) -> bool {
    !version.is_empty()
        && version
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            job: JobConfig {
                name: "summarize".to_string(),
                program: vec!["{runtime}".to_string(), "summarizer.py".to_string()],
                timeout_seconds: None,
            },
            runtime: RuntimeConfig {
                interpreter: "python3".to_string(),
                version: "3.10".to_string(),
                version_args: vec!["--version".to_string()],
            },
            dependencies: DependencyConfig {
                manifest: PathBuf::from("requirements.txt"),
                install_command: ["{runtime}", "-m", "pip", "install", "-r", "{manifest}"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                cache_dir: PathBuf::from(".job-cache"),
                cache_prefix: "pip".to_string(),
                cache_env: "PIP_CACHE_DIR".to_string(),
            },
            workspace: WorkspaceConfig {
                project_dir: PathBuf::from("."),
                root: PathBuf::from(".job-workspaces"),
                exclude: [".git", ".job-cache", ".job-workspaces", "target"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                keep: false,
            },
            schedule: ScheduleConfig {
                // 02:00 Asia/Tokyo
                cron: "0 17 * * *".to_string(),
                timezone: "UTC".to_string(),
                poll_interval_seconds: 30,
            },
            stores: StoreConfig {
                secrets_file: None,
                variables_file: None,
                secret_env_prefix: "SECRET_".to_string(),
                variable_env_prefix: "VAR_".to_string(),
            },
            env: default_bindings(),
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json: true,
                metrics_port: None,
            },
        }
    }
}
