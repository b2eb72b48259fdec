// Secret and variable stores
//
// Bindings read their values from two stores: one for secrets and one for
// plain variables. A missing value resolves to the empty string, matching
// how hosted CI expands an unset secret or variable.

use crate::models::{EnvBinding, EnvValue, ResolvedEnv, SecretValue, ValueSource};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, instrument, warn};

/// ValueStore looks values up by key
pub trait ValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads `{prefix}{key}` from the process environment
#[derive(Debug, Clone)]
pub struct EnvStore {
    prefix: String,
}

impl EnvStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl ValueStore for EnvStore {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(format!("{}{}", self.prefix, key)).ok()
    }
}

/// In-memory store, also used for values loaded from files
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Load a flat JSON object of string values
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read store file {}", path.display()))?;
        let values: HashMap<String, String> = serde_json::from_str(&content)
            .with_context(|| format!("Store file {} is not a flat JSON object of strings", path.display()))?;

        Ok(Self { values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Tries each store in order, first hit wins
#[derive(Default)]
pub struct LayeredStore {
    layers: Vec<Box<dyn ValueStore>>,
}

impl LayeredStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(mut self, store: impl ValueStore + 'static) -> Self {
        self.layers.push(Box::new(store));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl ValueStore for LayeredStore {
    fn get(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|store| store.get(key))
    }
}

/// Resolve every binding into the environment map handed to the program
///
/// Names and values pass through unchanged. Secret values are wrapped so
/// they stay out of logs.
#[instrument(skip_all, fields(binding_count = bindings.len()))]
pub fn resolve_env(
    bindings: &[EnvBinding],
    secrets: &dyn ValueStore,
    variables: &dyn ValueStore,
) -> ResolvedEnv {
    let mut env = ResolvedEnv::new();

    for binding in bindings {
        let value = match binding.from {
            ValueSource::Secret => {
                EnvValue::Secret(SecretValue::new(lookup(binding, secrets)))
            }
            ValueSource::Variable => EnvValue::Plain(lookup(binding, variables)),
            ValueSource::Literal => EnvValue::Plain(binding.value.clone().unwrap_or_default()),
        };
        env.insert(binding.name.clone(), value);
    }

    debug!(
        resolved = env.len(),
        secrets = env.secret_count(),
        "Environment bindings resolved"
    );
    env
}

fn lookup(binding: &EnvBinding, store: &dyn ValueStore) -> String {
    match store.get(binding.lookup_key()) {
        Some(value) => value,
        None => {
            warn!(
                name = %binding.name,
                key = binding.lookup_key(),
                source = ?binding.from,
                "Binding has no value, passing an empty string"
            );
            String::new()
        }
    }
}
