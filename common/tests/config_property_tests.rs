// Property-based tests for configuration, stores and environment resolution

use common::config::Settings;
use common::models::{default_bindings, EnvBinding, SECRET_NAMES, VARIABLE_NAMES};
use common::stores::{resolve_env, MemoryStore};
use common::substitution::{expand_command, Placeholders};
use proptest::prelude::*;
use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;

fn value() -> impl Strategy<Value = String> {
    "[a-z0-9]{12}"
}

/// Subset of the variable contract with values
fn variable_values() -> impl Strategy<Value = HashMap<String, String>> {
    prop::collection::hash_map(
        prop::sample::select(VARIABLE_NAMES.to_vec()).prop_map(String::from),
        value(),
        0..VARIABLE_NAMES.len(),
    )
}

/// *For any* store contents, every binding of the contract resolves, values
/// pass through unchanged, and absent values become empty strings.
#[test]
fn property_every_binding_resolves() {
    proptest!(|(variables in variable_values(), token in value())| {
        let bindings = default_bindings();
        let secrets = MemoryStore::default().with("OPEN_AI_TOKEN", token.clone());
        let variable_store = MemoryStore::new(variables.clone());

        let env = resolve_env(&bindings, &secrets, &variable_store);

        prop_assert_eq!(env.len(), SECRET_NAMES.len() + VARIABLE_NAMES.len());
        prop_assert_eq!(env.get("OPEN_AI_TOKEN"), Some(token.as_str()));
        prop_assert_eq!(env.get("SLACK_BOT_TOKEN"), Some(""));
        for name in VARIABLE_NAMES {
            let expected = variables.get(name).map(String::as_str).unwrap_or("");
            prop_assert_eq!(env.get(name), Some(expected));
        }
    });
}

/// *For any* secret value, the resolved environment never prints it
#[test]
fn property_secrets_are_masked_in_debug_output() {
    proptest!(|(token in value(), slack in value())| {
        let secrets = MemoryStore::default()
            .with("OPEN_AI_TOKEN", token.clone())
            .with("SLACK_BOT_TOKEN", slack.clone());
        let env = resolve_env(&default_bindings(), &secrets, &MemoryStore::default());

        let rendered = format!("{:?}", env);
        prop_assert!(!rendered.contains(&token));
        prop_assert!(!rendered.contains(&slack));
        prop_assert_eq!(env.secret_count(), SECRET_NAMES.len());
    });
}

/// *For any* store key, a binding may read a value stored under another name
#[test]
fn property_binding_key_renames_lookup() {
    proptest!(|(key in "[A-Z][A-Z_]{2,10}", stored in value())| {
        let binding = EnvBinding {
            key: Some(key.clone()),
            ..EnvBinding::variable("CHAT_MODEL")
        };
        let variables = MemoryStore::default().with(key, stored.clone());

        let env = resolve_env(&[binding], &MemoryStore::default(), &variables);
        prop_assert_eq!(env.get("CHAT_MODEL"), Some(stored.as_str()));
    });
}

/// *For any* known placeholder values, commands expand argument-wise and
/// literal text is preserved.
#[test]
fn property_command_expansion() {
    proptest!(|(runtime in "[a-z0-9/]{1,20}", manifest in "[a-z0-9/.]{1,20}", literal in "[a-z -]{0,10}")| {
        let placeholders = Placeholders::new()
            .set("runtime", runtime.clone())
            .set("manifest", manifest.clone());
        let command = vec![
            "{runtime}".to_string(),
            format!("{}-r {{manifest}}", literal),
        ];

        let expanded = expand_command(&command, &placeholders).unwrap();
        prop_assert_eq!(&expanded[0], &runtime);
        prop_assert_eq!(&expanded[1], &format!("{}-r {}", literal, manifest));

        let unknown = vec!["{interpreter}".to_string()];
        prop_assert!(expand_command(&unknown, &placeholders).is_err());
    });
}

/// *For any* partial configuration file, values it sets are loaded and
/// everything else keeps its built-in default.
#[test]
fn property_partial_config_file_keeps_defaults() {
    proptest!(|(
        name in "[a-z][a-z-]{2,12}",
        hour in 0u32..24,
        poll in 1u64..3600,
        timezone in prop::sample::select(vec!["UTC", "Asia/Tokyo", "Europe/Berlin"])
    )| {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            format!(
                "[job]\nname = \"{}\"\n\n[schedule]\ncron = \"0 {} * * *\"\ntimezone = \"{}\"\npoll_interval_seconds = {}\n",
                name, hour, timezone, poll
            ),
        )
        .unwrap();

        let settings = Settings::load_from_path(dir.path()).unwrap();
        prop_assert!(settings.validate().is_ok());

        prop_assert_eq!(&settings.job.name, &name);
        prop_assert_eq!(settings.schedule.cron, format!("0 {} * * *", hour));
        prop_assert_eq!(settings.schedule.timezone.as_str(), timezone);
        prop_assert_eq!(settings.schedule.poll_interval_seconds, poll);

        let defaults = Settings::default();
        prop_assert_eq!(settings.job.program, defaults.job.program);
        prop_assert_eq!(settings.runtime.interpreter, defaults.runtime.interpreter);
        prop_assert_eq!(settings.env, defaults.env);
    });
}

#[test]
fn config_environment_overrides_file() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("default.toml"),
        "[runtime]\nversion = \"3.10\"\n\n[observability]\nlog_level = \"warn\"\n",
    )
    .unwrap();

    std::env::set_var("APP__OBSERVABILITY__LOG_LEVEL", "debug");
    std::env::set_var("APP__DEPENDENCIES__CACHE_PREFIX", "uv");
    let settings = Settings::load_from_path(dir.path());
    std::env::remove_var("APP__OBSERVABILITY__LOG_LEVEL");
    std::env::remove_var("APP__DEPENDENCIES__CACHE_PREFIX");

    let settings = settings.unwrap();
    assert_eq!(settings.observability.log_level, "debug");
    assert_eq!(settings.dependencies.cache_prefix, "uv");
    assert_eq!(settings.runtime.version, "3.10");
}

#[test]
fn config_invalid_values_fail_validation() {
    let mut settings = Settings::default();
    settings.schedule.cron = "0 0 17 * * *".to_string();
    assert!(settings.validate().is_err());

    let mut settings = Settings::default();
    settings.schedule.timezone = "Mars/Olympus".to_string();
    assert!(settings.validate().is_err());

    let mut settings = Settings::default();
    settings.env.push(EnvBinding::variable("LANGUAGE"));
    assert!(settings.validate().is_err());
}
