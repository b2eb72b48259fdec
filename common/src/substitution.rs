// Placeholder substitution for configured commands
//
// Install and program commands are argument vectors that may reference
// `{runtime}`, `{manifest}`, `{cache_dir}` and `{workspace}`.

use crate::errors::SubstitutionError;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use tracing::instrument;

lazy_static! {
    static ref PLACEHOLDER_PATTERN: Regex =
        Regex::new(r"\{([a-z_]+)\}").expect("Invalid regex pattern");
}

/// Values available to command templates
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    values: HashMap<&'static str, String>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(name, value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Substitute placeholders in a single argument
pub fn substitute(template: &str, placeholders: &Placeholders) -> Result<String, SubstitutionError> {
    let mut unknown = None;

    let result = PLACEHOLDER_PATTERN.replace_all(template, |caps: &regex::Captures| {
        let name = &caps[1];
        match placeholders.get(name) {
            Some(value) => value.to_string(),
            None => {
                unknown.get_or_insert_with(|| name.to_string());
                caps[0].to_string()
            }
        }
    });

    match unknown {
        Some(name) => Err(SubstitutionError::UnknownPlaceholder(name)),
        None => Ok(result.into_owned()),
    }
}

/// Substitute placeholders in every argument of a command
#[instrument(skip(placeholders), fields(arg_count = command.len()))]
pub fn expand_command(
    command: &[String],
    placeholders: &Placeholders,
) -> Result<Vec<String>, SubstitutionError> {
    command
        .iter()
        .map(|arg| substitute(arg, placeholders))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholders() -> Placeholders {
        Placeholders::new()
            .set("runtime", "/usr/bin/python3")
            .set("manifest", "requirements.txt")
    }

    #[test]
    fn test_expand_install_command() {
        let command: Vec<String> = ["{runtime}", "-m", "pip", "install", "-r", "{manifest}"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let expanded = expand_command(&command, &placeholders()).unwrap();
        assert_eq!(
            expanded,
            vec!["/usr/bin/python3", "-m", "pip", "install", "-r", "requirements.txt"]
        );
    }

    #[test]
    fn test_placeholder_inside_argument() {
        let result = substitute("--requirement={manifest}", &placeholders()).unwrap();
        assert_eq!(result, "--requirement=requirements.txt");
    }

    #[test]
    fn test_unknown_placeholder() {
        let result = substitute("{python}", &placeholders());
        assert_eq!(
            result,
            Err(SubstitutionError::UnknownPlaceholder("python".to_string()))
        );
    }

    #[test]
    fn test_text_without_placeholders_is_unchanged() {
        assert_eq!(substitute("summarizer.py", &placeholders()).unwrap(), "summarizer.py");
        // Only lowercase names count as placeholders
        assert_eq!(substitute("{X}", &placeholders()).unwrap(), "{X}");
    }
}
