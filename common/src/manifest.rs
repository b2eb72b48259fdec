// Dependency manifest parsing
//
// One requirement per line: a package name, optional extras and an optional
// version specifier. Blank lines and '#' comments are ignored.

use crate::errors::ManifestError;
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::Path;

lazy_static! {
    static ref REQUIREMENT_PATTERN: Regex = Regex::new(concat!(
        r"^(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)",
        r"\s*(?:\[(?P<extras>[A-Za-z0-9._-]+(?:\s*,\s*[A-Za-z0-9._-]+)*)\])?",
        r"\s*(?P<spec>(?:===|==|>=|<=|~=|!=|>|<)\s*[A-Za-z0-9.*+!_-]+",
        r"(?:\s*,\s*(?:===|==|>=|<=|~=|!=|>|<)\s*[A-Za-z0-9.*+!_-]+)*)?$"
    ))
    .expect("Invalid regex pattern");
}

/// A single declared dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub extras: Vec<String>,
    /// Version specifier with whitespace removed, e.g. `==1.2.3` or `>=1,<2`
    pub version: Option<String>,
    pub line: usize,
}

impl Requirement {
    pub fn is_pinned(&self) -> bool {
        self.version
            .as_deref()
            .map(|v| v.starts_with("==") && !v.contains(','))
            .unwrap_or(false)
    }
}

/// Manifest is a parsed dependency declaration file
#[derive(Debug, Clone)]
pub struct Manifest {
    raw: Vec<u8>,
    requirements: Vec<Requirement>,
}

impl Manifest {
    /// Read and parse the manifest at `path`
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let raw = std::fs::read(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(raw)
    }

    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        Self::from_bytes(text.as_bytes().to_vec())
    }

    fn from_bytes(raw: Vec<u8>) -> Result<Self, ManifestError> {
        let text = std::str::from_utf8(&raw).map_err(|e| ManifestError::InvalidEncoding {
            line: raw[..e.valid_up_to()].iter().filter(|b| **b == b'\n').count() + 1,
        })?;
        let mut requirements = Vec::new();

        for (index, line) in text.lines().enumerate() {
            let line_number = index + 1;
            let content = strip_comment(line).trim();
            if content.is_empty() {
                continue;
            }

            let captures = REQUIREMENT_PATTERN.captures(content).ok_or_else(|| {
                ManifestError::MalformedEntry {
                    line: line_number,
                    content: content.to_string(),
                }
            })?;

            let name = captures
                .name("name")
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            let extras = captures
                .name("extras")
                .map(|m| m.as_str().split(',').map(|e| e.trim().to_string()).collect())
                .unwrap_or_default();
            let version = captures
                .name("spec")
                .map(|m| m.as_str().chars().filter(|c| !c.is_whitespace()).collect());

            requirements.push(Requirement {
                name,
                extras,
                version,
                line: line_number,
            });
        }

        Ok(Self { raw, requirements })
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Lowercase hex SHA-256 of the raw file bytes
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.raw);
        hex::encode(hasher.finalize())
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}
