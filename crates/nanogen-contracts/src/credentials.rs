use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::{GenerateError, Result};

pub const API_KEY_NAMES: [&str; 2] = ["apikey", "APIKEY"];
pub const API_BASE_NAMES: [&str; 2] = ["baseurl", "BASEURL"];
pub const VENDOR_API_KEY_VAR: &str = "GEMINI_API_KEY";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const ENV_FILE_NAME: &str = ".env";

/// Resolved API key and base URL for one invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub api_key: String,
    pub api_base: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// A labelled snapshot of key/value settings, consulted in order.
#[derive(Debug, Clone, Default)]
pub struct CredentialSource {
    label: String,
    values: BTreeMap<String, String>,
}

impl CredentialSource {
    pub fn from_pairs<I, K, V>(label: impl Into<String>, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            label: label.into(),
            values: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Reads `KEY=value` lines. Values are taken literally apart from
    /// surrounding whitespace and quotes; `$` is not expanded.
    pub fn from_env_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Self::from_pairs(
            path.display().to_string(),
            content.lines().filter_map(parse_env_line),
        ))
    }

    /// Variables whose name or value is not UTF-8 are skipped.
    pub fn from_process_env() -> Self {
        Self::from_pairs(
            "process environment",
            std::env::vars_os().filter_map(|(key, value)| {
                Some((key.into_string().ok()?, value.into_string().ok()?))
            }),
        )
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Exact spellings win in the order given, then any case variant.
    pub fn lookup(&self, names: &[&str]) -> Option<&str> {
        let exact = names
            .iter()
            .find_map(|name| self.values.get(*name).and_then(|value| non_empty(value)));
        if exact.is_some() {
            return exact;
        }
        self.values.iter().find_map(|(key, value)| {
            names
                .iter()
                .any(|name| key.eq_ignore_ascii_case(name))
                .then(|| non_empty(value))
                .flatten()
        })
    }
}

fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"').trim_matches('\'');
    Some((key.to_string(), value.to_string()))
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Resolves the credential from `sources`, earliest source first.
///
/// The key comes from `apikey` in any source, then `GEMINI_API_KEY`. The
/// base comes from `baseurl` in any source, then the public Gemini endpoint.
pub fn resolve_credential(sources: &[CredentialSource]) -> Result<Credential> {
    let api_key = first_match(sources, &API_KEY_NAMES)
        .or_else(|| first_match(sources, &[VENDOR_API_KEY_VAR]))
        .ok_or_else(|| {
            let checked = sources
                .iter()
                .map(CredentialSource::label)
                .collect::<Vec<_>>()
                .join(", ");
            GenerateError::Configuration(format!(
                "missing apikey/APIKEY (checked: {checked}) and {VENDOR_API_KEY_VAR} is not set"
            ))
        })?;
    let api_base = first_match(sources, &API_BASE_NAMES).unwrap_or(DEFAULT_API_BASE);
    let api_base = api_base.trim_end_matches('/');
    if api_base.is_empty() {
        return Err(GenerateError::Configuration(
            "base url is empty after trimming".to_string(),
        ));
    }

    Ok(Credential {
        api_key: api_key.to_string(),
        api_base: api_base.to_string(),
    })
}

fn first_match<'a>(sources: &'a [CredentialSource], names: &[&str]) -> Option<&'a str> {
    sources.iter().find_map(|source| source.lookup(names))
}

/// Walks up from each root in turn and returns the first `.env` file found.
pub fn find_project_env_file(roots: &[PathBuf]) -> Option<PathBuf> {
    roots.iter().find_map(|root| {
        root.ancestors()
            .map(|dir| dir.join(ENV_FILE_NAME))
            .find(|candidate| candidate.is_file())
    })
}
