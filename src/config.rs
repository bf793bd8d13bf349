use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::jump_host::{DEFAULT_JUMP_HOST_NAMES, DEFAULT_JUMP_HOST_TAGS, JumpHostRules};
use crate::limiter::DEFAULT_CONCURRENCY;
use crate::loader::{DEFAULT_CALL_TIMEOUT, DEFAULT_PAGE_SIZE};
use crate::tunnel::orchestrator::{JUMP_HOST_TIMEOUT, SESSION_TIMEOUT};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct VawsConfig {
    #[serde(default)]
    defaults: DefaultsSpec,
    #[serde(default)]
    profiles: BTreeMap<String, ProfileSpec>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct DefaultsSpec {
    #[serde(default)]
    concurrency: Option<usize>,
    #[serde(default)]
    page_size: Option<usize>,
    #[serde(default, alias = "timeout_secs")]
    call_timeout_secs: Option<u64>,
    #[serde(default)]
    jump_host_timeout_secs: Option<u64>,
    #[serde(default)]
    session_timeout_secs: Option<u64>,
    #[serde(default)]
    jump_host_tags: Vec<String>,
    #[serde(default)]
    jump_host_names: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ProfileSpec {
    #[serde(default, alias = "bastion")]
    jump_host: Option<String>,
    #[serde(default)]
    jump_host_tag: Option<String>,
    #[serde(default, alias = "vpce")]
    vpc_endpoint_id: Option<String>,
}

/// Effective settings after merging file values, profile overrides and CLI flags.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub source: Option<String>,
    pub concurrency: usize,
    pub page_size: usize,
    pub call_timeout: Duration,
    pub resolve_timeout: Duration,
    pub establish_timeout: Duration,
    pub jump_host_rules: JumpHostRules,
}

impl VawsConfig {
    /// Reads the explicit path when given, otherwise the first discovered file.
    /// No file at all yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    bail!("config file {} does not exist", path.display());
                }
                Some(path.to_path_buf())
            }
            None => discover_config_path(),
        };
        let Some(path) = path else {
            return Ok((Self::default(), None));
        };

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let parsed = Self::from_yaml(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok((parsed, Some(path)))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn resolve(
        &self,
        profile: Option<&str>,
        concurrency: Option<usize>,
        page_size: Option<usize>,
    ) -> RuntimeSettings {
        let profile_spec = self
            .profiles
            .get(profile.unwrap_or("default"))
            .cloned()
            .unwrap_or_default();
        let defaults = &self.defaults;

        let tags = if defaults.jump_host_tags.is_empty() {
            DEFAULT_JUMP_HOST_TAGS.iter().map(|t| t.to_string()).collect()
        } else {
            defaults.jump_host_tags.clone()
        };
        let names = if defaults.jump_host_names.is_empty() {
            DEFAULT_JUMP_HOST_NAMES.iter().map(|n| n.to_string()).collect()
        } else {
            defaults.jump_host_names.clone()
        };

        RuntimeSettings {
            source: None,
            concurrency: concurrency
                .or(defaults.concurrency)
                .unwrap_or(DEFAULT_CONCURRENCY)
                .max(1),
            page_size: page_size
                .or(defaults.page_size)
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .max(1),
            call_timeout: seconds_or(defaults.call_timeout_secs, DEFAULT_CALL_TIMEOUT),
            resolve_timeout: seconds_or(defaults.jump_host_timeout_secs, JUMP_HOST_TIMEOUT),
            establish_timeout: seconds_or(defaults.session_timeout_secs, SESSION_TIMEOUT),
            jump_host_rules: JumpHostRules {
                override_host: non_empty(profile_spec.jump_host),
                override_tag: non_empty(profile_spec.jump_host_tag),
                tags,
                names,
                endpoint_override: non_empty(profile_spec.vpc_endpoint_id),
            },
        }
    }
}

fn seconds_or(secs: Option<u64>, fallback: Duration) -> Duration {
    secs.filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(fallback)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("VAWS_CONFIG")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [
        PathBuf::from("vaws.yaml"),
        PathBuf::from("vaws.yml"),
        PathBuf::from(".vaws.yaml"),
    ];
    for candidate in cwd_candidates {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let user_candidates = [
            PathBuf::from(&home).join(".config/vaws/config.yaml"),
            PathBuf::from(&home).join(".config/vaws/config.yml"),
        ];
        for candidate in user_candidates {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}
