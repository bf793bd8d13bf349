use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::service::TunnelBackend;
use crate::tunnel::TunnelError;

pub const DEFAULT_JUMP_HOST_TAGS: &[&str] =
    &["vaws:jump-host=true", "Name=bastion", "Name=jump-host"];
pub const DEFAULT_JUMP_HOST_NAMES: &[&str] = &["bastion", "jump-host", "jumphost"];

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct JumpHostCandidate {
    pub instance_id: String,
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub network_id: Option<String>,
    pub reachable: bool,
}

/// Heuristics used to rank candidates. Built from configuration, never from literals
/// inside the resolver.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct JumpHostRules {
    /// Instance id or name that must be used when set.
    pub override_host: Option<String>,
    /// `Key=Value` tag checked ahead of `tags`.
    pub override_tag: Option<String>,
    pub tags: Vec<String>,
    pub names: Vec<String>,
    /// Private endpoint to use instead of discovering one.
    pub endpoint_override: Option<String>,
}

impl Default for JumpHostRules {
    fn default() -> Self {
        Self {
            override_host: None,
            override_tag: None,
            tags: DEFAULT_JUMP_HOST_TAGS.iter().map(|t| t.to_string()).collect(),
            names: DEFAULT_JUMP_HOST_NAMES.iter().map(|n| n.to_string()).collect(),
            endpoint_override: None,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum MatchReason {
    Override,
    Tag(String),
    Name(String),
    AnyReachable,
}

impl MatchReason {
    pub fn label(&self) -> String {
        match self {
            Self::Override => "configured override".to_string(),
            Self::Tag(tag) => format!("tag {tag}"),
            Self::Name(name) => format!("name ~ {name}"),
            Self::AnyReachable => "first reachable host".to_string(),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct JumpHostChoice {
    pub candidate: JumpHostCandidate,
    pub reason: MatchReason,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Resolution {
    pub jump_host: JumpHostCandidate,
    pub reason: MatchReason,
    pub private_endpoint: Option<String>,
}

/// Picks the best reachable candidate.
///
/// Ranking: explicit override, then tag rules in order, then name rules in
/// order, then any reachable host. Candidates outside `network_id` are ignored
/// when it is known.
pub fn select_jump_host(
    candidates: &[JumpHostCandidate],
    rules: &JumpHostRules,
    network_id: Option<&str>,
) -> Result<Option<JumpHostChoice>, TunnelError> {
    let eligible = candidates
        .iter()
        .filter(|candidate| candidate.reachable)
        .filter(|candidate| match network_id {
            Some(network) => candidate.network_id.as_deref() == Some(network),
            None => true,
        })
        .collect::<Vec<_>>();

    if let Some(wanted) = rules.override_host.as_deref().map(str::trim)
        && !wanted.is_empty()
    {
        return eligible
            .iter()
            .find(|candidate| {
                candidate.instance_id == wanted || candidate.name.eq_ignore_ascii_case(wanted)
            })
            .map(|candidate| {
                Some(JumpHostChoice {
                    candidate: (*candidate).clone(),
                    reason: MatchReason::Override,
                })
            })
            .ok_or_else(|| {
                TunnelError::Resolution(format!(
                    "configured jump host '{wanted}' is not a reachable instance"
                ))
            });
    }

    let tag_rules = rules
        .override_tag
        .iter()
        .chain(rules.tags.iter())
        .filter(|rule| !rule.trim().is_empty());
    for rule in tag_rules {
        if let Some(candidate) = eligible.iter().find(|c| tag_matches(c, rule)) {
            return Ok(Some(JumpHostChoice {
                candidate: (*candidate).clone(),
                reason: MatchReason::Tag(rule.clone()),
            }));
        }
    }

    for name in rules.names.iter().filter(|name| !name.trim().is_empty()) {
        let needle = name.to_ascii_lowercase();
        if let Some(candidate) = eligible
            .iter()
            .find(|c| c.name.to_ascii_lowercase().contains(&needle))
        {
            return Ok(Some(JumpHostChoice {
                candidate: (*candidate).clone(),
                reason: MatchReason::Name(name.clone()),
            }));
        }
    }

    Ok(eligible.first().map(|candidate| JumpHostChoice {
        candidate: (*candidate).clone(),
        reason: MatchReason::AnyReachable,
    }))
}

fn tag_matches(candidate: &JumpHostCandidate, rule: &str) -> bool {
    match rule.split_once('=') {
        Some((key, value)) => candidate
            .tags
            .get(key.trim())
            .is_some_and(|actual| actual.eq_ignore_ascii_case(value.trim())),
        None => candidate.tags.contains_key(rule.trim()),
    }
}

pub struct JumpHostResolver<B> {
    backend: Arc<B>,
    rules: JumpHostRules,
}

impl<B: TunnelBackend> JumpHostResolver<B> {
    pub fn new(backend: Arc<B>, rules: JumpHostRules) -> Self {
        Self { backend, rules }
    }

    /// Chooses a jump host for a target in `network_id` and looks up a private
    /// endpoint reachable from it. A failed endpoint lookup is not fatal.
    pub async fn resolve(
        &self,
        network_id: Option<&str>,
        override_host: Option<&str>,
    ) -> Result<Resolution, TunnelError> {
        let candidates = self
            .backend
            .list_jump_hosts()
            .await
            .map_err(|error| TunnelError::transport("listing jump hosts", &error))?;
        debug!("{} jump host candidates", candidates.len());

        let rules = match override_host {
            Some(host) => JumpHostRules {
                override_host: Some(host.to_string()),
                ..self.rules.clone()
            },
            None => self.rules.clone(),
        };

        let choice = select_jump_host(&candidates, &rules, network_id)?.ok_or_else(|| {
            TunnelError::Resolution(match network_id {
                Some(network) => format!("no reachable jump host in network {network}"),
                None => "no reachable jump host found".to_string(),
            })
        })?;
        info!(
            "selected jump host {} ({}) by {}",
            choice.candidate.name,
            choice.candidate.instance_id,
            choice.reason.label()
        );

        let private_endpoint = self.private_endpoint(&choice.candidate).await;
        Ok(Resolution {
            jump_host: choice.candidate,
            reason: choice.reason,
            private_endpoint,
        })
    }

    async fn private_endpoint(&self, jump_host: &JumpHostCandidate) -> Option<String> {
        if let Some(endpoint) = self.rules.endpoint_override.as_deref()
            && !endpoint.trim().is_empty()
        {
            return Some(endpoint.trim().to_string());
        }

        let network = jump_host.network_id.as_deref()?;
        match self.backend.find_private_endpoint(network).await {
            Ok(endpoint) => endpoint,
            Err(error) => {
                warn!("private endpoint lookup in {network} failed: {error:#}");
                None
            }
        }
    }
}
