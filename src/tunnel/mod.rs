//! Local tunnels into remote endpoints.
//!
//! Public endpoints are proxied straight through a direct session, or through
//! [`http_proxy`] when the upstream routes on the Host header. Private ones are
//! reached through a jump host chosen by [`crate::jump_host`], and container
//! ports through their task's session agent. Every session is relayed from a
//! local listener. Active tunnels live in the [`registry::TunnelRegistry`]; the
//! UI only ever sees snapshots.

pub mod http_proxy;
pub mod orchestrator;
pub mod registry;
pub mod session;

use chrono::{DateTime, Local};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::model::Endpoint;

pub use crate::model::{Exposure, HttpRoute};
pub use orchestrator::TunnelOrchestrator;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("{context} failed: {message}")]
    Transport { context: String, message: String },

    #[error("{stage} timed out after {}s", .after.as_secs())]
    Timeout { stage: &'static str, after: Duration },

    #[error("jump host resolution failed: {0}")]
    Resolution(String),

    #[error("local port {0} is already in use")]
    PortConflict(u16),

    #[error("a private tunnel request for {0} is still pending")]
    PendingBusy(String),

    #[error("tunnel request cancelled")]
    Cancelled,

    #[error("failed to bind local listener: {0}")]
    Bind(#[source] std::io::Error),
}

impl TunnelError {
    pub fn transport(context: impl Into<String>, error: &anyhow::Error) -> Self {
        Self::Transport {
            context: context.into(),
            message: format!("{error:#}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TunnelId(pub u64);

impl Display for TunnelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl FromStr for TunnelId {
    type Err = std::num::ParseIntError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let digits = trimmed
            .strip_prefix('t')
            .or_else(|| trimmed.strip_prefix('T'))
            .unwrap_or(trimmed);
        digits.parse::<u64>().map(Self)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum TunnelState {
    Idle,
    ResolvingJumpHost,
    EstablishingSession,
    Active,
    Stopping,
    Closed,
    Failed,
}

impl TunnelState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ResolvingJumpHost => "resolving jump host",
            Self::EstablishingSession => "establishing session",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TunnelTarget {
    pub label: String,
    pub host: String,
    pub port: u16,
    pub exposure: Exposure,
}

impl TunnelTarget {
    #[cfg(test)]
    pub fn public(label: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            label: label.into(),
            host: host.into(),
            port,
            exposure: Exposure::Public,
        }
    }

    #[cfg(test)]
    pub fn private(
        label: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        network_id: Option<String>,
    ) -> Self {
        Self {
            label: label.into(),
            host: host.into(),
            port,
            exposure: Exposure::Private { network_id },
        }
    }

    /// Target for one endpoint of a resource. The endpoint name is appended to
    /// the label when the resource exposes more than one.
    pub fn from_endpoint(resource: &str, endpoint: &Endpoint, qualify: bool) -> Self {
        let label = if qualify && !endpoint.name.is_empty() {
            format!("{resource}/{}", endpoint.name)
        } else {
            resource.to_string()
        };
        Self {
            label,
            host: endpoint.host.clone(),
            port: endpoint.port,
            exposure: endpoint.exposure.clone(),
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self.exposure, Exposure::Private { .. })
    }

    pub fn route_kind(&self) -> &'static str {
        match self.exposure {
            Exposure::Public => "tcp",
            Exposure::Http(_) => "http",
            Exposure::Private { .. } => "private",
            Exposure::Container { .. } => "container",
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TunnelRequest {
    pub target: TunnelTarget,
    pub local_port: Option<u16>,
    /// Jump host to use for this request, overriding configured heuristics.
    pub jump_host: Option<String>,
}

impl TunnelRequest {
    #[cfg(test)]
    pub fn new(target: TunnelTarget, local_port: Option<u16>) -> Self {
        Self {
            target,
            local_port,
            jump_host: None,
        }
    }
}

/// A private tunnel request waiting on jump host resolution.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PendingTunnelRequest {
    pub id: TunnelId,
    pub target: TunnelTarget,
    pub local_port: Option<u16>,
    pub requested_at: DateTime<Local>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Tunnel {
    pub id: TunnelId,
    pub target: TunnelTarget,
    pub local_port: u16,
    pub remote_port: u16,
    pub state: TunnelState,
    pub jump_host_id: Option<String>,
    pub jump_host_name: Option<String>,
    pub private_endpoint: Option<String>,
    pub created_at: DateTime<Local>,
}

impl Tunnel {
    pub fn local_addr(&self) -> String {
        format!("{}:{}", session::LOCAL_BIND_HOST, self.local_port)
    }

    pub fn route_label(&self) -> String {
        match (&self.jump_host_name, &self.jump_host_id) {
            (Some(name), Some(id)) if !name.is_empty() => format!("via {name} ({id})"),
            (_, Some(id)) => format!("via {id}"),
            _ => "direct".to_string(),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TunnelEvent {
    pub id: TunnelId,
    pub label: String,
    pub state: TunnelState,
    pub message: Option<String>,
}
