//! Capabilities the dashboard consumes from the remote platform.
//!
//! The loader only needs paginated listing plus per-item describe; the tunnel
//! orchestrator needs jump host discovery, private endpoint lookup and a way
//! to open sessions. One-shot operations on a selected row live behind
//! [`ResourceActions`].

use anyhow::Result;
use std::future::Future;

use crate::actions::{Invocation, ItemPage, ItemQuery, LogBatch};
use crate::jump_host::JumpHostCandidate;
use crate::model::{DisplayName, LogSource, ResourceKind, ResourcePage};
use crate::tunnel::session::{SessionRoute, TunnelSession};

pub trait ResourceService: Send + Sync + 'static {
    type Detail: DisplayName + Send + 'static;

    /// One page of `kind`. Child kinds are listed under `parent`.
    fn list_page(
        &self,
        kind: ResourceKind,
        parent: Option<&str>,
        token: Option<&str>,
        page_size: usize,
    ) -> impl Future<Output = Result<ResourcePage>> + Send;

    fn describe_one(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> impl Future<Output = Result<Self::Detail>> + Send;

    /// Identifiers of `kind` resources that belong to the given stack.
    fn scope_members(
        &self,
        kind: ResourceKind,
        stack: &str,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;
}

pub trait TunnelBackend: Send + Sync + 'static {
    fn list_jump_hosts(&self) -> impl Future<Output = Result<Vec<JumpHostCandidate>>> + Send;

    /// Private endpoint serving the target from inside `network_id`, if one exists.
    fn find_private_endpoint(
        &self,
        network_id: &str,
    ) -> impl Future<Output = Result<Option<String>>> + Send;

    fn open_session(
        &self,
        route: &SessionRoute,
    ) -> impl Future<Output = Result<Box<dyn TunnelSession>>> + Send;
}

pub trait ResourceActions: Send + Sync + 'static {
    fn invoke_function(
        &self,
        function: &str,
        payload: Option<&str>,
    ) -> impl Future<Output = Result<Invocation>> + Send;

    /// Events newer than `since_ms`, oldest first.
    fn fetch_logs(
        &self,
        source: &LogSource,
        since_ms: i64,
        limit: usize,
    ) -> impl Future<Output = Result<LogBatch>> + Send;

    fn query_items(&self, query: &ItemQuery) -> impl Future<Output = Result<ItemPage>> + Send;
}
