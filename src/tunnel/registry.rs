use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tracing::warn;

use super::session::TunnelSession;
use super::{Tunnel, TunnelId};

/// Everything owned by one active tunnel.
pub(crate) struct TunnelEntry {
    pub tunnel: Tunnel,
    pub session: Arc<dyn TunnelSession>,
    relay: JoinHandle<()>,
    monitor: Option<JoinHandle<()>>,
}

impl TunnelEntry {
    pub fn new(tunnel: Tunnel, session: Arc<dyn TunnelSession>, relay: JoinHandle<()>) -> Self {
        Self {
            tunnel,
            session,
            relay,
            monitor: None,
        }
    }

    /// Stops relaying and terminates the session. Termination errors are only logged.
    pub async fn shut(self, abort_monitor: bool) {
        self.relay.abort();
        let _ = self.relay.await;
        if abort_monitor && let Some(monitor) = self.monitor {
            monitor.abort();
        }
        if let Err(error) = self.session.terminate().await {
            warn!("tunnel {} session terminate failed: {error:#}", self.tunnel.id);
        }
    }
}

/// Shared table of active tunnels keyed by id, with at most one tunnel per local port.
#[derive(Clone, Default)]
pub struct TunnelRegistry {
    entries: Arc<RwLock<HashMap<TunnelId, TunnelEntry>>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands the entry back when its local port is already taken.
    pub(crate) fn insert(&self, entry: TunnelEntry) -> Result<(), TunnelEntry> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let port = entry.tunnel.local_port;
        if entries
            .values()
            .any(|existing| existing.tunnel.local_port == port)
        {
            return Err(entry);
        }
        entries.insert(entry.tunnel.id, entry);
        Ok(())
    }

    /// Returns false, aborting `monitor`, when the tunnel is already gone.
    pub(crate) fn attach_monitor(&self, id: TunnelId, monitor: JoinHandle<()>) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(&id) {
            Some(entry) => {
                entry.monitor = Some(monitor);
                true
            }
            None => {
                monitor.abort();
                false
            }
        }
    }

    pub(crate) fn remove(&self, id: TunnelId) -> Option<TunnelEntry> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub(crate) fn drain(&self) -> Vec<TunnelEntry> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, entry)| entry)
            .collect()
    }

    pub fn get(&self, id: TunnelId) -> Option<Tunnel> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|entry| entry.tunnel.clone())
    }

    /// Snapshot ordered by id.
    pub fn list(&self) -> Vec<Tunnel> {
        let mut tunnels = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.tunnel.clone())
            .collect::<Vec<_>>();
        tunnels.sort_by_key(|tunnel| tunnel.id);
        tunnels
    }

    pub fn port_in_use(&self, port: u16) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|entry| entry.tunnel.local_port == port)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::{TunnelEntry, TunnelRegistry};
    use crate::tunnel::session::{DirectSession, TunnelSession};
    use crate::tunnel::{Tunnel, TunnelId, TunnelState, TunnelTarget};
    use chrono::Local;
    use std::sync::Arc;

    fn entry(id: u64, port: u16) -> TunnelEntry {
        let tunnel = Tunnel {
            id: TunnelId(id),
            target: TunnelTarget::public(format!("api-{id}"), "127.0.0.1", 443),
            local_port: port,
            remote_port: 443,
            state: TunnelState::Active,
            jump_host_id: None,
            jump_host_name: None,
            private_endpoint: None,
            created_at: Local::now(),
        };
        let session: Arc<dyn TunnelSession> = Arc::new(DirectSession::new("127.0.0.1", 443));
        TunnelEntry::new(tunnel, session, tokio::spawn(async {}))
    }

    #[tokio::test]
    async fn one_tunnel_per_local_port() {
        let registry = TunnelRegistry::new();
        assert!(registry.insert(entry(1, 9001)).is_ok());
        let rejected = registry.insert(entry(2, 9001));
        assert!(rejected.is_err());
        assert_eq!(registry.len(), 1);
        assert!(registry.port_in_use(9001));
        assert!(!registry.port_in_use(9002));
    }

    #[tokio::test]
    async fn list_is_sorted_and_remove_frees_port() {
        let registry = TunnelRegistry::new();
        for (id, port) in [(3, 9003), (1, 9001), (2, 9002)] {
            assert!(registry.insert(entry(id, port)).is_ok());
        }
        let ids = registry.list().iter().map(|t| t.id.0).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 3]);

        let removed = registry.remove(TunnelId(2)).expect("present");
        removed.shut(true).await;
        assert!(registry.remove(TunnelId(2)).is_none());
        assert!(!registry.port_in_use(9002));
        assert!(registry.get(TunnelId(2)).is_none());
        assert_eq!(registry.get(TunnelId(3)).map(|t| t.local_port), Some(9003));
    }

    #[tokio::test]
    async fn monitor_for_missing_tunnel_is_aborted() {
        let registry = TunnelRegistry::new();
        let monitor = tokio::spawn(std::future::pending::<()>());
        let abort = monitor.abort_handle();
        assert!(!registry.attach_monitor(TunnelId(9), monitor));
        for _ in 0..50 {
            if abort.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(abort.is_finished());
        assert!(registry.is_empty());
    }
}
