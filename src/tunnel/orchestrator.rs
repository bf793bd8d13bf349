use chrono::Local;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Notify, mpsc};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::registry::{TunnelEntry, TunnelRegistry};
use super::session::{LOCAL_BIND_HOST, SessionRoute, TunnelSession, relay_connections};
use super::{
    Exposure, PendingTunnelRequest, Tunnel, TunnelError, TunnelEvent, TunnelId, TunnelRequest,
    TunnelState,
};
use crate::jump_host::{JumpHostResolver, JumpHostRules, Resolution};
use crate::service::TunnelBackend;

pub const JUMP_HOST_TIMEOUT: Duration = Duration::from_secs(60);
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

struct PendingSlot {
    request: PendingTunnelRequest,
    cancel: Arc<Notify>,
}

/// Clears the pending slot when resolution ends, however it ends.
struct PendingGuard {
    slot: Arc<Mutex<Option<PendingSlot>>>,
    cancel: Arc<Notify>,
}

impl PendingGuard {
    async fn cancelled(&self) {
        self.cancel.notified().await;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Drives tunnels from request to teardown.
///
/// Public, HTTP and container targets skip jump host resolution entirely. Private targets hold the
/// single pending slot while a jump host is resolved; a second private request
/// made in that window is rejected rather than queued.
pub struct TunnelOrchestrator<B> {
    backend: Arc<B>,
    resolver: JumpHostResolver<B>,
    registry: TunnelRegistry,
    pending: Arc<Mutex<Option<PendingSlot>>>,
    events: Option<mpsc::UnboundedSender<TunnelEvent>>,
    next_id: AtomicU64,
    resolve_timeout: Duration,
    establish_timeout: Duration,
}

impl<B: TunnelBackend> TunnelOrchestrator<B> {
    pub fn new(backend: Arc<B>, rules: JumpHostRules) -> Self {
        Self {
            resolver: JumpHostResolver::new(Arc::clone(&backend), rules),
            backend,
            registry: TunnelRegistry::new(),
            pending: Arc::new(Mutex::new(None)),
            events: None,
            next_id: AtomicU64::new(0),
            resolve_timeout: JUMP_HOST_TIMEOUT,
            establish_timeout: SESSION_TIMEOUT,
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<TunnelEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_timeouts(mut self, resolve: Duration, establish: Duration) -> Self {
        self.resolve_timeout = resolve;
        self.establish_timeout = establish;
        self
    }

    pub fn list_active(&self) -> Vec<Tunnel> {
        self.registry.list()
    }

    pub fn get(&self, id: TunnelId) -> Option<Tunnel> {
        self.registry.get(id)
    }

    pub fn pending(&self) -> Option<PendingTunnelRequest> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|slot| slot.request.clone())
    }

    /// Abandons the pending private request. Returns false when nothing was pending.
    pub fn cancel_pending(&self) -> bool {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.as_ref() {
            Some(slot) => {
                let waited = Local::now() - slot.request.requested_at;
                info!(
                    "cancelling pending tunnel to {} after {}s",
                    slot.request.target.label,
                    waited.num_seconds()
                );
                slot.cancel.notify_one();
                true
            }
            None => false,
        }
    }

    pub async fn start_tunnel(&self, request: TunnelRequest) -> Result<Tunnel, TunnelError> {
        let id = TunnelId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let label = request.target.label.clone();
        self.emit(id, &label, TunnelState::Idle, None);

        match self.run_start(id, request).await {
            Ok(tunnel) => {
                info!(
                    "tunnel {id} to {label} listening on {} ({})",
                    tunnel.local_addr(),
                    tunnel.route_label()
                );
                self.emit(
                    id,
                    &label,
                    TunnelState::Active,
                    Some(format!("listening on {}", tunnel.local_addr())),
                );
                Ok(tunnel)
            }
            Err(error) => {
                warn!("tunnel {id} to {label} failed: {error}");
                self.emit(id, &label, TunnelState::Failed, Some(error.to_string()));
                Err(error)
            }
        }
    }

    /// Idempotent. Unknown or already closed ids are not an error.
    pub async fn stop_tunnel(&self, id: TunnelId) -> Result<(), TunnelError> {
        let Some(entry) = self.registry.remove(id) else {
            debug!("stop requested for unknown tunnel {id}");
            return Ok(());
        };
        let label = entry.tunnel.target.label.clone();
        self.emit(id, &label, TunnelState::Stopping, None);
        entry.shut(true).await;
        info!("tunnel {id} to {label} stopped");
        self.emit(id, &label, TunnelState::Closed, None);
        Ok(())
    }

    /// Stops every tunnel and abandons any pending request.
    pub async fn shutdown(&self) {
        self.cancel_pending();
        if self.registry.is_empty() {
            return;
        }
        info!("stopping {} tunnel(s)", self.registry.len());
        for entry in self.registry.drain() {
            let id = entry.tunnel.id;
            let label = entry.tunnel.target.label.clone();
            self.emit(id, &label, TunnelState::Stopping, None);
            entry.shut(true).await;
            self.emit(id, &label, TunnelState::Closed, None);
        }
    }

    async fn run_start(&self, id: TunnelId, request: TunnelRequest) -> Result<Tunnel, TunnelError> {
        if let Some(port) = request.local_port
            && self.registry.port_in_use(port)
        {
            return Err(TunnelError::PortConflict(port));
        }

        let route = match &request.target.exposure {
            Exposure::Public | Exposure::Http(_) | Exposure::Container { .. } => {
                SessionRoute::direct(request.target.clone())
            }
            Exposure::Private { network_id } => {
                let resolution = self
                    .resolve_jump_host(id, &request, network_id.as_deref())
                    .await?;
                SessionRoute {
                    target: request.target.clone(),
                    jump_host: Some(resolution.jump_host),
                    private_endpoint: resolution.private_endpoint,
                }
            }
        };

        self.emit(
            id,
            &request.target.label,
            TunnelState::EstablishingSession,
            Some(route.describe()),
        );
        let (listener, session) =
            match timeout(self.establish_timeout, self.establish(&route, request.local_port)).await
            {
                Ok(established) => established?,
                Err(_) => {
                    return Err(TunnelError::Timeout {
                        stage: "session establishment",
                        after: self.establish_timeout,
                    });
                }
            };
        self.activate(id, route, listener, session).await
    }

    async fn resolve_jump_host(
        &self,
        id: TunnelId,
        request: &TunnelRequest,
        network_id: Option<&str>,
    ) -> Result<Resolution, TunnelError> {
        let guard = self.claim_pending(id, request)?;
        self.emit(
            id,
            &request.target.label,
            TunnelState::ResolvingJumpHost,
            None,
        );

        let lookup = timeout(
            self.resolve_timeout,
            self.resolver.resolve(network_id, request.jump_host.as_deref()),
        );
        tokio::select! {
            resolved = lookup => match resolved {
                Ok(resolution) => resolution,
                Err(_) => Err(TunnelError::Timeout {
                    stage: "jump host discovery",
                    after: self.resolve_timeout,
                }),
            },
            _ = guard.cancelled() => Err(TunnelError::Cancelled),
        }
    }

    fn claim_pending(
        &self,
        id: TunnelId,
        request: &TunnelRequest,
    ) -> Result<PendingGuard, TunnelError> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = pending.as_ref() {
            return Err(TunnelError::PendingBusy(slot.request.target.label.clone()));
        }
        let cancel = Arc::new(Notify::new());
        *pending = Some(PendingSlot {
            request: PendingTunnelRequest {
                id,
                target: request.target.clone(),
                local_port: request.local_port,
                requested_at: Local::now(),
            },
            cancel: Arc::clone(&cancel),
        });
        Ok(PendingGuard {
            slot: Arc::clone(&self.pending),
            cancel,
        })
    }

    async fn establish(
        &self,
        route: &SessionRoute,
        local_port: Option<u16>,
    ) -> Result<(TcpListener, Box<dyn TunnelSession>), TunnelError> {
        let listener = bind_listener(local_port).await?;
        let session = self
            .backend
            .open_session(route)
            .await
            .map_err(|error| TunnelError::transport("opening session", &error))?;
        Ok((listener, session))
    }

    async fn activate(
        &self,
        id: TunnelId,
        route: SessionRoute,
        listener: TcpListener,
        session: Box<dyn TunnelSession>,
    ) -> Result<Tunnel, TunnelError> {
        let session: Arc<dyn TunnelSession> = Arc::from(session);
        let local_port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(error) => {
                if let Err(error) = session.terminate().await {
                    warn!("tunnel {id} session terminate failed: {error:#}");
                }
                return Err(TunnelError::Bind(error));
            }
        };

        let tunnel = Tunnel {
            id,
            remote_port: route.target.port,
            target: route.target,
            local_port,
            state: TunnelState::Active,
            jump_host_id: route.jump_host.as_ref().map(|host| host.instance_id.clone()),
            jump_host_name: route.jump_host.map(|host| host.name),
            private_endpoint: route.private_endpoint,
            created_at: Local::now(),
        };

        let relay = tokio::spawn(relay_connections(listener, Arc::clone(&session), id));
        let entry = TunnelEntry::new(tunnel.clone(), Arc::clone(&session), relay);
        if let Err(entry) = self.registry.insert(entry) {
            entry.shut(true).await;
            return Err(TunnelError::PortConflict(local_port));
        }

        let monitor = tokio::spawn(watch_session(
            self.registry.clone(),
            self.events.clone(),
            id,
            tunnel.target.label.clone(),
            session,
        ));
        self.registry.attach_monitor(id, monitor);
        Ok(tunnel)
    }

    fn emit(&self, id: TunnelId, label: &str, state: TunnelState, message: Option<String>) {
        publish(self.events.as_ref(), id, label, state, message);
    }
}

fn publish(
    events: Option<&mpsc::UnboundedSender<TunnelEvent>>,
    id: TunnelId,
    label: &str,
    state: TunnelState,
    message: Option<String>,
) {
    if let Some(events) = events {
        let _ = events.send(TunnelEvent {
            id,
            label: label.to_string(),
            state,
            message,
        });
    }
}

async fn bind_listener(local_port: Option<u16>) -> Result<TcpListener, TunnelError> {
    let port = local_port.unwrap_or(0);
    TcpListener::bind((LOCAL_BIND_HOST, port))
        .await
        .map_err(|error| match error.kind() {
            io::ErrorKind::AddrInUse => TunnelError::PortConflict(port),
            _ => TunnelError::Bind(error),
        })
}

/// Removes the tunnel once its session ends on its own.
async fn watch_session(
    registry: TunnelRegistry,
    events: Option<mpsc::UnboundedSender<TunnelEvent>>,
    id: TunnelId,
    label: String,
    session: Arc<dyn TunnelSession>,
) {
    session.closed().await;
    drop(session);
    if let Some(entry) = registry.remove(id) {
        warn!("tunnel {id} to {label} lost its session");
        entry.shut(false).await;
        publish(
            events.as_ref(),
            id,
            &label,
            TunnelState::Closed,
            Some("session ended".to_string()),
        );
    }
}
