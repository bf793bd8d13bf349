use futures::future::BoxFuture;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, copy_bidirectional};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{Exposure, TunnelId, TunnelTarget};
use crate::jump_host::JumpHostCandidate;

pub const LOCAL_BIND_HOST: &str = "127.0.0.1";
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

pub trait SessionIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> SessionIo for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type SessionStream = Box<dyn SessionIo>;

/// How a session reaches its target.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SessionRoute {
    pub target: TunnelTarget,
    pub jump_host: Option<JumpHostCandidate>,
    pub private_endpoint: Option<String>,
}

impl SessionRoute {
    pub fn direct(target: TunnelTarget) -> Self {
        Self {
            target,
            jump_host: None,
            private_endpoint: None,
        }
    }

    pub fn describe(&self) -> String {
        match &self.jump_host {
            Some(host) => format!(
                "{}:{} via {} ({})",
                self.private_endpoint.as_deref().unwrap_or(&self.target.host),
                self.target.port,
                host.name,
                host.instance_id
            ),
            None => match &self.target.exposure {
                Exposure::Container { ssm_target } => {
                    format!("port {} in {ssm_target}", self.target.port)
                }
                Exposure::Http(route) => format!(
                    "{}:{}{} http",
                    self.target.host, self.target.port, route.base_path
                ),
                _ => format!("{}:{} direct", self.target.host, self.target.port),
            },
        }
    }
}

/// Forward handle owned by a tunnel. Each relayed connection asks it for a new stream.
pub trait TunnelSession: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, io::Result<SessionStream>>;

    /// Resolves once the session has ended, whether terminated or lost.
    fn closed(&self) -> BoxFuture<'static, ()>;

    fn terminate(&self) -> BoxFuture<'_, anyhow::Result<()>>;

    /// Handles one accepted local connection until either side closes.
    fn serve(&self, mut inbound: TcpStream) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            let mut outbound = self.connect().await?;
            let (sent, received) = copy_bidirectional(&mut inbound, &mut outbound).await?;
            debug!("relay closed ({sent}B out, {received}B in)");
            Ok(())
        })
    }
}

/// Tracks whether a session is still alive.
#[derive(Debug)]
pub struct SessionSignal {
    tx: watch::Sender<bool>,
}

impl SessionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn mark_closed(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn wait(&self) -> BoxFuture<'static, ()> {
        let mut rx = self.tx.subscribe();
        Box::pin(async move {
            let _ = rx.wait_for(|closed| *closed).await;
        })
    }
}

impl Default for SessionSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain TCP proxy to an internet-reachable endpoint.
pub struct DirectSession {
    host: String,
    port: u16,
    signal: Arc<SessionSignal>,
}

impl DirectSession {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            signal: Arc::new(SessionSignal::new()),
        }
    }

    #[cfg(test)]
    pub fn signal(&self) -> Arc<SessionSignal> {
        Arc::clone(&self.signal)
    }
}

impl TunnelSession for DirectSession {
    fn connect(&self) -> BoxFuture<'_, io::Result<SessionStream>> {
        Box::pin(async move {
            if self.signal.is_closed() {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "session already closed",
                ));
            }
            let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as SessionStream)
        })
    }

    fn closed(&self) -> BoxFuture<'static, ()> {
        self.signal.wait()
    }

    fn terminate(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.signal.mark_closed();
            Ok(())
        })
    }
}

/// Accepts local connections and hands each one to the session.
///
/// Aborting the task drops the listener and every relayed connection with it.
pub(crate) async fn relay_connections(
    listener: TcpListener,
    session: Arc<dyn TunnelSession>,
    id: TunnelId,
) {
    relay_accepted(|| listener.accept(), session, id).await;
}

async fn relay_accepted<A, F>(mut accept: A, session: Arc<dyn TunnelSession>, id: TunnelId)
where
    A: FnMut() -> F,
    F: Future<Output = io::Result<(TcpStream, SocketAddr)>>,
{
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = accept() => {
                let (inbound, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        warn!("tunnel {id} accept failed: {error}");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                };
                let _ = inbound.set_nodelay(true);
                let session = Arc::clone(&session);
                connections.spawn(async move {
                    match session.serve(inbound).await {
                        Ok(()) => debug!("tunnel {id} {peer} closed"),
                        Err(error) => warn!("tunnel {id} {peer} relay ended: {error}"),
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DirectSession, SessionRoute, SessionSignal, TunnelSession, relay_accepted,
        relay_connections,
    };
    use crate::jump_host::JumpHostCandidate;
    use crate::tunnel::{Exposure, TunnelId, TunnelTarget};
    use std::io;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn signal_wait_completes_after_close() {
        let signal = SessionSignal::new();
        let waiter = signal.wait();
        assert!(!signal.is_closed());
        signal.mark_closed();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait resolves");
        assert!(signal.is_closed());
    }

    #[tokio::test]
    async fn direct_session_connects_until_terminated() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = upstream.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = upstream.accept().await {
                let _ = socket.write_all(b"hello").await;
            }
        });

        let session = DirectSession::new("127.0.0.1", port);
        let mut stream = session.connect().await.expect("connects");
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        session.terminate().await.unwrap();
        session.closed().await;
        assert!(session.connect().await.is_err());
    }

    #[test]
    fn route_description_prefers_private_endpoint() {
        let target = TunnelTarget::private("api", "abc.execute-api", 443, None);
        let route = SessionRoute {
            target: target.clone(),
            jump_host: Some(JumpHostCandidate {
                instance_id: "i-1".to_string(),
                name: "bastion".to_string(),
                ..JumpHostCandidate::default()
            }),
            private_endpoint: Some("vpce-1.example".to_string()),
        };
        assert_eq!(route.describe(), "vpce-1.example:443 via bastion (i-1)");
        assert_eq!(
            SessionRoute::direct(target).describe(),
            "abc.execute-api:443 direct"
        );
    }

    #[test]
    fn container_routes_name_the_session_target() {
        let target = TunnelTarget {
            label: "abc/web:8080".to_string(),
            host: "localhost".to_string(),
            port: 8080,
            exposure: Exposure::Container {
                ssm_target: "ecs:payments_abc_abc-1".to_string(),
            },
        };
        assert_eq!(
            SessionRoute::direct(target).describe(),
            "port 8080 in ecs:payments_abc_abc-1"
        );
    }

    #[tokio::test]
    async fn relay_pipes_local_connections_to_the_session() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = upstream.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = upstream.accept().await {
                let mut buf = [0u8; 4];
                if socket.read_exact(&mut buf).await.is_ok() {
                    let _ = socket.write_all(&buf).await;
                }
            }
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        let session: Arc<dyn TunnelSession> = Arc::new(DirectSession::new("127.0.0.1", port));
        let relay = tokio::spawn(relay_connections(listener, session, TunnelId(1)));

        let mut client = TcpStream::connect(local).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        relay.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn accept_failures_back_off_before_retrying() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let session: Arc<dyn TunnelSession> = Arc::new(DirectSession::new("127.0.0.1", 1));
        let accept = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(TcpStream, SocketAddr), _>(io::Error::other("too many open files")) }
        };

        let outcome = tokio::time::timeout(
            Duration::from_millis(350),
            relay_accepted(accept, session, TunnelId(1)),
        )
        .await;
        assert!(outcome.is_err());
        let attempts = attempts.load(Ordering::SeqCst);
        assert!((2..=5).contains(&attempts), "{attempts} accept attempts");
    }
}
