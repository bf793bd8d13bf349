//! Local HTTP front for hosts that route on the Host header.
//!
//! A raw byte relay would hand the upstream `Host: localhost` and, over TLS, a
//! `localhost` SNI, both of which the gateway rejects. Each local connection is
//! parsed as HTTP/1.1 instead, and every request is re-addressed to the upstream
//! with the stage path prefixed before it is forwarded over a kept-alive
//! upstream connection.

use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{CONNECTION, HOST, HeaderName, HeaderValue};
use http::uri::{PathAndQuery, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1::{self as client_http1, SendRequest};
use hyper::server::conn::http1 as server_http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use std::convert::Infallible;
use std::io;
use std::sync::{Arc, Once};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use super::HttpRoute;
use super::session::{SessionSignal, SessionStream, TunnelSession};

type ProxyBody = BoxBody<Bytes, hyper::Error>;

const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

static CRYPTO_PROVIDER: Once = Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

fn tls_connector() -> TlsConnector {
    ensure_crypto_provider();
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

struct Upstream {
    host: String,
    port: u16,
    route: HttpRoute,
    tls: Option<TlsConnector>,
}

impl Upstream {
    /// Value sent as Host. Default ports are left implicit.
    fn authority(&self) -> String {
        let default_port = if self.tls.is_some() { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    async fn open(&self) -> io::Result<SessionStream> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        match &self.tls {
            Some(connector) => {
                let name = ServerName::try_from(self.host.clone())
                    .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;
                let stream = connector.connect(name, stream).await?;
                Ok(Box::new(stream) as SessionStream)
            }
            None => Ok(Box::new(stream) as SessionStream),
        }
    }

    async fn handshake(&self) -> io::Result<SendRequest<Incoming>> {
        let stream = self.open().await?;
        let (sender, connection) = client_http1::handshake(TokioIo::new(stream))
            .await
            .map_err(io::Error::other)?;
        let authority = self.authority();
        tokio::spawn(async move {
            if let Err(error) = connection.await {
                debug!("upstream connection to {authority} ended: {error}");
            }
        });
        Ok(sender)
    }

    async fn forward(
        &self,
        slot: &Mutex<Option<SendRequest<Incoming>>>,
        request: Request<Incoming>,
    ) -> Response<ProxyBody> {
        let request = match rewrite_request(request, &self.authority(), &self.route.base_path) {
            Ok(request) => request,
            Err(error) => return bad_gateway(format!("invalid request: {error}")),
        };
        debug!("proxy {} {}", request.method(), request.uri());

        let mut slot = slot.lock().await;
        let mut sender = match slot.take() {
            Some(sender) if !sender.is_closed() => sender,
            _ => match self.handshake().await {
                Ok(sender) => sender,
                Err(error) => {
                    warn!("could not reach {}: {error}", self.authority());
                    return bad_gateway(format!("upstream unreachable: {error}"));
                }
            },
        };
        if let Err(error) = sender.ready().await {
            return bad_gateway(format!("upstream connection lost: {error}"));
        }
        let response = sender.send_request(request).await;
        *slot = Some(sender);
        match response {
            Ok(response) => response.map(|body| body.boxed()),
            Err(error) => bad_gateway(format!("upstream request failed: {error}")),
        }
    }
}

fn bad_gateway(message: String) -> Response<ProxyBody> {
    let mut response = Response::new(
        Full::new(Bytes::from(message))
            .map_err(|never| match never {})
            .boxed(),
    );
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response
}

/// Joins `base_path` in front of the request path unless it is already there.
fn prefixed_path(base_path: &str, original: &str) -> String {
    let base = base_path.trim_end_matches('/');
    if base.is_empty() {
        return original.to_string();
    }
    let path = original.split('?').next().unwrap_or(original);
    if path == base || path.starts_with(&format!("{base}/")) {
        return original.to_string();
    }
    format!("{base}{original}")
}

/// Re-addresses a locally received request to the upstream.
fn rewrite_request<B>(
    request: Request<B>,
    authority: &str,
    base_path: &str,
) -> Result<Request<B>, http::Error> {
    let (mut parts, body) = request.into_parts();
    let original = parts
        .uri
        .path_and_query()
        .map(PathAndQuery::as_str)
        .unwrap_or("/");
    parts.uri = Uri::builder()
        .path_and_query(prefixed_path(base_path, original))
        .build()?;

    let listed = parts
        .headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect::<Vec<_>>();
    for name in listed {
        parts.headers.remove(name);
    }
    for name in HOP_BY_HOP {
        parts.headers.remove(name);
    }
    parts
        .headers
        .insert(HOST, HeaderValue::from_str(authority)?);
    Ok(Request::from_parts(parts, body))
}

/// Reverse proxy session for a public HTTP(S) endpoint.
pub struct HttpProxySession {
    upstream: Arc<Upstream>,
    signal: Arc<SessionSignal>,
}

impl HttpProxySession {
    pub fn new(host: impl Into<String>, port: u16, route: HttpRoute) -> Self {
        let tls = route.tls.then(tls_connector);
        Self {
            upstream: Arc::new(Upstream {
                host: host.into(),
                port,
                route,
                tls,
            }),
            signal: Arc::new(SessionSignal::new()),
        }
    }
}

impl TunnelSession for HttpProxySession {
    fn connect(&self) -> BoxFuture<'_, io::Result<SessionStream>> {
        Box::pin(async move {
            if self.signal.is_closed() {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "session already closed",
                ));
            }
            self.upstream.open().await
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

    fn serve(&self, inbound: TcpStream) -> BoxFuture<'_, io::Result<()>> {
        let upstream = Arc::clone(&self.upstream);
        Box::pin(async move {
            if self.signal.is_closed() {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "session already closed",
                ));
            }
            let sender: Arc<Mutex<Option<SendRequest<Incoming>>>> = Arc::new(Mutex::new(None));
            let service = service_fn(move |request: Request<Incoming>| {
                let upstream = Arc::clone(&upstream);
                let sender = Arc::clone(&sender);
                async move { Ok::<_, Infallible>(upstream.forward(&sender, request).await) }
            });
            server_http1::Builder::new()
                .keep_alive(true)
                .serve_connection(TokioIo::new(inbound), service)
                .await
                .map_err(io::Error::other)
        })
    }
}
