//! HTTP server and graceful shutdown.
//!
//! One tokio task per accepted connection; hyper's auto builder speaks
//! HTTP/1.1 or HTTP/2, whichever the client negotiates.
//!
//! Transport bounds come from [`ServerConfig`]:
//!
//! - `read_timeout`: time allowed for a client to send its request head;
//! - `write_timeout`: time allowed to read the body and produce the response.
//!   On expiry the request future is dropped and the connection closed;
//! - `idle_timeout`: a keep-alive connection with nothing in flight for this
//!   long is closed gracefully;
//! - `max_header_bytes`: cap on the HTTP/1 read buffer and the HTTP/2 header
//!   list.
//!
//! # Shutdown
//!
//! On SIGTERM or Ctrl-C the accept loop stops, every open connection is told
//! to finish its in-flight requests and close, and the server waits up to
//! [`GRACE_PERIOD`] for them. Whatever is still running after that is aborted.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, debug, error, info, warn};

use crate::config::{ConfigError, MIN_HEADER_BYTES, ServerConfig};
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;

/// How long in-flight connections get to finish once shutdown starts.
pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// A bound, not yet serving, HTTP server.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
}

impl Server {
    /// Binds `addr:port` from `config`. Port `0` picks a free port; see
    /// [`local_addr`](Server::local_addr).
    ///
    /// Fails with [`ConfigError::HeaderLimit`] if `max_header_bytes` is below
    /// [`MIN_HEADER_BYTES`], which hyper cannot run with.
    pub async fn bind(config: &ServerConfig) -> Result<Self, Error> {
        if config.max_header_bytes < MIN_HEADER_BYTES {
            return Err(ConfigError::HeaderLimit(config.max_header_bytes).into());
        }
        let listener = TcpListener::bind((config.addr.as_str(), config.port)).await?;
        Ok(Self { listener, config: config.clone() })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves `router` until SIGTERM or Ctrl-C, then drains.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        self.serve_with_shutdown(router, shutdown_signal()).await
    }

    /// Serves `router` until `signal` resolves, then drains.
    ///
    /// Connection tasks and request futures run under the subscriber that is
    /// current when this is called.
    pub async fn serve_with_shutdown<F>(self, router: Router, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.local_addr()?;
        let router = Arc::new(router);
        let settings = Arc::new(self.config);
        let dispatch = tracing::dispatcher::get_default(Dispatch::clone);
        let stop = CancellationToken::new();
        let mut tasks = JoinSet::new();

        info!(%addr, "listening");

        let mut signal = pin!(signal);

        loop {
            tokio::select! {
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = self.listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!(error = %e, "accept error");
                            continue;
                        }
                    };

                    let connection = serve_connection(
                        stream,
                        remote_addr,
                        Arc::clone(&router),
                        Arc::clone(&settings),
                        stop.child_token(),
                    );
                    tasks.spawn(connection.with_subscriber(dispatch.clone()));
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(self.listener);
        stop.cancel();

        let drained = tokio::time::timeout(GRACE_PERIOD, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(remaining = tasks.len(), "grace period elapsed, aborting connections");
            tasks.shutdown().await;
        }

        info!("server stopped");
        Ok(())
    }
}

// ── Connections ───────────────────────────────────────────────────────────────

async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    router: Arc<Router>,
    settings: Arc<ServerConfig>,
    stop: CancellationToken,
) {
    let activity = Arc::new(Activity::new());
    let dispatch = tracing::dispatcher::get_default(Dispatch::clone);
    let write_timeout = settings.write_timeout;

    let svc = {
        let activity = Arc::clone(&activity);
        service_fn(move |req| {
            let router = Arc::clone(&router);
            let busy = activity.begin();
            async move {
                let _busy = busy;
                let response = tokio::time::timeout(write_timeout, respond(&router, req, remote_addr)).await;
                if response.is_err() {
                    warn!(peer = %remote_addr, timeout = ?write_timeout, "write timeout exceeded");
                }
                response
            }
            .with_subscriber(dispatch.clone())
        })
    };

    let mut builder = ConnBuilder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(settings.read_timeout)
        .max_buf_size(settings.max_header_bytes);
    builder
        .http2()
        .timer(TokioTimer::new())
        .max_header_list_size(u32::try_from(settings.max_header_bytes).unwrap_or(u32::MAX));

    let mut conn = pin!(builder.serve_connection(TokioIo::new(stream), svc));
    let mut closing = false;

    loop {
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    debug!(peer = %remote_addr, error = %e, "connection closed with error");
                }
                break;
            }

            () = stop.cancelled(), if !closing => {
                closing = true;
                conn.as_mut().graceful_shutdown();
            }

            () = activity.idle(settings.idle_timeout), if !closing => {
                debug!(peer = %remote_addr, "closing idle connection");
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

/// Reads the body, runs the router, converts the response.
async fn respond(
    router: &Router,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> http::Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(peer = %remote_addr, error = %e, "failed to read request body");
            return Response::status(StatusCode::BAD_REQUEST).into_http();
        }
    };

    let request = Request::new(parts.method, parts.uri.path().to_owned(), parts.headers, body, remote_addr);
    router.handle(request).await.into_http()
}

/// Per-connection request bookkeeping for the idle timeout.
struct Activity {
    opened: Instant,
    in_flight: AtomicUsize,
    /// Milliseconds since `opened` at the last request boundary.
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self { opened: Instant::now(), in_flight: AtomicUsize::new(0), last_ms: AtomicU64::new(0) }
    }

    fn begin(self: &Arc<Self>) -> Busy {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.touch();
        Busy(Arc::clone(self))
    }

    fn touch(&self) {
        let now = u64::try_from(self.opened.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_ms.store(now, Ordering::Release);
    }

    fn quiet_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Acquire));
        self.opened.elapsed().saturating_sub(last)
    }

    /// Resolves once nothing has been in flight for `limit`.
    async fn idle(&self, limit: Duration) {
        loop {
            let busy = self.in_flight.load(Ordering::Acquire) > 0;
            let quiet = self.quiet_for();
            if !busy && quiet >= limit {
                return;
            }
            let wait = if busy { limit } else { limit - quiet };
            tokio::time::sleep(wait).await;
        }
    }
}

/// Marks one request in flight until dropped.
struct Busy(Arc<Activity>);

impl Drop for Busy {
    fn drop(&mut self) {
        self.0.touch();
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C. A handler that cannot be
/// installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    async fn hello(_req: Request) -> Response {
        Response::text("hello")
    }

    async fn sleepy(_req: Request) -> Response {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Response::text("late")
    }

    fn local(config: ServerConfig) -> ServerConfig {
        ServerConfig { addr: "127.0.0.1".to_owned(), port: 0, ..config }
    }

    async fn start(config: ServerConfig, router: Router) -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<()>) {
        let server = Server::bind(&local(config)).await.unwrap();
        let addr = server.local_addr().unwrap();
        let stop = CancellationToken::new();
        let signal = stop.clone();
        let handle = tokio::spawn(async move {
            server.serve_with_shutdown(router, async move { signal.cancelled().await }).await.unwrap();
        });
        (addr, stop, handle)
    }

    async fn read_all(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[tokio::test]
    async fn serves_http1() {
        let (addr, stop, handle) = start(ServerConfig::default(), Router::new().get("/", hello)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\nhost: x\r\nconnection: close\r\n\r\n").await.unwrap();
        let raw = read_all(&mut stream).await;

        assert!(raw.starts_with("HTTP/1.1 200 OK"));
        assert!(raw.ends_with("hello"));

        stop.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn header_limit_below_hyper_minimum_is_rejected_at_bind() {
        let config = local(ServerConfig { max_header_bytes: 1024, ..ServerConfig::default() });
        let err = Server::bind(&config).await.err().unwrap();
        assert!(matches!(err, Error::Config(ConfigError::HeaderLimit(1024))));

        let config = ServerConfig { max_header_bytes: MIN_HEADER_BYTES, ..ServerConfig::default() };
        let (addr, stop, handle) = start(config, Router::new().get("/", hello)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\nhost: x\r\nconnection: close\r\n\r\n").await.unwrap();
        assert!(read_all(&mut stream).await.starts_with("HTTP/1.1 200 OK"));

        stop.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn idle_connections_are_closed() {
        let config = ServerConfig { idle_timeout: Duration::from_millis(100), ..ServerConfig::default() };
        let (addr, stop, handle) = start(config, Router::new().get("/", hello)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(5), read_all(&mut stream)).await;
        assert_eq!(closed.unwrap(), "");

        stop.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn write_timeout_drops_the_connection() {
        let config = ServerConfig { write_timeout: Duration::from_millis(100), ..ServerConfig::default() };
        let (addr, stop, handle) = start(config, Router::new().get("/", sleepy)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\nhost: x\r\n\r\n").await.unwrap();
        // The connection is dropped without a response; a reset is as good as EOF here.
        let mut buf = Vec::new();
        let closed = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf)).await;
        assert!(closed.is_ok());
        assert!(!String::from_utf8_lossy(&buf).contains("late"));

        stop.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_requests() {
        async fn brief(_req: Request) -> Response {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Response::text("done")
        }

        let (addr, stop, handle) = start(ServerConfig::default(), Router::new().get("/", brief)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\nhost: x\r\n\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.cancel();

        let raw = read_all(&mut stream).await;
        assert!(raw.starts_with("HTTP/1.1 200 OK"));
        assert!(raw.ends_with("done"));
        handle.await.unwrap();
    }
}
