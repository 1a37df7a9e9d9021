use crate::{
    http::request::Request,
    http::response::Response,
    http::types::Method,
    limits::{AllLimits, ConnLimits, Http2Limits, ReqLimits, ServerLimits, WsLimits},
    routing::middleware::{not_found_handler, Chain, DynHandler, Middleware},
    routing::router::Router,
    runtime::cancel::CancelSource,
    runtime::listener,
    runtime::pool::BufferPool,
    server::connection::{Connection, Transport},
    server::http1,
    ws::socket::{WebSocketConnection, WsHandler},
    http2,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// TLS parameters handed to an external TLS adapter.
///
/// The framework terminates cleartext TCP itself; a TLS adapter wraps
/// accepted sockets using these paths, performs the handshake, and feeds
/// the resulting [`Transport`] back through
/// [`Server::serve_transport`]. `alpn` is the advertisement list, most
/// preferred first.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_file: std::path::PathBuf,
    pub key_file: std::path::PathBuf,
    pub ca_file: Option<std::path::PathBuf>,
    pub alpn: Vec<String>,
}

impl TlsConfig {
    pub fn new(cert_file: impl Into<std::path::PathBuf>, key_file: impl Into<std::path::PathBuf>) -> Self {
        Self {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
            ca_file: None,
            alpn: Vec::new(),
        }
    }
}

/// Graceful shutdown parameters for [`ServerHandle::shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownOptions {
    /// How long to wait for active connections to finish (default: 30 s).
    pub drain_timeout: Duration,
    /// Cancel whatever is still running once the timeout passes
    /// (default: true).
    pub force_close_after_timeout: bool,
}

impl Default for ShutdownOptions {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(30),
            force_close_after_timeout: true,
        }
    }
}

/// Everything the per-connection loops share, frozen before the first
/// accept.
pub(crate) struct AppState {
    pub(crate) router: Router,
    pub(crate) chain: Chain,
    pub(crate) limits: AllLimits,
    pub(crate) buffers: BufferPool,
    pub(crate) http2_enabled: bool,

    /// Hard cancellation: every in-flight I/O completes with cancelled.
    pub(crate) cancel: CancelSource,
    /// Soft stop for the accept loops only.
    accept_cancel: CancelSource,

    not_found: Arc<DynHandler>,
    ws_handlers: Vec<(String, Arc<dyn WsHandler>)>,

    active: AtomicUsize,
    draining: AtomicBool,
    idle: Notify,

    finished: AtomicBool,
    finish: Notify,
}

impl AppState {
    /// Routes one parsed request through the middleware pipeline.
    pub(crate) async fn respond(&self, mut request: Request) -> Response {
        let terminal = match self.router.lookup(request.method(), request.path()) {
            Some((handler, params)) => {
                request.params = params;
                handler
            }
            None => self.not_found.clone(),
        };
        self.chain.dispatch(request, terminal).await
    }

    pub(crate) fn ws_handler(&self, path: &str) -> Option<Arc<dyn WsHandler>> {
        self.ws_handlers
            .iter()
            .find(|(registered, _)| registered == path)
            .map(|(_, handler)| handler.clone())
    }

    pub(crate) fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Admits a connection. `false` means the cap is hit and the caller
    /// must refuse it.
    fn connection_opened(&self) -> bool {
        let previous = self.active.fetch_add(1, Ordering::AcqRel);
        if previous >= self.limits.server.max_connections {
            self.active.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    fn connection_closed(&self) {
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    pub(crate) fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    async fn wait_idle(&self) {
        loop {
            if self.active_connections() == 0 {
                return;
            }
            let notified = self.idle.notified();
            if self.active_connections() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
        self.finish.notify_waiters();
    }

    async fn wait_finished(&self) {
        loop {
            if self.finished.load(Ordering::Acquire) {
                return;
            }
            let notified = self.finish.notified();
            if self.finished.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

/// The server: route table, middleware chain, protocol switches, and the
/// accept machinery.
///
/// Configure, then call [`run`](Server::run) (blocking, own runtime) or
/// [`serve`](Server::serve) (async, caller's runtime). Registration
/// panics once serving has started — the route table and chain are
/// frozen and shared without synchronization.
///
/// # Examples
///
/// ```no_run
/// use relay_web::{Request, Response, Server};
///
/// let mut server = Server::new();
/// server.get("/hello", |_req: Request| async { Response::text("world") });
/// server.threads(4);
/// server.run(8080);
/// ```
pub struct Server {
    router: Router,
    middlewares: Vec<Arc<dyn Middleware>>,
    ws_handlers: Vec<(String, Arc<dyn WsHandler>)>,
    limits: AllLimits,
    http2_enabled: bool,
    tls: Option<TlsConfig>,
    frozen: Option<Arc<AppState>>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            middlewares: Vec::new(),
            ws_handlers: Vec::new(),
            limits: AllLimits::default(),
            http2_enabled: false,
            tls: None,
            frozen: None,
        }
    }

    #[track_caller]
    fn assert_mutable(&self) {
        assert!(
            self.frozen.is_none(),
            "configuration is frozen once the server starts"
        );
    }

    /// Appends a middleware layer. First registered runs outermost.
    ///
    /// # Panics
    /// After serving has started.
    #[track_caller]
    pub fn use_middleware<M: Middleware>(&mut self, middleware: M) -> &mut Self {
        self.assert_mutable();
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Registers a route for an explicit method.
    ///
    /// # Panics
    /// On a malformed pattern, or after serving has started.
    #[track_caller]
    pub fn route<F, Fut>(&mut self, method: Method, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.assert_mutable();
        self.router.add(method, pattern, Arc::new(handler));
        self
    }

    /// Registers a WebSocket handler for an exact path.
    ///
    /// # Panics
    /// After serving has started.
    #[track_caller]
    pub fn ws<F, Fut>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(WebSocketConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.assert_mutable();
        self.ws_handlers.push((path.to_owned(), Arc::new(handler)));
        self
    }

    /// Stores the TLS parameters for the external TLS adapter and
    /// enables the ALPN-aware accept path.
    pub fn enable_tls(&mut self, config: TlsConfig) -> &mut Self {
        self.assert_mutable();
        self.tls = Some(config);
        self
    }

    /// Opts in to HTTP/2: `h2` over TLS (via ALPN) and `h2c` via the
    /// cleartext upgrade.
    pub fn enable_http2(&mut self) -> &mut Self {
        self.assert_mutable();
        self.http2_enabled = true;
        self
    }

    /// Sets the worker thread count (default: available parallelism).
    pub fn threads(&mut self, count: usize) -> &mut Self {
        self.assert_mutable();
        self.limits.server.workers = count.max(1);
        self
    }

    pub fn server_limits(&mut self, limits: ServerLimits) -> &mut Self {
        self.assert_mutable();
        self.limits.server = limits;
        self
    }

    pub fn connection_limits(&mut self, limits: ConnLimits) -> &mut Self {
        self.assert_mutable();
        self.limits.conn = limits;
        self
    }

    pub fn request_limits(&mut self, limits: ReqLimits) -> &mut Self {
        self.assert_mutable();
        self.limits.req = limits;
        self
    }

    pub fn http2_limits(&mut self, limits: Http2Limits) -> &mut Self {
        self.assert_mutable();
        self.limits.http2 = limits;
        self
    }

    pub fn ws_limits(&mut self, limits: WsLimits) -> &mut Self {
        self.assert_mutable();
        self.limits.ws = limits;
        self
    }

    /// The effective TLS configuration, ALPN list filled in.
    pub fn tls_config(&self) -> Option<TlsConfig> {
        let mut config = self.tls.clone()?;
        if config.alpn.is_empty() {
            config.alpn = match self.http2_enabled {
                true => vec!["h2".to_string(), "http/1.1".to_string()],
                false => vec!["http/1.1".to_string()],
            };
        }
        Some(config)
    }

    /// A control handle for stop/shutdown, usable from other threads.
    ///
    /// Taking a handle freezes the configuration.
    pub fn handle(&mut self) -> ServerHandle {
        ServerHandle {
            state: self.freeze(),
        }
    }

    /// Runs the server on its own multi-thread runtime, blocking until
    /// [`ServerHandle::stop`] or [`ServerHandle::shutdown`].
    pub fn run(&mut self, port: u16) {
        let state = self.freeze();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(state.limits.server.workers)
            .enable_all()
            .build()
            .expect("runtime construction failed");

        runtime.block_on(run_until_finished(state, port));
    }

    /// Serves on an already-bound listener inside the caller's runtime,
    /// returning after stop/shutdown.
    pub async fn serve(&mut self, listener: TcpListener) {
        let state = self.freeze();

        let accept = tokio::spawn(accept_loop(listener, state.clone()));
        state.wait_finished().await;
        accept.abort();
    }

    /// Serves one pre-wrapped transport (the TLS adapter entry point).
    /// The connection is routed by its negotiated ALPN protocol.
    pub async fn serve_transport(&mut self, transport: Box<dyn Transport>, peer: SocketAddr) {
        let state = self.freeze();
        if !state.connection_opened() {
            return;
        }
        route_connection(Connection::from_transport(transport, peer), state.clone()).await;
        state.connection_closed();
    }

    pub(crate) fn freeze(&mut self) -> Arc<AppState> {
        if let Some(state) = &self.frozen {
            return state.clone();
        }

        let limits = self.limits.clone();
        let state = Arc::new(AppState {
            router: std::mem::take(&mut self.router),
            chain: Chain::new(std::mem::take(&mut self.middlewares)),
            buffers: BufferPool::new(
                limits.server.max_connections.min(1024),
                limits.req.header_block_size,
            ),
            http2_enabled: self.http2_enabled,
            cancel: CancelSource::new(),
            accept_cancel: CancelSource::new(),
            not_found: not_found_handler(),
            ws_handlers: std::mem::take(&mut self.ws_handlers),
            active: AtomicUsize::new(0),
            draining: AtomicBool::new(false),
            idle: Notify::new(),
            finished: AtomicBool::new(false),
            finish: Notify::new(),
            limits,
        });

        self.frozen = Some(state.clone());
        state
    }
}

/// Remote control over a running server.
///
/// Cloneable and thread-safe; obtained from [`Server::handle`] before
/// `run`. Shutdown completion is observable through
/// [`wait_shutdown`](ServerHandle::wait_shutdown), so tests never poll.
#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<AppState>,
}

impl ServerHandle {
    /// Immediate stop: cancels every in-flight operation and returns the
    /// `run` call.
    pub fn stop(&self) {
        self.state.accept_cancel.cancel();
        self.state.cancel.cancel();
        self.state.finish();
    }

    /// Graceful shutdown: closes the listeners at once, waits up to
    /// `drain_timeout` for active connections to reach zero, then
    /// optionally cancels the stragglers.
    pub async fn shutdown(&self, options: ShutdownOptions) {
        self.state.draining.store(true, Ordering::Release);
        self.state.accept_cancel.cancel();

        let drained = tokio::time::timeout(options.drain_timeout, self.state.wait_idle())
            .await
            .is_ok();

        if !drained && options.force_close_after_timeout {
            self.state.cancel.cancel();
        }

        self.state.finish();
    }

    /// Resolves when the server has finished (after `stop` or
    /// `shutdown`).
    pub async fn wait_shutdown(&self) {
        self.state.wait_finished().await;
    }

    /// Currently served connections.
    pub fn active_connections(&self) -> usize {
        self.state.active_connections()
    }
}

async fn run_until_finished(state: Arc<AppState>, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listeners = match listener::bind(addr, state.limits.server.workers) {
        Ok(listeners) => listeners,
        Err(err) => {
            tracing::error!(%addr, %err, "bind failed");
            state.finish();
            return;
        }
    };

    tracing::debug!(%addr, listeners = listeners.len(), "listening");

    let accepts: Vec<_> = listeners
        .into_iter()
        .map(|listener| tokio::spawn(accept_loop(listener, state.clone())))
        .collect();

    state.wait_finished().await;
    for task in accepts {
        task.abort();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<AppState>) {
    let closed = state.accept_cancel.token();

    loop {
        let accepted = tokio::select! {
            biased;

            _ = closed.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(err) => {
                tracing::debug!(%err, "accept failed");
                continue;
            }
        };

        if !state.connection_opened() {
            tokio::spawn(refuse_overloaded(stream));
            continue;
        }

        let state = state.clone();
        tokio::spawn(async move {
            route_connection(Connection::new(stream, peer), state.clone()).await;
            state.connection_closed();
        });
    }

    // The listener closes as this task drops it.
}

/// Sends the static overload response and drops the socket.
async fn refuse_overloaded(mut stream: tokio::net::TcpStream) {
    const OVERLOADED: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\
        connection: close\r\n\
        content-length: 0\r\n\r\n";
    let _ = stream.write_all(OVERLOADED).await;
    let _ = stream.shutdown().await;
}

/// Protocol selection: `h2` from ALPN goes to the HTTP/2 engine,
/// everything else into the HTTP/1.1 loop (which may still upgrade).
async fn route_connection(conn: Connection, state: Arc<AppState>) {
    match conn.negotiated_protocol() {
        Some("h2") if state.http2_enabled => http2::conn::serve(conn, state).await,
        _ => http1::serve(conn, state).await,
    }
}


// Method-specific registration sugar.
macro_rules! impl_route_methods {
    ($( $(#[$docs:meta])* $name:ident => $method:ident; )*) => {
        impl Server {
            $(
                $(#[$docs])*
                /// # Panics
                /// On a malformed pattern, or after serving has started.
                #[track_caller]
                pub fn $name<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
                where
                    F: Fn(Request) -> Fut + Send + Sync + 'static,
                    Fut: Future<Output = Response> + Send + 'static,
                {
                    self.route(Method::$method, pattern, handler)
                }
            )*
        }
    };
}

impl_route_methods! {
    /// Registers a GET route.
    get => Get;
    /// Registers a POST route.
    post => Post;
    /// Registers a PUT route.
    put => Put;
    /// Registers a DELETE route.
    delete => Delete;
    /// Registers a PATCH route.
    patch => Patch;
    /// Registers a HEAD route.
    head => Head;
    /// Registers an OPTIONS route.
    options => Options;
}
