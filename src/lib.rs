//! relay_web - Asynchronous HTTP server framework
//!
//! An HTTP/1.1 + HTTP/2 server core with pattern routing, composable
//! middleware, and WebSocket upgrades, built on the [tokio] runtime.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: persistent connections, pipelined reads, chunked
//!   transfer in both directions
//! - **HTTP/1.0**: accepted; keep-alive on explicit request only
//! - **HTTP/2**: opt-in via [`Server::enable_http2`] — `h2` through an
//!   external TLS adapter's ALPN, `h2c` through the cleartext upgrade.
//!   No server push.
//! - **WebSocket**: RFC 6455 upgrades on registered paths
//!
//! # Quick Start
//!
//! ```no_run
//! use relay_web::{Request, Response, Server};
//!
//! let mut server = Server::new();
//! server.get("/hello", |_req: Request| async { Response::text("world") });
//! server.get("/user/{id:number}", |req: Request| async move {
//!     let id: u64 = req.param(0).unwrap();
//!     Response::text(format!("user {id}"))
//! });
//! server.run(8080);
//! ```
//!
//! # Architecture
//!
//! One accepted connection is owned by exactly one task for its whole
//! life: the HTTP/1.1 loop, the HTTP/2 engine, or — after an upgrade —
//! a WebSocket handler. The route table and middleware chain freeze
//! before the first accept and are shared without locks. Limits are
//! conservative by default and configured through [`limits`].
//!
//! # Shutdown
//!
//! [`Server::handle`] returns a [`ServerHandle`] usable from any thread:
//! [`stop`](ServerHandle::stop) cancels everything in flight,
//! [`shutdown`](ServerHandle::shutdown) closes the listeners, drains
//! active connections, and only then returns.

pub(crate) mod http {
    pub(crate) mod parser;
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod http2 {
    pub(crate) mod conn;
    pub(crate) mod frame;
    pub(crate) mod hpack;
    pub(crate) mod stream;
}
pub(crate) mod routing {
    pub(crate) mod middleware;
    pub(crate) mod router;
}
pub(crate) mod runtime {
    pub(crate) mod cancel;
    pub(crate) mod listener;
    pub(crate) mod pool;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod http1;
    pub(crate) mod server_impl;
}
pub(crate) mod ws {
    pub(crate) mod frame;
    pub(crate) mod handshake;
    pub(crate) mod socket;
}
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    errors::{HttpError, Http2Error, IoError, IoErrorKind, WsError},
    http::{
        query,
        request::{ParamError, Request},
        response::{Body, Response},
        types::{Headers, Method, StatusCode, Version},
    },
    routing::middleware::{BoxFuture, Handler, Middleware, Next},
    runtime::cancel::{CancelSource, CancelToken},
    server::{
        connection::{Connection, Transport},
        server_impl::{Server, ServerHandle, ShutdownOptions, TlsConfig},
    },
    ws::socket::{WebSocketConnection, WsEvent, WsHandler, WsMessage, WsStreamError},
};
