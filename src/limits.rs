//! Server configuration limits and timeouts
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Memory overflows
//! - Slowloris attacks
//! - Header flooding
//!
//! Every limit struct supports struct-update configuration:
//!
//! ```
//! use relay_web::limits::ConnLimits;
//! use std::time::Duration;
//!
//! let limits = ConnLimits {
//!     keep_alive_timeout: Duration::from_secs(10),
//!     ..ConnLimits::default()
//! };
//! assert_eq!(limits.max_requests_per_connection, 100);
//! ```

use std::time::Duration;

/// Server-level concurrency and admission behavior.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of runtime worker threads (default: available parallelism).
    ///
    /// Each worker owns its own accept path when the platform supports
    /// shared listeners; otherwise a single listener feeds all workers.
    pub workers: usize,

    /// Maximum number of concurrently served connections (default: `10_000`).
    ///
    /// Connections accepted beyond this limit receive an immediate HTTP
    /// `503` response and are closed before any request parsing happens.
    pub max_connections: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_connections: 10_000,

            _priv: (),
        }
    }
}

/// Per-connection limits and timeouts.
///
/// Default values balance performance, resource usage, and security.
/// Only change if you understand the consequences.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum idle time between requests on a keep-alive connection
    /// (default: `30 seconds`).
    ///
    /// This is the primary mechanism for cleaning up stalled connections
    /// and the `timeout=` value advertised in the `Keep-Alive` header.
    pub keep_alive_timeout: Duration,

    /// Maximum duration of a single socket write (default: `10 seconds`).
    ///
    /// If data can't be written in time, the connection is terminated.
    /// Applies to individual write operations.
    pub socket_write_timeout: Duration,

    /// Maximum number of requests per connection (default: `100`).
    ///
    /// The response to the final permitted request carries
    /// `Connection: close` and the socket is shut down afterwards.
    pub max_requests_per_connection: usize,

    /// Maximum lifetime of a connection from accept to close
    /// (default: `2 minutes`).
    ///
    /// Final safety net; in practice connections are cleaned up by
    /// `keep_alive_timeout` or `max_requests_per_connection` long before
    /// this limit is reached.
    pub connection_lifetime: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            keep_alive_timeout: Duration::from_secs(30),
            socket_write_timeout: Duration::from_secs(10),
            max_requests_per_connection: 100,
            connection_lifetime: Duration::from_secs(120),

            _priv: (),
        }
    }
}

/// Request parsing limits.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum size of the request line plus all headers (default: `8 KiB`).
    ///
    /// Overflow answers `413 Payload Too Large` and closes the connection.
    pub header_block_size: usize,

    /// Maximum request body size, sized or chunked (default: `10 MiB`).
    pub body_size: usize,

    /// Maximum request-target length in bytes (default: `2048`).
    ///
    /// Overflow answers `414 URI Too Long`.
    pub target_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            header_block_size: 8 * 1024,
            body_size: 10 * 1024 * 1024,
            target_size: 2048,

            _priv: (),
        }
    }
}

/// HTTP/2 engine settings, advertised in the server SETTINGS frame.
#[derive(Debug, Clone)]
pub struct Http2Limits {
    /// HPACK dynamic table bound in octets (default: `4096`).
    pub header_table_size: usize,

    /// Initial per-stream flow-control window (default: `65_535`).
    pub initial_window_size: u32,

    /// Largest frame payload the server accepts (default: `16_384`).
    pub max_frame_size: u32,

    /// Concurrent streams permitted per connection (default: `128`).
    pub max_concurrent_streams: u32,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for Http2Limits {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            initial_window_size: 65_535,
            max_frame_size: 16_384,
            max_concurrent_streams: 128,

            _priv: (),
        }
    }
}

/// WebSocket frame limits.
#[derive(Debug, Clone)]
pub struct WsLimits {
    /// Largest single frame payload accepted (default: `1 MiB`).
    ///
    /// Oversized frames fail the connection with a `1009` close.
    pub max_frame_size: usize,

    /// Largest reassembled message across continuation frames
    /// (default: `4 MiB`).
    pub max_message_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for WsLimits {
    fn default() -> Self {
        Self {
            max_frame_size: 1024 * 1024,
            max_message_size: 4 * 1024 * 1024,

            _priv: (),
        }
    }
}

/// The full limit set carried by a server instance.
#[derive(Debug, Clone, Default)]
pub(crate) struct AllLimits {
    pub(crate) server: ServerLimits,
    pub(crate) conn: ConnLimits,
    pub(crate) req: ReqLimits,
    pub(crate) http2: Http2Limits,
    pub(crate) ws: WsLimits,
}
