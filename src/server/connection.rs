use crate::{
    errors::{IoError, IoErrorKind},
    runtime::cancel::CancelToken,
};
use std::io::SeekFrom;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::sleep,
};

/// The byte stream under a [`Connection`]: a plain TCP socket or a
/// TLS-wrapped one.
///
/// A TLS adapter implements this over its record layer and reports the
/// ALPN selection from `negotiated_protocol`; plain TCP reports none.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {
    /// The ALPN protocol selected during the handshake
    /// (`"h2"` / `"http/1.1"`), absent for cleartext connections.
    fn negotiated_protocol(&self) -> Option<&str> {
        None
    }
}

impl Transport for TcpStream {}

/// Backs [`Connection::placeholder`]: reads EOF, rejects writes.
struct ClosedTransport;

impl AsyncRead for ClosedTransport {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        _buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ClosedTransport {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        _buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::task::Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}

impl Transport for ClosedTransport {}

const READ_CHUNK: usize = 8 * 1024;
const FILE_CHUNK: usize = 64 * 1024;

/// A buffered, cancellable byte pipe over a socket.
///
/// Owned exclusively by one connection task for its whole lifetime; the
/// small internal buffer provides parser lookahead. Every operation runs
/// under the per-operation timeout seeded by [`set_timeout`] and observes
/// the cancellation token, completing with `IoErrorKind::Cancelled` when
/// the server shuts down.
///
/// [`set_timeout`]: Connection::set_timeout
pub struct Connection {
    stream: Box<dyn Transport>,
    peer_addr: SocketAddr,
    buf: Vec<u8>,
    buf_pos: usize,
    timeout: Duration,
    cancel: CancelToken,
    open: bool,
}

macro_rules! guarded_io {
    ($self:expr, $operation:expr) => {
        tokio::select! {
            biased;

            _ = $self.cancel.cancelled() => {
                Err(IoError::new(IoErrorKind::Cancelled))
            }
            result = $operation => {
                result.map_err(IoError::from)
            }
            _ = sleep($self.timeout) => {
                Err(IoError::new(IoErrorKind::Timeout))
            }
        }
    };
}

impl Connection {
    pub(crate) fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self::from_transport(Box::new(stream), peer_addr)
    }

    /// Wraps an already-negotiated transport (e.g. a TLS session).
    pub fn from_transport(stream: Box<dyn Transport>, peer_addr: SocketAddr) -> Self {
        Self {
            stream,
            peer_addr,
            buf: Vec::with_capacity(READ_CHUNK),
            buf_pos: 0,
            timeout: Duration::from_secs(30),
            cancel: CancelToken::unlinked(),
            open: true,
        }
    }

    /// A dead connection left behind when ownership of the real one
    /// moves out of a loop (protocol upgrades).
    pub(crate) fn placeholder() -> Self {
        let addr = SocketAddr::from(([0, 0, 0, 0], 0));
        let mut conn = Self::from_transport(Box::new(ClosedTransport), addr);
        conn.open = false;
        conn
    }

    #[inline(always)]
    pub fn remote_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    #[inline(always)]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Seeds the deadline applied to each subsequent operation.
    #[inline(always)]
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    #[inline(always)]
    pub fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = token;
    }

    /// The ALPN selection of the underlying transport.
    #[inline(always)]
    pub fn negotiated_protocol(&self) -> Option<&str> {
        self.stream.negotiated_protocol()
    }

    /// Shuts the write side down and marks the connection closed.
    pub async fn close(&mut self) {
        if self.open {
            self.open = false;
            let _ = self.stream.shutdown().await;
        }
    }
}

// Reads
impl Connection {
    /// Returns buffered bytes, reading from the socket only when the
    /// buffer is empty. An empty return means a clean peer close.
    ///
    /// The caller consumes what it used via [`consume`](Connection::consume).
    pub async fn read(&mut self) -> Result<&[u8], IoError> {
        if self.buf_pos == self.buf.len() {
            self.buf.clear();
            self.buf_pos = 0;
            self.fill().await?;
        }
        Ok(&self.buf[self.buf_pos..])
    }

    /// Marks `n` buffered bytes as consumed.
    #[inline]
    pub fn consume(&mut self, n: usize) {
        self.buf_pos = (self.buf_pos + n).min(self.buf.len());
    }

    /// The bytes currently buffered, without consuming them.
    #[inline]
    pub(crate) fn buffered(&self) -> &[u8] {
        &self.buf[self.buf_pos..]
    }

    /// Reads more bytes into the buffer regardless of what is already
    /// there. Returns 0 on a clean peer close.
    ///
    /// Frame loops build on this: they peek with
    /// [`buffered`](Connection::buffered) until a whole frame is present,
    /// then [`consume`](Connection::consume) it — which keeps a pending
    /// read drop-safe, since partial frames stay buffered.
    pub(crate) async fn fill_more(&mut self) -> Result<usize, IoError> {
        if self.buf_pos == self.buf.len() {
            self.buf.clear();
            self.buf_pos = 0;
        }
        self.fill().await
    }

    /// Reads exactly `out.len()` bytes. A peer close mid-read yields
    /// `EndOfStream`.
    pub async fn read_exact(&mut self, out: &mut [u8]) -> Result<(), IoError> {
        let mut filled = 0;

        while filled < out.len() {
            let available = self.buf.len() - self.buf_pos;
            if available == 0 {
                self.buf.clear();
                self.buf_pos = 0;
                if self.fill().await? == 0 {
                    return Err(IoError::new(IoErrorKind::EndOfStream));
                }
                continue;
            }

            let take = available.min(out.len() - filled);
            out[filled..filled + take]
                .copy_from_slice(&self.buf[self.buf_pos..self.buf_pos + take]);
            self.buf_pos += take;
            filled += take;
        }

        Ok(())
    }

    /// Reads until `delimiter` (inclusive), up to `cap` bytes.
    ///
    /// Exceeding `cap` without seeing the delimiter yields
    /// `InvalidArgument`; a peer close first yields `EndOfStream`.
    pub async fn read_until(&mut self, delimiter: u8, cap: usize) -> Result<Vec<u8>, IoError> {
        let mut out = Vec::new();

        loop {
            let available = &self.buf[self.buf_pos..];
            if let Some(index) = memchr::memchr(delimiter, available) {
                if out.len() + index + 1 > cap {
                    return Err(IoError::new(IoErrorKind::InvalidArgument));
                }
                out.extend_from_slice(&available[..=index]);
                self.buf_pos += index + 1;
                return Ok(out);
            }

            if out.len() + available.len() > cap {
                return Err(IoError::new(IoErrorKind::InvalidArgument));
            }
            out.extend_from_slice(available);
            self.buf.clear();
            self.buf_pos = 0;

            if self.fill().await? == 0 {
                return Err(IoError::new(IoErrorKind::EndOfStream));
            }
        }
    }

    /// Appends up to `READ_CHUNK` fresh bytes to the internal buffer.
    /// Returns 0 on a clean peer close.
    async fn fill(&mut self) -> Result<usize, IoError> {
        self.buf.reserve(READ_CHUNK);
        guarded_io!(self, self.stream.read_buf(&mut self.buf))
    }
}

// Writes
impl Connection {
    /// Writes the whole buffer, looping over partial writes.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<(), IoError> {
        guarded_io!(self, self.stream.write_all(data))
    }

    /// Streams `length` bytes of a file starting at `offset` to the peer.
    ///
    /// Portable read/write loop; kernel zero-copy paths are an internal
    /// upgrade the interface deliberately does not expose.
    pub async fn transmit_file(
        &mut self,
        path: &std::path::Path,
        offset: u64,
        length: u64,
    ) -> Result<(), IoError> {
        let mut file = tokio::fs::File::open(path).await.map_err(IoError::from)?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(IoError::from)?;

        let mut remaining = length;
        let mut chunk = vec![0u8; FILE_CHUNK.min(length as usize).max(1)];

        while remaining > 0 {
            let want = chunk.len().min(remaining as usize);
            let got = file.read(&mut chunk[..want]).await.map_err(IoError::from)?;
            if got == 0 {
                return Err(IoError::new(IoErrorKind::EndOfStream));
            }

            let data = &chunk[..got];
            guarded_io!(self, self.stream.write_all(data))?;
            remaining -= got as u64;
        }

        Ok(())
    }
}
