//! Listener setup: shared SO_REUSEPORT accept paths with a single-listener
//! fallback.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;

const BACKLOG: i32 = 1024;

/// Binds `count` listeners on the same address.
///
/// Preferred mode: one SO_REUSEPORT socket per worker, letting the kernel
/// load-balance accepts across them. When the platform refuses (no
/// reuseport support, exotic socket errors), falls back to a single
/// listener that all workers share.
pub(crate) fn bind(addr: SocketAddr, count: usize) -> io::Result<Vec<TcpListener>> {
    debug_assert!(count > 0);

    match bind_shared(addr, count) {
        Ok(listeners) => Ok(listeners),
        Err(err) => {
            tracing::debug!(%addr, %err, "shared listeners unavailable, using single listener");
            Ok(vec![bind_single(addr)?])
        }
    }
}

fn bind_shared(addr: SocketAddr, count: usize) -> io::Result<Vec<TcpListener>> {
    if !cfg!(unix) || count < 2 {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "shared listeners not applicable",
        ));
    }

    // Bind the first socket before cloning the port: with `addr` port 0
    // the kernel picks the ephemeral port only once.
    let first = bind_reuseport(addr)?;
    let mut resolved = addr;
    resolved.set_port(first.local_addr()?.port());

    let mut listeners = vec![first];
    for _ in 1..count {
        listeners.push(bind_reuseport(resolved)?);
    }
    Ok(listeners)
}

fn bind_reuseport(addr: SocketAddr) -> io::Result<TcpListener> {
    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_tcp_nodelay(true)?;
    socket.set_nonblocking(true)?;

    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    TcpListener::from_std(socket.into())
}

fn bind_single(addr: SocketAddr) -> io::Result<TcpListener> {
    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.set_tcp_nodelay(true)?;
    socket.set_nonblocking(true)?;

    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    TcpListener::from_std(socket.into())
}
