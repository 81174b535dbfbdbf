//! Sockets that share the control connection's local port
//!
//! The control connection, the target's listener and the source's outgoing
//! socket all bind the same local port, so every one of them needs address
//! reuse enabled before `bind`.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::{TcpListener, TcpSocket};

/// TCP socket of `remote`'s address family with address reuse enabled
pub fn reusable_socket(remote: SocketAddr) -> io::Result<TcpSocket> {
    let socket = match remote {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    #[cfg(all(
        unix,
        not(any(target_os = "solaris", target_os = "illumos", target_os = "cygwin"))
    ))]
    socket.set_reuseport(true)?;
    Ok(socket)
}

/// Wildcard address of `like`'s family on `port`
pub fn wildcard(like: SocketAddr, port: u16) -> SocketAddr {
    let ip = match like {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, port)
}

/// Reusable socket already bound to `local`
pub fn bound_socket(local: SocketAddr) -> io::Result<TcpSocket> {
    let socket = reusable_socket(local)?;
    socket.bind(local)?;
    Ok(socket)
}

/// Listener on `local` that tolerates other sockets on the same port
pub fn shared_listener(local: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    bound_socket(local)?.listen(backlog)
}
