//! Transport-agnostic socket addresses.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Address of one end of an accepted connection.
///
/// Unix-domain sockets carry no port, which is how the admission layer tells
/// local connections apart from network ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SocketAddress {
    /// TCP endpoint.
    Inet(SocketAddr),
    /// Unix-domain endpoint. Unnamed sockets (typical for the peer side) have no path.
    Unix(Option<PathBuf>),
}

impl SocketAddress {
    /// IP address of an internet endpoint.
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            SocketAddress::Inet(addr) => Some(addr.ip()),
            SocketAddress::Unix(_) => None,
        }
    }

    /// Port of an internet endpoint; always `None` for unix-domain sockets.
    pub fn port(&self) -> Option<u16> {
        match self {
            SocketAddress::Inet(addr) => Some(addr.port()),
            SocketAddress::Unix(_) => None,
        }
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, SocketAddress::Unix(_))
    }

    pub fn unix(path: impl AsRef<Path>) -> Self {
        SocketAddress::Unix(Some(path.as_ref().to_path_buf()))
    }
}

impl From<SocketAddr> for SocketAddress {
    fn from(addr: SocketAddr) -> Self {
        SocketAddress::Inet(addr)
    }
}

#[cfg(unix)]
impl From<tokio::net::unix::SocketAddr> for SocketAddress {
    fn from(addr: tokio::net::unix::SocketAddr) -> Self {
        SocketAddress::Unix(addr.as_pathname().map(Path::to_path_buf))
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketAddress::Inet(addr) => write!(f, "{}", addr),
            SocketAddress::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            SocketAddress::Unix(None) => f.write_str("unix:(unnamed)"),
        }
    }
}
