//! Raw transport sockets, before admission.
//!
//! # Responsibilities
//! - Expose remote/local addresses of an unaccepted connection
//! - Close a socket that admission rejects
//! - Abstract TCP and unix-domain listeners behind one accept primitive

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};

use crate::net::address::SocketAddress;

/// A connected socket that has not yet been admitted.
pub trait RawConnection: Send + 'static {
    fn remote_address(&self) -> &SocketAddress;

    /// Local side of the connection. Unix-domain sockets report no port.
    fn local_address(&self) -> &SocketAddress;

    /// Close the socket without sending anything.
    fn close(self);
}

/// A stream paired with the addresses captured when it was accepted.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    remote_address: SocketAddress,
    local_address: SocketAddress,
}

pub type TcpConnection = Connection<TcpStream>;

#[cfg(unix)]
pub type UnixConnection = Connection<tokio::net::UnixStream>;

impl<S> Connection<S> {
    pub fn new(stream: S, remote_address: SocketAddress, local_address: SocketAddress) -> Self {
        Self {
            stream,
            remote_address,
            local_address,
        }
    }
}

impl<S: Send + 'static> RawConnection for Connection<S> {
    fn remote_address(&self) -> &SocketAddress {
        &self.remote_address
    }

    fn local_address(&self) -> &SocketAddress {
        &self.local_address
    }

    fn close(self) {
        tracing::trace!(remote = %self.remote_address, "Closing raw connection");
        drop(self.stream);
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Connection<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Connection<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }
}

/// The raw accept primitive of a bound listener.
pub trait Acceptor: Send + Sync + 'static {
    type Connection: RawConnection + AsyncRead + AsyncWrite + Unpin + Send;

    fn accept_raw(&self) -> impl Future<Output = io::Result<Self::Connection>> + Send;

    fn local_address(&self) -> io::Result<SocketAddress>;
}

impl Acceptor for TcpListener {
    type Connection = TcpConnection;

    fn accept_raw(&self) -> impl Future<Output = io::Result<TcpConnection>> + Send {
        async move {
            let (stream, remote) = self.accept().await?;
            let local = stream.local_addr()?;
            Ok(Connection::new(stream, remote.into(), local.into()))
        }
    }

    fn local_address(&self) -> io::Result<SocketAddress> {
        self.local_addr().map(SocketAddress::from)
    }
}

#[cfg(unix)]
impl Acceptor for tokio::net::UnixListener {
    type Connection = UnixConnection;

    fn accept_raw(&self) -> impl Future<Output = io::Result<UnixConnection>> + Send {
        async move {
            let (stream, remote) = self.accept().await?;
            let local = stream.local_addr()?;
            Ok(Connection::new(stream, remote.into(), local.into()))
        }
    }

    fn local_address(&self) -> io::Result<SocketAddress> {
        self.local_addr().map(SocketAddress::from)
    }
}
