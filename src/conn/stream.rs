//! The stream owned by a live connection: plain TCP, or TLS over TCP.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// A connected client stream.
#[derive(Debug)]
#[pin_project(project = ClientStreamProjection)]
pub enum ClientStream {
    /// Unencrypted TCP.
    Plain(#[pin] TcpStream),

    /// TLS over TCP.
    Tls(#[pin] Box<TlsStream<TcpStream>>),
}

macro_rules! dispatch {
    (pin $stream:ident.$method:ident($($args:expr),*)) => {
        match $stream.project() {
            ClientStreamProjection::Plain(stream) => stream.$method($($args),*),
            ClientStreamProjection::Tls(stream) => stream.$method($($args),*),
        }
    };

    ($stream:ident.$method:ident($($args:expr),*)) => {
        match $stream {
            ClientStream::Plain(stream) => stream.$method($($args),*),
            ClientStream::Tls(stream) => stream.get_ref().0.$method($($args),*),
        }
    };
}

impl ClientStream {
    /// The local address of the underlying socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        dispatch!(self.local_addr())
    }

    /// The remote address of the underlying socket.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        dispatch!(self.peer_addr())
    }

    /// Whether the stream is encrypted.
    pub fn is_tls(&self) -> bool {
        matches!(self, ClientStream::Tls(_))
    }

    /// The TLS session, if the stream is encrypted.
    pub fn tls_session(&self) -> Option<&rustls::ClientConnection> {
        match self {
            ClientStream::Plain(_) => None,
            ClientStream::Tls(stream) => Some(stream.get_ref().1),
        }
    }
}

impl From<TcpStream> for ClientStream {
    fn from(stream: TcpStream) -> Self {
        ClientStream::Plain(stream)
    }
}

impl From<TlsStream<TcpStream>> for ClientStream {
    fn from(stream: TlsStream<TcpStream>) -> Self {
        ClientStream::Tls(Box::new(stream))
    }
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        dispatch!(pin self.poll_read(cx, buf))
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        dispatch!(pin self.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        dispatch!(pin self.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        dispatch!(pin self.poll_shutdown(cx))
    }
}
