//! TCP connector.
//!
//! [`TcpConnector`] is a [`tower::Service`] which opens a TCP connection to a
//! single address, tuning the socket before connecting. It performs exactly
//! one connect per call: no timeout, no retries. Those are layered on by the
//! connection manager.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use tokio::net::{TcpSocket, TcpStream};
use tracing::{warn, Instrument as _};

use crate::config::ClientOptions;
use crate::BoxFuture;

/// Socket options applied before connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    /// Time a closing socket may linger to flush unsent data.
    ///
    /// Dropping a lingering socket blocks the calling thread.
    pub linger: Option<Duration>,

    /// The idle time before keep-alive probes start.
    pub keep_alive: Option<Duration>,

    /// Whether to disable Nagle's algorithm.
    pub nodelay: bool,

    /// The size of the send buffer.
    pub send_buffer_size: Option<usize>,

    /// The size of the receive buffer.
    pub recv_buffer_size: Option<usize>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self::from(&ClientOptions::default())
    }
}

impl From<&ClientOptions> for TcpConfig {
    fn from(options: &ClientOptions) -> Self {
        Self {
            linger: options.linger,
            keep_alive: options.keep_alive,
            nodelay: options.nodelay,
            send_buffer_size: Some(options.buffer_size),
            recv_buffer_size: Some(options.buffer_size),
        }
    }
}

/// Connects to a socket address over TCP.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    config: Arc<TcpConfig>,
}

impl TcpConnector {
    /// Create a connector with the given socket options.
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// The socket options used for new connections.
    pub fn config(&self) -> &TcpConfig {
        &self.config
    }
}

impl tower::Service<SocketAddr> for TcpConnector {
    type Response = TcpStream;
    type Error = io::Error;
    type Future = BoxFuture<'static, io::Result<TcpStream>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, addr: SocketAddr) -> Self::Future {
        let socket = match socket(&addr, &self.config) {
            Ok(socket) => socket,
            Err(error) => return Box::pin(std::future::ready(Err(error))),
        };

        let nodelay = self.config.nodelay;
        let span = tracing::trace_span!("tcp", remote.addr = %addr);
        Box::pin(
            async move {
                let stream = socket.connect(addr).await?;
                if let Err(error) = stream.set_nodelay(nodelay) {
                    warn!("tcp set_nodelay error: {error}");
                }
                tracing::trace!("tcp connected");
                Ok(stream)
            }
            .instrument(span),
        )
    }
}

fn socket(addr: &SocketAddr, config: &TcpConfig) -> io::Result<TcpSocket> {
    let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
    tracing::trace!("tcp socket opened");

    let _guard = tracing::trace_span!("socket_options").entered();

    // Tokio requires O_NONBLOCK on sockets it adopts.
    socket.set_nonblocking(true)?;

    if let Some(idle) = config.keep_alive {
        let keepalive = TcpKeepalive::new().with_time(idle);
        if let Err(error) = socket.set_tcp_keepalive(&keepalive) {
            warn!("tcp set_keepalive error: {error}");
        }
    }

    if let Err(error) = socket.set_linger(config.linger) {
        warn!("tcp set_linger error: {error}");
    }

    if let Some(size) = config.send_buffer_size {
        if let Err(error) = socket.set_send_buffer_size(size) {
            warn!("tcp set_send_buffer_size error: {error}");
        }
    }

    if let Some(size) = config.recv_buffer_size {
        if let Err(error) = socket.set_recv_buffer_size(size) {
            warn!("tcp set_recv_buffer_size error: {error}");
        }
    }

    Ok(TcpSocket::from_std_stream(std::net::TcpStream::from(socket)))
}
