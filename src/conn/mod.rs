//! Connection manager.
//!
//! A [`Connection`] owns at most one transport at a time. Each call to
//! [`Connection::connect`] runs a fresh attempt:
//!
//! 1. resolve the target,
//! 2. connect over TCP, bounded by the connect timeout,
//! 3. optionally upgrade to TLS, bounded by the same timeout.
//!
//! Every attempt gets a new [`CancelScope`] and a new timing record. Closing
//! or reconnecting cancels the scope, so that any operation still in flight
//! returns promptly with a cancellation error, before the transport is torn
//! down.
//!
//! The connection performs exactly one attempt per call. Retrying is up to
//! the caller (see [`TestClient::connect_with_retry`][crate::TestClient::connect_with_retry]).

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt as _};
use tokio::net::TcpStream;
use tower::ServiceExt as _;
use tracing::Instrument as _;

use crate::cancel::CancelScope;
use crate::config::ClientOptions;
use crate::diagnostics::Diagnostics;
use crate::error::{ConnectError, Error};
use crate::resolve::EndpointResolver;
use crate::target::EndpointTarget;
use crate::timing::{ConnectTiming, ConnectTimingBuilder, Phase};
use crate::tls::{self, TlsOptions};
use crate::transfer::{self, StreamReport, TransferOptions, TransferResult};

mod info;
mod stream;
mod tcp;

pub use self::info::{ConnectionInfo, TlsConnectionInfo};
pub use self::stream::ClientStream;
pub use self::tcp::{TcpConfig, TcpConnector};

/// How long a graceful shutdown may take before the transport is dropped.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Bound `future` by `after`, reporting a timeout for `phase`.
///
/// On expiry the inner future is dropped, which abandons the in-flight
/// operation and closes any socket it owned.
async fn bounded<F, T>(phase: Phase, after: Duration, future: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    tokio::time::timeout(after, future).await.map_err(|_| {
        tracing::trace!(%phase, timeout = ?after, "deadline elapsed");
        Error::Timeout { phase, after }
    })?
}

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connect has been attempted.
    Unconnected,

    /// Resolving the target.
    Resolving,

    /// Establishing the transport.
    Connecting,

    /// Connected without TLS.
    Connected,

    /// Running the TLS handshake.
    Upgrading,

    /// Connected with TLS.
    Secured,

    /// Closed by the caller.
    Closed,

    /// The last connect attempt failed.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Resolving => "resolving",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Upgrading => "upgrading",
            ConnectionState::Secured => "secured",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A single, reconnectable connection to one endpoint target.
///
/// The connector `C` opens the transport for a resolved address. It defaults
/// to [`TcpConnector`]; any `tower::Service<SocketAddr>` producing a
/// [`TcpStream`] will do.
#[derive(Debug)]
pub struct Connection<C = TcpConnector> {
    target: EndpointTarget,
    resolver: EndpointResolver,
    connector: C,
    tls: TlsOptions,
    tls_config: Option<Arc<ClientConfig>>,
    connect_timeout: Duration,
    transfer: TransferOptions,
    diagnostics: Diagnostics,
    state: ConnectionState,
    stream: Option<ClientStream>,
    info: Option<ConnectionInfo>,
    scope: CancelScope,
    last_timing: Option<ConnectTiming>,
}

impl Connection {
    /// Create an unconnected connection to `target`.
    ///
    /// Uses the system resolver and a [`TcpConnector`] configured from
    /// `options`. TLS is used only if the target's scheme implies it, with the
    /// default [`TlsOptions`].
    pub fn new(target: EndpointTarget, options: &ClientOptions) -> Self {
        let mut resolver = EndpointResolver::default().with_preference(options.prefer);
        if let Some(seed) = options.seed {
            resolver = resolver.with_seed(seed);
        }

        Self {
            target,
            resolver,
            connector: TcpConnector::new(TcpConfig::from(options)),
            tls: TlsOptions::default(),
            tls_config: None,
            connect_timeout: options.connect_timeout,
            transfer: TransferOptions::from(options),
            diagnostics: Diagnostics::new(
                Arc::new(crate::diagnostics::TracingSink),
                options.description.as_str(),
            ),
            state: ConnectionState::Unconnected,
            stream: None,
            info: None,
            scope: CancelScope::new(),
            last_timing: None,
        }
    }
}

impl<C> Connection<C> {
    /// Replace the transport connector.
    pub fn with_connector<C2>(self, connector: C2) -> Connection<C2> {
        Connection {
            target: self.target,
            resolver: self.resolver,
            connector,
            tls: self.tls,
            tls_config: self.tls_config,
            connect_timeout: self.connect_timeout,
            transfer: self.transfer,
            diagnostics: self.diagnostics,
            state: self.state,
            stream: self.stream,
            info: self.info,
            scope: self.scope,
            last_timing: self.last_timing,
        }
    }

    /// Replace the endpoint resolver.
    pub fn with_resolver(mut self, resolver: EndpointResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Set the TLS policy.
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self.tls_config = None;
        self
    }

    /// Set where diagnostic messages go.
    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// The target this connection resolves on every connect.
    pub fn target(&self) -> &EndpointTarget {
        &self.target
    }

    /// The current lifecycle state.
    ///
    /// Once the attempt's scope is cancelled through a
    /// [`cancel_handle`][Self::cancel_handle], the connection reports
    /// [`ConnectionState::Closed`] even though the transport is only torn
    /// down by the next [`close`][Self::close] or connect.
    pub fn state(&self) -> ConnectionState {
        if self.stream.is_some() && self.scope.is_cancelled() {
            return ConnectionState::Closed;
        }
        self.state
    }

    /// Whether a transport is live and its scope has not been cancelled.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some() && !self.scope.is_cancelled()
    }

    /// Details of the live connection.
    pub fn info(&self) -> Option<&ConnectionInfo> {
        self.info.as_ref()
    }

    /// Local address of the live transport.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.info.as_ref().map(|info| info.local_addr)
    }

    /// Remote address of the live transport.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.info.as_ref().map(|info| info.remote_addr)
    }

    /// Timing of the most recent connect attempt.
    pub fn last_timing(&self) -> Option<&ConnectTiming> {
        self.last_timing.as_ref()
    }

    /// A handle to the current attempt's cancellation scope.
    ///
    /// Cancelling it from another task makes any in-flight transfer return
    /// with a cancellation error. A later connect uses a new scope.
    pub fn cancel_handle(&self) -> CancelScope {
        self.scope.clone()
    }

    /// The live stream, for exchanging data directly.
    pub fn stream_mut(&mut self) -> Option<&mut ClientStream> {
        self.stream.as_mut()
    }

    /// Close the connection.
    ///
    /// Cancels the current scope, then attempts a graceful shutdown (TLS
    /// close-notify, then TCP FIN) bounded by a short grace period before
    /// dropping the transport. Errors from the graceful step are ignored.
    /// Safe to call repeatedly, or before any connect.
    pub async fn close(&mut self) {
        self.scope.cancel();

        if let Some(mut stream) = self.stream.take() {
            match tokio::time::timeout(CLOSE_GRACE, stream.shutdown()).await {
                Ok(Ok(())) => tracing::trace!("graceful shutdown complete"),
                Ok(Err(error)) => tracing::debug!(%error, "graceful shutdown failed"),
                Err(_) => tracing::debug!("graceful shutdown timed out"),
            }
            drop(stream);
            self.diagnostics
                .log(format!("closed connection to {}", self.target))
                .await;
        }

        self.info = None;
        if self.state != ConnectionState::Unconnected {
            self.state = ConnectionState::Closed;
        }
    }

    /// Send `payload` and check that it is echoed back unchanged.
    pub async fn echo(&mut self, payload: &[u8]) -> TransferResult<Bytes> {
        let result = match self.stream.as_mut() {
            Some(stream) => transfer::echo_bytes(stream, payload, &self.transfer, &self.scope).await,
            None => TransferResult::not_connected(Bytes::new()),
        };

        if let Some(message) = result.message() {
            self.diagnostics
                .error(format!("echo of {} bytes failed: {message}", payload.len()))
                .await;
        }
        result
    }

    /// Stream `source` through the echo, optionally verifying digests.
    pub async fn stream_and_verify<S>(
        &mut self,
        source: S,
        destination: Option<&mut (dyn AsyncWrite + Unpin + Send)>,
        verify: bool,
    ) -> StreamReport
    where
        S: AsyncRead + Unpin,
    {
        let report = match self.stream.as_mut() {
            Some(stream) => {
                transfer::stream_and_verify(
                    stream,
                    source,
                    destination,
                    verify,
                    &self.transfer,
                    &self.scope,
                )
                .await
            }
            None => StreamReport::not_connected(),
        };

        if report.success {
            self.diagnostics.log(&report.message).await;
        } else {
            self.diagnostics
                .error(format!("stream transfer failed: {}", report.message))
                .await;
        }
        report
    }

    fn tls_config(&mut self) -> Result<Arc<ClientConfig>, Error> {
        if let Some(config) = &self.tls_config {
            return Ok(config.clone());
        }

        let config = self.tls.client_config()?;
        self.tls_config = Some(config.clone());
        Ok(config)
    }
}

impl<C> Connection<C>
where
    C: tower::Service<SocketAddr, Response = TcpStream, Error = io::Error> + Clone + Send + 'static,
    C::Future: Send,
{
    /// Run one connect attempt.
    ///
    /// Any existing transport is closed first. On success the timing of the
    /// attempt is returned; on failure the error carries it instead.
    pub async fn connect(&mut self) -> Result<ConnectTiming, ConnectError> {
        if self.stream.is_some() {
            self.close().await;
        }

        let scope = CancelScope::new();
        self.scope = scope.clone();

        let span = tracing::debug_span!("connect", endpoint = %self.target);
        let mut timing = ConnectTimingBuilder::new();
        let outcome = self
            .establish(&scope, &mut timing)
            .instrument(span)
            .await;

        match outcome {
            Ok((stream, info)) => {
                self.state = if stream.is_tls() {
                    ConnectionState::Secured
                } else {
                    ConnectionState::Connected
                };
                self.diagnostics
                    .log(format!(
                        "connected to {} from {}",
                        info.endpoint, info.local_addr
                    ))
                    .await;
                self.stream = Some(stream);
                self.info = Some(info);

                let timing = timing.finish();
                self.last_timing = Some(timing.clone());
                Ok(timing)
            }
            Err(error) => {
                self.state = ConnectionState::Failed;
                timing.error(error.to_string());
                let timing = timing.finish();
                self.last_timing = Some(timing.clone());

                let error = ConnectError::new(error, timing);
                self.diagnostics
                    .error(format!("connect to {} failed: {error}", self.target))
                    .await;
                Err(error)
            }
        }
    }

    /// Close the current transport and run a fresh connect attempt.
    pub async fn reconnect(&mut self) -> Result<ConnectTiming, ConnectError> {
        self.close().await;
        self.connect().await
    }

    async fn establish(
        &mut self,
        scope: &CancelScope,
        timing: &mut ConnectTimingBuilder,
    ) -> Result<(ClientStream, ConnectionInfo), Error> {
        self.state = ConnectionState::Resolving;
        let mut phases = Vec::new();
        let resolved = scope
            .run(self.resolver.resolve_timed(&self.target, &mut phases))
            .await;
        for (phase, elapsed) in phases {
            timing.record(phase, elapsed);
        }
        let endpoint = resolved??;
        tracing::debug!(%endpoint, "resolved");

        self.state = ConnectionState::Connecting;
        let started = Instant::now();
        let connect = self.connector.clone().oneshot(endpoint.addr);
        let tcp = scope
            .run(bounded(Phase::Connect, self.connect_timeout, async move {
                connect.await.map_err(Error::Connect)
            }))
            .await
            .and_then(|connected| connected);
        timing.record_since(Phase::Connect, started);
        let tcp = tcp?;

        let local_addr = tcp.local_addr().map_err(Error::Connect)?;
        let remote_addr = tcp.peer_addr().map_err(Error::Connect)?;

        if !self.tls.applies_to(&self.target) {
            return Ok((
                ClientStream::from(tcp),
                ConnectionInfo {
                    endpoint,
                    local_addr,
                    remote_addr,
                    tls: None,
                },
            ));
        }

        self.state = ConnectionState::Upgrading;
        let started = Instant::now();
        let server_name = self.tls.server_name_for(&self.target, &endpoint);
        let secured = match self.tls_config() {
            Ok(config) => scope
                .run(bounded(
                    Phase::Handshake,
                    self.connect_timeout,
                    tls::upgrade(tcp, &server_name, config),
                ))
                .await
                .and_then(|secured| secured),
            Err(error) => Err(error),
        };
        timing.record_since(Phase::Handshake, started);
        let secured = secured?;

        let tls = TlsConnectionInfo::client(server_name, secured.get_ref().1);
        tracing::debug!(
            server.name = %tls.server_name,
            version = ?tls.protocol_version,
            cipher = ?tls.cipher_suite,
            "tls established"
        );

        Ok((
            ClientStream::from(secured),
            ConnectionInfo {
                endpoint,
                local_addr,
                remote_addr,
                tls: Some(tls),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::future::Pending;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::task::{Context, Poll};

    use tokio::io::AsyncReadExt as _;
    use tokio::net::TcpListener;

    use super::*;
    use crate::dns::{DnsResolver, SrvRecord, StaticResolver};
    use crate::error::ResolutionError;
    use crate::fixtures::echo_server;
    use crate::target::ServiceRecordSpec;
    use crate::transfer::TransferError;
    use crate::BoxFuture;

    #[derive(Debug, Clone)]
    struct Hang;

    impl tower::Service<SocketAddr> for Hang {
        type Response = TcpStream;
        type Error = io::Error;
        type Future = Pending<io::Result<TcpStream>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _: SocketAddr) -> Self::Future {
            std::future::pending()
        }
    }

    fn connection(addr: SocketAddr) -> Connection {
        Connection::new(
            EndpointTarget::address(addr.ip(), addr.port()),
            &ClientOptions::default(),
        )
    }

    #[tokio::test]
    async fn connect_echo_close() {
        let _ = tracing_subscriber::fmt::try_init();

        let addr = echo_server().await;
        let mut conn = connection(addr);
        assert_eq!(conn.state(), ConnectionState::Unconnected);
        assert_eq!(conn.local_addr(), None);

        let timing = conn.connect().await.unwrap();
        assert!(timing.phase(Phase::Connect).is_some());
        assert_eq!(timing.phase(Phase::AddressLookup), None);

        assert!(conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.remote_addr(), Some(addr));
        assert!(conn.local_addr().is_some());

        let result = conn.echo(b"hello").await;
        assert!(result.success);
        assert_eq!(result.received.as_ref(), b"hello");
        assert!(!conn.stream_mut().unwrap().is_tls());

        conn.close().await;
        assert!(!conn.is_connected());
        assert!(conn.stream_mut().is_none());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.remote_addr(), None);

        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);

        let result = conn.echo(b"hello").await;
        assert!(matches!(result.error, Some(TransferError::NotConnected)));
    }

    #[tokio::test]
    async fn close_before_connect() {
        let mut conn = connection(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 9));
        conn.close().await;
        assert!(!conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Unconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_times_out() {
        let options = ClientOptions {
            connect_timeout: Duration::from_millis(250),
            ..Default::default()
        };
        let mut conn = Connection::new(EndpointTarget::host("127.0.0.1", 9007), &options)
            .with_connector(Hang);

        let started = tokio::time::Instant::now();
        let err = conn.connect().await.unwrap_err();
        assert!(started.elapsed() < Duration::from_millis(300));

        assert!(err.error().is_timeout());
        assert_eq!(err.error().phase(), Some(Phase::Connect));
        assert!(err.timing().phase(Phase::Connect).is_some());
        assert_eq!(err.timing().errors().len(), 1);
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn refused_connect_reports_phase() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut conn = connection(addr);
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err.error(), Error::Connect(_)));
        assert!(err.to_string().starts_with("connect failed"));
        assert_eq!(conn.last_timing(), Some(err.timing()));
    }

    #[tokio::test]
    async fn reconnect_closes_previous_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            let (_second, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = first.read(&mut buf).await.unwrap_or(0);
            let _ = closed_tx.send(n);
            std::future::pending::<()>().await;
        });

        let mut conn = connection(addr);
        conn.connect().await.unwrap();
        let first_local = conn.local_addr().unwrap();
        let first_timing = conn.last_timing().cloned().unwrap();

        conn.reconnect().await.unwrap();
        assert!(conn.is_connected());
        assert_ne!(conn.local_addr().unwrap(), first_local);

        let read = tokio::time::timeout(Duration::from_secs(5), closed_rx)
            .await
            .expect("previous transport should be closed")
            .unwrap();
        assert_eq!(read, 0);

        let second_timing = conn.last_timing().unwrap();
        assert!(second_timing.phase(Phase::Connect).is_some());
        assert!(second_timing.errors().is_empty());
        assert!(first_timing.errors().is_empty());
    }

    #[tokio::test]
    async fn cancel_handle_unblocks_transfer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_silent, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let mut conn = connection(addr);
        conn.connect().await.unwrap();

        let handle = conn.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), conn.echo(b"anyone?"))
            .await
            .expect("cancellation should unblock the read");
        assert!(matches!(result.error, Some(TransferError::Cancelled)));
        assert!(!conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Closed);

        // A fresh attempt gets a fresh scope.
        conn.reconnect().await.unwrap();
        assert!(conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn cancelled_connection_reports_closed() {
        let addr = echo_server().await;
        let mut conn = connection(addr);
        conn.connect().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);

        conn.cancel_handle().cancel();
        assert!(!conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Closed);

        let result = conn.echo(b"late").await;
        assert!(matches!(result.error, Some(TransferError::Cancelled)));

        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    /// Resolver whose SRV queries always fail.
    #[derive(Debug)]
    struct BrokenSrv;

    impl DnsResolver for BrokenSrv {
        fn query_service_records<'a>(
            &'a self,
            _: &'a str,
        ) -> BoxFuture<'a, io::Result<Vec<SrvRecord>>> {
            Box::pin(std::future::ready(Err(io::Error::other("servfail"))))
        }

        fn query_ipv4<'a>(&'a self, _: &'a str) -> BoxFuture<'a, io::Result<Vec<Ipv4Addr>>> {
            Box::pin(std::future::ready(Ok(Vec::new())))
        }

        fn query_ipv6<'a>(&'a self, _: &'a str) -> BoxFuture<'a, io::Result<Vec<Ipv6Addr>>> {
            Box::pin(std::future::ready(Ok(Vec::new())))
        }
    }

    fn service_connection(dns: Arc<dyn DnsResolver>) -> Connection {
        Connection::new(
            EndpointTarget::service("example.com", ServiceRecordSpec::tcp("echo")),
            &ClientOptions::default(),
        )
        .with_resolver(EndpointResolver::new(dns))
    }

    #[tokio::test]
    async fn srv_lookup_failure_is_attributed_to_srv_phase() {
        let mut conn = service_connection(Arc::new(BrokenSrv));
        let err = conn.connect().await.unwrap_err();

        assert!(matches!(
            err.error(),
            Error::Resolution(ResolutionError::Lookup { .. })
        ));
        assert_eq!(err.error().phase(), Some(Phase::SrvLookup));
        assert!(err.timing().phase(Phase::SrvLookup).is_some());
        assert_eq!(err.timing().phase(Phase::AddressLookup), None);
        assert_eq!(err.timing().phase(Phase::Connect), None);
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn address_failure_keeps_srv_timing() {
        let dns = StaticResolver::new().with_srv(
            "_echo._tcp.example.com",
            vec![SrvRecord::new(0, 0, "gone.example.com.", 7001)],
        );
        let mut conn = service_connection(Arc::new(dns));
        let err = conn.connect().await.unwrap_err();

        assert_eq!(err.error().phase(), Some(Phase::AddressLookup));
        assert!(err.timing().phase(Phase::SrvLookup).is_some());
        assert!(err.timing().phase(Phase::AddressLookup).is_some());
        assert_eq!(err.timing().errors().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_future_times_out() {
        let timeout = Duration::from_millis(250);
        let started = tokio::time::Instant::now();

        let result = bounded(
            Phase::Connect,
            timeout,
            std::future::pending::<Result<(), Error>>(),
        )
        .await;

        match result {
            Err(Error::Timeout { phase, after }) => {
                assert_eq!(phase, Phase::Connect);
                assert_eq!(after, timeout);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(started.elapsed() >= timeout);
        assert!(started.elapsed() < timeout + Duration::from_millis(50));
    }

    #[tokio::test]
    async fn bounded_passes_results_through() {
        let value = bounded(Phase::Handshake, Duration::from_secs(5), async {
            Ok::<_, Error>(7)
        })
        .await;
        assert_eq!(value.unwrap(), 7);

        let failed = bounded(Phase::Connect, Duration::from_secs(5), async {
            Err::<(), _>(Error::NotConnected)
        })
        .await;
        assert!(matches!(failed, Err(Error::NotConnected)));
    }
}
