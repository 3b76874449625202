//! The test client.
//!
//! [`TestClient`] ties the pieces together: it owns one [`Connection`] to an
//! immutable [`EndpointTarget`], and exposes connect, reconnect and close
//! alongside the echo operations used for diagnostics.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::cancel::CancelScope;
use crate::config::{ClientOptions, RetryDelay};
use crate::conn::{Connection, ConnectionInfo, ConnectionState, TcpConnector};
use crate::diagnostics::{Diagnostics, DiagnosticsSink, TracingSink};
use crate::dns::{system_resolver, DnsResolver, IpVersion};
use crate::error::{ConfigError, ConnectError};
use crate::resolve::EndpointResolver;
use crate::target::EndpointTarget;
use crate::timing::ConnectTiming;
use crate::tls::TlsOptions;
use crate::transfer::{StreamReport, TransferResult};
use crate::DebugLiteral;

/// Builder for a [`TestClient`].
pub struct ClientBuilder {
    target: EndpointTarget,
    options: ClientOptions,
    dns: Option<Arc<dyn DnsResolver>>,
    tls: Option<TlsOptions>,
    sink: Option<Arc<dyn DiagnosticsSink>>,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("target", &self.target)
            .field("options", &self.options)
            .field("dns", &self.dns)
            .field("tls", &self.tls)
            .field("diagnostics", &self.sink.as_ref().map(|_| DebugLiteral("<sink>")))
            .finish()
    }
}

impl ClientBuilder {
    fn new(target: EndpointTarget) -> Self {
        Self {
            target,
            options: ClientOptions::default(),
            dns: None,
            tls: None,
            sink: None,
        }
    }

    /// Replace all transport options at once.
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Access the transport options.
    pub fn options(&mut self) -> &mut ClientOptions {
        &mut self.options
    }

    /// Label used in diagnostic messages.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.options.description = description.into();
        self
    }

    /// Preferred address family when a host has both.
    pub fn with_preference(mut self, prefer: IpVersion) -> Self {
        self.options.prefer = prefer;
        self
    }

    /// Bound on the transport connect, and on the TLS handshake.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    /// Bound on each read.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.options.receive_timeout = timeout;
        self
    }

    /// Bound on each write.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.options.send_timeout = timeout;
        self
    }

    /// Chunk and socket buffer size.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.options.buffer_size = size;
        self
    }

    /// Delay before each retry of [`TestClient::connect_with_retry`].
    pub fn with_retry_delay(mut self, delay: RetryDelay) -> Self {
        self.options.retry_delay = delay;
        self
    }

    /// Number of retries after the first attempt.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.options.max_retries = retries;
        self
    }

    /// Seed SRV selection, making it reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.options.seed = Some(seed);
        self
    }

    /// Use `dns` for SRV and address lookups.
    pub fn with_dns(mut self, dns: Arc<dyn DnsResolver>) -> Self {
        self.dns = Some(dns);
        self
    }

    /// Set the TLS policy.
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Send diagnostic messages to `sink`.
    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate the options and build the client.
    pub fn build(self) -> Result<TestClient, ConfigError> {
        let connector = TcpConnector::new((&self.options).into());
        self.build_with_connector(connector)
    }

    /// Validate the options and build a client using a custom connector.
    pub fn build_with_connector<C>(self, connector: C) -> Result<TestClient<C>, ConfigError> {
        self.options.validate()?;

        let dns = self.dns.unwrap_or_else(system_resolver);
        let mut resolver = EndpointResolver::new(dns).with_preference(self.options.prefer);
        if let Some(seed) = self.options.seed {
            resolver = resolver.with_seed(seed);
        }

        let diagnostics = Diagnostics::new(
            self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
            self.options.description.as_str(),
        );

        let connection = Connection::new(self.target, &self.options)
            .with_resolver(resolver)
            .with_tls(self.tls.unwrap_or_default())
            .with_diagnostics(diagnostics)
            .with_connector(connector);

        Ok(TestClient {
            connection,
            retry_delay: self.options.retry_delay,
            max_retries: self.options.max_retries,
        })
    }
}

/// A single-connection test client.
///
/// Operations on one client are sequential: each takes `&mut self`, so a
/// second send cannot start before the previous one completes. Use
/// [`TestClient::cancel_handle`] to abort an operation from another task.
#[derive(Debug)]
pub struct TestClient<C = TcpConnector> {
    connection: Connection<C>,
    retry_delay: RetryDelay,
    max_retries: u32,
}

impl TestClient {
    /// Start building a client for `target`.
    pub fn builder(target: EndpointTarget) -> ClientBuilder {
        ClientBuilder::new(target)
    }
}

impl<C> TestClient<C> {
    /// The target this client connects to.
    pub fn target(&self) -> &EndpointTarget {
        self.connection.target()
    }

    /// Whether the client holds a live, uncancelled connection.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// The connection's lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Local address of the live connection.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.connection.local_addr()
    }

    /// Remote address of the live connection.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.connection.remote_addr()
    }

    /// Addresses and TLS details of the live connection.
    pub fn info(&self) -> Option<&ConnectionInfo> {
        self.connection.info()
    }

    /// Timing of the most recent connect attempt, successful or not.
    pub fn last_timing(&self) -> Option<&ConnectTiming> {
        self.connection.last_timing()
    }

    /// A handle which cancels in-flight operations of the current connection.
    pub fn cancel_handle(&self) -> CancelScope {
        self.connection.cancel_handle()
    }

    /// The underlying connection.
    pub fn connection_mut(&mut self) -> &mut Connection<C> {
        &mut self.connection
    }

    /// Close the connection. Safe to call at any time, any number of times.
    pub async fn close(&mut self) {
        self.connection.close().await
    }

    /// Send `text` as UTF-8 and check that it is echoed back.
    ///
    /// The echo is decoded lossily, so a corrupted echo still produces text.
    pub async fn send_text(&mut self, text: &str) -> TransferResult<String> {
        self.connection
            .echo(text.as_bytes())
            .await
            .map(|echo| String::from_utf8_lossy(&echo).into_owned())
    }

    /// Send `payload` and check that it is echoed back.
    pub async fn send_binary(&mut self, payload: &[u8]) -> TransferResult<Bytes> {
        self.connection.echo(payload).await
    }

    /// Stream `source` through the echo.
    ///
    /// The echo is written to `destination` when given, and discarded
    /// otherwise. With `verify`, both directions are hashed with SHA-256 and
    /// compared at the end.
    pub async fn send_stream_and_verify<S>(
        &mut self,
        source: S,
        destination: Option<&mut (dyn AsyncWrite + Unpin + Send)>,
        verify: bool,
    ) -> StreamReport
    where
        S: AsyncRead + Unpin,
    {
        self.connection
            .stream_and_verify(source, destination, verify)
            .await
    }
}

impl<C> TestClient<C>
where
    C: tower::Service<SocketAddr, Response = TcpStream, Error = io::Error> + Clone + Send + 'static,
    C::Future: Send,
{
    /// Make one connect attempt.
    pub async fn connect(&mut self) -> Result<ConnectTiming, ConnectError> {
        self.connection.connect().await
    }

    /// Connect, retrying failed attempts up to the configured maximum.
    ///
    /// The delay before retry `n` comes from the configured [`RetryDelay`].
    /// The error of the last attempt is returned if all attempts fail.
    pub async fn connect_with_retry(&mut self) -> Result<ConnectTiming, ConnectError> {
        let mut attempt = 0;
        loop {
            match self.connection.connect().await {
                Ok(timing) => return Ok(timing),
                Err(error) if attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.retry_delay.delay(attempt);
                    tracing::debug!(attempt, ?delay, %error, "connect failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Close the current connection and connect afresh.
    pub async fn reconnect(&mut self) -> Result<ConnectTiming, ConnectError> {
        self.connection.reconnect().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::fixtures::echo_server;

    assert_impl_all!(TestClient: Send, std::fmt::Debug);
    assert_impl_all!(ClientBuilder: Send);

    #[test]
    fn invalid_options_fail_to_build() {
        let err = TestClient::builder(EndpointTarget::host("127.0.0.1", 7))
            .with_receive_timeout(Duration::from_millis(i32::MAX as u64 + 1))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TimeoutOutOfRange {
                name: "receive",
                ..
            }
        ));

        let err = TestClient::builder(EndpointTarget::host("127.0.0.1", 7))
            .with_buffer_size(0)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::BufferSize(0));
    }

    #[tokio::test]
    async fn text_round_trip() {
        let _ = tracing_subscriber::fmt::try_init();

        let addr = echo_server().await;
        let mut client = TestClient::builder(EndpointTarget::address(addr.ip(), addr.port()))
            .with_description("unit")
            .build()
            .unwrap();

        client.connect().await.unwrap();
        let result = client.send_text("héllo, wörld").await;
        assert!(result.success, "{:?}", result.message());
        assert_eq!(result.received, "héllo, wörld");
        client.close().await;
    }

    #[tokio::test]
    async fn retries_use_the_delay_function() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let calls = Arc::new(AtomicU32::new(0));
        let delay = {
            let calls = calls.clone();
            RetryDelay::new(move |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                Duration::from_millis(5 * u64::from(attempt))
            })
        };

        let mut client = TestClient::builder(EndpointTarget::address(addr.ip(), addr.port()))
            .with_retry_delay(delay)
            .with_max_retries(2)
            .build()
            .unwrap();

        let err = client.connect_with_retry().await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err.error(), crate::Error::Connect(_)));
        assert_eq!(client.state(), ConnectionState::Failed);
    }
}
