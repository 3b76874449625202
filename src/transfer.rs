//! Transfer and verification engine.
//!
//! Two ways to exchange data with an echoing peer:
//!
//! - [`echo_bytes`] writes a payload and reads back the same number of bytes,
//!   comparing them byte for byte.
//! - [`stream_and_verify`] copies a source stream to the peer in chunks while
//!   reading the echo concurrently, optionally hashing both directions with
//!   SHA-256. Memory use is bounded by the chunk size, not the payload size.
//!
//! Failures here are reported, not returned: every operation produces a
//! [`TransferResult`] or [`StreamReport`] describing what happened.

use std::fmt;
use std::future::Future;
use std::io;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use sha2::{Digest as _, Sha256};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tokio::sync::watch;
use tracing::Instrument as _;

use crate::cancel::CancelScope;
use crate::config::ClientOptions;

/// Which direction of a transfer an error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Writing to the peer.
    Send,

    /// Reading from the peer.
    Receive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => f.write_str("send"),
            Direction::Receive => f.write_str("receive"),
        }
    }
}

/// Why a transfer did not succeed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransferError {
    /// There is no live connection.
    #[error("not connected")]
    NotConnected,

    /// The connection's cancellation scope was cancelled.
    #[error("transfer cancelled")]
    Cancelled,

    /// A read or write did not complete in time.
    #[error("{direction} timed out after {}ms", .after.as_millis())]
    Timeout {
        /// The direction which stalled.
        direction: Direction,

        /// The bound that was exceeded.
        after: Duration,
    },

    /// The peer closed the connection before echoing everything.
    #[error("connection closed after {received} of {expected} bytes")]
    Closed {
        /// Bytes that were expected.
        expected: u64,

        /// Bytes actually received.
        received: u64,
    },

    /// The echo had a different length.
    #[error("length mismatch: sent {sent} bytes, received {received} bytes")]
    LengthMismatch {
        /// Bytes sent.
        sent: u64,

        /// Bytes received.
        received: u64,
    },

    /// The echo differed from what was sent.
    #[error("content mismatch at byte {offset}")]
    ContentMismatch {
        /// Offset of the first differing byte.
        offset: usize,
    },

    /// The digests of the sent and received streams differ.
    #[error("digest mismatch: sent sha256 {sent}, received sha256 {received}")]
    DigestMismatch {
        /// Hex digest of the sent stream.
        sent: String,

        /// Hex digest of the received stream.
        received: String,
    },

    /// Reading or writing the connection failed.
    #[error("network i/o: {0}")]
    Io(#[source] io::Error),

    /// Reading the source stream failed.
    #[error("reading source: {0}")]
    Source(#[source] io::Error),

    /// Writing the destination stream failed.
    #[error("writing destination: {0}")]
    Destination(#[source] io::Error),
}

/// Outcome of a buffered exchange.
#[derive(Debug)]
pub struct TransferResult<T> {
    /// Whether the echo matched what was sent.
    pub success: bool,

    /// What was received, possibly partial.
    pub received: T,

    /// Why the transfer failed.
    pub error: Option<TransferError>,

    /// Time spent on the exchange.
    pub elapsed: Duration,
}

impl<T> TransferResult<T> {
    fn ok(received: T, elapsed: Duration) -> Self {
        Self {
            success: true,
            received,
            error: None,
            elapsed,
        }
    }

    fn failed(received: T, error: TransferError, elapsed: Duration) -> Self {
        Self {
            success: false,
            received,
            error: Some(error),
            elapsed,
        }
    }

    pub(crate) fn not_connected(received: T) -> Self {
        Self::failed(received, TransferError::NotConnected, Duration::ZERO)
    }

    /// A human-readable description of the failure, if any.
    pub fn message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    /// Convert the received payload.
    pub fn map<U, F>(self, f: F) -> TransferResult<U>
    where
        F: FnOnce(T) -> U,
    {
        TransferResult {
            success: self.success,
            received: f(self.received),
            error: self.error,
            elapsed: self.elapsed,
        }
    }
}

/// Outcome of a streamed transfer.
#[derive(Debug)]
pub struct StreamReport {
    /// Whether the whole stream was echoed intact.
    pub success: bool,

    /// Status line suitable for display.
    pub message: String,

    /// Bytes written to the peer.
    pub sent: u64,

    /// Bytes read back from the peer.
    pub received: u64,

    /// Hex SHA-256 of the sent stream, when verifying.
    pub sent_digest: Option<String>,

    /// Hex SHA-256 of the received stream, when verifying.
    pub received_digest: Option<String>,

    /// Why the transfer failed.
    pub error: Option<TransferError>,

    /// Time spent on the transfer.
    pub elapsed: Duration,
}

impl StreamReport {
    pub(crate) fn not_connected() -> Self {
        Self {
            success: false,
            message: TransferError::NotConnected.to_string(),
            sent: 0,
            received: 0,
            sent_digest: None,
            received_digest: None,
            error: Some(TransferError::NotConnected),
            elapsed: Duration::ZERO,
        }
    }
}

/// Chunking and timeouts for transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// Chunk size for reads and writes.
    pub buffer_size: usize,

    /// Bound on each write.
    pub send_timeout: Duration,

    /// Bound on each read.
    pub receive_timeout: Duration,
}

impl From<&ClientOptions> for TransferOptions {
    fn from(options: &ClientOptions) -> Self {
        Self {
            buffer_size: options.buffer_size,
            send_timeout: options.send_timeout,
            receive_timeout: options.receive_timeout,
        }
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self::from(&ClientOptions::default())
    }
}

/// Write `payload` and read back as many bytes, then compare them.
///
/// Writing and reading run concurrently, so payloads larger than the
/// transport's buffers do not stall.
pub async fn echo_bytes<IO>(
    io: &mut IO,
    payload: &[u8],
    options: &TransferOptions,
    scope: &CancelScope,
) -> TransferResult<Bytes>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let started = Instant::now();
    let mut received = BytesMut::with_capacity(payload.len());

    let outcome = scope
        .run(exchange(io, payload, options, &mut received))
        .await
        .unwrap_or(Err(TransferError::Cancelled));

    let received = received.freeze();
    match outcome.and_then(|()| compare(payload, &received)) {
        Ok(()) => {
            tracing::trace!(bytes = received.len(), "echo matched");
            TransferResult::ok(received, started.elapsed())
        }
        Err(error) => {
            tracing::debug!(%error, sent = payload.len(), received = received.len(), "echo failed");
            TransferResult::failed(received, error, started.elapsed())
        }
    }
}

async fn exchange<IO>(
    io: &mut IO,
    payload: &[u8],
    options: &TransferOptions,
    received: &mut BytesMut,
) -> Result<(), TransferError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(io);

    let write = bounded(Direction::Send, options.send_timeout, async {
        writer.write_all(payload).await?;
        writer.flush().await
    });

    let read = async {
        let mut buf = vec![0u8; options.buffer_size.min(payload.len()).max(1)];
        while received.len() < payload.len() {
            let want = (payload.len() - received.len()).min(buf.len());
            let n = bounded(
                Direction::Receive,
                options.receive_timeout,
                reader.read(&mut buf[..want]),
            )
            .await?;
            if n == 0 {
                return Err(TransferError::Closed {
                    expected: payload.len() as u64,
                    received: received.len() as u64,
                });
            }
            received.extend_from_slice(&buf[..n]);
        }
        Ok(())
    };

    tokio::try_join!(write, read)?;
    Ok(())
}

fn compare(sent: &[u8], received: &[u8]) -> Result<(), TransferError> {
    if sent.len() != received.len() {
        return Err(TransferError::LengthMismatch {
            sent: sent.len() as u64,
            received: received.len() as u64,
        });
    }

    match sent.iter().zip(received).position(|(a, b)| a != b) {
        Some(offset) => Err(TransferError::ContentMismatch { offset }),
        None => Ok(()),
    }
}

async fn bounded<F, T>(direction: Direction, after: Duration, future: F) -> Result<T, TransferError>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(after, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(TransferError::Io(error)),
        Err(_) => Err(TransferError::Timeout { direction, after }),
    }
}

/// Byte count and optional running digest for one direction.
struct Leg {
    bytes: u64,
    hasher: Option<Sha256>,
}

impl Leg {
    fn new(verify: bool) -> Self {
        Self {
            bytes: 0,
            hasher: verify.then(Sha256::new),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        self.bytes += chunk.len() as u64;
        if let Some(hasher) = &mut self.hasher {
            hasher.update(chunk);
        }
    }

    fn finish(&mut self) -> Option<String> {
        self.hasher.take().map(|hasher| hex::encode(hasher.finalize()))
    }
}

/// Stream `source` to the peer and read the echo back.
///
/// Received bytes are written to `destination`, or discarded. With `verify`,
/// both directions are hashed and the digests compared once the stream ends.
pub async fn stream_and_verify<IO, S>(
    io: &mut IO,
    source: S,
    destination: Option<&mut (dyn AsyncWrite + Unpin + Send)>,
    verify: bool,
    options: &TransferOptions,
    scope: &CancelScope,
) -> StreamReport
where
    IO: AsyncRead + AsyncWrite + Unpin,
    S: AsyncRead + Unpin,
{
    let started = Instant::now();
    let mut outbound = Leg::new(verify);
    let mut inbound = Leg::new(verify);

    let span = tracing::debug_span!("stream", verify);
    let outcome = scope
        .run(pump(io, source, destination, options, &mut outbound, &mut inbound))
        .instrument(span.clone())
        .await
        .unwrap_or(Err(TransferError::Cancelled));

    let sent_digest = outbound.finish();
    let received_digest = inbound.finish();
    let (sent, received) = (outbound.bytes, inbound.bytes);

    let error = match outcome {
        Err(error) => Some(error),
        Ok(()) if received < sent => Some(TransferError::Closed {
            expected: sent,
            received,
        }),
        Ok(()) if sent_digest != received_digest => Some(TransferError::DigestMismatch {
            sent: sent_digest.clone().unwrap_or_default(),
            received: received_digest.clone().unwrap_or_default(),
        }),
        Ok(()) if received != sent => Some(TransferError::LengthMismatch { sent, received }),
        Ok(()) => None,
    };

    let message = match (&error, &sent_digest) {
        (Some(error), _) => error.to_string(),
        (None, Some(digest)) => format!("verified {sent} bytes, sha256 {digest}"),
        (None, None) => format!("echoed {sent} bytes"),
    };

    tracing::debug!(parent: &span, sent, received, success = error.is_none(), "{message}");

    StreamReport {
        success: error.is_none(),
        message,
        sent,
        received,
        sent_digest,
        received_digest,
        error,
        elapsed: started.elapsed(),
    }
}

async fn pump<IO, S>(
    io: &mut IO,
    source: S,
    destination: Option<&mut (dyn AsyncWrite + Unpin + Send)>,
    options: &TransferOptions,
    outbound: &mut Leg,
    inbound: &mut Leg,
) -> Result<(), TransferError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
    S: AsyncRead + Unpin,
{
    let (reader, writer) = tokio::io::split(io);
    let (total_tx, total_rx) = watch::channel(None);

    let (sent, received) = tokio::join!(
        send_leg(source, writer, options, outbound, total_tx),
        receive_leg(reader, destination, options, inbound, total_rx),
    );

    sent?;
    received
}

async fn send_leg<S, W>(
    mut source: S,
    mut writer: W,
    options: &TransferOptions,
    leg: &mut Leg,
    total: watch::Sender<Option<u64>>,
) -> Result<(), TransferError>
where
    S: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; options.buffer_size];
    loop {
        let n = source.read(&mut buf).await.map_err(TransferError::Source)?;
        if n == 0 {
            break;
        }
        bounded(
            Direction::Send,
            options.send_timeout,
            writer.write_all(&buf[..n]),
        )
        .await?;
        leg.update(&buf[..n]);
    }
    bounded(Direction::Send, options.send_timeout, writer.flush()).await?;

    // Dropping `total` without sending tells the receiver the send failed.
    total.send_replace(Some(leg.bytes));
    Ok(())
}

async fn receive_leg<R>(
    mut reader: R,
    mut destination: Option<&mut (dyn AsyncWrite + Unpin + Send)>,
    options: &TransferOptions,
    leg: &mut Leg,
    mut total: watch::Receiver<Option<u64>>,
) -> Result<(), TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; options.buffer_size];
    let mut sender_open = true;

    loop {
        let expected = *total.borrow_and_update();
        let want = match expected {
            Some(expected) if leg.bytes >= expected => break,
            Some(expected) => usize::try_from(expected - leg.bytes)
                .unwrap_or(usize::MAX)
                .min(buf.len()),
            None => buf.len(),
        };

        tokio::select! {
            biased;

            read = bounded(Direction::Receive, options.receive_timeout, reader.read(&mut buf[..want])) => {
                let n = read?;
                if n == 0 {
                    tracing::trace!(received = leg.bytes, "peer closed the stream");
                    break;
                }
                if let Some(destination) = destination.as_mut() {
                    destination
                        .write_all(&buf[..n])
                        .await
                        .map_err(TransferError::Destination)?;
                }
                leg.update(&buf[..n]);
            }

            changed = total.changed(), if sender_open => {
                if changed.is_err() {
                    sender_open = false;
                    if total.borrow().is_none() {
                        return Ok(());
                    }
                }
            }
        }
    }

    if let Some(destination) = destination {
        destination
            .flush()
            .await
            .map_err(TransferError::Destination)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, DuplexStream};

    use super::*;

    fn options() -> TransferOptions {
        TransferOptions {
            buffer_size: 1024,
            send_timeout: Duration::from_secs(5),
            receive_timeout: Duration::from_secs(5),
        }
    }

    fn echo_peer(server: DuplexStream) {
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(server);
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
        });
    }

    fn corrupting_peer(server: DuplexStream, at: usize) {
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(server);
            let mut buf = [0u8; 512];
            let mut offset = 0;
            loop {
                let n = match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                if (offset..offset + n).contains(&at) {
                    buf[at - offset] ^= 0xff;
                }
                offset += n;
                if writer.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        });
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let _ = tracing_subscriber::fmt::try_init();

        for len in [0, 1, 17, 1024, 70_000] {
            let (mut client, server) = duplex(64);
            echo_peer(server);

            let data = payload(len);
            let result = echo_bytes(&mut client, &data, &options(), &CancelScope::new()).await;
            assert!(result.success, "len {len}: {:?}", result.message());
            assert_eq!(result.received.as_ref(), data.as_slice());
        }
    }

    #[tokio::test]
    async fn echo_detects_single_byte_change() {
        let (mut client, server) = duplex(1024);
        corrupting_peer(server, 10);

        let data = payload(100);
        let result = echo_bytes(&mut client, &data, &options(), &CancelScope::new()).await;
        assert!(!result.success);
        assert!(matches!(
            result.error,
            Some(TransferError::ContentMismatch { offset: 10 })
        ));
        assert_eq!(result.received.len(), 100);
        assert_eq!(result.message().unwrap(), "content mismatch at byte 10");
    }

    #[tokio::test]
    async fn echo_reports_premature_close() {
        let (mut client, mut server) = duplex(1024);
        tokio::spawn(async move {
            let mut buf = [0u8; 8];
            server.read_exact(&mut buf).await.unwrap();
            server.write_all(&buf[..4]).await.unwrap();
        });

        let result = echo_bytes(&mut client, &payload(8), &options(), &CancelScope::new()).await;
        assert!(!result.success);
        assert!(matches!(
            result.error,
            Some(TransferError::Closed {
                expected: 8,
                received: 4
            })
        ));
        assert_eq!(result.received.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn echo_times_out_on_silent_peer() {
        let (mut client, _server) = duplex(1024);
        let options = TransferOptions {
            receive_timeout: Duration::from_millis(200),
            ..options()
        };

        let result = echo_bytes(&mut client, b"hello", &options, &CancelScope::new()).await;
        assert!(matches!(
            result.error,
            Some(TransferError::Timeout {
                direction: Direction::Receive,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn cancelled_scope_aborts_echo() {
        let (mut client, _server) = duplex(1024);
        let scope = CancelScope::new();
        scope.cancel();

        let result = echo_bytes(&mut client, b"hello", &options(), &scope).await;
        assert!(matches!(result.error, Some(TransferError::Cancelled)));
    }

    #[tokio::test]
    async fn stream_verifies_digests() {
        let _ = tracing_subscriber::fmt::try_init();

        let (mut client, server) = duplex(256);
        echo_peer(server);

        let data = payload(100_000);
        let mut sink = Vec::new();
        let report = stream_and_verify(
            &mut client,
            data.as_slice(),
            Some(&mut sink),
            true,
            &options(),
            &CancelScope::new(),
        )
        .await;

        assert!(report.success, "{}", report.message);
        assert_eq!(report.sent, 100_000);
        assert_eq!(report.received, 100_000);
        assert_eq!(sink, data);

        let expected = hex::encode(Sha256::digest(&data));
        assert_eq!(report.sent_digest.as_deref(), Some(expected.as_str()));
        assert_eq!(report.received_digest, report.sent_digest);
        assert!(report.message.contains(&expected));
    }

    #[tokio::test]
    async fn stream_reports_digest_mismatch() {
        let (mut client, server) = duplex(256);
        corrupting_peer(server, 54_321);

        let data = payload(100_000);
        let report = stream_and_verify(
            &mut client,
            data.as_slice(),
            None,
            true,
            &options(),
            &CancelScope::new(),
        )
        .await;

        assert!(!report.success);
        assert_eq!(report.received, report.sent);
        let (sent, received) = match &report.error {
            Some(TransferError::DigestMismatch { sent, received }) => (sent, received),
            other => panic!("expected digest mismatch, got {other:?}"),
        };
        assert_ne!(sent, received);
        assert!(report.message.contains(sent.as_str()));
        assert!(report.message.contains(received.as_str()));
    }

    #[tokio::test]
    async fn stream_without_verification() {
        let (mut client, server) = duplex(256);
        echo_peer(server);

        let report = stream_and_verify(
            &mut client,
            payload(5_000).as_slice(),
            None,
            false,
            &options(),
            &CancelScope::new(),
        )
        .await;

        assert!(report.success);
        assert_eq!(report.sent_digest, None);
        assert_eq!(report.message, "echoed 5000 bytes");
    }

    #[tokio::test]
    async fn empty_stream_succeeds() {
        let (mut client, server) = duplex(256);
        echo_peer(server);

        let report = stream_and_verify(
            &mut client,
            tokio::io::empty(),
            None,
            true,
            &options(),
            &CancelScope::new(),
        )
        .await;

        assert!(report.success, "{}", report.message);
        assert_eq!(report.sent, 0);
    }
}
