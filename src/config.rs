//! Client configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::dns::IpVersion;
use crate::error::ConfigError;

const MAX_MILLIS: u128 = i32::MAX as u128;
const MAX_BUFFER: usize = i32::MAX as usize;

/// Computes the delay before retry attempt `n` (starting at 1).
#[derive(Clone)]
pub struct RetryDelay(Arc<dyn Fn(u32) -> Duration + Send + Sync>);

impl RetryDelay {
    /// Use a custom delay function.
    pub fn new<F>(delay: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self(Arc::new(delay))
    }

    /// Quadratic backoff: `base * attempt²`.
    pub fn quadratic(base: Duration) -> Self {
        Self::new(move |attempt| base.saturating_mul(attempt.saturating_mul(attempt)))
    }

    /// The delay before `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        (self.0)(attempt)
    }
}

impl Default for RetryDelay {
    fn default() -> Self {
        Self::quadratic(Duration::from_millis(100))
    }
}

impl fmt::Debug for RetryDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RetryDelay").finish()
    }
}

/// Transport-level configuration for a client.
///
/// Construct with [`Default`] and adjust fields, then call
/// [`ClientOptions::validate`] (done automatically by the client builder).
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Human-readable label used in diagnostics.
    pub description: String,

    /// Which address family to use when a host has both.
    pub prefer: IpVersion,

    /// Bound on the transport connect, and separately on the TLS handshake.
    pub connect_timeout: Duration,

    /// Bound on each read while waiting for data.
    pub receive_timeout: Duration,

    /// Bound on each write.
    pub send_timeout: Duration,

    /// Size of read chunks and of the socket buffers.
    pub buffer_size: usize,

    /// How long a closing socket lingers to flush unsent data.
    ///
    /// A non-zero linger makes dropping the socket block the runtime thread
    /// until unsent data is flushed or the linger expires. The default leaves
    /// the flush to the kernel; the graceful shutdown on close is bounded
    /// separately.
    pub linger: Option<Duration>,

    /// TCP keep-alive idle time.
    pub keep_alive: Option<Duration>,

    /// Whether to disable Nagle's algorithm.
    pub nodelay: bool,

    /// Delay between connect retries.
    pub retry_delay: RetryDelay,

    /// Number of retries after the first connect attempt.
    pub max_retries: u32,

    /// Seed for SRV selection. Seeded from entropy when unset.
    pub seed: Option<u64>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            description: String::new(),
            prefer: IpVersion::V4,
            connect_timeout: Duration::from_secs(10),
            receive_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(30),
            buffer_size: 8 * 1024,
            linger: None,
            keep_alive: Some(Duration::from_secs(90)),
            nodelay: true,
            retry_delay: RetryDelay::default(),
            max_retries: 3,
            seed: None,
        }
    }
}

impl ClientOptions {
    /// Check that timeouts and the buffer size are representable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_timeout("connect", self.connect_timeout)?;
        check_timeout("receive", self.receive_timeout)?;
        check_timeout("send", self.send_timeout)?;
        if let Some(linger) = self.linger {
            if linger.as_millis() > MAX_MILLIS {
                return Err(ConfigError::TimeoutOutOfRange {
                    name: "linger",
                    value: linger,
                });
            }
        }

        if self.buffer_size == 0 || self.buffer_size > MAX_BUFFER {
            return Err(ConfigError::BufferSize(self.buffer_size));
        }

        Ok(())
    }
}

fn check_timeout(name: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::ZeroTimeout { name });
    }
    if value.as_millis() > MAX_MILLIS {
        return Err(ConfigError::TimeoutOutOfRange { name, value });
    }
    Ok(())
}
