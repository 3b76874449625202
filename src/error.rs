//! Error types for resolution, connection and handshake failures.
//!
//! Transfer failures are not represented here as control flow: they are
//! reported through [`TransferError`][crate::transfer::TransferError] inside
//! a transfer result.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::timing::{ConnectTiming, Phase};
use crate::BoxError;

/// Failure to turn an endpoint target into an address and port.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResolutionError {
    /// The target could not be interpreted (e.g. a URL without a host).
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// The SRV query returned no candidates.
    #[error("no service records for {name}")]
    NoServiceRecords {
        /// The `_service._proto.domain` name that was queried.
        name: String,
    },

    /// Neither address family returned any records.
    #[error("no address records for {host}")]
    NoAddresses {
        /// The host name that was looked up.
        host: String,
    },

    /// No source supplied a port.
    #[error("no port available for {host}")]
    MissingPort {
        /// The host the port was needed for.
        host: String,
    },

    /// The DNS collaborator failed.
    #[error("lookup of {name} failed: {source}")]
    Lookup {
        /// The lookup that was running.
        phase: Phase,

        /// The name that was being looked up.
        name: String,

        /// The underlying error from the resolver.
        #[source]
        source: BoxError,
    },
}

impl ResolutionError {
    pub(crate) fn lookup<E>(phase: Phase, name: impl Into<String>) -> impl FnOnce(E) -> Self
    where
        E: Into<BoxError>,
    {
        let name = name.into();
        move |error| Self::Lookup {
            phase,
            name,
            source: error.into(),
        }
    }

    /// The resolution phase this error belongs to.
    ///
    /// Errors raised before any lookup ran (an invalid target, or a missing
    /// port) are attributed to the address lookup.
    pub fn phase(&self) -> Phase {
        match self {
            ResolutionError::NoServiceRecords { .. } => Phase::SrvLookup,
            ResolutionError::Lookup { phase, .. } => *phase,
            ResolutionError::InvalidTarget(_)
            | ResolutionError::NoAddresses { .. }
            | ResolutionError::MissingPort { .. } => Phase::AddressLookup,
        }
    }
}

/// Errors produced while establishing or using a connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Resolution of the target failed.
    #[error("resolution: {0}")]
    Resolution(#[from] ResolutionError),

    /// A bounded phase did not complete in time.
    #[error("{phase} timed out after {}ms", .after.as_millis())]
    Timeout {
        /// The phase that ran out of time.
        phase: Phase,

        /// The bound that was exceeded.
        after: Duration,
    },

    /// The transport connection was refused, reset or otherwise failed.
    #[error("connect: {0}")]
    Connect(#[source] io::Error),

    /// Secure negotiation failed, or the server identity was rejected.
    #[error("handshake: {0}")]
    Handshake(#[source] io::Error),

    /// The server name used for identity checks is not valid.
    #[error("invalid server name: {0:?}")]
    InvalidServerName(String),

    /// TLS configuration could not be assembled.
    #[error("tls configuration: {0}")]
    TlsConfig(#[source] rustls::Error),

    /// The operation was cancelled by a close or reconnect.
    #[error("operation cancelled")]
    Cancelled,

    /// An operation required a live connection.
    #[error("not connected")]
    NotConnected,
}

impl Error {
    /// The connection phase this error belongs to.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Error::Resolution(error) => Some(error.phase()),
            Error::Timeout { phase, .. } => Some(*phase),
            Error::Connect(_) => Some(Phase::Connect),
            Error::Handshake(_) | Error::InvalidServerName(_) | Error::TlsConfig(_) => {
                Some(Phase::Handshake)
            }
            Error::Cancelled | Error::NotConnected => None,
        }
    }

    /// Whether this error was caused by a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

/// A failed connect attempt, along with the timing of each phase that ran.
#[derive(Debug, Error)]
pub struct ConnectError {
    #[source]
    error: Error,
    timing: ConnectTiming,
}

impl ConnectError {
    pub(crate) fn new(error: Error, timing: ConnectTiming) -> Self {
        Self { error, timing }
    }

    /// The underlying error.
    pub fn error(&self) -> &Error {
        &self.error
    }

    /// Per-phase timings and errors recorded during the attempt.
    pub fn timing(&self) -> &ConnectTiming {
        &self.timing
    }

    /// Unwrap the underlying error.
    pub fn into_error(self) -> Error {
        self.error
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error.phase() {
            Some(phase) => write!(f, "{phase} failed: {} [{}]", self.error, self.timing),
            None => write!(f, "{} [{}]", self.error, self.timing),
        }
    }
}

/// Construction-time configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A timeout does not fit in a 32-bit millisecond count.
    #[error("{name} timeout of {}ms exceeds the maximum of {}ms", .value.as_millis(), i32::MAX)]
    TimeoutOutOfRange {
        /// Which timeout was out of range.
        name: &'static str,

        /// The rejected value.
        value: Duration,
    },

    /// A timeout of zero would make every attempt fail.
    #[error("{name} timeout must be non-zero")]
    ZeroTimeout {
        /// Which timeout was zero.
        name: &'static str,
    },

    /// Buffer size is zero or does not fit in a 32-bit byte count.
    #[error("buffer size {0} must be between 1 and {max}", max = i32::MAX)]
    BufferSize(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(Error: std::error::Error, Send, Sync, Into<BoxError>);
    assert_impl_all!(ConnectError: std::error::Error, Send, Sync, Into<BoxError>);
    assert_impl_all!(ResolutionError: std::error::Error, Send, Sync);

    #[test]
    fn phase_of_errors() {
        let err = Error::Resolution(ResolutionError::NoServiceRecords {
            name: "_echo._tcp.example.com".into(),
        });
        assert_eq!(err.phase(), Some(Phase::SrvLookup));

        let err = Error::Resolution(ResolutionError::MissingPort {
            host: "example.com".into(),
        });
        assert_eq!(err.phase(), Some(Phase::AddressLookup));

        let err = Error::Resolution(ResolutionError::lookup(
            Phase::SrvLookup,
            "_echo._tcp.example.com",
        )(io::Error::other("servfail")));
        assert_eq!(err.phase(), Some(Phase::SrvLookup));

        let err = Error::Resolution(ResolutionError::lookup(Phase::AddressLookup, "example.com")(
            io::Error::other("servfail"),
        ));
        assert_eq!(err.phase(), Some(Phase::AddressLookup));

        let err = Error::Timeout {
            phase: Phase::Connect,
            after: Duration::from_millis(5),
        };
        assert!(err.is_timeout());
        assert_eq!(err.phase(), Some(Phase::Connect));
        assert_eq!(err.to_string(), "connect timed out after 5ms");

        assert_eq!(Error::Cancelled.phase(), None);
    }
}
