//! Echoline
//!
//! A resilient, single-connection network test client.
//!
//! Echoline resolves a logical endpoint (a literal address, a DNS host, or a
//! DNS-SRV service name), connects to it with a bounded connect time, optionally
//! upgrades the connection to TLS, and then exchanges data with the remote end,
//! either as small buffered echo exchanges or as large streamed transfers whose
//! integrity is checked with incremental SHA-256 digests.
//!
//! It is meant for diagnostics and health-checking: transfer operations report
//! mismatches and partial results instead of failing, and connect failures
//! record how long each phase took.
//!
//! ```no_run
//! # use echoline::{EndpointTarget, TestClient};
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let target = EndpointTarget::host("echo.example.com", 7);
//! let mut client = TestClient::builder(target).build()?;
//!
//! client.connect().await?;
//! let result = client.send_text("hello").await;
//! assert!(result.success);
//! client.close().await;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::fmt;
use std::future::Future;
use std::pin::Pin;

pub mod cancel;
pub mod client;
pub mod config;
pub mod conn;
pub mod diagnostics;
pub mod dns;
pub mod error;
pub mod resolve;
pub mod target;
pub mod timing;
pub mod tls;
pub mod transfer;

pub use client::{ClientBuilder, TestClient};
pub use error::{ConnectError, Error, ResolutionError};
pub use target::{EndpointTarget, ServiceRecordSpec};
pub use transfer::{StreamReport, TransferResult};

/// Boxed error type used at the crate's dynamic seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) struct DebugLiteral<T: fmt::Display>(T);

impl<T: fmt::Display> fmt::Debug for DebugLiteral<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
