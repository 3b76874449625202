//! Diagnostics callbacks.
//!
//! A [`DiagnosticsSink`] receives human-readable messages about notable events
//! (connects, handshake failures, transfer mismatches). Sinks may suspend and
//! may fail, but a failing sink never affects the operation that triggered it:
//! [`Diagnostics`] catches errors and panics from the sink and writes them to
//! `tracing` instead.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt as _;

use crate::{BoxError, BoxFuture};

/// Receives diagnostic messages.
pub trait DiagnosticsSink: Send + Sync {
    /// Record an informational message.
    fn log(&self, message: String) -> BoxFuture<'_, Result<(), BoxError>>;

    /// Record an error message. Defaults to [`DiagnosticsSink::log`].
    fn error(&self, message: String) -> BoxFuture<'_, Result<(), BoxError>> {
        self.log(message)
    }
}

impl<F, Fut> DiagnosticsSink for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    fn log(&self, message: String) -> BoxFuture<'_, Result<(), BoxError>> {
        Box::pin((self)(message))
    }
}

/// A sink which forwards messages to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn log(&self, message: String) -> BoxFuture<'_, Result<(), BoxError>> {
        tracing::info!(target: "echoline::diagnostics", "{message}");
        Box::pin(std::future::ready(Ok(())))
    }

    fn error(&self, message: String) -> BoxFuture<'_, Result<(), BoxError>> {
        tracing::error!(target: "echoline::diagnostics", "{message}");
        Box::pin(std::future::ready(Ok(())))
    }
}

/// Safe front for a [`DiagnosticsSink`], labelled with the client description.
#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<dyn DiagnosticsSink>,
    label: Arc<str>,
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("label", &self.label)
            .finish()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink), "")
    }
}

impl Diagnostics {
    /// Wrap `sink`, prefixing messages with `label` when it is non-empty.
    pub fn new(sink: Arc<dyn DiagnosticsSink>, label: impl Into<Arc<str>>) -> Self {
        Self {
            sink,
            label: label.into(),
        }
    }

    /// The label used to prefix messages.
    pub fn label(&self) -> &str {
        &self.label
    }

    fn format(&self, message: &str) -> String {
        if self.label.is_empty() {
            message.to_owned()
        } else {
            format!("[{}] {message}", self.label)
        }
    }

    /// Send an informational message. Never fails.
    pub async fn log(&self, message: impl AsRef<str>) {
        let message = self.format(message.as_ref());
        let outcome = invoke(|| self.sink.log(message.clone())).await;
        fallback(outcome, &message);
    }

    /// Send an error message. Never fails.
    pub async fn error(&self, message: impl AsRef<str>) {
        let message = self.format(message.as_ref());
        let outcome = invoke(|| self.sink.error(message.clone())).await;
        fallback(outcome, &message);
    }
}

async fn invoke<'a, F>(call: F) -> std::thread::Result<Result<(), BoxError>>
where
    F: FnOnce() -> BoxFuture<'a, Result<(), BoxError>>,
{
    match std::panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
        Err(panic) => Err(panic),
    }
}

fn fallback(outcome: std::thread::Result<Result<(), BoxError>>, message: &str) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            tracing::warn!(%error, original = %message, "diagnostics sink failed");
        }
        Err(_) => {
            tracing::warn!(original = %message, "diagnostics sink panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<String>>,
    }

    impl DiagnosticsSink for Recorder {
        fn log(&self, message: String) -> BoxFuture<'_, Result<(), BoxError>> {
            self.messages.lock().unwrap().push(message);
            Box::pin(std::future::ready(Ok(())))
        }
    }

    struct Failing;

    impl DiagnosticsSink for Failing {
        fn log(&self, _message: String) -> BoxFuture<'_, Result<(), BoxError>> {
            Box::pin(async { Err("sink is broken".into()) })
        }
    }

    struct Panicking;

    impl DiagnosticsSink for Panicking {
        fn log(&self, _message: String) -> BoxFuture<'_, Result<(), BoxError>> {
            Box::pin(async { panic!("sink exploded") })
        }
    }

    #[tokio::test]
    async fn messages_are_labelled() {
        let recorder = Arc::new(Recorder::default());
        let diagnostics = Diagnostics::new(recorder.clone(), "edge-1");

        diagnostics.log("connected").await;
        diagnostics.error("handshake failed").await;

        let messages = recorder.messages.lock().unwrap();
        assert_eq!(
            *messages,
            vec![
                "[edge-1] connected".to_string(),
                "[edge-1] handshake failed".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn failing_sink_is_swallowed() {
        let _ = tracing_subscriber::fmt::try_init();

        Diagnostics::new(Arc::new(Failing), "").log("hello").await;
        Diagnostics::new(Arc::new(Panicking), "").error("hello").await;
    }

    #[tokio::test]
    async fn closures_are_sinks() {
        let seen = Arc::new(Mutex::new(None));
        let sink = {
            let seen = seen.clone();
            move |message: String| {
                *seen.lock().unwrap() = Some(message);
                async { Ok::<_, BoxError>(()) }
            }
        };

        Diagnostics::new(Arc::new(sink), "").log("via closure").await;
        assert_eq!(seen.lock().unwrap().as_deref(), Some("via closure"));
    }
}
