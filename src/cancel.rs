//! Cancellation scope shared by every suspending operation of one connect attempt.
//!
//! A [`CancelScope`] is cheap to clone and is passed by value into each
//! suspending call. Cancelling any clone wakes every pending
//! [`CancelScope::cancelled`] future promptly. A fresh scope is created per
//! connect attempt so that cancellation never leaks across attempts.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::error::Error;
use crate::BoxFuture;

/// A cancellation scope.
#[derive(Debug, Clone)]
pub struct CancelScope(Arc<tokio::sync::watch::Sender<bool>>);

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelScope {
    /// Create a new, un-cancelled scope.
    pub fn new() -> Self {
        let (tx, _) = tokio::sync::watch::channel(false);
        Self(Arc::new(tx))
    }

    /// Cancel this scope. Calling this more than once has no further effect.
    pub fn cancel(&self) {
        if !self.0.send_replace(true) {
            tracing::trace!("cancelling scope");
        }
    }

    /// Whether the scope has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the scope is cancelled.
    pub fn cancelled(&self) -> Cancelled {
        let mut rx = self.0.subscribe();
        Cancelled(Box::pin(async move {
            // The sender lives as long as `self`'s Arc, so `wait_for` only
            // errors if every clone of the scope is gone.
            let _ = rx.wait_for(|cancelled| *cancelled).await;
        }))
    }

    /// Run `future` until it completes or the scope is cancelled.
    pub async fn run<F, T>(&self, future: F) -> Result<T, Error>
    where
        F: Future<Output = T>,
    {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Error::Cancelled),
            output = future => Ok(output),
        }
    }
}

impl IntoFuture for CancelScope {
    type Output = ();
    type IntoFuture = Cancelled;

    fn into_future(self) -> Self::IntoFuture {
        self.cancelled()
    }
}

/// Future returned by [`CancelScope::cancelled`].
#[pin_project::pin_project]
pub struct Cancelled(#[pin] BoxFuture<'static, ()>);

impl std::fmt::Debug for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cancelled").finish()
    }
}

impl Future for Cancelled {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().0.poll(cx)
    }
}
