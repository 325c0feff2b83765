//! Per-call transaction context: correlation, deadline and cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use simplebank_common::{CorrelationId, LedgerError, Result};

use crate::store::StoreOp;

/// Context passed explicitly through one unit of work.
#[derive(Debug, Clone)]
pub struct TxContext {
    correlation_id: CorrelationId,
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

impl TxContext {
    /// Create a context with no deadline and no cancellation signal.
    pub fn new(correlation_id: impl Into<CorrelationId>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            deadline: None,
            cancel: None,
        }
    }

    /// Create a context with a cancellation handle.
    pub fn cancellable(correlation_id: impl Into<CorrelationId>) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let mut ctx = Self::new(correlation_id);
        ctx.cancel = Some(rx);
        (ctx, CancelHandle(tx))
    }

    /// Abort at `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Abort once `timeout` has elapsed from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Apply `timeout` only when no deadline was set by the caller.
    pub fn or_timeout(self, timeout: Option<Duration>) -> Self {
        match (self.deadline, timeout) {
            (None, Some(timeout)) => self.with_timeout(timeout),
            _ => self,
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Fail if the caller cancelled or the deadline passed.
    pub fn check(&self, op: StoreOp) -> Result<()> {
        if self.is_cancelled() {
            return Err(LedgerError::Cancelled {
                operation: op.to_string(),
            });
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(LedgerError::DeadlineExceeded {
                operation: op.to_string(),
            });
        }
        Ok(())
    }

    /// Run one datastore step under this context.
    ///
    /// Checks before and after the step, and abandons the step if the signal
    /// fires or the deadline passes while it is blocked (e.g. on a row lock).
    pub async fn guard<T, F>(&self, op: StoreOp, step: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check(op)?;

        let value = tokio::select! {
            biased;
            _ = wait_cancelled(self.cancel.clone()) => {
                return Err(LedgerError::Cancelled { operation: op.to_string() });
            }
            _ = wait_deadline(self.deadline) => {
                return Err(LedgerError::DeadlineExceeded { operation: op.to_string() });
            }
            result = step => result?,
        };

        self.check(op)?;
        Ok(value)
    }
}

impl Default for TxContext {
    fn default() -> Self {
        Self::new(CorrelationId::generate())
    }
}

/// Sender side of a context's cancellation signal.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    /// Cancel every context created from this handle.
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

async fn wait_cancelled(signal: Option<watch::Receiver<bool>>) {
    match signal {
        Some(mut rx) => {
            // A dropped handle can never cancel.
            if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
