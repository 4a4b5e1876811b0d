use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

/// Returned by [`ConcurrencyLimiter::admit`] once shutdown closed the limiter.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("limiter is closed; no new sessions are admitted")]
pub struct LimiterClosed;

/// Bounds how many device sessions are open at once.
///
/// Waiters are admitted in arrival order (tokio's semaphore is fair). Closing
/// the limiter rejects queued and future admissions; sessions that already
/// hold an [`Admission`] run to completion.
#[derive(Clone, Debug)]
pub struct ConcurrencyLimiter {
    permits: Arc<Semaphore>,
    limit: usize,
    closed: Arc<watch::Sender<bool>>,
}

/// A held slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct Admission {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        let (closed, _) = watch::channel(false);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
            closed: Arc::new(closed),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.limit.saturating_sub(self.permits.available_permits())
    }

    pub async fn admit(&self) -> Result<Admission, LimiterClosed> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| LimiterClosed)?;
        Ok(Admission { _permit: permit })
    }

    /// Stop admitting work. Idempotent.
    pub fn close(&self) {
        self.permits.close();
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // the sender lives in `self`, so this only errors if it was dropped mid-wait
        let _ = rx.wait_for(|closed| *closed).await;
    }
}
