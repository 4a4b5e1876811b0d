//! Bounded retries with exponential backoff around a single device fetch.

use std::time::Duration;

use netbackup_core::backoff::backoff_delay;
use netbackup_core::{DeviceDescriptor, ErrorKind, FetchResult};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::fetcher::{ConfigFetcher, FetchError};
use crate::limiter::ConcurrencyLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Apply a device's `max_attempts` override.
    pub fn for_device(&self, device: &DeviceDescriptor) -> Self {
        Self {
            max_attempts: device.overrides.max_attempts.unwrap_or(self.max_attempts),
            ..*self
        }
    }
}

/// Try `device` up to `policy.max_attempts` times.
///
/// Every attempt holds its own limiter admission; the slot is released
/// during backoff so other devices can use it. Authentication failures are
/// returned immediately. Once the limiter closes, a device that still needs
/// an attempt ends up [`ErrorKind::Cancelled`].
pub async fn fetch_with_retry(
    fetcher: &dyn ConfigFetcher,
    limiter: &ConcurrencyLimiter,
    device: &DeviceDescriptor,
    policy: RetryPolicy,
) -> FetchResult {
    let started = Instant::now();
    let host = device.identity();
    let mut last_error: Option<FetchError> = None;

    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            let delay = backoff_delay(policy.base_delay, attempt - 1);
            debug!(device = host, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "backing off");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = limiter.closed() => return cancelled(attempt, last_error),
            }
        }

        let Ok(admission) = limiter.admit().await else {
            return cancelled(attempt, last_error);
        };
        let result = fetcher.fetch(device).await;
        drop(admission);

        match result {
            Ok(config_text) => {
                debug!(device = host, attempt = attempt + 1, bytes = config_text.len(), "fetched configuration");
                return FetchResult::Success {
                    config_text,
                    elapsed: started.elapsed(),
                    attempts: attempt + 1,
                };
            }
            Err(e) if !e.kind.is_retryable() => {
                warn!(device = host, attempt = attempt + 1, kind = %e.kind, "fetch failed, not retrying: {}", e.message);
                return FetchResult::Failure {
                    error_kind: e.kind,
                    attempts_made: attempt + 1,
                    message: e.message,
                };
            }
            Err(e) => {
                warn!(
                    device = host,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    kind = %e.kind,
                    "fetch attempt failed: {}",
                    e.message
                );
                last_error = Some(e);
            }
        }
    }

    let e = last_error.unwrap_or_else(|| FetchError::new(ErrorKind::ProtocolError, "no attempts configured"));
    FetchResult::Failure {
        error_kind: e.kind,
        attempts_made: policy.max_attempts,
        message: e.message,
    }
}

fn cancelled(attempts_made: u32, last_error: Option<FetchError>) -> FetchResult {
    let message = match last_error {
        Some(e) => format!("shutdown before retry; last error: {e}"),
        None => "shutdown before the device was admitted".to_string(),
    };
    FetchResult::Failure {
        error_kind: ErrorKind::Cancelled,
        attempts_made,
        message,
    }
}
