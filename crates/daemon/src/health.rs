//! Shared liveness state written by the scheduler and orchestrator, read by
//! the HTTP surface.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use netbackup_core::health::{classify, HealthSnapshot};
use netbackup_core::{CycleStatus, CycleSummary};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    last_cycle_id: Option<String>,
    last_cycle_at: Option<DateTime<Utc>>,
    last_cycle_status: Option<CycleStatus>,
    consecutive_total_failures: u32,
    scheduler_state: String,
    next_trigger: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct HealthState {
    inner: Arc<RwLock<Inner>>,
    stale_after: Duration,
    marker: Option<PathBuf>,
}

impl HealthState {
    /// `marker` is touched after every finished cycle so an external probe
    /// can judge liveness from its modification time.
    pub fn new(stale_after: Duration, marker: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                scheduler_state: "idle".to_string(),
                ..Inner::default()
            })),
            stale_after,
            marker,
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Record a finished cycle; returns the consecutive total-failure count
    /// including this cycle.
    pub async fn record_cycle(&self, summary: &CycleSummary) -> u32 {
        let count = {
            let mut inner = self.inner.write().await;
            let status = summary.status();
            inner.consecutive_total_failures = if status == CycleStatus::Failed {
                inner.consecutive_total_failures.saturating_add(1)
            } else {
                0
            };
            inner.last_cycle_id = Some(summary.cycle_id.clone());
            inner.last_cycle_at = Some(summary.finished_at);
            inner.last_cycle_status = Some(status);
            inner.consecutive_total_failures
        };
        self.touch_marker(summary.finished_at).await;
        count
    }

    pub async fn set_scheduler_state(&self, state: &str, next_trigger: Option<DateTime<Utc>>) {
        let mut inner = self.inner.write().await;
        inner.scheduler_state = state.to_string();
        inner.next_trigger = next_trigger;
    }

    pub async fn snapshot(&self) -> HealthSnapshot {
        let inner = self.inner.read().await;
        HealthSnapshot {
            last_cycle_id: inner.last_cycle_id.clone(),
            last_cycle_at: inner.last_cycle_at,
            last_cycle_status: inner.last_cycle_status,
            consecutive_total_failures: inner.consecutive_total_failures,
            scheduler_state: inner.scheduler_state.clone(),
            next_trigger: inner.next_trigger,
            stale_after_secs: self.stale_after.as_secs(),
            liveness: classify(inner.last_cycle_at, Utc::now(), self.stale_after),
        }
    }

    async fn touch_marker(&self, at: DateTime<Utc>) {
        let Some(path) = &self.marker else { return };
        if let Err(e) = tokio::fs::write(path, format!("{}\n", at.to_rfc3339())).await {
            tracing::warn!(marker = %path.display(), "failed to update last-run marker: {e}");
        }
    }
}
