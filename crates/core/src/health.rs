//! Process-wide liveness data exposed to the external health probe.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::CycleStatus;

/// Responsive vs. stalled classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Liveness {
    /// No cycle has finished yet since startup.
    Starting,
    Responsive,
    Stalled { elapsed_secs: u64, max_secs: u64 },
}

impl Liveness {
    pub fn is_healthy(&self) -> bool {
        !matches!(self, Liveness::Stalled { .. })
    }
}

/// Classify against the last finished cycle. A missing timestamp is healthy.
pub fn classify(last_cycle_at: Option<DateTime<Utc>>, now: DateTime<Utc>, max_elapsed: Duration) -> Liveness {
    let Some(last) = last_cycle_at else {
        return Liveness::Starting;
    };
    let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
    if elapsed > max_elapsed {
        Liveness::Stalled {
            elapsed_secs: elapsed.as_secs(),
            max_secs: max_elapsed.as_secs(),
        }
    } else {
        Liveness::Responsive
    }
}

/// `GET /v1/status` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub last_cycle_id: Option<String>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_status: Option<CycleStatus>,
    pub consecutive_total_failures: u32,
    /// Scheduler state name (`idle`, `waiting`, `running`, `stopped`).
    pub scheduler_state: String,
    pub next_trigger: Option<DateTime<Utc>>,
    pub stale_after_secs: u64,
    pub liveness: Liveness,
}
