use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Network OS family. Decides which command pulls the running configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    #[default]
    Junos,
    Ios,
    /// No built-in command; the device must carry a `command` override.
    Generic,
}

impl DeviceFamily {
    /// Command that prints the full configuration for this family.
    pub fn default_command(self) -> Option<&'static str> {
        match self {
            DeviceFamily::Junos => Some("show configuration | display set"),
            DeviceFamily::Ios => Some("show running-config"),
            DeviceFamily::Generic => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceFamily::Junos => "junos",
            DeviceFamily::Ios => "ios",
            DeviceFamily::Generic => "generic",
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "junos" | "juniper" | "juniper_junos" => Ok(DeviceFamily::Junos),
            "ios" | "cisco_ios" => Ok(DeviceFamily::Ios),
            "generic" => Ok(DeviceFamily::Generic),
            other => Err(format!("unknown device family '{other}' (expected junos, ios or generic)")),
        }
    }
}

/// Login material for one device.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Credentials {
    pub username: String,
    /// Password for keyboard-interactive login. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Private key passed to the SSH client.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("identity_file", &self.identity_file)
            .finish()
    }
}

/// Per-device knobs that win over the process-wide defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DeviceOverrides {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub session_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// One inventoried device. Read-only for the duration of a cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Hostname or IP address; also the device identity.
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    #[serde(default)]
    pub family: DeviceFamily,
    #[serde(default)]
    pub overrides: DeviceOverrides,
}

impl DeviceDescriptor {
    pub fn identity(&self) -> &str {
        self.host.trim()
    }

    /// Command issued to pull configuration: the override, else the family default.
    pub fn pull_command(&self) -> Option<&str> {
        self.overrides
            .command
            .as_deref()
            .or_else(|| self.family.default_command())
    }
}

/// Failure taxonomy for a device within one cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthenticationFailure,
    Timeout,
    Unreachable,
    ProtocolError,
    /// The artifact could not be written to disk.
    StorageWriteFailure,
    /// Bytes reached disk but the history commit failed.
    StorageCommitFailure,
    /// The device was never admitted because shutdown closed the limiter.
    Cancelled,
}

impl ErrorKind {
    /// Whether waiting and trying again can change the outcome.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::Unreachable | ErrorKind::ProtocolError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AuthenticationFailure => "authentication_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unreachable => "unreachable",
            ErrorKind::ProtocolError => "protocol_error",
            ErrorKind::StorageWriteFailure => "storage_write_failure",
            ErrorKind::StorageCommitFailure => "storage_commit_failure",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the retry controller hands back for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Success {
        config_text: String,
        elapsed: Duration,
        attempts: u32,
    },
    Failure {
        error_kind: ErrorKind,
        attempts_made: u32,
        message: String,
    },
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            FetchResult::Success { attempts, .. } => *attempts,
            FetchResult::Failure { attempts_made, .. } => *attempts_made,
        }
    }
}

/// One persisted configuration snapshot. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupArtifact {
    pub device: String,
    /// Local wall-clock capture time, second resolution.
    pub captured_at: NaiveDateTime,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Bounds how many artifacts are kept per device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_artifacts_per_device: usize,
}

impl RetentionPolicy {
    pub fn new(max_artifacts_per_device: usize) -> Result<Self, crate::validation::ValidationError> {
        if max_artifacts_per_device == 0 {
            return Err(crate::validation::ValidationError::ZeroRetention);
        }
        Ok(Self {
            max_artifacts_per_device,
        })
    }

    /// Split `items` into `(expired, kept)`.
    ///
    /// `expired` holds the oldest entries beyond the limit, oldest first; `kept`
    /// holds the newest `max_artifacts_per_device`, oldest first.
    pub fn split_expired<T, F>(&self, mut items: Vec<T>, timestamp: F) -> (Vec<T>, Vec<T>)
    where
        F: Fn(&T) -> NaiveDateTime,
    {
        items.sort_by_key(|item| timestamp(item));
        let excess = items.len().saturating_sub(self.max_artifacts_per_device);
        let kept = items.split_off(excess);
        (items, kept)
    }
}

/// Aggregate status of a finished cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Every device produced a committed artifact.
    Succeeded,
    /// Some devices failed.
    Partial,
    /// Every device failed.
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded {
        artifact: BackupArtifact,
        /// Retention pruning failed after the artifact was committed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prune_warning: Option<String>,
    },
    Failed {
        error_kind: ErrorKind,
        message: String,
    },
}

/// Result of processing one device within a cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceOutcome {
    pub device: String,
    pub attempts: u32,
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl DeviceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Succeeded { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.status {
            OutcomeStatus::Failed { error_kind, .. } => Some(*error_kind),
            OutcomeStatus::Succeeded { .. } => None,
        }
    }
}

/// A cycle that has started but not yet been finalized.
#[derive(Debug)]
pub struct PendingCycle {
    cycle_id: String,
    started_at: DateTime<Utc>,
    outcomes: Vec<DeviceOutcome>,
}

impl PendingCycle {
    pub fn begin(cycle_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id: cycle_id.into(),
            started_at,
            outcomes: Vec::new(),
        }
    }

    pub fn cycle_id(&self) -> &str {
        &self.cycle_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn record(&mut self, outcome: DeviceOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn finish(mut self, finished_at: DateTime<Utc>) -> CycleSummary {
        self.outcomes.sort_by(|a, b| a.device.cmp(&b.device));
        let succeeded = self.outcomes.iter().filter(|o| o.is_success()).count();
        let total = self.outcomes.len();
        let duration_ms = (finished_at - self.started_at).num_milliseconds().max(0) as u64;
        CycleSummary {
            cycle_id: self.cycle_id,
            started_at: self.started_at,
            finished_at,
            duration_ms,
            total,
            succeeded,
            failed: total - succeeded,
            outcomes: self.outcomes,
        }
    }
}

/// Aggregate of one cycle, handed to the notifier and then dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleSummary {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<DeviceOutcome>,
}

impl CycleSummary {
    pub fn status(&self) -> CycleStatus {
        if self.failed == 0 {
            CycleStatus::Succeeded
        } else if self.succeeded == 0 {
            CycleStatus::Failed
        } else {
            CycleStatus::Partial
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// Payload delivered through the notifier boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    CycleCompleted {
        summary: CycleSummary,
        /// Consecutive cycles (including this one) in which every device failed.
        consecutive_total_failures: u32,
        escalate: bool,
    },
    DeviceFailed {
        cycle_id: String,
        outcome: DeviceOutcome,
    },
}
