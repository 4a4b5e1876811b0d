#![allow(dead_code)]
//! In-memory doubles for the daemon's seams.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use netbackup_core::{
    BackupArtifact, Credentials, DeviceDescriptor, DeviceFamily, DeviceOverrides, ErrorKind, NotificationEvent,
    RetentionPolicy,
};
use netbackup_daemon::fetcher::{ConfigFetcher, FetchError};
use netbackup_daemon::health::HealthState;
use netbackup_daemon::limiter::ConcurrencyLimiter;
use netbackup_daemon::notifier::Notifier;
use netbackup_daemon::orchestrator::{BackupOrchestrator, OrchestratorSettings};
use netbackup_daemon::retry::RetryPolicy;
use netbackup_daemon::store::{ArtifactStore, PruneReport, StoreError};
use tokio::time::Instant;

pub fn device(host: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        host: host.into(),
        port: 22,
        credentials: Credentials {
            username: "backup".into(),
            password: None,
            identity_file: None,
        },
        family: DeviceFamily::Junos,
        overrides: DeviceOverrides::default(),
    }
}

pub fn devices(hosts: &[&str]) -> Vec<DeviceDescriptor> {
    hosts.iter().map(|h| device(h)).collect()
}

pub fn unreachable() -> FetchError {
    FetchError::new(ErrorKind::Unreachable, "No route to host")
}

pub fn auth_failure() -> FetchError {
    FetchError::new(ErrorKind::AuthenticationFailure, "Permission denied")
}

/// Replays a per-host script of results; hosts without a script succeed.
/// The last scripted result repeats once the script runs out.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, FetchError>>>>,
    calls: Mutex<HashMap<String, Vec<Instant>>>,
    session: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every session takes `session` of (virtual) time.
    pub fn with_session_time(mut self, session: Duration) -> Self {
        self.session = session;
        self
    }

    pub fn script(self, host: &str, results: Vec<Result<String, FetchError>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(host.to_string(), results.into());
        self
    }

    pub fn calls(&self, host: &str) -> Vec<Instant> {
        self.calls.lock().unwrap().get(host).cloned().unwrap_or_default()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().map(Vec::len).sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigFetcher for ScriptedFetcher {
    async fn fetch(&self, device: &DeviceDescriptor) -> Result<String, FetchError> {
        let host = device.identity().to_string();
        self.calls
            .lock()
            .unwrap()
            .entry(host.clone())
            .or_default()
            .push(Instant::now());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.session.is_zero() {
            tokio::time::sleep(self.session).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(&host) {
            None => Ok(format!("set system host-name {host}\n")),
            Some(script) if script.len() > 1 => script.pop_front().unwrap_or_else(|| Ok(String::new())),
            Some(script) => script
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(format!("set system host-name {host}\n"))),
        }
    }
}

/// Keeps artifacts in memory and applies the same retention rule as the git store.
pub struct MemoryStore {
    retention: RetentionPolicy,
    artifacts: Mutex<HashMap<String, Vec<BackupArtifact>>>,
    fail_persist: Mutex<Vec<String>>,
    fail_prune: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new(keep: usize) -> Self {
        Self {
            retention: RetentionPolicy::new(keep).unwrap(),
            artifacts: Mutex::default(),
            fail_persist: Mutex::default(),
            fail_prune: Mutex::default(),
        }
    }

    pub fn fail_commits_for(self, host: &str) -> Self {
        self.fail_persist.lock().unwrap().push(host.to_string());
        self
    }

    pub fn fail_prunes_for(self, host: &str) -> Self {
        self.fail_prune.lock().unwrap().push(host.to_string());
        self
    }

    pub fn artifacts(&self, host: &str) -> Vec<BackupArtifact> {
        self.artifacts.lock().unwrap().get(host).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn persist(
        &self,
        device: &str,
        config_text: &str,
        captured_at: NaiveDateTime,
    ) -> Result<BackupArtifact, StoreError> {
        let path = PathBuf::from(format!("/mem/{device}_{}.conf", captured_at.format("%Y%m%d_%H%M%S")));
        if self.fail_persist.lock().unwrap().iter().any(|h| h == device) {
            return Err(StoreError::Commit {
                path,
                message: "index.lock exists".into(),
            });
        }
        let artifact = BackupArtifact {
            device: device.to_string(),
            captured_at,
            path,
            size_bytes: config_text.len() as u64,
        };
        self.artifacts
            .lock()
            .unwrap()
            .entry(device.to_string())
            .or_default()
            .push(artifact.clone());
        Ok(artifact)
    }

    async fn prune(&self, device: &str) -> Result<PruneReport, StoreError> {
        if self.fail_prune.lock().unwrap().iter().any(|h| h == device) {
            return Err(StoreError::Prune {
                device: device.to_string(),
                message: "permission denied".into(),
            });
        }
        let mut all = self.artifacts.lock().unwrap();
        let existing = all.remove(device).unwrap_or_default();
        let (expired, kept) = self.retention.split_expired(existing, |a| a.captured_at);
        let report = PruneReport {
            removed: expired.iter().map(|a| a.path.clone()).collect(),
            kept: kept.len(),
            committed: !expired.is_empty(),
        };
        all.insert(device.to_string(), kept);
        Ok(report)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn cycle_events(&self) -> Vec<NotificationEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, NotificationEvent::CycleCompleted { .. }))
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &NotificationEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub fn settings(max_attempts: u32) -> OrchestratorSettings {
    OrchestratorSettings {
        retry: RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(4),
        },
        notify_each_failure: false,
        escalate_after: 3,
    }
}

/// Orchestrator over in-memory doubles.
pub struct Harness {
    pub fetcher: Arc<ScriptedFetcher>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub health: HealthState,
    pub orchestrator: BackupOrchestrator,
}

impl Harness {
    pub fn new(fetcher: ScriptedFetcher, store: MemoryStore, limit: usize, settings: OrchestratorSettings) -> Self {
        let fetcher = Arc::new(fetcher);
        let store = Arc::new(store);
        let notifier = Arc::new(RecordingNotifier::default());
        let health = HealthState::new(Duration::from_secs(7200), None);
        let orchestrator = BackupOrchestrator::new(
            fetcher.clone(),
            store.clone(),
            notifier.clone(),
            ConcurrencyLimiter::new(limit),
            health.clone(),
            settings,
        );
        Self {
            fetcher,
            store,
            notifier,
            health,
            orchestrator,
        }
    }
}
