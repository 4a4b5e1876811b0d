//! One backup cycle across the whole inventory.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, Utc};
use netbackup_core::naming::capture_timestamp;
use netbackup_core::{
    new_cycle_id, CycleSummary, DeviceDescriptor, DeviceOutcome, ErrorKind, FetchResult, NotificationEvent,
    OutcomeStatus, PendingCycle,
};
use tokio::time::Instant;
use tracing::{error, info, warn, Instrument};

use crate::fetcher::ConfigFetcher;
use crate::health::HealthState;
use crate::limiter::ConcurrencyLimiter;
use crate::notifier::{deliver, Notifier};
use crate::retry::{fetch_with_retry, RetryPolicy};
use crate::scheduler::CycleRunner;
use crate::store::ArtifactStore;

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub retry: RetryPolicy,
    /// Emit a `DeviceFailed` event as each device fails, in addition to the summary.
    pub notify_each_failure: bool,
    /// Flag the summary for escalation after this many consecutive cycles in
    /// which every device failed. Zero disables escalation.
    pub escalate_after: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            notify_each_failure: false,
            escalate_after: 3,
        }
    }
}

pub struct BackupOrchestrator {
    fetcher: Arc<dyn ConfigFetcher>,
    store: Arc<dyn ArtifactStore>,
    notifier: Arc<dyn Notifier>,
    limiter: ConcurrencyLimiter,
    health: HealthState,
    settings: OrchestratorSettings,
    inventory: Vec<DeviceDescriptor>,
}

impl BackupOrchestrator {
    pub fn new(
        fetcher: Arc<dyn ConfigFetcher>,
        store: Arc<dyn ArtifactStore>,
        notifier: Arc<dyn Notifier>,
        limiter: ConcurrencyLimiter,
        health: HealthState,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            fetcher,
            store,
            notifier,
            limiter,
            health,
            settings,
            inventory: Vec::new(),
        }
    }

    /// Devices used by scheduled cycles.
    pub fn with_inventory(mut self, inventory: Vec<DeviceDescriptor>) -> Self {
        self.inventory = inventory;
        self
    }

    pub fn inventory(&self) -> &[DeviceDescriptor] {
        &self.inventory
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Stop admitting device sessions. Sessions already open finish; devices
    /// that were not yet admitted end the cycle as `cancelled`.
    pub fn shutdown(&self) {
        self.limiter.close();
    }

    /// Back up every device in `devices` once.
    ///
    /// Always returns a summary with exactly one outcome per device and
    /// notifies exactly once with it. No error escapes this call.
    pub async fn run_cycle(&self, devices: &[DeviceDescriptor]) -> CycleSummary {
        let mut cycle = PendingCycle::begin(new_cycle_id(), Utc::now());
        let cycle_id = cycle.cycle_id().to_string();
        info!(cycle_id = %cycle_id, devices = devices.len(), limit = self.limiter.limit(), "backup cycle started");

        let mut handles = Vec::with_capacity(devices.len());
        for device in devices.iter().cloned() {
            let worker = DeviceWorker {
                fetcher: Arc::clone(&self.fetcher),
                store: Arc::clone(&self.store),
                notifier: Arc::clone(&self.notifier),
                limiter: self.limiter.clone(),
                retry: self.settings.retry,
                notify_each_failure: self.settings.notify_each_failure,
                cycle_id: cycle_id.clone(),
            };
            let host = device.identity().to_string();
            let span = tracing::info_span!("device", cycle_id = %cycle_id, device = %host);
            let handle = tokio::spawn(async move { worker.process(device).await }.instrument(span));
            handles.push((host, handle));
        }

        for (host, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(cycle_id = %cycle_id, device = %host, "device worker aborted: {e}");
                    DeviceOutcome {
                        device: host,
                        attempts: 0,
                        elapsed_ms: 0,
                        status: OutcomeStatus::Failed {
                            error_kind: ErrorKind::ProtocolError,
                            message: format!("worker aborted: {e}"),
                        },
                    }
                }
            };
            cycle.record(outcome);
        }

        let summary = cycle.finish(Utc::now());
        let consecutive_total_failures = self.health.record_cycle(&summary).await;
        let escalate =
            self.settings.escalate_after > 0 && consecutive_total_failures >= self.settings.escalate_after;

        info!(
            cycle_id = %summary.cycle_id,
            status = ?summary.status(),
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            duration_ms = summary.duration_ms,
            "backup cycle finished"
        );

        let event = NotificationEvent::CycleCompleted {
            summary: summary.clone(),
            consecutive_total_failures,
            escalate,
        };
        deliver(self.notifier.as_ref(), &event).await;
        summary
    }
}

#[async_trait]
impl CycleRunner for BackupOrchestrator {
    async fn run(&self) -> CycleSummary {
        self.run_cycle(&self.inventory).await
    }
}

/// Everything one device task needs, detached from the orchestrator's lifetime.
struct DeviceWorker {
    fetcher: Arc<dyn ConfigFetcher>,
    store: Arc<dyn ArtifactStore>,
    notifier: Arc<dyn Notifier>,
    limiter: ConcurrencyLimiter,
    retry: RetryPolicy,
    notify_each_failure: bool,
    cycle_id: String,
}

impl DeviceWorker {
    async fn process(self, device: DeviceDescriptor) -> DeviceOutcome {
        let started = Instant::now();
        let host = device.identity().to_string();
        let policy = self.retry.for_device(&device);

        let fetched = fetch_with_retry(self.fetcher.as_ref(), &self.limiter, &device, policy).await;
        let attempts = fetched.attempts();

        let status = match fetched {
            FetchResult::Success { config_text, .. } => {
                let captured_at = capture_timestamp(Local::now().naive_local());
                match self.store.persist(&host, &config_text, captured_at).await {
                    Ok(artifact) => {
                        let prune_warning = match self.store.prune(&host).await {
                            Ok(_) => None,
                            Err(e) => {
                                warn!("retention prune failed: {e}");
                                Some(e.to_string())
                            }
                        };
                        OutcomeStatus::Succeeded {
                            artifact,
                            prune_warning,
                        }
                    }
                    Err(e) => {
                        error!(kind = %e.error_kind(), "failed to store backup: {e}");
                        OutcomeStatus::Failed {
                            error_kind: e.error_kind(),
                            message: e.to_string(),
                        }
                    }
                }
            }
            FetchResult::Failure {
                error_kind, message, ..
            } => OutcomeStatus::Failed { error_kind, message },
        };

        let outcome = DeviceOutcome {
            device: host,
            attempts,
            elapsed_ms: started.elapsed().as_millis() as u64,
            status,
        };

        if self.notify_each_failure && !outcome.is_success() {
            let event = NotificationEvent::DeviceFailed {
                cycle_id: self.cycle_id.clone(),
                outcome: outcome.clone(),
            };
            deliver(self.notifier.as_ref(), &event).await;
        }
        outcome
    }
}
