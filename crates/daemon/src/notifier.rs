//! Delivery of cycle summaries and failure events.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use netbackup_core::{CycleStatus, NotificationEvent};
use tracing::{debug, error, info, warn};

/// Fire-and-forget sink for [`NotificationEvent`]s.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> anyhow::Result<()>;
}

/// Writes events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &NotificationEvent) -> anyhow::Result<()> {
        match event {
            NotificationEvent::CycleCompleted {
                summary,
                consecutive_total_failures,
                escalate,
            } => {
                let status = summary.status();
                if *escalate {
                    error!(
                        cycle_id = %summary.cycle_id,
                        consecutive_total_failures,
                        total = summary.total,
                        "every device failed in consecutive cycles"
                    );
                } else if status == CycleStatus::Succeeded {
                    info!(
                        cycle_id = %summary.cycle_id,
                        total = summary.total,
                        duration_ms = summary.duration_ms,
                        "backup cycle succeeded"
                    );
                } else {
                    warn!(
                        cycle_id = %summary.cycle_id,
                        total = summary.total,
                        succeeded = summary.succeeded,
                        failed = summary.failed,
                        duration_ms = summary.duration_ms,
                        "backup cycle had failures"
                    );
                }
                for failure in summary.failures() {
                    warn!(
                        cycle_id = %summary.cycle_id,
                        device = %failure.device,
                        kind = ?failure.error_kind(),
                        attempts = failure.attempts,
                        "device backup failed"
                    );
                }
            }
            NotificationEvent::DeviceFailed { cycle_id, outcome } => {
                warn!(
                    cycle_id = %cycle_id,
                    device = %outcome.device,
                    kind = ?outcome.error_kind(),
                    attempts = outcome.attempts,
                    "device backup failed"
                );
            }
        }
        Ok(())
    }
}

/// POSTs each event as JSON.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build webhook client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &NotificationEvent) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .with_context(|| format!("POST {}", self.url))?
            .error_for_status()
            .with_context(|| format!("POST {}", self.url))?;
        debug!(url = %self.url, "webhook notification sent");
        Ok(())
    }
}

/// Sends to every sink; one failing sink does not stop the others.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(sinks: Vec<Arc<dyn Notifier>>) -> Self {
        Self { sinks }
    }

    /// Log sink plus an optional webhook.
    pub fn from_webhook(url: Option<&str>) -> anyhow::Result<Self> {
        let mut sinks: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
        if let Some(url) = url {
            sinks.push(Arc::new(WebhookNotifier::new(url)?));
        }
        Ok(Self::new(sinks))
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, event: &NotificationEvent) -> anyhow::Result<()> {
        let mut failed = 0usize;
        let mut first: Option<anyhow::Error> = None;
        for sink in &self.sinks {
            if let Err(e) = sink.notify(event).await {
                failed += 1;
                first.get_or_insert(e);
            }
        }
        match first {
            None => Ok(()),
            Some(e) => Err(e.context(format!("{failed} of {} notification sinks failed", self.sinks.len()))),
        }
    }
}

/// Deliver `event`; delivery failures are logged and never propagate.
pub async fn deliver(notifier: &dyn Notifier, event: &NotificationEvent) {
    if let Err(e) = notifier.notify(event).await {
        warn!("notification delivery failed: {e:#}");
    }
}
