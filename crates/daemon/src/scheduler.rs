//! Drives backup cycles from a [`ScheduleSpec`].
//!
//! A single task owns the state machine
//! `Idle -> Waiting(next) -> Running -> Waiting(next) ... -> Stopped`, so two
//! cycles can never overlap: the next trigger is only computed after the
//! running cycle has returned.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone, Utc};
use netbackup_core::schedule::{delay_until, LastRun, ScheduleSpec};
use netbackup_core::CycleSummary;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::health::HealthState;

/// Longest single sleep; the wall clock is re-read after each slice so clock
/// adjustments and suspend/resume are picked up.
const MAX_SLEEP_SLICE: Duration = Duration::from_secs(60);

/// Something that performs one full cycle.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run(&self) -> CycleSummary;
}

/// Wall-clock source. `Zone` is where daily times of day are read.
pub trait Clock: Send + Sync {
    type Zone: TimeZone;

    fn now(&self) -> DateTime<Self::Zone>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    type Zone = Local;

    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Waiting { next_trigger: DateTime<Utc> },
    Running { started_at: DateTime<Utc> },
    Stopped,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Waiting { .. } => "waiting",
            SchedulerState::Running { .. } => "running",
            SchedulerState::Stopped => "stopped",
        }
    }
}

pub struct Scheduler<C> {
    spec: ScheduleSpec,
    runner: Arc<dyn CycleRunner>,
    clock: Arc<C>,
    run_on_start: bool,
    health: Option<HealthState>,
    state: SchedulerState,
    last_run: Option<LastRun>,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(spec: ScheduleSpec, runner: Arc<dyn CycleRunner>, clock: Arc<C>) -> Self {
        Self {
            spec,
            runner,
            clock,
            run_on_start: false,
            health: None,
            state: SchedulerState::Idle,
            last_run: None,
        }
    }

    /// Fire one cycle immediately instead of waiting for the first trigger.
    pub fn run_on_start(mut self, yes: bool) -> Self {
        self.run_on_start = yes;
        self
    }

    /// Mirror state transitions into `health`.
    pub fn with_health(mut self, health: HealthState) -> Self {
        self.health = Some(health);
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Run until `shutdown` turns true; returns the number of cycles run.
    ///
    /// Shutdown is observed while waiting. A running cycle is never
    /// interrupted here; the caller closes the orchestrator's limiter to
    /// drain it.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut cycles = 0usize;
        let mut immediate = self.run_on_start;

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let local = self.clock.now();
            let now = local.to_utc();
            let trigger = if immediate {
                now
            } else {
                self.spec.next_trigger(&local, self.last_run)
            };
            immediate = false;

            self.transition(SchedulerState::Waiting { next_trigger: trigger }).await;
            info!(
                next_trigger = %trigger,
                delay_secs = delay_until(now, trigger).as_secs(),
                "waiting for next backup cycle"
            );

            tokio::select! {
                _ = self.wait_until(trigger) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }

            let started_at = self.clock.now().to_utc();
            self.transition(SchedulerState::Running { started_at }).await;
            let summary = self.runner.run().await;
            let finished_at = self.clock.now().to_utc();
            self.last_run = Some(LastRun {
                started_at,
                finished_at,
            });
            cycles += 1;
            debug!(cycle_id = %summary.cycle_id, %started_at, %finished_at, "scheduled cycle returned");
        }

        self.transition(SchedulerState::Stopped).await;
        info!(cycles, "scheduler stopped");
        cycles
    }

    async fn wait_until(&self, trigger: DateTime<Utc>) {
        loop {
            let delay = delay_until(self.clock.now().to_utc(), trigger);
            if delay.is_zero() {
                return;
            }
            tokio::time::sleep(delay.min(MAX_SLEEP_SLICE)).await;
        }
    }

    async fn transition(&mut self, next: SchedulerState) {
        self.state = next;
        if let Some(health) = &self.health {
            let trigger = match next {
                SchedulerState::Waiting { next_trigger } => Some(next_trigger),
                _ => None,
            };
            health.set_scheduler_state(next.as_str(), trigger).await;
        }
    }
}

/// Resolves once the flag is true. A dropped sender can never request
/// shutdown, so that case waits forever.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
