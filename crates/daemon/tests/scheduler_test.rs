//! Scheduler cadence under paused tokio time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta, Utc};
use netbackup_core::schedule::{IntervalAnchor, ScheduleSpec};
use netbackup_core::{CycleSummary, PendingCycle};
use netbackup_daemon::health::HealthState;
use netbackup_daemon::scheduler::{Clock, CycleRunner, Scheduler};
use tokio::sync::watch;
use tokio::time::Instant;

/// Wall clock that moves with tokio's (paused) time, in a zone whose UTC
/// offset can be changed while it runs.
struct PausedClock {
    base: DateTime<Utc>,
    origin: Instant,
    offset: Mutex<FixedOffset>,
}

impl PausedClock {
    fn starting_at(base: DateTime<Utc>) -> Self {
        Self::in_zone(base, FixedOffset::east_opt(0).unwrap())
    }

    fn in_zone(base: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            base,
            origin: Instant::now(),
            offset: Mutex::new(offset),
        }
    }

    fn set_offset(&self, offset: FixedOffset) {
        *self.offset.lock().unwrap() = offset;
    }
}

impl Clock for PausedClock {
    type Zone = FixedOffset;

    fn now(&self) -> DateTime<FixedOffset> {
        let utc = self.base + TimeDelta::from_std(self.origin.elapsed()).unwrap();
        utc.with_timezone(&*self.offset.lock().unwrap())
    }
}

/// Records start/end of every cycle and asks for shutdown after `stop_after` cycles.
struct FakeRunner {
    clock: Arc<PausedClock>,
    cycle_time: Duration,
    stop_after: usize,
    /// Applied to the clock when the first cycle ends.
    offset_after_first: Option<FixedOffset>,
    runs: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    shutdown: watch::Sender<bool>,
}

impl FakeRunner {
    fn new(clock: Arc<PausedClock>, cycle_time: Duration, stop_after: usize, shutdown: watch::Sender<bool>) -> Self {
        Self {
            clock,
            cycle_time,
            stop_after,
            offset_after_first: None,
            runs: Mutex::new(Vec::new()),
            shutdown,
        }
    }
}

#[async_trait]
impl CycleRunner for FakeRunner {
    async fn run(&self) -> CycleSummary {
        let start = self.clock.now().to_utc();
        tokio::time::sleep(self.cycle_time).await;
        let end = self.clock.now().to_utc();
        let count = {
            let mut runs = self.runs.lock().unwrap();
            runs.push((start, end));
            runs.len()
        };
        if count == 1 {
            if let Some(offset) = self.offset_after_first {
                self.clock.set_offset(offset);
            }
        }
        if count >= self.stop_after {
            self.shutdown.send_replace(true);
        }
        let now = Utc::now();
        PendingCycle::begin(format!("cycle-{count}"), now).finish(now)
    }
}

fn midnight() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

fn minutes(m: i64) -> DateTime<Utc> {
    midnight() + TimeDelta::minutes(m)
}

fn hours_east(h: i32) -> FixedOffset {
    FixedOffset::east_opt(h * 3600).unwrap()
}

/// Cycle boundaries are compared to the minute; paused time adds at most a
/// few milliseconds per sleep.
fn to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    midnight() + TimeDelta::minutes((t - midnight()).num_minutes())
}

async fn drive(
    spec: ScheduleSpec,
    runner: Arc<FakeRunner>,
    rx: watch::Receiver<bool>,
    run_on_start: bool,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let ran = Scheduler::new(spec, runner.clone(), runner.clock.clone())
        .run_on_start(run_on_start)
        .run(rx)
        .await;
    assert_eq!(ran, runner.stop_after);

    let runs = runner.runs.lock().unwrap().clone();
    runs.into_iter().map(|(s, e)| (to_minute(s), to_minute(e))).collect()
}

async fn run_schedule(
    spec: ScheduleSpec,
    cycle_time: Duration,
    cycles: usize,
    run_on_start: bool,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let clock = Arc::new(PausedClock::starting_at(midnight()));
    let (tx, rx) = watch::channel(false);
    let runner = Arc::new(FakeRunner::new(clock, cycle_time, cycles, tx));
    drive(spec, runner, rx, run_on_start).await
}

fn hourly(anchor: IntervalAnchor) -> ScheduleSpec {
    ScheduleSpec::Interval {
        every: Duration::from_secs(3600),
        anchor,
    }
}

#[tokio::test(start_paused = true)]
async fn overrunning_cycle_is_followed_immediately() {
    let runs = run_schedule(hourly(IntervalAnchor::Start), Duration::from_secs(70 * 60), 3, false).await;

    assert_eq!(
        runs,
        vec![
            (minutes(60), minutes(130)),
            (minutes(130), minutes(200)),
            (minutes(200), minutes(270)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn short_cycles_keep_a_fixed_cadence() {
    let runs = run_schedule(hourly(IntervalAnchor::Start), Duration::from_secs(10 * 60), 3, false).await;

    let starts: Vec<_> = runs.iter().map(|r| r.0).collect();
    assert_eq!(starts, vec![minutes(60), minutes(120), minutes(180)]);
}

#[tokio::test(start_paused = true)]
async fn end_anchor_waits_a_full_interval_after_completion() {
    let runs = run_schedule(hourly(IntervalAnchor::End), Duration::from_secs(10 * 60), 2, false).await;

    let starts: Vec<_> = runs.iter().map(|r| r.0).collect();
    assert_eq!(starts, vec![minutes(60), minutes(130)]);
}

#[tokio::test(start_paused = true)]
async fn run_on_start_fires_immediately() {
    let runs = run_schedule(hourly(IntervalAnchor::Start), Duration::from_secs(60), 2, true).await;

    let starts: Vec<_> = runs.iter().map(|r| r.0).collect();
    assert_eq!(starts, vec![minutes(0), minutes(60)]);
}

#[tokio::test(start_paused = true)]
async fn daily_schedule_fires_once_per_day() {
    let spec = ScheduleSpec::Daily {
        at: NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
    };
    let runs = run_schedule(spec, Duration::from_secs(5 * 60), 2, false).await;

    let starts: Vec<_> = runs.iter().map(|r| r.0).collect();
    assert_eq!(starts, vec![minutes(150), minutes(150 + 24 * 60)]);
}

#[tokio::test(start_paused = true)]
async fn daily_time_follows_the_clock_zone() {
    let spec = ScheduleSpec::Daily {
        at: NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
    };
    // midnight UTC reads 02:00 at +02:00
    let clock = Arc::new(PausedClock::in_zone(midnight(), hours_east(2)));
    let (tx, rx) = watch::channel(false);
    let runner = Arc::new(FakeRunner::new(clock, Duration::from_secs(5 * 60), 2, tx));

    let runs = drive(spec, runner, rx, false).await;

    let starts: Vec<_> = runs.iter().map(|r| r.0).collect();
    assert_eq!(starts, vec![minutes(30), minutes(30 + 24 * 60)]);
}

#[tokio::test(start_paused = true)]
async fn interval_cadence_survives_a_utc_offset_change() {
    let clock = Arc::new(PausedClock::in_zone(midnight(), hours_east(1)));
    let (tx, rx) = watch::channel(false);
    let mut runner = FakeRunner::new(clock, Duration::from_secs(10 * 60), 3, tx);
    // local wall clock jumps forward an hour between the first and second cycle
    runner.offset_after_first = Some(hours_east(2));

    let runs = drive(hourly(IntervalAnchor::Start), Arc::new(runner), rx, false).await;

    let starts: Vec<_> = runs.iter().map(|r| r.0).collect();
    assert_eq!(starts, vec![minutes(60), minutes(120), minutes(180)]);
}

#[tokio::test(start_paused = true)]
async fn cycles_never_overlap() {
    let runs = run_schedule(hourly(IntervalAnchor::Start), Duration::from_secs(95 * 60), 4, false).await;
    for pair in runs.windows(2) {
        assert!(pair[1].0 >= pair[0].1, "{pair:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_waiting_stops_without_running() {
    let clock = Arc::new(PausedClock::starting_at(midnight()));
    let (tx, rx) = watch::channel(false);
    let runner = Arc::new(FakeRunner::new(
        clock.clone(),
        Duration::from_secs(1),
        usize::MAX,
        watch::channel(false).0,
    ));
    let health = HealthState::new(Duration::from_secs(7200), None);

    let scheduler = Scheduler::new(hourly(IntervalAnchor::Start), runner.clone(), clock).with_health(health.clone());
    let task = tokio::spawn(scheduler.run(rx));

    tokio::time::sleep(Duration::from_secs(30 * 60)).await;
    let snap = health.snapshot().await;
    assert_eq!(snap.scheduler_state, "waiting");
    assert_eq!(snap.next_trigger, Some(minutes(60)));

    tx.send_replace(true);
    assert_eq!(task.await.unwrap(), 0);
    assert!(runner.runs.lock().unwrap().is_empty());
    assert_eq!(health.snapshot().await.scheduler_state, "stopped");
}
