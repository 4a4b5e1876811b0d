use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use netbackup_core::health::{classify, HealthSnapshot, Liveness};
use netbackup_core::schedule::{IntervalAnchor, ScheduleSpec};

const DEFAULT_INTERVAL_MINUTES: u64 = 60;

#[derive(Parser, Debug)]
#[command(name = "netbackupctl")]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Container health probe: backup directory writable and last run recent.
    Health {
        #[arg(long, env = "BACKUP_DIR", default_value = "/backups")]
        backup_dir: PathBuf,
        #[arg(long, env = "LAST_RUN_FILE", default_value = "/tmp/last_run")]
        last_run_file: PathBuf,
        #[arg(long, env = "BACKUP_TIME")]
        backup_time: Option<String>,
        #[arg(long, env = "BACKUP_INTERVAL_MINUTES")]
        interval_minutes: Option<u64>,
    },
    /// Print the daemon's status snapshot; fails when it reports stalled.
    Status {
        #[arg(long)]
        daemon: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.cmd {
        Cmd::Health {
            backup_dir,
            last_run_file,
            backup_time,
            interval_minutes,
        } => {
            let stale_after = stale_window(backup_time.as_deref(), interval_minutes)?;
            ensure_writable(&backup_dir).await?;
            match marker_liveness(&last_run_file, stale_after, Utc::now()).await? {
                Liveness::Stalled {
                    elapsed_secs,
                    max_secs,
                } => anyhow::bail!("last backup run finished {elapsed_secs}s ago (limit {max_secs}s)"),
                Liveness::Starting => println!("healthy (no run recorded yet)"),
                Liveness::Responsive => println!("healthy"),
            }
        }
        Cmd::Status { daemon } => {
            let url = format!("{}/v1/status", daemon.trim_end_matches('/'));
            let resp: HealthSnapshot = reqwest::Client::new()
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
            if !resp.liveness.is_healthy() {
                anyhow::bail!("daemon reports stalled");
            }
        }
    }

    Ok(())
}

/// 25h in daily mode, otherwise twice the interval.
fn stale_window(backup_time: Option<&str>, interval_minutes: Option<u64>) -> anyhow::Result<Duration> {
    let spec = match backup_time {
        Some(at) => ScheduleSpec::from_options(Some(at), None, IntervalAnchor::Start),
        None => ScheduleSpec::from_options(
            None,
            Some(interval_minutes.unwrap_or(DEFAULT_INTERVAL_MINUTES)),
            IntervalAnchor::Start,
        ),
    }
    .context("invalid schedule")?;
    Ok(spec.stale_after())
}

async fn ensure_writable(dir: &Path) -> anyhow::Result<()> {
    let probe = dir.join(format!(".netbackupctl-probe-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&probe, b"probe")
        .await
        .with_context(|| format!("backup directory {} is not writable", dir.display()))?;
    tokio::fs::remove_file(&probe)
        .await
        .with_context(|| format!("remove probe {}", probe.display()))?;
    Ok(())
}

/// Judge the marker's modification time; a missing marker means the daemon
/// has not finished its first cycle yet.
async fn marker_liveness(marker: &Path, stale_after: Duration, now: DateTime<Utc>) -> anyhow::Result<Liveness> {
    let meta = match tokio::fs::metadata(marker).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(classify(None, now, stale_after)),
        Err(e) => return Err(e).with_context(|| format!("stat {}", marker.display())),
    };
    let modified: DateTime<Utc> = meta
        .modified()
        .with_context(|| format!("mtime of {}", marker.display()))?
        .into();
    Ok(classify(Some(modified), now, stale_after))
}
