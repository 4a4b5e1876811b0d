#![forbid(unsafe_code)]

//! Network configuration backup daemon.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use netbackup_core::backoff::backoff_schedule;
use netbackup_core::CycleStatus;
use netbackup_daemon::config::{Args, BackupConfig};
use netbackup_daemon::fetcher::FamilyRouter;
use netbackup_daemon::health::HealthState;
use netbackup_daemon::limiter::ConcurrencyLimiter;
use netbackup_daemon::notifier::FanoutNotifier;
use netbackup_daemon::orchestrator::BackupOrchestrator;
use netbackup_daemon::scheduler::{LocalClock, Scheduler};
use netbackup_daemon::store::VersionStore;
use netbackup_daemon::{http, inventory};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = BackupConfig::from_args(args).context("invalid configuration")?;
    let devices = inventory::load(&config.inventory, &config.defaults)
        .await
        .context("invalid inventory")?;
    info!(
        devices = devices.len(),
        backup_dir = %config.backup_dir.display(),
        schedule = ?config.schedule,
        max_concurrency = config.max_concurrency,
        retry_backoff = ?backoff_schedule(
            config.orchestrator.retry.base_delay,
            config.orchestrator.retry.max_attempts
        ),
        "configuration loaded"
    );

    let store = VersionStore::open(
        &config.backup_dir,
        &config.artifact_ext,
        config.retention,
        config.author.clone(),
    )
    .await?;
    let health = HealthState::new(config.stale_after(), Some(config.last_run_file.clone()));
    let notifier = FanoutNotifier::from_webhook(config.webhook_url.as_deref())?;

    let orchestrator = Arc::new(
        BackupOrchestrator::new(
            Arc::new(FamilyRouter::ssh(config.ssh.clone())),
            Arc::new(store),
            Arc::new(notifier),
            ConcurrencyLimiter::new(config.max_concurrency),
            health.clone(),
            config.orchestrator,
        )
        .with_inventory(devices),
    );

    if let Some(addr) = config.listen {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {addr}"))?;
        info!(listen = %addr, "health endpoint listening");
        let app = http::router(health.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "health endpoint stopped");
            }
        });
    }

    if config.once {
        let cycle = orchestrator.run_cycle(orchestrator.inventory());
        tokio::pin!(cycle);
        let summary = tokio::select! {
            summary = &mut cycle => summary,
            _ = shutdown_signal() => {
                orchestrator.shutdown();
                cycle.await
            }
        };
        if summary.status() != CycleStatus::Succeeded {
            anyhow::bail!(
                "backup cycle {} finished with {} of {} devices failed",
                summary.cycle_id,
                summary.failed,
                summary.total
            );
        }
        return Ok(());
    }

    let spec = config
        .schedule
        .context("a schedule is required unless --once is given")?;
    let scheduler = Scheduler::new(spec, orchestrator.clone(), Arc::new(LocalClock))
        .run_on_start(config.run_on_start)
        .with_health(health);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut scheduled = tokio::spawn(scheduler.run(shutdown_rx));

    tokio::select! {
        res = &mut scheduled => {
            res.context("scheduler task failed")?;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    // Let the running cycle drain: open sessions finish, queued devices are cancelled.
    shutdown_tx.send_replace(true);
    orchestrator.shutdown();
    let cycles = scheduled.await.context("scheduler task failed")?;
    info!(cycles, "daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown requested");
}
