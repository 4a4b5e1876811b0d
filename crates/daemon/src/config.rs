//! Command line / environment configuration, resolved once at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use netbackup_core::schedule::{IntervalAnchor, ScheduleSpec};
use netbackup_core::validation::ValidationError;
use netbackup_core::{DeviceFamily, RetentionPolicy};
use thiserror::Error;

use crate::fetcher::SshSettings;
use crate::git::CommitAuthor;
use crate::inventory::DeviceDefaults;
use crate::orchestrator::OrchestratorSettings;
use crate::retry::RetryPolicy;

/// Stale window used by health reporting when no schedule is configured.
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Parser, Debug, Clone)]
#[command(name = "netbackup-daemon", version, about = "Scheduled configuration backups for network devices")]
pub struct Args {
    /// Comma separated device hosts.
    #[arg(long, env = "ROUTER_HOSTS", value_delimiter = ',')]
    pub hosts: Vec<String>,

    /// YAML inventory file; wins over --hosts.
    #[arg(long, env = "INVENTORY_FILE")]
    pub inventory: Option<PathBuf>,

    /// Default SSH port.
    #[arg(long, env = "PORT", default_value_t = 60002)]
    pub port: u16,

    #[arg(long, env = "JUNIPER_USERNAME")]
    pub username: Option<String>,

    #[arg(long, env = "JUNIPER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long, env = "SSH_IDENTITY_FILE")]
    pub identity_file: Option<PathBuf>,

    /// Default device family: junos, ios or generic.
    #[arg(long, env = "DEVICE_FAMILY", default_value = "junos")]
    pub device_family: DeviceFamily,

    #[arg(long, env = "BACKUP_DIR", default_value = "/backups")]
    pub backup_dir: PathBuf,

    /// Artifacts kept per device.
    #[arg(long, env = "MAX_BACKUPS", default_value_t = 10)]
    pub max_backups: usize,

    #[arg(long, env = "ARTIFACT_EXT", default_value = "conf")]
    pub artifact_ext: String,

    /// Daily local time, HH:MM or HH:MM:SS.
    #[arg(long, env = "BACKUP_TIME")]
    pub backup_time: Option<String>,

    #[arg(long, env = "BACKUP_INTERVAL_MINUTES")]
    pub interval_minutes: Option<u64>,

    /// Measure intervals from the previous cycle's start or end.
    #[arg(long, env = "INTERVAL_ANCHOR", default_value = "start")]
    pub interval_anchor: IntervalAnchor,

    #[arg(long, env = "RUN_ON_START")]
    pub run_on_start: bool,

    #[arg(long, env = "RETRY_ATTEMPTS", default_value_t = 3)]
    pub retry_attempts: u32,

    #[arg(long, env = "RETRY_BASE_DELAY_SECS", default_value_t = 4)]
    pub retry_base_delay_secs: u64,

    /// Device sessions open at the same time.
    #[arg(long, env = "MAX_CONCURRENCY", default_value_t = 4)]
    pub max_concurrency: usize,

    #[arg(long, env = "SESSION_TIMEOUT_SECS", default_value_t = 60)]
    pub session_timeout_secs: u64,

    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value_t = 15)]
    pub connect_timeout_secs: u64,

    #[arg(long, env = "NOTIFY_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    #[arg(long, env = "NOTIFY_EACH_FAILURE")]
    pub notify_each_failure: bool,

    /// Consecutive all-failed cycles before a summary is flagged for escalation (0 disables).
    #[arg(long, env = "ESCALATE_AFTER", default_value_t = 3)]
    pub escalate_after: u32,

    /// Health/status HTTP listen address, e.g. 0.0.0.0:8080
    #[arg(long, env = "HEALTH_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Touched after every finished cycle.
    #[arg(long, env = "LAST_RUN_FILE", default_value = "/tmp/last_run")]
    pub last_run_file: PathBuf,

    #[arg(long, env = "GIT_AUTHOR_NAME", default_value = "netbackup")]
    pub git_author_name: String,

    #[arg(long, env = "GIT_AUTHOR_EMAIL", default_value = "netbackup@localhost")]
    pub git_author_email: String,

    /// Run exactly one cycle and exit; non-zero exit unless every device succeeded.
    #[arg(long)]
    pub once: bool,

    /// Log level (env-filter syntax).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("no devices configured: set ROUTER_HOSTS or INVENTORY_FILE")]
    NoDevices,
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    #[error("artifact extension '{0}' must be non-empty and contain only [A-Za-z0-9]")]
    BadExtension(String),
    #[error("failed to load inventory {path}: {message}")]
    Inventory { path: PathBuf, message: String },
}

/// Where devices come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventorySource {
    File(PathBuf),
    Hosts(Vec<String>),
}

/// Validated, immutable process configuration.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub inventory: InventorySource,
    pub defaults: DeviceDefaults,
    pub backup_dir: PathBuf,
    pub artifact_ext: String,
    pub retention: RetentionPolicy,
    /// `None` only in `--once` mode without schedule options.
    pub schedule: Option<ScheduleSpec>,
    pub run_on_start: bool,
    pub max_concurrency: usize,
    pub ssh: SshSettings,
    pub orchestrator: OrchestratorSettings,
    pub webhook_url: Option<String>,
    pub listen: Option<SocketAddr>,
    pub last_run_file: PathBuf,
    pub author: CommitAuthor,
    pub once: bool,
}

impl BackupConfig {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let schedule = if args.once && args.backup_time.is_none() && args.interval_minutes.is_none() {
            None
        } else {
            Some(ScheduleSpec::from_options(
                args.backup_time.as_deref(),
                args.interval_minutes,
                args.interval_anchor,
            )?)
        };

        let inventory = match args.inventory {
            Some(path) => InventorySource::File(path),
            None => {
                let hosts: Vec<String> = args
                    .hosts
                    .iter()
                    .map(|h| h.trim())
                    .filter(|h| !h.is_empty())
                    .map(str::to_string)
                    .collect();
                if hosts.is_empty() {
                    return Err(ConfigError::NoDevices);
                }
                InventorySource::Hosts(hosts)
            }
        };

        if args.retry_attempts == 0 {
            return Err(ConfigError::Zero("RETRY_ATTEMPTS"));
        }
        if args.max_concurrency == 0 {
            return Err(ConfigError::Zero("MAX_CONCURRENCY"));
        }
        if args.session_timeout_secs == 0 {
            return Err(ConfigError::Zero("SESSION_TIMEOUT_SECS"));
        }
        if args.port == 0 {
            return Err(ConfigError::Zero("PORT"));
        }
        let ext = args.artifact_ext.trim_start_matches('.').to_string();
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::BadExtension(args.artifact_ext));
        }

        Ok(Self {
            inventory,
            defaults: DeviceDefaults {
                port: args.port,
                username: args.username.filter(|u| !u.trim().is_empty()),
                password: args.password.filter(|p| !p.is_empty()),
                identity_file: args.identity_file,
                family: args.device_family,
            },
            backup_dir: args.backup_dir,
            artifact_ext: ext,
            retention: RetentionPolicy::new(args.max_backups)?,
            schedule,
            run_on_start: args.run_on_start,
            max_concurrency: args.max_concurrency,
            ssh: SshSettings {
                connect_timeout: Duration::from_secs(args.connect_timeout_secs),
                session_timeout: Duration::from_secs(args.session_timeout_secs),
                ..SshSettings::default()
            },
            orchestrator: OrchestratorSettings {
                retry: RetryPolicy {
                    max_attempts: args.retry_attempts,
                    base_delay: Duration::from_secs(args.retry_base_delay_secs),
                },
                notify_each_failure: args.notify_each_failure,
                escalate_after: args.escalate_after,
            },
            webhook_url: args.webhook_url.filter(|u| !u.trim().is_empty()),
            listen: args.listen,
            last_run_file: args.last_run_file,
            author: CommitAuthor {
                name: args.git_author_name,
                email: args.git_author_email,
            },
            once: args.once,
        })
    }

    /// How long without a finished cycle before health reports a stall.
    pub fn stale_after(&self) -> Duration {
        self.schedule
            .as_ref()
            .map(ScheduleSpec::stale_after)
            .unwrap_or(DEFAULT_STALE_AFTER)
    }
}
