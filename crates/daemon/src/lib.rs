#![forbid(unsafe_code)]

//! Backup daemon: pulls running configuration from network devices over SSH,
//! commits each snapshot to a git-backed store and prunes old snapshots.
//!
//! Control flow: [`scheduler::Scheduler`] -> [`orchestrator::BackupOrchestrator`]
//! -> ([`limiter::ConcurrencyLimiter`] -> [`retry::fetch_with_retry`] ->
//! [`fetcher::ConfigFetcher`]) per device -> [`store::ArtifactStore`] ->
//! [`notifier::Notifier`].

pub mod config;
pub mod fetcher;
pub mod git;
pub mod health;
pub mod http;
pub mod inventory;
pub mod limiter;
pub mod notifier;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod store;
