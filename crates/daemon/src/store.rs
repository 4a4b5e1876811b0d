//! Versioned on-disk store for configuration snapshots.
//!
//! Every artifact is one file `<identity>_<YYYYMMDD>_<HHMMSS>.<ext>` in the
//! backup root, and every persist or prune is one git commit. A single async
//! lane serializes all repository mutations so index operations never race.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use netbackup_core::naming::{artifact_file_name, parse_artifact_file_name, sanitize_identity, TIMESTAMP_FORMAT};
use netbackup_core::{BackupArtifact, ErrorKind, RetentionPolicy};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::git::{CommitAuthor, GitRepo};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to prepare backup store at {path}: {message}")]
    Init { path: PathBuf, message: String },
    #[error("artifact {0} already exists")]
    AlreadyExists(PathBuf),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to commit {path}: {message}")]
    Commit { path: PathBuf, message: String },
    #[error("failed to prune artifacts of {device}: {message}")]
    Prune { device: String, message: String },
    #[error("failed to list {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    /// Taxonomy entry reported in the device outcome.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            StoreError::Commit { .. } => ErrorKind::StorageCommitFailure,
            _ => ErrorKind::StorageWriteFailure,
        }
    }
}

/// Result of one retention pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PruneReport {
    pub removed: Vec<PathBuf>,
    pub kept: usize,
    /// False when nothing changed, in which case no commit was made.
    pub committed: bool,
}

/// An artifact found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub path: PathBuf,
    pub captured_at: NaiveDateTime,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write `config_text` as a new artifact and commit it.
    ///
    /// On error nothing is left behind: no file, no staged entry.
    async fn persist(
        &self,
        device: &str,
        config_text: &str,
        captured_at: NaiveDateTime,
    ) -> Result<BackupArtifact, StoreError>;

    /// Remove the oldest artifacts of `device` beyond the retention limit.
    async fn prune(&self, device: &str) -> Result<PruneReport, StoreError>;
}

/// Git-backed [`ArtifactStore`].
#[derive(Debug)]
pub struct VersionStore {
    root: PathBuf,
    ext: String,
    retention: RetentionPolicy,
    git: GitRepo,
    lane: Mutex<()>,
}

impl VersionStore {
    /// Create the root if needed and make sure it is a git repository.
    pub async fn open(
        root: impl Into<PathBuf>,
        ext: impl Into<String>,
        retention: RetentionPolicy,
        author: CommitAuthor,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| StoreError::Init {
            path: root.clone(),
            message: e.to_string(),
        })?;
        let git = GitRepo::new(&root, author);
        git.ensure_initialized().await.map_err(|e| StoreError::Init {
            path: root.clone(),
            message: format!("{e:#}"),
        })?;
        Ok(Self {
            root,
            ext: ext.into(),
            retention,
            git,
            lane: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn git(&self) -> &GitRepo {
        &self.git
    }

    /// Artifacts of `device` currently on disk, oldest first.
    pub async fn list_artifacts(&self, device: &str) -> Result<Vec<StoredArtifact>, StoreError> {
        let identity = sanitize_identity(device);
        let list_err = |source| StoreError::List {
            path: self.root.clone(),
            source,
        };
        let mut dir = tokio::fs::read_dir(&self.root).await.map_err(list_err)?;
        let mut found = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(list_err)? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some((owner, captured_at)) = parse_artifact_file_name(name, &self.ext) else {
                continue;
            };
            if owner == identity {
                found.push(StoredArtifact {
                    path: entry.path(),
                    captured_at,
                });
            }
        }
        found.sort_by_key(|a| a.captured_at);
        Ok(found)
    }

    /// Record removed artifacts in history; returns whether a commit was made.
    async fn commit_removals(&self, device: &str, removed: &[PathBuf]) -> anyhow::Result<bool> {
        let names: Vec<&str> = removed
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        if names.is_empty() {
            return Ok(false);
        }
        self.git.unstage(&names).await?;
        if !self.git.has_staged_changes().await? {
            return Ok(false);
        }
        let message = format!("prune {device}: remove {} expired artifact(s)", names.len());
        self.git.commit(&message).await?;
        Ok(true)
    }

    async fn roll_back(&self, path: &Path, name: &str) {
        if let Err(e) = self.git.unstage(&[name]).await {
            warn!(artifact = %path.display(), "failed to unstage after commit failure: {e:#}");
        }
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(artifact = %path.display(), "failed to remove uncommitted artifact: {e}");
            }
        }
    }
}

#[async_trait]
impl ArtifactStore for VersionStore {
    async fn persist(
        &self,
        device: &str,
        config_text: &str,
        captured_at: NaiveDateTime,
    ) -> Result<BackupArtifact, StoreError> {
        let _lane = self.lane.lock().await;

        let name = artifact_file_name(device, captured_at, &self.ext);
        let path = self.root.join(&name);
        write_new(&path, config_text.as_bytes()).await?;

        let message = format!("backup {} {}", device, captured_at.format(TIMESTAMP_FORMAT));
        let committed = async {
            self.git.stage(&[name.as_str()]).await?;
            self.git.commit(&message).await
        }
        .await;

        match committed {
            Ok(()) => {
                info!(device, artifact = %name, bytes = config_text.len(), "backup committed");
                Ok(BackupArtifact {
                    device: device.to_string(),
                    captured_at,
                    path,
                    size_bytes: config_text.len() as u64,
                })
            }
            Err(e) => {
                self.roll_back(&path, &name).await;
                Err(StoreError::Commit {
                    path,
                    message: format!("{e:#}"),
                })
            }
        }
    }

    async fn prune(&self, device: &str) -> Result<PruneReport, StoreError> {
        let _lane = self.lane.lock().await;

        let existing = self.list_artifacts(device).await?;
        let (expired, kept) = self.retention.split_expired(existing, |a| a.captured_at);
        if expired.is_empty() {
            debug!(device, kept = kept.len(), "nothing to prune");
            return Ok(PruneReport {
                removed: Vec::new(),
                kept: kept.len(),
                committed: false,
            });
        }

        let prune_err = |message: String| StoreError::Prune {
            device: device.to_string(),
            message,
        };

        // A file that cannot be removed must not keep the others out of history.
        let mut removed = Vec::with_capacity(expired.len());
        let mut failures = Vec::new();
        for artifact in expired {
            match tokio::fs::remove_file(&artifact.path).await {
                Ok(()) => removed.push(artifact.path),
                Err(e) if e.kind() == io::ErrorKind::NotFound => removed.push(artifact.path),
                Err(e) => {
                    warn!(device, artifact = %artifact.path.display(), "failed to remove expired artifact: {e}");
                    failures.push(format!("remove {}: {e}", artifact.path.display()));
                }
            }
        }

        let committed = self.commit_removals(device, &removed).await.map_err(|e| {
            failures.push(format!("{e:#}"));
            prune_err(failures.join("; "))
        })?;

        if !failures.is_empty() {
            return Err(prune_err(failures.join("; ")));
        }

        info!(device, removed = removed.len(), kept = kept.len(), "pruned expired artifacts");
        Ok(PruneReport {
            removed,
            kept: kept.len(),
            committed,
        })
    }
}

/// Create `path` exclusively and fill it; a partial file is removed on error.
async fn write_new(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(StoreError::AlreadyExists(path.to_path_buf()))
        }
        Err(source) => {
            return Err(StoreError::Write {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let written = async {
        file.write_all(bytes).await?;
        file.sync_all().await
    }
    .await;

    if let Err(source) = written {
        drop(file);
        let _ = tokio::fs::remove_file(path).await;
        return Err(StoreError::Write {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}
