use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

/// Identity recorded on backup commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

impl Default for CommitAuthor {
    fn default() -> Self {
        Self {
            name: "netbackup".to_string(),
            email: "netbackup@localhost".to_string(),
        }
    }
}

/// Thin async wrapper over the `git` binary for one working tree.
///
/// The store serializes every call; nothing here locks.
#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
    author: CommitAuthor,
}

impl GitRepo {
    pub fn new(root: impl Into<PathBuf>, author: CommitAuthor) -> Self {
        Self {
            root: root.into(),
            author,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn output(&self, args: &[&str]) -> anyhow::Result<Output> {
        let out = tokio::process::Command::new("git")
            .arg("-c")
            .arg(format!("user.name={}", self.author.name))
            .arg("-c")
            .arg(format!("user.email={}", self.author.email))
            .args(["-c", "commit.gpgsign=false"])
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        Ok(out)
    }

    async fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        let out = self.output(args).await?;
        if !out.status.success() {
            anyhow::bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    /// `git init` unless the directory already is a repository.
    pub async fn ensure_initialized(&self) -> anyhow::Result<()> {
        if self.root.join(".git").exists() {
            return Ok(());
        }
        self.run(&["init", "--quiet"]).await?;
        tracing::info!(repo = %self.root.display(), "initialized backup history repository");
        Ok(())
    }

    pub async fn stage(&self, paths: &[&str]) -> anyhow::Result<()> {
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.run(&args).await.map(|_| ())
    }

    /// Drop `paths` from the index; missing entries are ignored.
    pub async fn unstage(&self, paths: &[&str]) -> anyhow::Result<()> {
        let mut args = vec!["rm", "--cached", "--quiet", "--ignore-unmatch", "--"];
        args.extend_from_slice(paths);
        self.run(&args).await.map(|_| ())
    }

    pub async fn has_staged_changes(&self) -> anyhow::Result<bool> {
        let out = self.output(&["diff", "--cached", "--quiet"]).await?;
        match out.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => anyhow::bail!(
                "git diff --cached failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ),
        }
    }

    /// Commit the index. Success means the commit exists; nothing else is
    /// queried afterwards.
    pub async fn commit(&self, message: &str) -> anyhow::Result<()> {
        self.run(&["commit", "--quiet", "-m", message]).await.map(|_| ())
    }

    pub async fn head(&self) -> anyhow::Result<String> {
        self.run(&["rev-parse", "HEAD"]).await
    }

    pub async fn commit_count(&self) -> anyhow::Result<usize> {
        let out = self.output(&["rev-list", "--count", "HEAD"]).await?;
        if !out.status.success() {
            // unborn branch
            return Ok(0);
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().parse()?)
    }

    /// Paths tracked in the index.
    pub async fn tracked_files(&self) -> anyhow::Result<Vec<String>> {
        let out = self.run(&["ls-files"]).await?;
        Ok(out.lines().map(str::to_string).collect())
    }
}
