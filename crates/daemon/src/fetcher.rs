//! Pulls running configuration from a device.
//!
//! The production transport drives the system OpenSSH client (wrapped in
//! `sshpass -e` when a password is configured) through `tokio::process`. The
//! child is spawned with `kill_on_drop`, so a timed out or cancelled session
//! never leaves a process behind.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netbackup_core::{DeviceDescriptor, DeviceFamily, ErrorKind};
use thiserror::Error;

/// A classified failure from one fetch attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// One attempt to pull configuration text from one device.
#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    async fn fetch(&self, device: &DeviceDescriptor) -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct SshSettings {
    pub ssh_program: PathBuf,
    pub sshpass_program: PathBuf,
    pub connect_timeout: Duration,
    /// Upper bound for a whole session unless the device overrides it.
    pub session_timeout: Duration,
    /// Value for `StrictHostKeyChecking`.
    pub host_key_policy: String,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            ssh_program: PathBuf::from("ssh"),
            sshpass_program: PathBuf::from("sshpass"),
            connect_timeout: Duration::from_secs(15),
            session_timeout: Duration::from_secs(60),
            host_key_policy: "accept-new".to_string(),
        }
    }
}

/// Fully resolved process invocation for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Exported as `SSHPASS` when present.
    pub password: Option<String>,
    pub timeout: Duration,
}

impl SshInvocation {
    pub fn via_sshpass(&self) -> bool {
        self.password.is_some()
    }
}

/// SSH transport for one device family.
#[derive(Debug, Clone)]
pub struct SshFetcher {
    family: DeviceFamily,
    settings: SshSettings,
}

impl SshFetcher {
    pub fn new(family: DeviceFamily, settings: SshSettings) -> Self {
        Self { family, settings }
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    /// Build the command line without spawning anything.
    pub fn invocation(&self, device: &DeviceDescriptor) -> Result<SshInvocation, FetchError> {
        let remote = device
            .overrides
            .command
            .as_deref()
            .or_else(|| self.family.default_command())
            .ok_or_else(|| {
                FetchError::new(
                    ErrorKind::ProtocolError,
                    format!("no pull command for {} device {}", self.family, device.identity()),
                )
            })?;

        let creds = &device.credentials;
        let mut ssh_args = vec![
            "-p".to_string(),
            device.port.to_string(),
            "-l".to_string(),
            creds.username.clone(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.settings.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            format!("StrictHostKeyChecking={}", self.settings.host_key_policy),
            "-o".to_string(),
            "ServerAliveInterval=10".to_string(),
        ];
        if let Some(key) = &creds.identity_file {
            ssh_args.push("-i".to_string());
            ssh_args.push(key.display().to_string());
            ssh_args.push("-o".to_string());
            ssh_args.push("IdentitiesOnly=yes".to_string());
        }
        match &creds.password {
            Some(_) => {
                ssh_args.push("-o".to_string());
                ssh_args.push("PreferredAuthentications=password,keyboard-interactive".to_string());
                ssh_args.push("-o".to_string());
                ssh_args.push("NumberOfPasswordPrompts=1".to_string());
            }
            None => {
                ssh_args.push("-o".to_string());
                ssh_args.push("BatchMode=yes".to_string());
            }
        }
        ssh_args.push(device.identity().to_string());
        ssh_args.push(remote.to_string());

        let timeout = device
            .overrides
            .session_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.settings.session_timeout);

        let (program, args) = match &creds.password {
            Some(_) => {
                let mut args = vec!["-e".to_string(), self.settings.ssh_program.display().to_string()];
                args.extend(ssh_args);
                (self.settings.sshpass_program.clone(), args)
            }
            None => (self.settings.ssh_program.clone(), ssh_args),
        };

        Ok(SshInvocation {
            program,
            args,
            password: creds.password.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl ConfigFetcher for SshFetcher {
    async fn fetch(&self, device: &DeviceDescriptor) -> Result<String, FetchError> {
        let invocation = self.invocation(device)?;

        let mut cmd = tokio::process::Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(password) = &invocation.password {
            cmd.env("SSHPASS", password);
        }

        let child = cmd.spawn().map_err(|e| {
            FetchError::new(
                ErrorKind::ProtocolError,
                format!("failed to spawn {}: {e}", invocation.program.display()),
            )
        })?;

        // Dropping the wait future drops the child, which kills it.
        let out = match tokio::time::timeout(invocation.timeout, child.wait_with_output()).await {
            Ok(res) => res.map_err(|e| {
                FetchError::new(ErrorKind::ProtocolError, format!("failed to read session output: {e}"))
            })?,
            Err(_) => {
                return Err(FetchError::new(
                    ErrorKind::Timeout,
                    format!("session exceeded {}s", invocation.timeout.as_secs()),
                ))
            }
        };

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let kind = classify_ssh_failure(out.status.code(), &stderr, invocation.via_sshpass());
            let detail = stderr.trim();
            let message = if detail.is_empty() {
                format!("session exited with {}", out.status)
            } else {
                detail.to_string()
            };
            return Err(FetchError::new(kind, message));
        }

        let text = String::from_utf8_lossy(&out.stdout).into_owned();
        if text.trim().is_empty() {
            return Err(FetchError::new(
                ErrorKind::ProtocolError,
                "device returned an empty configuration",
            ));
        }
        Ok(text)
    }
}

/// Map a failed session to the error taxonomy.
///
/// `sshpass` exits 5 on a rejected password. OpenSSH exits 255 for every
/// connection-level problem, so the rest is decided from stderr.
pub fn classify_ssh_failure(exit_code: Option<i32>, stderr: &str, via_sshpass: bool) -> ErrorKind {
    if via_sshpass && exit_code == Some(5) {
        return ErrorKind::AuthenticationFailure;
    }
    let s = stderr.to_ascii_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| s.contains(n));

    if any(&[
        "permission denied",
        "authentication failed",
        "too many authentication failures",
        "no more authentication methods",
    ]) {
        ErrorKind::AuthenticationFailure
    } else if any(&["timed out", "timeout"]) {
        ErrorKind::Timeout
    } else if any(&[
        "connection refused",
        "no route to host",
        "network is unreachable",
        "host is unreachable",
        "could not resolve hostname",
        "name or service not known",
        "temporary failure in name resolution",
    ]) {
        ErrorKind::Unreachable
    } else {
        ErrorKind::ProtocolError
    }
}

/// Dispatches to the fetcher registered for a device's family.
#[derive(Clone, Default)]
pub struct FamilyRouter {
    routes: HashMap<DeviceFamily, Arc<dyn ConfigFetcher>>,
}

impl FamilyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// SSH transport for every known family.
    pub fn ssh(settings: SshSettings) -> Self {
        [DeviceFamily::Junos, DeviceFamily::Ios, DeviceFamily::Generic]
            .into_iter()
            .fold(Self::new(), |router, family| {
                router.with(family, Arc::new(SshFetcher::new(family, settings.clone())))
            })
    }

    pub fn with(mut self, family: DeviceFamily, fetcher: Arc<dyn ConfigFetcher>) -> Self {
        self.routes.insert(family, fetcher);
        self
    }

    pub fn supports(&self, family: DeviceFamily) -> bool {
        self.routes.contains_key(&family)
    }
}

#[async_trait]
impl ConfigFetcher for FamilyRouter {
    async fn fetch(&self, device: &DeviceDescriptor) -> Result<String, FetchError> {
        let fetcher = self.routes.get(&device.family).ok_or_else(|| {
            FetchError::new(
                ErrorKind::ProtocolError,
                format!("no fetcher registered for family {}", device.family),
            )
        })?;
        fetcher.fetch(device).await
    }
}
