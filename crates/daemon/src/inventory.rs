//! Device inventory: a YAML file or a plain host list, merged with defaults.
//!
//! ```yaml
//! defaults:
//!   username: backup
//!   family: junos
//! devices:
//!   - host: r1.lab
//!   - host: sw1.lab
//!     port: 22
//!     family: ios
//!     max_attempts: 5
//! ```

use std::fmt;
use std::path::PathBuf;

use netbackup_core::validation::validate_inventory;
use netbackup_core::{Credentials, DeviceDescriptor, DeviceFamily, DeviceOverrides};
use serde::Deserialize;

use crate::config::{ConfigError, InventorySource};

/// Process-wide fallbacks for fields a device does not set.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceDefaults {
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub identity_file: Option<PathBuf>,
    pub family: DeviceFamily,
}

impl fmt::Debug for DeviceDefaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceDefaults")
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("identity_file", &self.identity_file)
            .field("family", &self.family)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct InventoryFile {
    #[serde(default)]
    defaults: EntryFields,
    devices: Vec<EntryFields>,
}

/// One `devices` entry, or the file-level `defaults` block (where `host` is ignored).
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntryFields {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    identity_file: Option<PathBuf>,
    family: Option<DeviceFamily>,
    command: Option<String>,
    session_timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
}

impl EntryFields {
    /// Fields set here win over `fallback`.
    fn or(self, fallback: &EntryFields) -> EntryFields {
        EntryFields {
            host: self.host,
            port: self.port.or(fallback.port),
            username: self.username.or_else(|| fallback.username.clone()),
            password: self.password.or_else(|| fallback.password.clone()),
            identity_file: self.identity_file.or_else(|| fallback.identity_file.clone()),
            family: self.family.or(fallback.family),
            command: self.command.or_else(|| fallback.command.clone()),
            session_timeout_secs: self.session_timeout_secs.or(fallback.session_timeout_secs),
            max_attempts: self.max_attempts.or(fallback.max_attempts),
        }
    }

    fn into_descriptor(self, defaults: &DeviceDefaults) -> DeviceDescriptor {
        DeviceDescriptor {
            host: self.host.as_deref().unwrap_or_default().trim().to_string(),
            port: self.port.unwrap_or(defaults.port),
            credentials: Credentials {
                username: self
                    .username
                    .or_else(|| defaults.username.clone())
                    .unwrap_or_default(),
                password: self.password.or_else(|| defaults.password.clone()),
                identity_file: self.identity_file.or_else(|| defaults.identity_file.clone()),
            },
            family: self.family.unwrap_or(defaults.family),
            overrides: DeviceOverrides {
                command: self.command,
                session_timeout_secs: self.session_timeout_secs,
                max_attempts: self.max_attempts,
            },
        }
    }
}

/// Devices for a bare host list; blank entries are skipped.
pub fn from_hosts(hosts: &[String], defaults: &DeviceDefaults) -> Vec<DeviceDescriptor> {
    hosts
        .iter()
        .filter(|h| !h.trim().is_empty())
        .map(|h| {
            EntryFields {
                host: Some(h.clone()),
                ..EntryFields::default()
            }
            .into_descriptor(defaults)
        })
        .collect()
}

/// Parse a YAML inventory document.
pub fn parse_inventory(yaml: &str, defaults: &DeviceDefaults) -> anyhow::Result<Vec<DeviceDescriptor>> {
    let file: InventoryFile = serde_yaml::from_str(yaml)?;
    Ok(file
        .devices
        .into_iter()
        .map(|entry| entry.or(&file.defaults).into_descriptor(defaults))
        .collect())
}

/// Resolve and validate the configured inventory.
pub async fn load(source: &InventorySource, defaults: &DeviceDefaults) -> Result<Vec<DeviceDescriptor>, ConfigError> {
    let devices = match source {
        InventorySource::Hosts(hosts) => from_hosts(hosts, defaults),
        InventorySource::File(path) => {
            let inventory_err = |message: String| ConfigError::Inventory {
                path: path.clone(),
                message,
            };
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| inventory_err(e.to_string()))?;
            parse_inventory(&text, defaults).map_err(|e| inventory_err(format!("{e:#}")))?
        }
    };
    validate_inventory(&devices)?;
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use netbackup_core::validation::ValidationError;

    fn defaults() -> DeviceDefaults {
        DeviceDefaults {
            port: 60002,
            username: Some("backup".into()),
            password: Some("pw".into()),
            identity_file: None,
            family: DeviceFamily::Junos,
        }
    }

    #[test]
    fn host_list_uses_defaults() {
        let devices = from_hosts(&[" r1 ".into(), "".into(), "r2".into()], &defaults());
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].host, "r1");
        assert_eq!(devices[0].port, 60002);
        assert_eq!(devices[0].credentials.username, "backup");
        assert_eq!(devices[1].family, DeviceFamily::Junos);
    }

    #[test]
    fn yaml_entries_override_file_and_process_defaults() {
        let yaml = r#"
defaults:
  username: netops
devices:
  - host: r1.lab
  - host: sw1.lab
    port: 22
    family: ios
    max_attempts: 5
  - host: box1
    family: generic
    command: cat /config/running
    password: other
"#;
        let devices = parse_inventory(yaml, &defaults()).unwrap();
        assert_eq!(devices.len(), 3);

        assert_eq!(devices[0].credentials.username, "netops");
        assert_eq!(devices[0].port, 60002);

        assert_eq!(devices[1].port, 22);
        assert_eq!(devices[1].family, DeviceFamily::Ios);
        assert_eq!(devices[1].overrides.max_attempts, Some(5));

        assert_eq!(devices[2].pull_command(), Some("cat /config/running"));
        assert_eq!(devices[2].credentials.password.as_deref(), Some("other"));
        assert_eq!(validate_inventory(&devices), Ok(()));
    }

    #[test]
    fn rejects_unknown_fields_and_bad_ports() {
        assert!(parse_inventory("devices:\n  - host: r1\n    prot: 22\n", &defaults()).is_err());
        assert!(parse_inventory("devices:\n  - host: r1\n    port: abc\n", &defaults()).is_err());
    }

    #[tokio::test]
    async fn load_validates_duplicates() {
        let source = InventorySource::Hosts(vec!["r1".into(), "r1".into()]);
        let err = load(&source, &defaults()).await.unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid(ValidationError::DuplicateIdentity("r1".into(), "r1".into()))
        );
    }

    #[tokio::test]
    async fn load_reads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.yaml");
        std::fs::write(&path, "devices:\n  - host: r1\n  - host: r2\n").unwrap();
        let devices = load(&InventorySource::File(path), &defaults()).await.unwrap();
        assert_eq!(devices.len(), 2);
    }

    #[test]
    fn debug_hides_default_password() {
        assert!(!format!("{:?}", defaults()).contains("pw\""));
    }
}
