use std::collections::HashMap;

use thiserror::Error;

use crate::model::{DeviceDescriptor, DeviceFamily};
use crate::naming::sanitize_identity;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("inventory is empty")]
    EmptyInventory,
    #[error("device #{0} has an empty host")]
    EmptyHost(usize),
    #[error("device '{0}' has an invalid host (whitespace is not allowed)")]
    BadHost(String),
    #[error("device '{0}' has port 0")]
    ZeroPort(String),
    #[error("device '{0}' has no username")]
    MissingUsername(String),
    #[error("device '{0}' is generic and needs an explicit command")]
    MissingCommand(String),
    #[error("device '{0}' overrides max_attempts to 0")]
    ZeroAttempts(String),
    #[error("device '{0}' overrides session_timeout_secs to 0")]
    ZeroSessionTimeout(String),
    #[error("devices '{0}' and '{1}' map to the same artifact name")]
    DuplicateIdentity(String, String),
    #[error("retention count must be at least 1")]
    ZeroRetention,
    #[error("both a daily backup time and an interval are configured; pick one")]
    ConflictingSchedule,
    #[error("no schedule configured: set a daily backup time or an interval")]
    MissingSchedule,
    #[error("interval must be at least one minute")]
    ZeroInterval,
    #[error("interval of {0} minutes is longer than a year")]
    IntervalTooLarge(u64),
    #[error("invalid time of day '{0}' (expected HH:MM or HH:MM:SS)")]
    BadTimeOfDay(String),
}

/// Check a whole inventory before any cycle runs.
pub fn validate_inventory(devices: &[DeviceDescriptor]) -> Result<(), ValidationError> {
    if devices.is_empty() {
        return Err(ValidationError::EmptyInventory);
    }

    let mut seen: HashMap<String, &str> = HashMap::new();
    for (index, device) in devices.iter().enumerate() {
        validate_device(index, device)?;
        let key = sanitize_identity(device.identity());
        if let Some(prev) = seen.insert(key, device.identity()) {
            return Err(ValidationError::DuplicateIdentity(
                prev.to_string(),
                device.identity().to_string(),
            ));
        }
    }
    Ok(())
}

pub fn validate_device(index: usize, device: &DeviceDescriptor) -> Result<(), ValidationError> {
    let host = device.identity();
    if host.is_empty() {
        return Err(ValidationError::EmptyHost(index));
    }
    if host.chars().any(char::is_whitespace) {
        return Err(ValidationError::BadHost(host.to_string()));
    }
    if device.port == 0 {
        return Err(ValidationError::ZeroPort(host.to_string()));
    }
    if device.credentials.username.trim().is_empty() {
        return Err(ValidationError::MissingUsername(host.to_string()));
    }
    let has_command = device
        .overrides
        .command
        .as_deref()
        .is_some_and(|c| !c.trim().is_empty());
    if device.family == DeviceFamily::Generic && !has_command {
        return Err(ValidationError::MissingCommand(host.to_string()));
    }
    if device.overrides.max_attempts == Some(0) {
        return Err(ValidationError::ZeroAttempts(host.to_string()));
    }
    if device.overrides.session_timeout_secs == Some(0) {
        return Err(ValidationError::ZeroSessionTimeout(host.to_string()));
    }
    Ok(())
}
