//! Artifact file naming: `<deviceIdentity>_<YYYYMMDD>_<HHMMSS>.<ext>`.

use chrono::{NaiveDateTime, Timelike};

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// File-name-safe device identity.
///
/// Keeps ASCII alphanumerics, `.`, `-` and `_`; anything else (IPv6 colons,
/// path separators, whitespace) becomes `-`.
pub fn sanitize_identity(host: &str) -> String {
    host.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Truncate a wall-clock reading to the second resolution used in file names.
pub fn capture_timestamp(now: NaiveDateTime) -> NaiveDateTime {
    now.with_nanosecond(0).unwrap_or(now)
}

pub fn artifact_file_name(identity: &str, captured_at: NaiveDateTime, ext: &str) -> String {
    format!(
        "{}_{}.{}",
        sanitize_identity(identity),
        captured_at.format(TIMESTAMP_FORMAT),
        ext
    )
}

/// Parse a file name back into `(sanitized identity, timestamp)`.
///
/// Returns `None` for anything that is not an artifact with extension `ext`.
pub fn parse_artifact_file_name(file_name: &str, ext: &str) -> Option<(String, NaiveDateTime)> {
    let stem = file_name.strip_suffix(ext)?.strip_suffix('.')?;
    // identity may itself contain '_', so split from the right
    let mut parts = stem.rsplitn(3, '_');
    let time = parts.next()?;
    let date = parts.next()?;
    let identity = parts.next()?;
    if identity.is_empty() || date.len() != 8 || time.len() != 6 {
        return None;
    }
    let ts = NaiveDateTime::parse_from_str(&format!("{date}_{time}"), TIMESTAMP_FORMAT).ok()?;
    Some((identity.to_string(), ts))
}
