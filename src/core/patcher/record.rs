use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::bytes::ORIGINAL_DOMAIN;
use crate::core::error::{LauncherError, LauncherResult};

pub const FLAG_SUFFIX: &str = ".patched_custom";
pub const BACKUP_SUFFIX: &str = ".original";
pub const PATCHER_VERSION: &str = "1.0.0";

/// Sidecar flag written next to a patched binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRecord {
    pub patched_at: DateTime<Utc>,
    pub original_domain: String,
    pub target_domain: String,
    pub patcher_version: String,
}

impl PatchRecord {
    pub fn new(target_domain: &str) -> Self {
        Self {
            patched_at: Utc::now(),
            original_domain: ORIGINAL_DOMAIN.to_string(),
            target_domain: target_domain.to_string(),
            patcher_version: PATCHER_VERSION.to_string(),
        }
    }
}

fn with_suffix(binary: &Path, suffix: &str) -> PathBuf {
    let mut name = binary.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

pub fn flag_path(binary: &Path) -> PathBuf {
    with_suffix(binary, FLAG_SUFFIX)
}

pub fn backup_path(binary: &Path) -> PathBuf {
    with_suffix(binary, BACKUP_SUFFIX)
}

/// The flag next to `binary`, if present and readable.
pub fn read_record(binary: &Path) -> Option<PatchRecord> {
    let text = fs::read_to_string(flag_path(binary)).ok()?;
    serde_json::from_str(&text).ok()
}

/// True when the flag matches `domain` and the binary has not been replaced
/// since the flag was written.
pub fn is_patched_already(binary: &Path, domain: &str) -> bool {
    let Some(record) = read_record(binary) else {
        return false;
    };
    if record.target_domain != domain {
        return false;
    }

    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(binary), modified(&flag_path(binary))) {
        (Some(bin), Some(flag)) if bin > flag => {
            info!("{:?} is newer than its patch flag, repatching", binary);
            false
        }
        (Some(_), Some(_)) => true,
        _ => false,
    }
}

pub fn mark_patched(binary: &Path, domain: &str) -> LauncherResult<()> {
    let path = flag_path(binary);
    let json = serde_json::to_string_pretty(&PatchRecord::new(domain))?;
    fs::write(&path, json).map_err(|e| LauncherError::io(&path, e))
}

/// Copy `binary` to its `.original` backup unless one already exists.
///
/// Returns whether a backup was created.
pub fn ensure_backup(binary: &Path) -> LauncherResult<bool> {
    let backup = backup_path(binary);
    if backup.exists() {
        return Ok(false);
    }
    fs::copy(binary, &backup).map_err(|e| LauncherError::io(&backup, e))?;
    debug!("Backed up {:?}", binary);
    Ok(true)
}

/// Put the `.original` backup back in place and drop the flag.
///
/// Returns whether a backup was restored. The flag is removed either way.
pub fn restore(binary: &Path) -> LauncherResult<bool> {
    let backup = backup_path(binary);
    let restored = if backup.is_file() {
        fs::copy(&backup, binary).map_err(|e| LauncherError::io(binary, e))?;
        true
    } else {
        false
    };

    let flag = flag_path(binary);
    match fs::remove_file(&flag) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(LauncherError::io(&flag, e)),
    }
    Ok(restored)
}
