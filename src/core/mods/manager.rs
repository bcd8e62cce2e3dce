use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use md5::{Digest, Md5};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::sync::{ModLocation, ModSynchronizer};
use crate::core::downloader::{Downloader, ProgressFn};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::profile::{ModEntry, ModSourceIds, ProfileStore};

/// A mod as shown to the user: the declared entry plus where its file is.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModListing {
    #[serde(flatten)]
    pub entry: ModEntry,
    pub file_path: Option<PathBuf>,
    pub location: Option<ModLocation>,
    pub missing: bool,
    /// Found on disk but declared by no profile.
    pub manual: bool,
}

/// Result of a toggle: the updated entry and where its file ended up.
///
/// `conflict` is set when the file could not be moved because a file of the
/// same name already sits in the target folder.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModToggle {
    #[serde(flatten)]
    pub entry: ModEntry,
    pub location: Option<ModLocation>,
    pub conflict: bool,
}

/// Catalogue metadata supplied with a download.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModInstallInfo {
    pub id: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub curse_forge_id: Option<i64>,
    pub curse_forge_file_id: Option<i64>,
}

/// Stable short id for a file name: first 8 hex chars of its MD5.
pub fn mod_id_for(file_name: &str) -> String {
    let digest = hex::encode(Md5::digest(file_name.as_bytes()));
    digest[..8].to_string()
}

static VERSION_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)-v?\d+\.[\d.]+.*$").expect("regex version suffix"));

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"v?(\d+\.[\d.]+)").expect("regex version"));

/// `better-maps-v1.2.0.jar` → `Better Maps`.
pub fn derive_mod_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = VERSION_SUFFIX_RE.replace(&stem, "").to_string();

    let name = stem
        .split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ");

    if name.is_empty() {
        "Unknown Mod".to_string()
    } else {
        name
    }
}

/// `better-maps-v1.2.0.jar` → `1.2.0`.
pub fn derive_version(file_name: &str) -> Option<String> {
    let stem = file_name
        .strip_suffix(".jar")
        .or_else(|| file_name.strip_suffix(".zip"))
        .unwrap_or(file_name);
    VERSION_RE
        .captures(stem)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('.').to_string())
}

fn plain_file_name(file_name: &str) -> LauncherResult<&str> {
    let valid = !file_name.is_empty()
        && Path::new(file_name).file_name().and_then(|n| n.to_str()) == Some(file_name)
        && !file_name.contains(['/', '\\']);
    if valid {
        Ok(file_name)
    } else {
        Err(LauncherError::Other(format!("invalid mod file name: {file_name}")))
    }
}

/// Per-profile mod operations. The profile is always written first; only
/// then is the single affected file moved, deleted or reconciled.
#[derive(Clone)]
pub struct ModManager {
    profiles: ProfileStore,
    sync: ModSynchronizer,
    downloader: Arc<Downloader>,
}

impl ModManager {
    pub fn new(profiles: ProfileStore, sync: ModSynchronizer, downloader: Arc<Downloader>) -> Self {
        Self {
            profiles,
            sync,
            downloader,
        }
    }

    /// Declared mods of a profile (active one by default), plus undeclared
    /// files found in the mod directories.
    pub async fn list_mods(&self, profile_id: Option<&str>) -> LauncherResult<Vec<ModListing>> {
        let id = self.profiles.resolve_id(profile_id).await?;
        let config = self.profiles.config().load().await?;
        let profile = config
            .profiles
            .get(&id)
            .ok_or_else(|| LauncherError::ProfileNotFound(id.clone()))?;

        let mut listings: Vec<ModListing> = profile
            .mods
            .iter()
            .map(|entry| {
                let location = self.sync.locate(&entry.file_name);
                ModListing {
                    entry: entry.clone(),
                    file_path: location.map(|l| self.sync.dir(l).join(&entry.file_name)),
                    location,
                    missing: location.is_none(),
                    manual: false,
                }
            })
            .collect();

        let declared_anywhere = |name: &str| {
            config
                .profiles
                .values()
                .any(|p| p.find_mod(name).is_some())
        };
        for file in self.sync.scan().await? {
            if declared_anywhere(&file.file_name) {
                continue;
            }
            let path = self.sync.dir(file.location).join(&file.file_name);
            let mut entry = ModEntry::new(mod_id_for(&file.file_name), &file.file_name);
            entry.name = derive_mod_name(&file.file_name);
            entry.version = derive_version(&file.file_name);
            entry.description = Some("Locally installed mod".to_string());
            entry.enabled = file.location == ModLocation::Enabled;
            entry.file_size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            listings.push(ModListing {
                entry,
                file_path: Some(path),
                location: Some(file.location),
                missing: false,
                manual: true,
            });
        }
        Ok(listings)
    }

    /// Set a mod's enabled flag, then move its file if the profile is active.
    ///
    /// An undeclared file found on disk is adopted into the profile.
    #[instrument(skip(self))]
    pub async fn toggle_mod(
        &self,
        profile_id: Option<&str>,
        file_name: &str,
        enabled: bool,
    ) -> LauncherResult<ModToggle> {
        let file_name = plain_file_name(file_name)?;
        let id = self.profiles.resolve_id(profile_id).await?;
        let on_disk = self.sync.locate(file_name);

        let entry = self
            .profiles
            .modify(&id, |profile| {
                if let Some(entry) = profile.mods.iter_mut().find(|m| m.file_name == file_name) {
                    entry.enabled = enabled;
                    return Ok(entry.clone());
                }
                if on_disk.is_none() {
                    return Err(LauncherError::ModNotFound(file_name.to_string()));
                }
                let mut entry = ModEntry::new(mod_id_for(file_name), file_name);
                entry.name = derive_mod_name(file_name);
                entry.version = derive_version(file_name);
                entry.enabled = enabled;
                entry.date_installed = Some(Utc::now());
                profile.mods.push(entry.clone());
                Ok(entry)
            })
            .await?;

        let mut location = on_disk;
        let mut conflict = false;
        let config = self.profiles.config().load().await?;
        if config.active_profile_id.as_deref() == Some(id.as_str()) {
            let to = ModLocation::for_enabled(enabled);
            if let Some(from) = on_disk.filter(|from| *from != to) {
                if self.sync.move_mod(file_name, from, to).await? {
                    location = Some(to);
                } else {
                    conflict = true;
                }
            }
        }

        let state = if enabled { "enabled" } else { "disabled" };
        if conflict {
            warn!(
                "Mod {} {} in profile {} but its file stayed in {:?}",
                file_name, state, id, location
            );
        } else {
            info!("Mod {} {} in profile {}", file_name, state, id);
        }
        Ok(ModToggle {
            entry,
            location,
            conflict,
        })
    }

    /// Drop a mod from a profile and delete its file unless another profile
    /// still declares it. Returns whether a file was deleted.
    #[instrument(skip(self))]
    pub async fn uninstall_mod(&self, profile_id: Option<&str>, file_name: &str) -> LauncherResult<bool> {
        let file_name = plain_file_name(file_name)?;
        let id = self.profiles.resolve_id(profile_id).await?;
        let on_disk = self.sync.locate(file_name);

        self.profiles
            .modify(&id, |profile| {
                let before = profile.mods.len();
                profile.mods.retain(|m| m.file_name != file_name);
                if profile.mods.len() == before && on_disk.is_none() {
                    return Err(LauncherError::ModNotFound(file_name.to_string()));
                }
                Ok(())
            })
            .await?;

        let still_used = self
            .profiles
            .config()
            .load()
            .await?
            .profiles
            .values()
            .any(|p| p.find_mod(file_name).is_some());
        if still_used {
            info!("Removed {} from profile {}; file kept for other profiles", file_name, id);
            return Ok(false);
        }

        let mut deleted = false;
        for location in [ModLocation::Enabled, ModLocation::Disabled] {
            let path = self.sync.dir(location).join(file_name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => deleted = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(LauncherError::io(&path, e)),
            }
        }
        info!("Uninstalled {} from profile {}", file_name, id);
        Ok(deleted)
    }

    /// Download a mod into the enabled directory, record it in the profile
    /// (replacing any entry with the same file name) and reconcile.
    #[instrument(skip(self, info, on_progress))]
    pub async fn install_mod(
        &self,
        profile_id: Option<&str>,
        url: &str,
        file_name: &str,
        info: Option<ModInstallInfo>,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> LauncherResult<ModEntry> {
        let file_name = plain_file_name(file_name)?;
        let id = self.profiles.resolve_id(profile_id).await?;
        // Fail before downloading if the profile does not exist.
        self.profiles.get(&id).await?;

        self.sync.ensure_dirs().await?;
        let dest = self.sync.dir(ModLocation::Enabled).join(file_name);
        let size = self.downloader.download_file(url, &dest, on_progress).await?;

        let info = info.unwrap_or_default();
        let mut entry = ModEntry::new(
            info.id.unwrap_or_else(|| mod_id_for(file_name)),
            file_name,
        );
        entry.name = info.name.unwrap_or_else(|| derive_mod_name(file_name));
        entry.version = info.version.or_else(|| derive_version(file_name));
        entry.description = info.description.or_else(|| Some("Downloaded Mod".to_string()));
        entry.author = info.author;
        entry.file_size = size;
        entry.date_installed = Some(Utc::now());
        if info.curse_forge_id.is_some() || info.curse_forge_file_id.is_some() {
            entry.source_ids = Some(ModSourceIds {
                curse_forge_id: info.curse_forge_id,
                curse_forge_file_id: info.curse_forge_file_id,
            });
        }

        let recorded = entry.clone();
        self.profiles
            .modify(&id, move |profile| {
                profile.mods.retain(|m| m.file_name != entry.file_name);
                profile.mods.push(entry);
                Ok(())
            })
            .await?;

        self.sync.sync_active_profile(self.profiles.config()).await?;
        info!("Installed mod {} into profile {}", file_name, id);
        Ok(recorded)
    }
}
