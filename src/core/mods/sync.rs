//! Moves mod files between the enabled and disabled directories so that
//! their location matches what the active profile declares.
//!
//! The decision is made by [`reconcile`], a pure function over declared and
//! physical state. [`ModSynchronizer`] only gathers that state from disk and
//! performs the moves it returns. Nothing here ever deletes a file.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::config::{ConfigStore, LauncherConfig};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::install::InstallLayout;
use crate::core::profile::Profile;

const MOD_EXTENSIONS: [&str; 2] = ["jar", "zip"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModLocation {
    Enabled,
    Disabled,
}

impl ModLocation {
    pub fn for_enabled(enabled: bool) -> Self {
        if enabled {
            ModLocation::Enabled
        } else {
            ModLocation::Disabled
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalMod {
    pub file_name: String,
    pub location: ModLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModMove {
    pub file_name: String,
    pub from: ModLocation,
    pub to: ModLocation,
}

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub profile_id: Option<String>,
    pub moved: Vec<ModMove>,
    /// Moves skipped because the destination already held a file of that name.
    pub conflicts: Vec<String>,
}

pub fn is_mod_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| MOD_EXTENSIONS.iter().any(|m| e.eq_ignore_ascii_case(m)))
        .unwrap_or(false)
}

/// Decide which files must move.
///
/// - `declared`: file name → `enabled` for the active profile.
/// - `managed`: every file name declared by any profile.
///
/// A file declared by the active profile goes where its flag says. A file
/// only other profiles declare belongs to them and is disabled. A file no
/// profile declares is left where it is.
pub fn reconcile(
    declared: &HashMap<String, bool>,
    managed: &HashSet<String>,
    physical: &[PhysicalMod],
) -> Vec<ModMove> {
    physical
        .iter()
        .filter_map(|file| {
            let desired = match declared.get(&file.file_name) {
                Some(enabled) => ModLocation::for_enabled(*enabled),
                None if managed.contains(&file.file_name) => ModLocation::Disabled,
                None => return None,
            };
            (desired != file.location).then(|| ModMove {
                file_name: file.file_name.clone(),
                from: file.location,
                to: desired,
            })
        })
        .collect()
}

fn declared_state(profile: Option<&Profile>) -> HashMap<String, bool> {
    profile
        .map(|p| {
            p.mods
                .iter()
                .map(|m| (m.file_name.clone(), m.enabled))
                .collect()
        })
        .unwrap_or_default()
}

fn managed_files(profiles: &BTreeMap<String, Profile>) -> HashSet<String> {
    profiles
        .values()
        .flat_map(|p| p.mods.iter().map(|m| m.file_name.clone()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct ModSynchronizer {
    enabled_dir: PathBuf,
    disabled_dir: PathBuf,
}

impl ModSynchronizer {
    pub fn new(enabled_dir: impl Into<PathBuf>, disabled_dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled_dir: enabled_dir.into(),
            disabled_dir: disabled_dir.into(),
        }
    }

    pub fn from_layout(layout: &InstallLayout) -> Self {
        Self::new(layout.mods_dir(), layout.disabled_mods_dir())
    }

    pub fn dir(&self, location: ModLocation) -> &Path {
        match location {
            ModLocation::Enabled => &self.enabled_dir,
            ModLocation::Disabled => &self.disabled_dir,
        }
    }

    /// Where `file_name` currently sits, if anywhere.
    pub fn locate(&self, file_name: &str) -> Option<ModLocation> {
        [ModLocation::Enabled, ModLocation::Disabled]
            .into_iter()
            .find(|loc| self.dir(*loc).join(file_name).is_file())
    }

    pub async fn ensure_dirs(&self) -> LauncherResult<()> {
        for dir in [&self.enabled_dir, &self.disabled_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| LauncherError::io(dir, e))?;
        }
        Ok(())
    }

    /// Mod files in both directories.
    pub async fn scan(&self) -> LauncherResult<Vec<PhysicalMod>> {
        let mut found = Vec::new();
        for location in [ModLocation::Enabled, ModLocation::Disabled] {
            let dir = self.dir(location);
            let mut entries = match tokio::fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(LauncherError::io(dir, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| LauncherError::io(dir, e))?
            {
                let name = entry.file_name().to_string_lossy().to_string();
                let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
                if is_file && is_mod_file(&name) {
                    found.push(PhysicalMod {
                        file_name: name,
                        location,
                    });
                }
            }
        }
        found.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(found)
    }

    /// Move one file between the two directories. Returns `false` when the
    /// file is not at `from` or `to` is already occupied.
    pub async fn move_mod(
        &self,
        file_name: &str,
        from: ModLocation,
        to: ModLocation,
    ) -> LauncherResult<bool> {
        if from == to {
            return Ok(false);
        }
        let src = self.dir(from).join(file_name);
        let dest = self.dir(to).join(file_name);
        if !src.is_file() {
            return Ok(false);
        }
        if dest.exists() {
            warn!("Not moving {}: {:?} already exists", file_name, dest);
            return Ok(false);
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LauncherError::io(parent, e))?;
        }
        tokio::fs::rename(&src, &dest)
            .await
            .map_err(|e| LauncherError::io(&dest, e))?;
        debug!("Moved {} {:?} -> {:?}", file_name, from, to);
        Ok(true)
    }

    /// Reconcile the directories against the profiles in `config`.
    pub async fn sync(&self, config: &LauncherConfig) -> LauncherResult<SyncReport> {
        self.ensure_dirs().await?;

        let active = config.active_profile();
        let declared = declared_state(active);
        let managed = managed_files(&config.profiles);
        let physical = self.scan().await?;

        let mut report = SyncReport {
            profile_id: active.map(|p| p.id.clone()),
            ..SyncReport::default()
        };
        for planned in reconcile(&declared, &managed, &physical) {
            if self
                .move_mod(&planned.file_name, planned.from, planned.to)
                .await?
            {
                report.moved.push(planned);
            } else {
                report.conflicts.push(planned.file_name);
            }
        }

        info!(
            "Synced mods for profile {:?}: {} moved, {} conflicts",
            report.profile_id,
            report.moved.len(),
            report.conflicts.len()
        );
        Ok(report)
    }

    /// Reload the committed config and reconcile against its active profile.
    pub async fn sync_active_profile(&self, store: &ConfigStore) -> LauncherResult<SyncReport> {
        let config = store.load().await?;
        self.sync(&config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::profile::ModEntry;

    fn physical(name: &str, location: ModLocation) -> PhysicalMod {
        PhysicalMod {
            file_name: name.to_string(),
            location,
        }
    }

    #[test]
    fn mod_extensions() {
        assert!(is_mod_file("a.jar"));
        assert!(is_mod_file("b.ZIP"));
        assert!(!is_mod_file("readme.txt"));
        assert!(!is_mod_file("jar"));
    }

    #[test]
    fn reconcile_follows_declared_state() {
        let declared = HashMap::from([("on.jar".to_string(), true), ("off.jar".to_string(), false)]);
        let managed: HashSet<String> = ["on.jar", "off.jar", "other.jar"]
            .into_iter()
            .map(String::from)
            .collect();
        let files = vec![
            physical("on.jar", ModLocation::Disabled),
            physical("off.jar", ModLocation::Enabled),
            physical("other.jar", ModLocation::Enabled),
            physical("manual.jar", ModLocation::Enabled),
            physical("manual2.zip", ModLocation::Disabled),
        ];

        let moves = reconcile(&declared, &managed, &files);
        let names: Vec<_> = moves.iter().map(|m| (m.file_name.as_str(), m.to)).collect();
        assert_eq!(
            names,
            vec![
                ("on.jar", ModLocation::Enabled),
                ("off.jar", ModLocation::Disabled),
                ("other.jar", ModLocation::Disabled),
            ]
        );
    }

    #[test]
    fn reconcile_is_stable_when_in_place() {
        let declared = HashMap::from([("a.jar".to_string(), true)]);
        let managed: HashSet<String> = ["a.jar".to_string()].into_iter().collect();
        let files = vec![physical("a.jar", ModLocation::Enabled)];
        assert!(reconcile(&declared, &managed, &files).is_empty());
    }

    fn config_with(profiles: Vec<Profile>, active: &str) -> LauncherConfig {
        LauncherConfig {
            profiles: profiles.into_iter().map(|p| (p.id.clone(), p)).collect(),
            active_profile_id: Some(active.to_string()),
            ..LauncherConfig::default()
        }
    }

    #[tokio::test]
    async fn switching_profiles_moves_mods_back_and_forth() {
        let dir = tempfile::tempdir().unwrap();
        let sync = ModSynchronizer::new(dir.path().join("Mods"), dir.path().join("DisabledMods"));
        sync.ensure_dirs().await.unwrap();
        std::fs::write(dir.path().join("Mods").join("x.jar"), b"x").unwrap();
        std::fs::write(dir.path().join("Mods").join("loose.jar"), b"l").unwrap();

        let mut a = Profile::with_id("a", "A");
        a.mods.push(ModEntry::new("x", "x.jar"));
        let b = Profile::with_id("b", "B");

        let report = sync
            .sync(&config_with(vec![a.clone(), b.clone()], "b"))
            .await
            .unwrap();
        assert_eq!(report.moved.len(), 1);
        assert_eq!(sync.locate("x.jar"), Some(ModLocation::Disabled));
        assert_eq!(sync.locate("loose.jar"), Some(ModLocation::Enabled));

        sync.sync(&config_with(vec![a, b], "a")).await.unwrap();
        assert_eq!(sync.locate("x.jar"), Some(ModLocation::Enabled));
        assert_eq!(sync.locate("loose.jar"), Some(ModLocation::Enabled));
    }

    #[tokio::test]
    async fn sync_creates_missing_dirs_and_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let sync = ModSynchronizer::new(dir.path().join("Mods"), dir.path().join("DisabledMods"));

        let mut p = Profile::with_id("p", "P");
        let mut entry = ModEntry::new("d", "dup.jar");
        entry.enabled = false;
        p.mods.push(entry);
        let config = config_with(vec![p], "p");

        let report = sync.sync(&config).await.unwrap();
        assert!(report.moved.is_empty());
        assert!(dir.path().join("Mods").is_dir());
        assert!(dir.path().join("DisabledMods").is_dir());

        std::fs::write(dir.path().join("Mods").join("dup.jar"), b"new").unwrap();
        std::fs::write(dir.path().join("DisabledMods").join("dup.jar"), b"old").unwrap();
        let report = sync.sync(&config).await.unwrap();
        assert_eq!(report.conflicts, vec!["dup.jar".to_string()]);
        assert_eq!(std::fs::read(dir.path().join("Mods").join("dup.jar")).unwrap(), b"new");
        assert_eq!(
            std::fs::read(dir.path().join("DisabledMods").join("dup.jar")).unwrap(),
            b"old"
        );
    }
}
