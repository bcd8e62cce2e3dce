use chrono::Utc;
use tracing::{info, warn};

use super::model::{legacy_mods, Profile, ProfileUpdate, DEFAULT_PROFILE_ID, DEFAULT_PROFILE_NAME};
use crate::core::config::ConfigStore;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::mods::{ModSynchronizer, SyncReport};

/// CRUD over the profiles stored in `config.json`.
///
/// Every operation is a full read-modify-write of the config document.
/// Activating a profile reconciles the mod directories afterwards.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    config: ConfigStore,
    sync: ModSynchronizer,
}

impl ProfileStore {
    pub fn new(config: ConfigStore, sync: ModSynchronizer) -> Self {
        Self { config, sync }
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Wrap the pre-profile global mod list and Java path into a "Default"
    /// profile. Does nothing once any profile exists.
    ///
    /// Returns whether a migration happened.
    pub async fn migrate_legacy(&self) -> LauncherResult<bool> {
        if !self.config.load().await?.profiles.is_empty() {
            return Ok(false);
        }

        let migrated = self
            .config
            .update(|config| {
                if !config.profiles.is_empty() {
                    return Ok(false);
                }
                let mut profile = Profile::with_id(DEFAULT_PROFILE_ID, DEFAULT_PROFILE_NAME);
                profile.last_used = Some(profile.created);
                profile.mods = legacy_mods(&config.installed_mods);
                profile.java_path = config.java_path.take().unwrap_or_default();
                config.installed_mods.clear();

                config.active_profile_id = Some(profile.id.clone());
                config.profiles.insert(profile.id.clone(), profile);
                Ok(true)
            })
            .await?;

        if migrated {
            info!("Migrated legacy settings into the default profile");
        }
        Ok(migrated)
    }

    /// All profiles, oldest first.
    pub async fn list(&self) -> LauncherResult<Vec<Profile>> {
        let mut profiles: Vec<Profile> = self.config.load().await?.profiles.into_values().collect();
        profiles.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        Ok(profiles)
    }

    pub async fn get(&self, id: &str) -> LauncherResult<Profile> {
        self.config
            .load()
            .await?
            .profiles
            .remove(id)
            .ok_or_else(|| LauncherError::ProfileNotFound(id.to_string()))
    }

    pub async fn get_active(&self) -> LauncherResult<Option<Profile>> {
        Ok(self.config.load().await?.active_profile().cloned())
    }

    pub async fn create(&self, name: &str) -> LauncherResult<Profile> {
        let profile = Profile::new(name.trim());
        let created = profile.clone();
        self.config
            .update(move |config| {
                config.profiles.insert(profile.id.clone(), profile);
                Ok(())
            })
            .await?;
        info!("Created profile '{}' ({})", created.name, created.id);
        Ok(created)
    }

    /// Make `id` the active profile and reconcile mods against it.
    ///
    /// Activating the already-active profile returns it unchanged and does
    /// not touch the mod directories.
    pub async fn activate(&self, id: &str) -> LauncherResult<(Profile, Option<SyncReport>)> {
        let current = self.config.load().await?;
        if current.active_profile_id.as_deref() == Some(id) {
            if let Some(profile) = current.profiles.get(id) {
                return Ok((profile.clone(), None));
            }
        }

        let profile = self
            .config
            .update(|config| {
                let profile = config
                    .profiles
                    .get_mut(id)
                    .ok_or_else(|| LauncherError::ProfileNotFound(id.to_string()))?;
                profile.last_used = Some(Utc::now());
                let activated = profile.clone();
                config.active_profile_id = Some(id.to_string());
                Ok(activated)
            })
            .await?;
        info!("Activated profile '{}' ({})", profile.name, profile.id);

        let report = self.sync.sync_active_profile(&self.config).await?;
        Ok((profile, Some(report)))
    }

    /// Remove a profile's entry. Its mod files stay on disk.
    pub async fn delete(&self, id: &str) -> LauncherResult<()> {
        self.config
            .update(|config| {
                if !config.profiles.contains_key(id) {
                    return Err(LauncherError::ProfileNotFound(id.to_string()));
                }
                if config.active_profile_id.as_deref() == Some(id) {
                    return Err(LauncherError::CannotDeleteActiveProfile(id.to_string()));
                }
                if config.profiles.len() <= 1 {
                    return Err(LauncherError::CannotDeleteLastProfile(id.to_string()));
                }
                config.profiles.remove(id);
                Ok(())
            })
            .await?;
        info!("Deleted profile {}", id);
        Ok(())
    }

    /// Apply whitelisted fields from `update`.
    pub async fn update(&self, id: &str, update: ProfileUpdate) -> LauncherResult<Profile> {
        if update.is_empty() {
            warn!("Empty update for profile {}", id);
        }
        self.config
            .update(|config| {
                let profile = config
                    .profiles
                    .get_mut(id)
                    .ok_or_else(|| LauncherError::ProfileNotFound(id.to_string()))?;
                update.apply(profile);
                Ok(profile.clone())
            })
            .await
    }

    /// Mutate one profile in place and persist it.
    pub(crate) async fn modify<T, F>(&self, id: &str, f: F) -> LauncherResult<T>
    where
        F: FnOnce(&mut Profile) -> LauncherResult<T>,
    {
        self.config
            .update(|config| {
                let profile = config
                    .profiles
                    .get_mut(id)
                    .ok_or_else(|| LauncherError::ProfileNotFound(id.to_string()))?;
                f(profile)
            })
            .await
    }

    /// `id` if given, otherwise the active profile's id.
    pub(crate) async fn resolve_id(&self, id: Option<&str>) -> LauncherResult<String> {
        if let Some(id) = id {
            return Ok(id.to_string());
        }
        self.config
            .load()
            .await?
            .active_profile_id
            .ok_or_else(|| LauncherError::ProfileNotFound("no active profile".into()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::mods::ModLocation;
    use crate::core::profile::ModEntry;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: ProfileStore,
        sync: ModSynchronizer,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let sync = ModSynchronizer::new(dir.path().join("Mods"), dir.path().join("DisabledMods"));
        let store = ProfileStore::new(ConfigStore::in_dir(dir.path()), sync.clone());
        Fixture {
            _dir: dir,
            store,
            sync,
        }
    }

    #[tokio::test]
    async fn migrates_legacy_settings_once() {
        let f = fixture();
        f.store
            .config()
            .update(|config| {
                config.java_path = Some("/opt/java/bin/java".into());
                config.installed_mods = vec![
                    json!({"id": "m1", "fileName": "m1.jar", "enabled": false}),
                    json!({"broken": true}),
                ];
                Ok(())
            })
            .await
            .unwrap();

        assert!(f.store.migrate_legacy().await.unwrap());
        let active = f.store.get_active().await.unwrap().unwrap();
        assert_eq!(active.id, DEFAULT_PROFILE_ID);
        assert_eq!(active.name, "Default");
        assert_eq!(active.java_path, "/opt/java/bin/java");
        assert_eq!(active.mods.len(), 1);
        assert!(!active.mods[0].enabled);
        assert!(active.last_used.is_some());

        assert!(!f.store.migrate_legacy().await.unwrap());
        assert_eq!(f.store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_rules() {
        let f = fixture();
        f.store.migrate_legacy().await.unwrap();

        let err = f.store.delete(DEFAULT_PROFILE_ID).await.unwrap_err();
        assert!(matches!(err, LauncherError::CannotDeleteActiveProfile(_)));

        let extra = f.store.create("Extra").await.unwrap();
        f.store.activate(&extra.id).await.unwrap();
        f.store.delete(DEFAULT_PROFILE_ID).await.unwrap();

        // Only one profile left, and it is active.
        let err = f.store.delete(&extra.id).await.unwrap_err();
        assert!(matches!(err, LauncherError::CannotDeleteActiveProfile(_)));

        let err = f.store.delete("ghost").await.unwrap_err();
        assert!(matches!(err, LauncherError::ProfileNotFound(_)));
    }

    #[tokio::test]
    async fn sole_inactive_profile_cannot_be_deleted() {
        let f = fixture();
        let only = f.store.create("Only").await.unwrap();
        let err = f.store.delete(&only.id).await.unwrap_err();
        assert!(matches!(err, LauncherError::CannotDeleteLastProfile(_)));
    }

    #[tokio::test]
    async fn update_applies_whitelist_only() {
        let f = fixture();
        let p = f.store.create("Old").await.unwrap();
        let update = ProfileUpdate::from_value(json!({
            "name": "New",
            "javaPath": "/usr/bin/java",
            "id": "other",
            "unknown": 1
        }))
        .unwrap();

        let updated = f.store.update(&p.id, update).await.unwrap();
        assert_eq!(updated.id, p.id);
        assert_eq!(updated.name, "New");
        assert_eq!(updated.java_path, "/usr/bin/java");
        assert_eq!(f.store.get(&p.id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn activation_syncs_against_committed_state() {
        let f = fixture();
        let mut a = f.store.create("A").await.unwrap();
        let b = f.store.create("B").await.unwrap();
        a = f
            .store
            .modify(&a.id, |p| {
                p.mods.push(ModEntry::new("x", "x.jar"));
                Ok(p.clone())
            })
            .await
            .unwrap();
        f.sync.ensure_dirs().await.unwrap();
        std::fs::write(f.sync.dir(ModLocation::Enabled).join("x.jar"), b"x").unwrap();

        let (active, report) = f.store.activate(&a.id).await.unwrap();
        assert!(active.last_used.is_some());
        assert!(report.unwrap().moved.is_empty());

        let (_, again) = f.store.activate(&a.id).await.unwrap();
        assert!(again.is_none());

        let (_, report) = f.store.activate(&b.id).await.unwrap();
        assert_eq!(report.unwrap().moved.len(), 1);
        assert_eq!(f.sync.locate("x.jar"), Some(ModLocation::Disabled));

        f.store.activate(&a.id).await.unwrap();
        assert_eq!(f.sync.locate("x.jar"), Some(ModLocation::Enabled));
    }

    #[tokio::test]
    async fn activating_unknown_profile_fails() {
        let f = fixture();
        let err = f.store.activate("missing").await.unwrap_err();
        assert!(matches!(err, LauncherError::ProfileNotFound(_)));
    }
}
