use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::core::config::{default_app_dir, ConfigStore};
use crate::core::downloader::progress::emit;
use crate::core::downloader::{Downloader, ProgressEvent, ProgressFn};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::http::{build_api_client, build_http_client};
use crate::core::install::{GameStatus, InstallLayout, InstallOutcome, PatchInstaller, LATEST};
use crate::core::java::{provision_jre, JavaCandidate, JavaResolver, JavaSource, SystemJava};
use crate::core::launch::{self, fixups_for, LaunchContext, LaunchRequest, LaunchResult, PlatformFixups};
use crate::core::mods::{ModInstallInfo, ModListing, ModManager, ModSynchronizer, ModToggle, SyncReport};
use crate::core::patcher::{BinaryPatcher, PatchResults};
use crate::core::profile::{ModEntry, Profile, ProfileStore, ProfileUpdate};
use crate::core::version::{HttpVersionSource, Os, VersionSource};

/// Everything the UI layer talks to, wired over one installation.
///
/// Operations are expected to be serialized by the caller; nothing here
/// locks the config file or the install directory.
pub struct AppState {
    app_dir: PathBuf,
    config: ConfigStore,
    layout: InstallLayout,
    downloader: Arc<Downloader>,
    versions: Arc<dyn VersionSource>,
    installer: PatchInstaller,
    java: JavaResolver,
    profiles: ProfileStore,
    sync: ModSynchronizer,
    mods: ModManager,
    fixups: Arc<dyn PlatformFixups>,
}

impl AppState {
    /// State rooted at the per-OS data directory, talking to the real
    /// endpoints.
    pub async fn new() -> LauncherResult<Self> {
        let downloader = Arc::new(Downloader::with_client(build_http_client()?));
        let versions: Arc<dyn VersionSource> = Arc::new(HttpVersionSource::new(build_api_client()?));
        Self::with_parts(default_app_dir(), downloader, versions).await
    }

    /// `app_dir` holds `config.json`; the install root is `app_dir` unless
    /// the config relocates it with `installPath`.
    pub async fn with_parts(
        app_dir: PathBuf,
        downloader: Arc<Downloader>,
        versions: Arc<dyn VersionSource>,
    ) -> LauncherResult<Self> {
        tokio::fs::create_dir_all(&app_dir)
            .await
            .map_err(|e| LauncherError::io(&app_dir, e))?;
        let config = ConfigStore::in_dir(&app_dir);
        let loaded = config.load().await?;

        let root = loaded
            .install_root_override()
            .unwrap_or_else(|| app_dir.clone());
        let layout = InstallLayout::new(root);
        let installer = PatchInstaller::new(layout.clone(), downloader.clone(), versions.clone())
            .with_channel(loaded.channel.clone());
        let sync = ModSynchronizer::from_layout(&layout);
        let profiles = ProfileStore::new(config.clone(), sync.clone());
        let mods = ModManager::new(profiles.clone(), sync.clone(), downloader.clone());

        let state = Self {
            java: JavaResolver::new(layout.jre_dir(LATEST)),
            app_dir,
            config,
            layout,
            downloader,
            versions,
            installer,
            profiles,
            sync,
            mods,
            fixups: fixups_for(Os::current()),
        };
        state.profiles.migrate_legacy().await?;
        info!("Launcher state ready at {:?}", state.layout.root());
        Ok(state)
    }

    pub fn with_fixups(mut self, fixups: Arc<dyn PlatformFixups>) -> Self {
        self.fixups = fixups;
        self
    }

    pub fn with_system_java(mut self, system: SystemJava) -> Self {
        self.java = JavaResolver::with_system(self.layout.jre_dir(LATEST), system);
        self
    }

    pub fn with_installer(mut self, f: impl FnOnce(PatchInstaller) -> PatchInstaller) -> Self {
        self.installer = f(self.installer);
        self
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    // ─── Java ───

    /// Launch override, then the active profile's path, then the legacy
    /// global path, then bundled and system runtimes. When nothing is found
    /// the platform JRE is downloaded.
    pub async fn resolve_java(
        &self,
        override_path: Option<&str>,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> LauncherResult<JavaCandidate> {
        let config = self.config.load().await?;
        let configured = config
            .active_profile()
            .and_then(Profile::java_override)
            .map(str::to_string)
            .or_else(|| config.java_path.clone().filter(|p| !p.trim().is_empty()));

        match self.java.resolve(override_path, configured.as_deref()) {
            Err(LauncherError::JavaNotFound(reason)) => {
                info!("{}; provisioning the bundled runtime", reason);
                let manifest = self.versions.jre_manifest().await?;
                let path = provision_jre(
                    &self.downloader,
                    &manifest,
                    self.java.bundled_dir(),
                    &self.layout.cache_dir(),
                    on_progress,
                )
                .await?;
                Ok(JavaCandidate {
                    label: "Bundled runtime".to_string(),
                    source: JavaSource::Bundled,
                    exists: true,
                    path,
                    note: manifest.version,
                })
            }
            other => other,
        }
    }

    pub async fn list_java_candidates(&self) -> LauncherResult<Vec<JavaCandidate>> {
        let active = self.profiles.get_active().await?;
        let configured = active.as_ref().and_then(Profile::java_override);
        Ok(self.java.list_candidates(configured))
    }

    // ─── Installation ───

    pub async fn ensure_installed(
        &self,
        version: Option<&str>,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> LauncherResult<InstallOutcome> {
        self.installer.ensure_installed(version, on_progress).await
    }

    pub async fn repair(
        &self,
        version: Option<&str>,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> LauncherResult<InstallOutcome> {
        self.installer.repair(version, on_progress).await
    }

    pub async fn uninstall(&self) -> LauncherResult<bool> {
        self.installer.uninstall().await
    }

    pub async fn game_status(&self) -> LauncherResult<GameStatus> {
        self.installer.game_status().await
    }

    /// Patch the client and server under `game_dir` (the managed install
    /// when `None`) for the configured auth domain.
    pub async fn patch_binaries(
        &self,
        game_dir: Option<&Path>,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> LauncherResult<PatchResults> {
        let domain = self.config.auth_domain().await?;
        let game_dir = game_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.installer.game_dir());
        Ok(BinaryPatcher::new(&domain)
            .patch_binaries(&game_dir, on_progress)
            .await)
    }

    // ─── Profiles ───

    pub async fn list_profiles(&self) -> LauncherResult<Vec<Profile>> {
        self.profiles.list().await
    }

    pub async fn get_active_profile(&self) -> LauncherResult<Option<Profile>> {
        self.profiles.get_active().await
    }

    pub async fn create_profile(&self, name: &str) -> LauncherResult<Profile> {
        self.profiles.create(name).await
    }

    pub async fn activate_profile(&self, id: &str) -> LauncherResult<Profile> {
        Ok(self.profiles.activate(id).await?.0)
    }

    pub async fn delete_profile(&self, id: &str) -> LauncherResult<()> {
        self.profiles.delete(id).await
    }

    /// Apply a partial update given as a JSON object. Keys other than
    /// `name`, `javaPath`, `gameOptions` and `mods` are ignored.
    pub async fn update_profile(&self, id: &str, partial: Value) -> LauncherResult<Profile> {
        let update = ProfileUpdate::from_value(partial)?;
        self.profiles.update(id, update).await
    }

    pub async fn sync_active_profile(&self) -> LauncherResult<SyncReport> {
        self.sync.sync_active_profile(&self.config).await
    }

    // ─── Mods ───

    pub async fn list_mods(&self, profile_id: Option<&str>) -> LauncherResult<Vec<ModListing>> {
        self.mods.list_mods(profile_id).await
    }

    pub async fn toggle_mod(
        &self,
        profile_id: Option<&str>,
        file_name: &str,
        enabled: bool,
    ) -> LauncherResult<ModToggle> {
        self.mods.toggle_mod(profile_id, file_name, enabled).await
    }

    pub async fn uninstall_mod(&self, profile_id: Option<&str>, file_name: &str) -> LauncherResult<bool> {
        self.mods.uninstall_mod(profile_id, file_name).await
    }

    pub async fn install_mod(
        &self,
        profile_id: Option<&str>,
        url: &str,
        file_name: &str,
        info: Option<ModInstallInfo>,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> LauncherResult<ModEntry> {
        self.mods
            .install_mod(profile_id, url, file_name, info, on_progress)
            .await
    }

    // ─── Launch ───

    /// Resolve Java, make sure the game is installed and patched, reconcile
    /// mods for the chosen profile, then start the client detached.
    pub async fn launch(
        &self,
        request: &LaunchRequest,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> LauncherResult<LaunchResult> {
        if let Some(id) = request.profile_id.as_deref() {
            self.profiles.activate(id).await?;
        }
        let profile = self.profiles.get_active().await?;
        let options = profile
            .as_ref()
            .map(|p| p.game_options.clone())
            .unwrap_or_default();

        let stage = |start: f64, end: f64| {
            move |event: ProgressEvent| emit(on_progress, event.scaled(start, end))
        };

        let java_progress = stage(0.0, 20.0);
        let java = self
            .resolve_java(request.java_override.as_deref(), Some(&java_progress))
            .await?;

        let install_progress = stage(20.0, 70.0);
        self.ensure_installed(None, Some(&install_progress)).await?;

        let mut warnings = Vec::new();
        let patch_progress = stage(70.0, 85.0);
        let patched = self.patch_binaries(None, Some(&patch_progress)).await?;
        for (label, outcome) in [("client", patched.client), ("server", patched.server)] {
            match outcome {
                Some(Ok(report)) => warnings.extend(report.warning),
                Some(Err(e)) => {
                    warn!("Failed to patch {}: {}; launching anyway", label, e);
                    warnings.push(format!("{label} patch failed: {e}"));
                }
                None => {}
            }
        }

        emit(on_progress, ProgressEvent::message("Syncing mods...", Some(90.0)));
        self.sync_active_profile().await?;

        let uuid = launch::player_uuid(&self.config, &request.player_name, request.uuid.as_deref()).await?;

        let game_dir = self.installer.game_dir();
        let client = InstallLayout::find_client(&game_dir)
            .ok_or_else(|| LauncherError::GameNotInstalled(game_dir.clone()))?;

        emit(on_progress, ProgressEvent::message("Starting game...", Some(95.0)));
        let mut result = launch::launch(&LaunchContext {
            os: Os::current(),
            client: &client,
            game_dir: &game_dir,
            user_data_dir: &self.layout.user_data_dir(),
            logs_dir: &self.layout.logs_dir(),
            java: &java.path,
            jre_dir: self.java.bundled_dir(),
            uuid: &uuid,
            request,
            options: &options,
            fixups: self.fixups.as_ref(),
        })?;
        warnings.append(&mut result.warnings);
        result.warnings = warnings;

        emit(on_progress, ProgressEvent::message("Game started", Some(100.0)));
        Ok(result)
    }
}
