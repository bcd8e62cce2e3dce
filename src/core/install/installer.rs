use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument, warn};

use super::layout::{client_candidates, InstallLayout, LATEST};
use super::tool::{tool_download_urls, PatchTool, DEFAULT_TOOL_TIMEOUT};
use crate::core::archive;
use crate::core::downloader::progress::emit;
use crate::core::downloader::{report, Downloader, ProgressEvent, ProgressFn};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::version::{Arch, Os, PatchTarget, VersionInfo, VersionSource};

const INSTALL_METADATA_FILE: &str = "install.json";
const ARTIFACT_EXTENSION: &str = "pwr";
const DEFAULT_MIN_ARTIFACT_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_MIN_FREE_SPACE: u64 = 2 * 1024 * 1024 * 1024;

/// Written into the game directory after a successful install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallMetadata {
    pub version: String,
    pub installed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum InstallOutcome {
    AlreadyInstalled { client: PathBuf },
    Installed { version: String, client: PathBuf },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatus {
    pub installed: bool,
    pub game_dir: PathBuf,
    pub client_path: Option<PathBuf>,
    pub installed_version: Option<String>,
    pub latest_version: Option<String>,
    pub display_version: Option<String>,
    pub update_available: bool,
}

/// Brings `game/latest` to a target version by running the external patch
/// tool over a downloaded patch artifact.
pub struct PatchInstaller {
    layout: InstallLayout,
    downloader: Arc<Downloader>,
    versions: Arc<dyn VersionSource>,
    channel: Option<String>,
    tool_urls: Vec<String>,
    tool_timeout: Duration,
    min_artifact_size: u64,
    min_free_space: u64,
}

impl PatchInstaller {
    pub fn new(
        layout: InstallLayout,
        downloader: Arc<Downloader>,
        versions: Arc<dyn VersionSource>,
    ) -> Self {
        Self {
            layout,
            downloader,
            versions,
            channel: None,
            tool_urls: tool_download_urls(Os::current(), Arch::current()),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            min_artifact_size: DEFAULT_MIN_ARTIFACT_SIZE,
            min_free_space: DEFAULT_MIN_FREE_SPACE,
        }
    }

    pub fn with_channel(mut self, channel: Option<String>) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_tool_urls(mut self, urls: Vec<String>) -> Self {
        self.tool_urls = urls;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_min_artifact_size(mut self, bytes: u64) -> Self {
        self.min_artifact_size = bytes;
        self
    }

    pub fn with_min_free_space(mut self, bytes: u64) -> Self {
        self.min_free_space = bytes;
        self
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    pub fn game_dir(&self) -> PathBuf {
        self.layout.game_dir(LATEST)
    }

    /// No-op when a client executable is already present; otherwise fetch
    /// and apply the patch for `version` (latest when `None`).
    #[instrument(skip(self, on_progress))]
    pub async fn ensure_installed(
        &self,
        version: Option<&str>,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> LauncherResult<InstallOutcome> {
        self.install(version, true, on_progress).await
    }

    /// Wipe the game directory and install again.
    #[instrument(skip(self, on_progress))]
    pub async fn repair(
        &self,
        version: Option<&str>,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> LauncherResult<InstallOutcome> {
        report(on_progress, "Initializing repair...", Some(0.0));
        remove_dir_if_exists(&self.game_dir()).await?;
        self.install(version, false, on_progress).await
    }

    /// Remove the game directory. Returns whether anything was removed.
    pub async fn uninstall(&self) -> LauncherResult<bool> {
        let game_dir = self.game_dir();
        let removed = remove_dir_if_exists(&game_dir).await?;
        if removed {
            info!("Uninstalled game from {:?}", game_dir);
        }
        Ok(removed)
    }

    pub async fn game_status(&self) -> LauncherResult<GameStatus> {
        let game_dir = self.game_dir();
        let client_path = InstallLayout::find_client(&game_dir);
        let installed_version = read_metadata(&game_dir).await.map(|m| m.version);

        let info = match self.versions.version_info().await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Could not fetch latest version: {}", e);
                None
            }
        };
        let latest_version = info.as_ref().map(VersionInfo::latest_version);
        let update_available = match (&installed_version, &latest_version) {
            (None, _) => true,
            (Some(installed), Some(latest)) => installed != latest,
            (Some(_), None) => false,
        };

        Ok(GameStatus {
            installed: client_path.is_some(),
            game_dir,
            client_path,
            installed_version,
            display_version: info.as_ref().map(VersionInfo::display_name),
            latest_version,
            update_available,
        })
    }

    async fn install(
        &self,
        version: Option<&str>,
        skip_if_installed: bool,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> LauncherResult<InstallOutcome> {
        let game_dir = self.game_dir();
        let staging = self.layout.root().join("staging");

        if skip_if_installed {
            if let Some(client) = InstallLayout::find_client(&game_dir) {
                debug!("Client present at {:?}, skipping install", client);
                let _ = remove_dir_if_exists(&staging).await;
                report(on_progress, "Game already installed", Some(100.0));
                return Ok(InstallOutcome::AlreadyInstalled { client });
            }
        }

        report(on_progress, "Resolving game version...", Some(2.0));
        let info = match self.versions.version_info().await {
            Ok(info) => info,
            Err(e) if version.is_some() => {
                warn!("Version endpoint unavailable, using default patch root: {}", e);
                VersionInfo::default()
            }
            Err(e) => return Err(e),
        };
        let version = version
            .map(str::to_string)
            .unwrap_or_else(|| info.latest_version());
        let target = PatchTarget::detect(self.channel.as_deref(), &version);
        info!("Installing {} ({}/{}/{})", target.file_name, target.platform, target.arch, target.channel);

        let artifact = self.fetch_artifact(&target, &info, on_progress).await?;

        report(on_progress, "Preparing patch tool...", Some(60.0));
        let tool = PatchTool::ensure(&self.layout.tools_dir(), &self.downloader, &self.tool_urls, None)
            .await?
            .with_timeout(self.tool_timeout);

        remove_dir_if_exists(&staging).await?;
        for dir in [&staging, &game_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| LauncherError::io(dir, e))?;
        }

        report(on_progress, "Applying patch...", Some(65.0));
        let applied = tool.apply(&staging, &artifact, &game_dir).await;
        let _ = remove_dir_if_exists(&staging).await;
        applied?;

        report(on_progress, "Finalizing installation...", Some(90.0));
        for candidate in client_candidates(&game_dir, Os::current()) {
            if candidate.is_file() {
                if let Err(e) = archive::make_executable(&candidate) {
                    warn!("Could not mark {:?} executable: {}", candidate, e);
                }
            }
        }

        let client = InstallLayout::find_client(&game_dir)
            .ok_or_else(|| LauncherError::GameNotInstalled(game_dir.clone()))?;
        write_metadata(&game_dir, &target.file_name).await?;

        report(on_progress, "Installation complete!", Some(100.0));
        info!("Installed {} at {:?}", target.file_name, game_dir);
        Ok(InstallOutcome::Installed {
            version: target.file_name,
            client,
        })
    }

    /// Cached artifact if valid, else a fresh download into `cache/`.
    async fn fetch_artifact(
        &self,
        target: &PatchTarget,
        info: &VersionInfo,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> LauncherResult<PathBuf> {
        let cache_dir = self.layout.cache_dir();
        tokio::fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| LauncherError::io(&cache_dir, e))?;

        let file_name = format!("{}-{}-{}", target.channel, target.arch, target.file_name);
        let dest = cache_dir.join(&file_name);

        if dest.exists() {
            match validate_artifact(&dest, self.min_artifact_size).await {
                Ok(()) => {
                    report(on_progress, &format!("Using cached patch: {file_name}"), Some(60.0));
                    return Ok(dest);
                }
                Err(e) => {
                    warn!("Discarding cached artifact {:?}: {}", dest, e);
                    tokio::fs::remove_file(&dest)
                        .await
                        .map_err(|e| LauncherError::io(&dest, e))?;
                }
            }
        }

        ensure_free_space(&cache_dir, self.min_free_space)?;

        let url = target.url(info.patch_root());
        report(on_progress, &format!("Downloading patch: {}", target.file_name), Some(10.0));
        let forward = |event: ProgressEvent| emit(on_progress, event.scaled(10.0, 60.0));
        self.downloader.download_file(&url, &dest, Some(&forward)).await?;

        if let Err(e) = validate_artifact(&dest, self.min_artifact_size).await {
            let _ = tokio::fs::remove_file(&dest).await;
            return Err(e);
        }

        cleanup_cache(&cache_dir, &file_name).await;
        Ok(dest)
    }
}

/// Regular, readable and at least `min_size` bytes.
pub async fn validate_artifact(path: &Path, min_size: u64) -> LauncherResult<()> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| LauncherError::io(path, e))?;
    if !meta.is_file() {
        return Err(LauncherError::Other(format!("Patch artifact is not a file: {path:?}")));
    }
    if meta.len() < min_size {
        return Err(LauncherError::Other(format!(
            "Patch artifact suspiciously small: {} bytes",
            meta.len()
        )));
    }

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| LauncherError::io(path, e))?;
    let mut head = [0_u8; 1024];
    let want = head.len().min(meta.len() as usize);
    file.read_exact(&mut head[..want])
        .await
        .map_err(|e| LauncherError::io(path, e))?;
    Ok(())
}

/// Drop stale artifacts and leftover temp files, keeping `keep`.
async fn cleanup_cache(cache_dir: &Path, keep: &str) {
    let Ok(mut entries) = tokio::fs::read_dir(cache_dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        let stale_artifact = name.ends_with(&format!(".{ARTIFACT_EXTENSION}")) && name != keep;
        if stale_artifact || name.ends_with(".tmp") {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                debug!("Could not remove {:?}: {}", entry.path(), e);
            }
        }
    }
}

fn ensure_free_space(path: &Path, minimum_bytes: u64) -> LauncherResult<()> {
    if minimum_bytes == 0 {
        return Ok(());
    }
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let mut best_len = 0usize;
    let mut available = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if canonical.starts_with(mount) {
            let len = mount.as_os_str().len();
            if len >= best_len {
                best_len = len;
                available = Some(disk.available_space());
            }
        }
    }
    match available {
        Some(bytes) if bytes < minimum_bytes => Err(LauncherError::Other(format!(
            "Not enough disk space: available={bytes} required={minimum_bytes}"
        ))),
        _ => Ok(()),
    }
}

pub async fn read_metadata(game_dir: &Path) -> Option<InstallMetadata> {
    let raw = tokio::fs::read_to_string(game_dir.join(INSTALL_METADATA_FILE))
        .await
        .ok()?;
    serde_json::from_str(&raw).ok()
}

async fn write_metadata(game_dir: &Path, version: &str) -> LauncherResult<()> {
    let metadata = InstallMetadata {
        version: version.to_string(),
        installed_at: Utc::now(),
    };
    let path = game_dir.join(INSTALL_METADATA_FILE);
    tokio::fs::write(&path, serde_json::to_string_pretty(&metadata)?)
        .await
        .map_err(|e| LauncherError::io(&path, e))
}

async fn remove_dir_if_exists(path: &Path) -> LauncherResult<bool> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(LauncherError::io(path, e)),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::collections::HashMap;
    use std::os::unix::fs::PermissionsExt;

    use super::*;
    use crate::core::downloader::client::test_server::{client, serve, Route, TestServer};
    use crate::core::version::{StaticVersionSource, VersionInfo};

    const ARTIFACT: &[u8] = b"PWR-ARTIFACT-BYTES";

    fn fake_tool(tools_dir: &Path, body: &str) {
        std::fs::create_dir_all(tools_dir).unwrap();
        let path = tools_dir.join("butler");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// Tool stand-in that lays down every client candidate in the target dir.
    fn installing_tool(tools_dir: &Path) {
        fake_tool(
            tools_dir,
            "mkdir -p \"$5/Client\" && printf bin > \"$5/Client/HytaleClient\" && printf bin > \"$5/HytaleClient\"",
        );
    }

    async fn setup(root: &Path) -> (PatchInstaller, TestServer) {
        let target = PatchTarget::detect(None, "7");
        let path: &'static str = Box::leak(
            format!("/patches/{}/{}/release/0/7.pwr", target.platform, target.arch).into_boxed_str(),
        );
        let server = serve(HashMap::from([(path, Route::ok(ARTIFACT))])).await;

        let versions = StaticVersionSource {
            info: VersionInfo {
                latest_release_id: Some(serde_json::json!(7)),
                patch_root: Some(server.url("/patches")),
                ..VersionInfo::default()
            },
            ..StaticVersionSource::default()
        };
        let installer = PatchInstaller::new(
            InstallLayout::new(root),
            Arc::new(Downloader::with_client(client())),
            Arc::new(versions),
        )
        .with_tool_urls(Vec::new())
        .with_min_artifact_size(4)
        .with_min_free_space(0);
        (installer, server)
    }

    #[tokio::test]
    async fn installs_then_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let (installer, server) = setup(dir.path()).await;
        installing_tool(&installer.layout().tools_dir());

        let outcome = installer.ensure_installed(None, None).await.unwrap();
        assert!(matches!(outcome, InstallOutcome::Installed { ref version, .. } if version == "7.pwr"));
        assert_eq!(server.hits(), 1);
        assert!(!dir.path().join("staging").exists());

        let status = installer.game_status().await.unwrap();
        assert!(status.installed);
        assert_eq!(status.installed_version.as_deref(), Some("7.pwr"));
        assert!(!status.update_available);

        let again = installer.ensure_installed(None, None).await.unwrap();
        assert!(matches!(again, InstallOutcome::AlreadyInstalled { .. }));
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn repair_reuses_cached_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let (installer, server) = setup(dir.path()).await;
        installing_tool(&installer.layout().tools_dir());

        installer.ensure_installed(None, None).await.unwrap();
        std::fs::write(installer.game_dir().join("junk.txt"), b"x").unwrap();

        let outcome = installer.repair(None, None).await.unwrap();
        assert!(matches!(outcome, InstallOutcome::Installed { .. }));
        assert!(!installer.game_dir().join("junk.txt").exists());
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn tool_failure_surfaces_stderr_and_cleans_staging() {
        let dir = tempfile::tempdir().unwrap();
        let (installer, _server) = setup(dir.path()).await;
        fake_tool(&installer.layout().tools_dir(), "echo 'bad signature' >&2\nexit 1");

        let err = installer.ensure_installed(None, None).await.unwrap_err();
        match err {
            LauncherError::ToolFailed { stderr, .. } => assert_eq!(stderr, "bad signature"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.path().join("staging").exists());
    }

    #[tokio::test]
    async fn artifact_validation_reads_the_whole_head() {
        let dir = tempfile::tempdir().unwrap();
        let short = dir.path().join("short.pwr");
        std::fs::write(&short, b"0123456789").unwrap();
        assert!(validate_artifact(&short, 10).await.is_ok());
        assert!(validate_artifact(&short, 11).await.is_err());

        let long = dir.path().join("long.pwr");
        std::fs::write(&long, vec![7_u8; 4096]).unwrap();
        assert!(validate_artifact(&long, 1024).await.is_ok());

        assert!(validate_artifact(dir.path(), 0).await.is_err());
    }

    #[tokio::test]
    async fn undersized_artifact_is_rejected_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let (installer, _server) = setup(dir.path()).await;
        let installer = installer.with_min_artifact_size(1024);
        installing_tool(&installer.layout().tools_dir());

        assert!(installer.ensure_installed(None, None).await.is_err());
        let leftovers = std::fs::read_dir(installer.layout().cache_dir()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn uninstall_removes_game_dir() {
        let dir = tempfile::tempdir().unwrap();
        let (installer, _server) = setup(dir.path()).await;
        installing_tool(&installer.layout().tools_dir());

        installer.ensure_installed(None, None).await.unwrap();
        assert!(installer.uninstall().await.unwrap());
        assert!(!installer.game_dir().exists());
        assert!(!installer.uninstall().await.unwrap());

        let status = installer.game_status().await.unwrap();
        assert!(!status.installed);
        assert!(status.update_available);
    }

    #[tokio::test]
    async fn stale_cache_entries_are_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::write(cache.join("release-amd64-6.pwr"), b"old").unwrap();
        std::fs::write(cache.join("x.tmp"), b"partial").unwrap();
        std::fs::write(cache.join("jre.tar.gz"), b"keep").unwrap();

        cleanup_cache(&cache, "release-amd64-7.pwr").await;
        let mut names: Vec<_> = std::fs::read_dir(&cache)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["jre.tar.gz"]);
    }
}
