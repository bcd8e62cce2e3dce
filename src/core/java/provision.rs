use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::resolver::{bundled_java, bundled_java_candidates};
use crate::core::archive::{self, integrity};
use crate::core::downloader::progress::emit;
use crate::core::downloader::{report, DownloadTask, Downloader, ProgressEvent, ProgressFn};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::version::{Arch, JreManifest, Os};

/// Download, verify and unpack the platform JRE into `jre_dir`.
///
/// Returns the Java executable. A runtime already present in `jre_dir` is
/// returned as-is.
pub async fn provision_jre(
    downloader: &Downloader,
    manifest: &JreManifest,
    jre_dir: &Path,
    cache_dir: &Path,
    on_progress: Option<&ProgressFn<'_>>,
) -> LauncherResult<PathBuf> {
    if let Some(existing) = bundled_java(jre_dir) {
        info!("Java runtime already present at {:?}", existing);
        return Ok(existing);
    }

    let download = manifest.for_platform(Os::current(), Arch::current())?;
    let file_name = download
        .url
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("jre-archive")
        .to_string();
    let archive_path = cache_dir.join(&file_name);

    if archive_path.is_file() {
        // A stale or corrupt cached archive is deleted by the check and fetched again.
        if integrity::verify_sha256(&archive_path, &download.sha256).await.is_err() {
            warn!("Cached JRE archive {:?} failed verification", archive_path);
        }
    }
    if !archive_path.is_file() {
        report(on_progress, "Fetching Java runtime...", Some(0.0));
        let forward = |event: ProgressEvent| emit(on_progress, event.scaled(0.0, 60.0));
        let task = DownloadTask::new(&download.url, &archive_path).with_sha256(&download.sha256);
        downloader.download(&task, Some(&forward)).await?;
    }

    report(on_progress, "Unpacking Java runtime...", Some(70.0));
    match tokio::fs::remove_dir_all(jre_dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(LauncherError::io(jre_dir, e)),
    }
    archive::extract(&archive_path, jre_dir).await?;
    archive::flatten_single_dir(jre_dir)?;

    for candidate in bundled_java_candidates(jre_dir) {
        if candidate.is_file() {
            archive::make_executable(&candidate)?;
        }
    }

    let java = bundled_java(jre_dir).ok_or_else(|| {
        LauncherError::JavaNotFound(format!("archive {file_name} contained no java executable"))
    })?;

    if let Err(e) = tokio::fs::remove_file(&archive_path).await {
        warn!("Could not remove {:?}: {}", archive_path, e);
    }
    report(on_progress, "Java runtime ready", Some(100.0));
    info!("Java runtime installed at {:?}", java);
    Ok(java)
}
