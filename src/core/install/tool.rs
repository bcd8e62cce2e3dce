// ─── Patch tool ───
// Provisioning and invocation of the external patch-application binary.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::core::archive::{self, ArchiveKind};
use crate::core::downloader::{report, Downloader, ProgressFn};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::version::{Arch, Os};

/// Default bound on a single patch application.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(600);

const TOOL_MIRRORS: [&str; 3] = [
    "https://broth.itch.zone/butler",
    "https://dl.itch.ovh/butler",
    "https://storage.googleapis.com/broth/butler",
];

const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";

pub fn tool_binary_name(os: Os) -> &'static str {
    match os {
        Os::Windows => "butler.exe",
        _ => "butler",
    }
}

/// Candidate archive URLs, tried in order. ARM builds are listed first and
/// fall back to the x86 build (run under emulation) where one exists.
pub fn tool_download_urls(os: Os, arch: Arch) -> Vec<String> {
    let channels: Vec<&str> = match (os, arch) {
        (Os::Windows, _) => vec!["windows-amd64"],
        (Os::MacOs, Arch::Arm64) => vec!["darwin-arm64", "darwin-amd64"],
        (Os::MacOs, Arch::Amd64) => vec!["darwin-amd64"],
        (Os::Linux, Arch::Arm64) => vec!["linux-arm64", "linux-amd64"],
        (Os::Linux, Arch::Amd64) => vec!["linux-amd64"],
    };

    channels
        .into_iter()
        .flat_map(|channel| {
            TOOL_MIRRORS
                .iter()
                .map(move |mirror| format!("{mirror}/{channel}/LATEST/archive/default"))
        })
        .collect()
}

/// A provisioned patch tool ready to run.
#[derive(Debug, Clone)]
pub struct PatchTool {
    path: PathBuf,
    timeout: Duration,
}

impl PatchTool {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the tool in `tools_dir`, downloading it first if absent.
    pub async fn ensure(
        tools_dir: &Path,
        downloader: &Downloader,
        urls: &[String],
        on_progress: Option<&ProgressFn<'_>>,
    ) -> LauncherResult<Self> {
        let binary = tools_dir.join(tool_binary_name(Os::current()));
        if is_non_empty_file(&binary).await {
            return Ok(Self::new(binary));
        }

        tokio::fs::create_dir_all(tools_dir)
            .await
            .map_err(|e| LauncherError::io(tools_dir, e))?;
        let _ = tokio::fs::remove_file(&binary).await;

        let archive_path = tools_dir.join("butler.zip");
        let mut last_error = None;
        for url in urls {
            report(on_progress, "Downloading patch tool...", None);
            match fetch_zip(downloader, url, &archive_path, on_progress).await {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    warn!("Patch tool download from {} failed: {}", url, e);
                    let _ = tokio::fs::remove_file(&archive_path).await;
                    last_error = Some(e);
                }
            }
        }
        if let Some(e) = last_error {
            return Err(e);
        }
        if !archive_path.is_file() {
            return Err(LauncherError::ToolNotFound(binary));
        }

        let extracted = archive::extract_as(&archive_path, tools_dir, ArchiveKind::Zip).await;
        let _ = tokio::fs::remove_file(&archive_path).await;
        extracted?;

        if !binary.is_file() {
            let name = tool_binary_name(Os::current());
            let nested = find_file(tools_dir, name).ok_or_else(|| LauncherError::ToolNotFound(binary.clone()))?;
            tokio::fs::rename(&nested, &binary)
                .await
                .map_err(|e| LauncherError::io(&nested, e))?;
            debug!("Hoisted patch tool from {:?}", nested);
        }

        archive::make_executable(&binary)?;
        info!("Patch tool ready at {:?}", binary);
        Ok(Self::new(binary))
    }

    /// `apply --staging-dir <staging> <artifact> <target>`.
    ///
    /// A non-zero exit surfaces the tool's stderr (or stdout if stderr is
    /// empty) as the error detail.
    pub async fn apply(&self, staging: &Path, artifact: &Path, target: &Path) -> LauncherResult<()> {
        if !self.path.is_file() {
            return Err(LauncherError::ToolNotFound(self.path.clone()));
        }

        let mut cmd = Command::new(&self.path);
        cmd.arg("apply")
            .arg("--staging-dir")
            .arg(staging)
            .arg(artifact)
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        configure_tool_spawn(&mut cmd);

        info!("Applying {:?} to {:?}", artifact, target);
        let child = cmd.spawn().map_err(|e| LauncherError::io(&self.path, e))?;
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| LauncherError::io(&self.path, e))?,
            Err(_) => return Err(LauncherError::ToolTimeout(self.timeout.as_secs())),
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let detail = [stderr, stdout]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or_else(|| "Unknown patch tool error".to_string());
        Err(LauncherError::ToolFailed {
            code: output.status.code(),
            stderr: detail,
        })
    }
}

async fn fetch_zip(
    downloader: &Downloader,
    url: &str,
    dest: &Path,
    on_progress: Option<&ProgressFn<'_>>,
) -> LauncherResult<()> {
    downloader.download_file(url, dest, on_progress).await?;

    let mut magic = [0_u8; 4];
    let mut file = tokio::fs::File::open(dest)
        .await
        .map_err(|e| LauncherError::io(dest, e))?;
    let read = file.read(&mut magic).await.map_err(|e| LauncherError::io(dest, e))?;
    if read < magic.len() || magic != ZIP_MAGIC {
        return Err(LauncherError::UnsupportedArchive(dest.to_path_buf()));
    }
    Ok(())
}

async fn is_non_empty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

fn find_file(root: &Path, name: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(root).ok()?;
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_file() && path.file_name().map(|n| n == name).unwrap_or(false) {
            return Some(path);
        }
        if file_type.is_dir() {
            if let Some(found) = find_file(&path, name) {
                return Some(found);
            }
        }
    }
    None
}

fn configure_tool_spawn(cmd: &mut Command) {
    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(not(target_os = "windows"))]
    let _ = cmd;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_urls_fall_back_to_x86() {
        let urls = tool_download_urls(Os::MacOs, Arch::Arm64);
        assert_eq!(urls.len(), 6);
        assert!(urls[0].contains("darwin-arm64"));
        assert!(urls[5].contains("darwin-amd64"));
        assert!(urls[0].starts_with("https://broth.itch.zone/butler/"));

        let win = tool_download_urls(Os::Windows, Arch::Arm64);
        assert_eq!(win.len(), 3);
        assert!(win.iter().all(|u| u.contains("windows-amd64")));
    }

    #[test]
    fn nested_binary_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("butler"), b"x").unwrap();
        assert_eq!(find_file(dir.path(), "butler"), Some(nested.join("butler")));
        assert_eq!(find_file(dir.path(), "missing"), None);
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PatchTool {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-tool.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        PatchTool::new(path)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn apply_passes_arguments_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(dir.path(), "echo \"$@\" > \"$5/args.txt\"");
        let target = dir.path().join("target");
        std::fs::create_dir_all(&target).unwrap();

        tool.apply(Path::new("/stage"), Path::new("/a/7.pwr"), &target)
            .await
            .unwrap();
        let args = std::fs::read_to_string(target.join("args.txt")).unwrap();
        assert_eq!(args.trim(), format!("apply --staging-dir /stage /a/7.pwr {}", target.display()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn apply_failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(dir.path(), "echo 'corrupt patch' >&2\nexit 3");
        let err = tool
            .apply(dir.path(), dir.path(), dir.path())
            .await
            .unwrap_err();
        match err {
            LauncherError::ToolFailed { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "corrupt patch");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn apply_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(dir.path(), "sleep 5").with_timeout(Duration::from_millis(200));
        let err = tool.apply(dir.path(), dir.path(), dir.path()).await.unwrap_err();
        assert!(matches!(err, LauncherError::ToolTimeout(_)));
    }

    #[tokio::test]
    async fn missing_tool_is_reported() {
        let tool = PatchTool::new("/nonexistent/butler");
        let err = tool
            .apply(Path::new("/s"), Path::new("/a"), Path::new("/t"))
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::ToolNotFound(_)));
    }
}
