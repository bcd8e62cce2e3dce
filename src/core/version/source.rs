// ─── Version Info ───
// Latest release id, patch root and JRE manifest from the version endpoints.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use super::platform::{Arch, Os};
use crate::core::error::{LauncherError, LauncherResult};

pub const VERSION_ENDPOINT: &str = "https://updates.butterlauncher.tech/versions_new.json";
pub const JRE_ENDPOINT: &str = "https://launcher.hytale.com/version/release/jre.json";
pub const DEFAULT_PATCH_ROOT: &str = "https://game-patches.hytale.com/patches";
pub const DEFAULT_RELEASE_ID: u64 = 7;
pub const DEFAULT_CHANNEL: &str = "release";

const PATCH_EXTENSION: &str = ".pwr";

/// One platform's JRE archive.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JreDownload {
    pub url: String,
    pub sha256: String,
}

/// `download_url` maps os → arch → archive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JreManifest {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub download_url: HashMap<String, HashMap<String, JreDownload>>,
}

impl JreManifest {
    pub fn for_platform(&self, os: Os, arch: Arch) -> LauncherResult<&JreDownload> {
        let by_arch = self.download_url.get(os.as_str()).ok_or_else(|| {
            LauncherError::PlatformUnsupported(format!("no Java runtime for {os}"))
        })?;
        by_arch.get(arch.as_str()).ok_or_else(|| {
            LauncherError::PlatformUnsupported(format!("no Java runtime for {arch} on {os}"))
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionInfo {
    /// Number or string depending on the endpoint revision.
    #[serde(default)]
    pub latest_release_id: Option<Value>,
    #[serde(default, alias = "timestamp")]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub patch_root: Option<String>,
    #[serde(default)]
    pub jre: Option<JreManifest>,
}

impl VersionInfo {
    /// Latest patch file name, e.g. `7.pwr`.
    pub fn latest_version(&self) -> String {
        match &self.latest_release_id {
            Some(Value::Number(n)) => normalize_version(&n.to_string()),
            Some(Value::String(s)) if !s.trim().is_empty() => normalize_version(s),
            _ => normalize_version(&DEFAULT_RELEASE_ID.to_string()),
        }
    }

    pub fn patch_root(&self) -> &str {
        self.patch_root
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(DEFAULT_PATCH_ROOT)
    }

    /// Human-readable build label, `<date>_build_release-<id>`.
    pub fn display_name(&self) -> String {
        let id = self.latest_version();
        let id = id.trim_end_matches(PATCH_EXTENSION);
        match &self.last_updated {
            Some(date) => format!("{date}_build_release-{id}"),
            None => format!("build_release-{id}"),
        }
    }
}

/// `7` and `7.pwr` both name the artifact `7.pwr`.
pub fn normalize_version(version: &str) -> String {
    let version = version.trim();
    if version.ends_with(PATCH_EXTENSION) {
        version.to_string()
    } else {
        format!("{version}{PATCH_EXTENSION}")
    }
}

/// Which patch artifact to fetch for this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchTarget {
    pub platform: Os,
    pub arch: Arch,
    pub channel: String,
    pub file_name: String,
}

impl PatchTarget {
    pub fn detect(channel: Option<&str>, version: &str) -> Self {
        Self::new(Os::current(), Arch::current(), channel, version)
    }

    pub fn new(platform: Os, arch: Arch, channel: Option<&str>, version: &str) -> Self {
        Self {
            platform,
            arch,
            channel: channel
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(DEFAULT_CHANNEL)
                .to_string(),
            file_name: normalize_version(version),
        }
    }

    /// `<root>/<os>/<arch>/<channel>/0/<file>`; the `0` is the base build the
    /// patch applies on top of.
    pub fn url(&self, patch_root: &str) -> String {
        format!(
            "{}/{}/{}/{}/0/{}",
            patch_root.trim_end_matches('/'),
            self.platform,
            self.arch,
            self.channel,
            self.file_name
        )
    }
}

/// Where version information comes from. Swapped for a fixed value in tests.
#[async_trait]
pub trait VersionSource: Send + Sync {
    async fn version_info(&self) -> LauncherResult<VersionInfo>;

    async fn jre_manifest(&self) -> LauncherResult<JreManifest>;
}

pub struct HttpVersionSource {
    client: Client,
    version_url: String,
    jre_url: String,
}

impl HttpVersionSource {
    pub fn new(client: Client) -> Self {
        Self::with_urls(client, VERSION_ENDPOINT, JRE_ENDPOINT)
    }

    pub fn with_urls(client: Client, version_url: impl Into<String>, jre_url: impl Into<String>) -> Self {
        Self {
            client,
            version_url: version_url.into(),
            jre_url: jre_url.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> LauncherResult<T> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl VersionSource for HttpVersionSource {
    async fn version_info(&self) -> LauncherResult<VersionInfo> {
        let info: VersionInfo = self.get_json(&self.version_url).await?;
        info!(
            "Latest game version {} ({})",
            info.latest_version(),
            info.last_updated.as_deref().unwrap_or("unknown date")
        );
        Ok(info)
    }

    async fn jre_manifest(&self) -> LauncherResult<JreManifest> {
        // Prefer the manifest embedded in the version document when present.
        match self.version_info().await {
            Ok(VersionInfo { jre: Some(jre), .. }) if !jre.download_url.is_empty() => {
                return Ok(jre)
            }
            Ok(_) => {}
            Err(e) => warn!("Version endpoint unavailable, using JRE endpoint: {}", e),
        }
        self.get_json(&self.jre_url).await
    }
}

/// Fixed answers, for callers that already know the versions.
#[derive(Debug, Clone, Default)]
pub struct StaticVersionSource {
    pub info: VersionInfo,
    pub jre: JreManifest,
}

#[async_trait]
impl VersionSource for StaticVersionSource {
    async fn version_info(&self) -> LauncherResult<VersionInfo> {
        Ok(self.info.clone())
    }

    async fn jre_manifest(&self) -> LauncherResult<JreManifest> {
        Ok(self.jre.clone())
    }
}
