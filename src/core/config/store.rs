use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::profile::Profile;

pub const APP_DIR_NAME: &str = "LuyumiLauncher";
pub const CONFIG_FILE: &str = "config.json";

pub const AUTH_DOMAIN_ENV: &str = "HYTALE_AUTH_DOMAIN";
pub const DEFAULT_AUTH_DOMAIN: &str = "sanasol.ws";

/// The whole `config.json` document.
///
/// Keys this crate does not know about are kept in `extra` and written back
/// untouched, so other tools sharing the file do not lose their settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LauncherConfig {
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_profile_id: Option<String>,

    /// Pre-profile global mod list, consumed once by legacy migration.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub installed_mods: Vec<Value>,
    /// Pre-profile global Java path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub java_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_domain: Option<String>,
    #[serde(default, alias = "client_uuid", skip_serializing_if = "Option::is_none")]
    pub client_uuid: Option<String>,
    #[serde(default)]
    pub player_uuids: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LauncherConfig {
    /// Domain the binaries should be redirected to.
    pub fn auth_domain(&self) -> String {
        resolve_auth_domain(
            self.auth_domain.as_deref(),
            std::env::var(AUTH_DOMAIN_ENV).ok().as_deref(),
        )
    }

    pub fn active_profile(&self) -> Option<&Profile> {
        self.active_profile_id
            .as_deref()
            .and_then(|id| self.profiles.get(id))
    }

    /// Relocated install root, if `installPath` is set to something non-blank.
    pub fn install_root_override(&self) -> Option<PathBuf> {
        self.install_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| PathBuf::from(p).join(APP_DIR_NAME))
    }
}

/// Config value first, then the environment, then the built-in default.
pub fn resolve_auth_domain(configured: Option<&str>, env: Option<&str>) -> String {
    [configured, env]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|d| !d.is_empty())
        .unwrap_or(DEFAULT_AUTH_DOMAIN)
        .to_string()
}

/// `<data dir>/LuyumiLauncher`.
pub fn default_app_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Whole-document access to `config.json`.
///
/// Every write re-reads the file, applies the change and writes it back via a
/// temp file. There is no cross-process locking.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for `<dir>/config.json`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CONFIG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document. A missing file yields the default config.
    pub async fn load(&self) -> LauncherResult<LauncherConfig> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {:?}, using defaults", self.path);
                return Ok(LauncherConfig::default());
            }
            Err(e) => return Err(LauncherError::io(&self.path, e)),
        };

        if raw.trim().is_empty() {
            return Ok(LauncherConfig::default());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    pub async fn save(&self, config: &LauncherConfig) -> LauncherResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LauncherError::io(parent, e))?;
        }

        let json = serde_json::to_string_pretty(config)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| LauncherError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| LauncherError::io(&self.path, e))?;
        Ok(())
    }

    /// Load, mutate, save. Nothing is written if `f` fails.
    pub async fn update<T, F>(&self, f: F) -> LauncherResult<T>
    where
        F: FnOnce(&mut LauncherConfig) -> LauncherResult<T>,
    {
        let mut config = self.load().await?;
        let out = f(&mut config)?;
        self.save(&config).await?;
        Ok(out)
    }

    pub async fn auth_domain(&self) -> LauncherResult<String> {
        Ok(self.load().await?.auth_domain())
    }

    /// Persistent id for this installation, created on first use.
    pub async fn client_uuid(&self) -> LauncherResult<String> {
        if let Some(existing) = self.load().await?.client_uuid {
            return Ok(existing);
        }
        self.update(|config| {
            let id = config
                .client_uuid
                .get_or_insert_with(|| Uuid::new_v4().to_string())
                .clone();
            Ok(id)
        })
        .await
        .inspect(|id| info!("Generated client UUID {}", id))
    }
}
