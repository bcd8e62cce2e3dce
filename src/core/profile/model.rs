use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Id given to the profile created by legacy migration.
pub const DEFAULT_PROFILE_ID: &str = "default";
pub const DEFAULT_PROFILE_NAME: &str = "Default";

fn default_true() -> bool {
    true
}

/// Memory and JVM flags forwarded to the game through `_JAVA_OPTIONS`,
/// plus the window settings written into `Settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOptions {
    #[serde(default = "GameOptions::default_min_memory")]
    pub min_memory: String,
    #[serde(default = "GameOptions::default_max_memory")]
    pub max_memory: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fullscreen: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl GameOptions {
    fn default_min_memory() -> String {
        "1G".to_string()
    }

    fn default_max_memory() -> String {
        "4G".to_string()
    }
}

impl Default for GameOptions {
    fn default() -> Self {
        Self {
            min_memory: Self::default_min_memory(),
            max_memory: Self::default_max_memory(),
            args: Vec::new(),
            fullscreen: None,
            width: None,
            height: None,
        }
    }
}

/// Identifiers of the catalogue a mod was downloaded from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModSourceIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curse_forge_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curse_forge_file_id: Option<i64>,
}

/// A mod declared by a profile. `enabled` is the intent; where the file
/// physically sits is derived from it by the synchronizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModEntry {
    pub id: String,
    pub file_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub date_installed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ids: Option<ModSourceIds>,
}

impl ModEntry {
    pub fn new(id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            name: String::new(),
            version: None,
            author: None,
            description: None,
            enabled: true,
            file_size: 0,
            date_installed: None,
            source_ids: None,
        }
    }
}

/// A named, isolated set of mods and launch settings. Persisted inside
/// `config.json` under `profiles.<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mods: Vec<ModEntry>,
    /// Empty string means "no override".
    #[serde(default)]
    pub java_path: String,
    #[serde(default)]
    pub game_options: GameOptions,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), name)
    }

    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created: Utc::now(),
            last_used: None,
            mods: Vec::new(),
            java_path: String::new(),
            game_options: GameOptions::default(),
        }
    }

    /// The profile's Java override, if one is set.
    pub fn java_override(&self) -> Option<&str> {
        let trimmed = self.java_path.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    pub fn find_mod(&self, file_name: &str) -> Option<&ModEntry> {
        self.mods.iter().find(|m| m.file_name == file_name)
    }
}

/// Partial update accepted by `ProfileStore::update`.
///
/// Only these four fields can be changed; any other key in the incoming
/// document is dropped during deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub java_path: Option<String>,
    pub game_options: Option<GameOptions>,
    pub mods: Option<Vec<ModEntry>>,
}

impl ProfileUpdate {
    /// Build an update from an arbitrary JSON object, ignoring unknown keys.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.java_path.is_none()
            && self.game_options.is_none()
            && self.mods.is_none()
    }

    pub fn apply(self, profile: &mut Profile) {
        if let Some(name) = self.name {
            profile.name = name;
        }
        if let Some(java_path) = self.java_path {
            profile.java_path = java_path;
        }
        if let Some(game_options) = self.game_options {
            profile.game_options = game_options;
        }
        if let Some(mods) = self.mods {
            profile.mods = mods;
        }
    }
}

/// Loosely-typed view of a legacy `installedMods` array; entries that do not
/// carry a file name are skipped during migration.
pub(crate) fn legacy_mods(raw: &[Value]) -> Vec<ModEntry> {
    raw.iter()
        .filter_map(|value| serde_json::from_value::<ModEntry>(value.clone()).ok())
        .collect()
}
