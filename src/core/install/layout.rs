use std::path::{Path, PathBuf};

use crate::core::version::Os;

/// Directory name used for the one game copy and JRE the launcher manages.
pub const LATEST: &str = "latest";

/// On-disk layout of one installation.
///
/// ```text
/// <root>/
///   cache/              patch artifacts, JRE archives
///   tools/              external patch tool
///   game/<version>/     game files
///   jre/<version>/      bundled Java runtime
///   UserData/Mods/      enabled mods
///   UserData/DisabledMods/
///   logs/               game session logs
/// ```
#[derive(Debug, Clone)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.root.join("tools")
    }

    pub fn game_dir(&self, version: &str) -> PathBuf {
        self.root.join("game").join(version)
    }

    pub fn jre_dir(&self, version: &str) -> PathBuf {
        self.root.join("jre").join(version)
    }

    pub fn user_data_dir(&self) -> PathBuf {
        self.root.join("UserData")
    }

    pub fn mods_dir(&self) -> PathBuf {
        self.user_data_dir().join("Mods")
    }

    pub fn disabled_mods_dir(&self) -> PathBuf {
        self.user_data_dir().join("DisabledMods")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// First existing client executable under `game_dir`.
    pub fn find_client(game_dir: &Path) -> Option<PathBuf> {
        client_candidates(game_dir, Os::current())
            .into_iter()
            .find(|p| p.is_file())
    }

    /// First existing server jar under `game_dir`.
    pub fn find_server(game_dir: &Path) -> Option<PathBuf> {
        server_candidates(game_dir).into_iter().find(|p| p.is_file())
    }
}

/// Where the client executable can live, in lookup order.
pub fn client_candidates(game_dir: &Path, os: Os) -> Vec<PathBuf> {
    let client = game_dir.join("Client");
    match os {
        Os::Windows => vec![
            client.join("HytaleClient.exe"),
            game_dir.join("HytaleClient.exe"),
            client.join("Hytale.exe"),
        ],
        Os::MacOs => vec![
            client
                .join("Hytale.app")
                .join("Contents")
                .join("MacOS")
                .join("HytaleClient"),
            client.join("HytaleClient"),
        ],
        Os::Linux => vec![client.join("HytaleClient"), game_dir.join("HytaleClient")],
    }
}

pub fn server_candidates(game_dir: &Path) -> Vec<PathBuf> {
    let server = game_dir.join("Server");
    vec![server.join("HytaleServer.jar"), server.join("server.jar")]
}

/// The `.app` bundle containing a macOS client executable, if any.
pub fn app_bundle_of(client: &Path) -> Option<PathBuf> {
    client
        .ancestors()
        .find(|p| p.extension().map(|e| e == "app").unwrap_or(false))
        .map(Path::to_path_buf)
}
