use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the entire launcher core.
/// Every module returns `Result<T, LauncherError>`.
#[derive(Debug, Error)]
pub enum LauncherError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    #[error("Download stalled for {url}: no data received in {seconds}s")]
    Stalled { url: String, seconds: u64 },

    #[error("Too many redirects while fetching {url}")]
    TooManyRedirects { url: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    // ── Integrity ───────────────────────────────────────
    #[error("SHA-256 mismatch for {path:?}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Archive entry escapes destination: {0}")]
    UnsafeArchivePath(String),

    #[error("Archive type not supported: {0:?}")]
    UnsupportedArchive(PathBuf),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Patch tool ──────────────────────────────────────
    #[error("Patch tool not found at {0:?}")]
    ToolNotFound(PathBuf),

    #[error("Patch tool exited with code {code:?}: {stderr}")]
    ToolFailed { code: Option<i32>, stderr: String },

    #[error("Patch tool timed out after {0}s")]
    ToolTimeout(u64),

    // ── Configuration ───────────────────────────────────
    #[error("Configured Java not found: {0}")]
    ConfiguredJavaNotFound(String),

    #[error("No Java runtime available: {0}")]
    JavaNotFound(String),

    #[error("Platform not supported: {0}")]
    PlatformUnsupported(String),

    // ── State ───────────────────────────────────────────
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Cannot delete the active profile: {0}")]
    CannotDeleteActiveProfile(String),

    #[error("Cannot delete the only remaining profile: {0}")]
    CannotDeleteLastProfile(String),

    #[error("Mod not found: {0}")]
    ModNotFound(String),

    #[error("Game is not installed in {0:?}")]
    GameNotInstalled(PathBuf),

    // ── Platform fixups ─────────────────────────────────
    #[error("Permission error: {0}")]
    Permission(String),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type LauncherResult<T> = Result<T, LauncherError>;

impl LauncherError {
    /// Shorthand for wrapping an IO error with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LauncherError::Io {
            path: path.into(),
            source,
        }
    }

    /// Transient network conditions the download engine retries locally:
    /// connection reset/refused, DNS not-found, timeouts and stalls.
    pub fn is_retryable(&self) -> bool {
        match self {
            LauncherError::Stalled { .. } => true,
            LauncherError::Http(err) => {
                err.is_connect() || err.is_timeout() || err.is_body() || err.is_request()
            }
            LauncherError::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

impl From<std::io::Error> for LauncherError {
    fn from(source: std::io::Error) -> Self {
        LauncherError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

// ── Serialization for the IPC layer ─────────────────────
// Route handlers forward errors as a single human-readable message.
impl serde::Serialize for LauncherError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
