use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::core::error::{LauncherError, LauncherResult};

/// Stream a file through SHA-256 and return the lowercase hex digest.
pub async fn sha256_file(path: &Path) -> LauncherResult<String> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || sha256_file_sync(&owned))
        .await
        .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))?
}

pub fn sha256_file_sync(path: &Path) -> LauncherResult<String> {
    let mut file = std::fs::File::open(path).map_err(|e| LauncherError::io(path, e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| LauncherError::io(path, e))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Verify `path` against `expected` (hex, case-insensitive).
///
/// On mismatch the file is deleted so the next attempt re-downloads it
/// instead of installing a corrupt artifact.
pub async fn verify_sha256(path: &Path, expected: &str) -> LauncherResult<()> {
    let actual = sha256_file(path).await?;
    if actual.eq_ignore_ascii_case(expected.trim()) {
        return Ok(());
    }

    warn!(
        "Checksum mismatch for {:?}: expected {}, got {}. Removing file.",
        path, expected, actual
    );
    if let Err(source) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove corrupt file {:?}: {}", path, source);
    }

    Err(LauncherError::ChecksumMismatch {
        path: PathBuf::from(path),
        expected: expected.to_string(),
        actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn matching_digest_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"abc").unwrap();

        // SHA-256("abc")
        let expected = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";
        verify_sha256(&path, expected).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn mismatch_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"abc").unwrap();

        let err = verify_sha256(&path, &"0".repeat(64)).await.unwrap_err();
        match err {
            LauncherError::ChecksumMismatch { actual, .. } => assert_eq!(
                actual,
                "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
            ),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!path.exists());
    }
}
