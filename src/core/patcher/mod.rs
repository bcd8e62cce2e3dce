//! Rewrites the authentication hostname baked into the game binaries.
//!
//! The native client is patched as a flat byte buffer. The server jar is
//! patched entry by entry and rewritten once. Both keep a `.original` backup
//! and a `.patched_custom` flag so repeated launches skip the work.

pub mod bytes;
pub mod record;

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, instrument, warn};
use zip::write::SimpleFileOptions;

use crate::core::archive;
use crate::core::downloader::{report, ProgressFn};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::install::InstallLayout;

pub use bytes::{effective_domain, FALLBACK_DOMAIN, ORIGINAL_DOMAIN};
pub use record::{is_patched_already, PatchRecord};

/// Jar entry types that can carry the hostname as text.
const TEXT_ENTRY_SUFFIXES: [&str; 5] = [".class", ".properties", ".json", ".xml", ".yml"];

/// Result of patching one binary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchReport {
    pub path: PathBuf,
    pub target_domain: String,
    pub already_patched: bool,
    pub occurrences: usize,
    pub warning: Option<String>,
}

impl PatchReport {
    pub fn changed(&self) -> bool {
        self.occurrences > 0
    }
}

/// Per-binary outcome of [`BinaryPatcher::patch_binaries`]. `None` means the
/// binary is not part of this installation.
#[derive(Debug, Serialize)]
pub struct PatchResults {
    pub client: Option<LauncherResult<PatchReport>>,
    pub server: Option<LauncherResult<PatchReport>>,
}

#[derive(Debug, Clone)]
pub struct BinaryPatcher {
    domain: String,
    domain_warning: Option<String>,
}

impl BinaryPatcher {
    /// Patcher writing `configured` (or the fallback domain when its length
    /// does not fit).
    pub fn new(configured: &str) -> Self {
        let (domain, domain_warning) = effective_domain(configured);
        Self {
            domain,
            domain_warning,
        }
    }

    pub fn target_domain(&self) -> &str {
        &self.domain
    }

    pub fn is_patched_already(&self, binary: &Path) -> bool {
        record::is_patched_already(binary, &self.domain)
    }

    fn report(&self, path: &Path, already_patched: bool, occurrences: usize) -> PatchReport {
        let warning = if !already_patched && occurrences == 0 {
            Some(format!(
                "No occurrences of {} found in {}",
                ORIGINAL_DOMAIN,
                path.display()
            ))
        } else {
            self.domain_warning.clone()
        };
        PatchReport {
            path: path.to_path_buf(),
            target_domain: self.domain.clone(),
            already_patched,
            occurrences,
            warning,
        }
    }

    /// Bytes to patch from. A binary flagged for another domain no longer
    /// holds the original hostname, so its backup is used instead.
    fn source_for(&self, binary: &Path) -> PathBuf {
        let backup = record::backup_path(binary);
        match record::read_record(binary) {
            Some(rec) if rec.target_domain != self.domain && backup.is_file() => backup,
            _ => binary.to_path_buf(),
        }
    }

    /// Patch a native client executable in place. Blocking.
    #[instrument(skip(self))]
    pub fn patch_client(&self, binary: &Path) -> LauncherResult<PatchReport> {
        if self.is_patched_already(binary) {
            info!("{:?} already patched for {}", binary, self.domain);
            return Ok(self.report(binary, true, 0));
        }

        let source = self.source_for(binary);
        let mut data = fs::read(&source).map_err(|e| LauncherError::io(&source, e))?;
        let count = bytes::patch_native(&mut data, &self.domain);
        if count == 0 {
            warn!("No occurrences of {} in {:?}", ORIGINAL_DOMAIN, binary);
            return Ok(self.report(binary, false, 0));
        }

        record::ensure_backup(binary)?;
        fs::write(binary, &data).map_err(|e| LauncherError::io(binary, e))?;
        archive::make_executable(binary)?;
        record::mark_patched(binary, &self.domain)?;
        info!("Patched {:?}: {} occurrences replaced", binary, count);
        Ok(self.report(binary, false, count))
    }

    /// Patch text entries of the server jar and rewrite it once. Blocking.
    #[instrument(skip(self))]
    pub fn patch_server(&self, jar: &Path) -> LauncherResult<PatchReport> {
        if self.is_patched_already(jar) {
            info!("{:?} already patched for {}", jar, self.domain);
            return Ok(self.report(jar, true, 0));
        }

        let mut tmp = jar.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let count = match self.rewrite_jar(&self.source_for(jar), &tmp) {
            Ok(count) => count,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };

        if count == 0 {
            let _ = fs::remove_file(&tmp);
            warn!("No occurrences of {} in {:?}", ORIGINAL_DOMAIN, jar);
            return Ok(self.report(jar, false, 0));
        }

        record::ensure_backup(jar)?;
        fs::rename(&tmp, jar).map_err(|e| LauncherError::io(jar, e))?;
        record::mark_patched(jar, &self.domain)?;
        info!("Patched {:?}: {} occurrences replaced", jar, count);
        Ok(self.report(jar, false, count))
    }

    fn rewrite_jar(&self, source: &Path, dest: &Path) -> LauncherResult<usize> {
        let input = fs::File::open(source).map_err(|e| LauncherError::io(source, e))?;
        let mut reader = zip::ZipArchive::new(input)?;
        let output = fs::File::create(dest).map_err(|e| LauncherError::io(dest, e))?;
        let mut writer = zip::ZipWriter::new(output);
        let needle = ORIGINAL_DOMAIN.as_bytes();

        let mut total = 0;
        for index in 0..reader.len() {
            let replaced = {
                let mut entry = reader.by_index(index)?;
                let name = entry.name().to_string();
                if entry.is_file() && TEXT_ENTRY_SUFFIXES.iter().any(|s| name.ends_with(s)) {
                    let mut data = Vec::with_capacity(entry.size() as usize);
                    entry
                        .read_to_end(&mut data)
                        .map_err(|e| LauncherError::io(source, e))?;
                    if bytes::find_all(&data, needle).is_empty() {
                        None
                    } else {
                        let count = bytes::replace_utf8(&mut data, ORIGINAL_DOMAIN, &self.domain);
                        let mut options =
                            SimpleFileOptions::default().compression_method(entry.compression());
                        if let Some(mode) = entry.unix_mode() {
                            options = options.unix_permissions(mode);
                        }
                        Some((name, options, data, count))
                    }
                } else {
                    None
                }
            };

            match replaced {
                Some((name, options, data, count)) => {
                    writer.start_file(name, options)?;
                    std::io::Write::write_all(&mut writer, &data)
                        .map_err(|e| LauncherError::io(dest, e))?;
                    total += count;
                }
                None => {
                    let entry = reader.by_index_raw(index)?;
                    writer.raw_copy_file(entry)?;
                }
            }
        }

        writer.finish()?;
        Ok(total)
    }

    pub fn restore_client(&self, binary: &Path) -> LauncherResult<bool> {
        let restored = record::restore(binary)?;
        if restored {
            archive::make_executable(binary)?;
        }
        Ok(restored)
    }

    pub fn restore_server(&self, jar: &Path) -> LauncherResult<bool> {
        record::restore(jar)
    }

    /// Patch the client and server found in `game_dir`.
    ///
    /// Each binary's failure is reported on its own; one failing does not
    /// stop the other.
    pub async fn patch_binaries(
        &self,
        game_dir: &Path,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> PatchResults {
        report(on_progress, "Patching client...", Some(0.0));
        let client = match InstallLayout::find_client(game_dir) {
            Some(path) => Some(self.blocking(move |p| p.patch_client(&path)).await),
            None => None,
        };

        report(on_progress, "Patching server...", Some(50.0));
        let server = match InstallLayout::find_server(game_dir) {
            Some(path) => Some(self.blocking(move |p| p.patch_server(&path)).await),
            None => None,
        };

        report(on_progress, "Binaries patched", Some(100.0));
        PatchResults { client, server }
    }

    async fn blocking<F>(&self, f: F) -> LauncherResult<PatchReport>
    where
        F: FnOnce(&BinaryPatcher) -> LauncherResult<PatchReport> + Send + 'static,
    {
        let patcher = self.clone();
        tokio::task::spawn_blocking(move || f(&patcher))
            .await
            .map_err(|e| LauncherError::Other(format!("patch task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::core::patcher::bytes::encode_utf16le;
    use crate::core::patcher::record::{backup_path, flag_path};

    fn client_bytes() -> Vec<u8> {
        let mut data = vec![0x7F, b'E', b'L', b'F'];
        data.extend_from_slice(b"https://hytale.com/auth\0");
        data.extend_from_slice(&encode_utf16le("sessions.hytale.com"));
        data.extend_from_slice(&[0, 0]);
        data
    }

    fn build_jar(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = zip::ZipWriter::new(fs::File::create(path).unwrap());
        for (name, body) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap();
    }

    fn read_entry(path: &Path, name: &str) -> Vec<u8> {
        let mut archive = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut out = Vec::new();
        entry.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn client_patch_is_idempotent_and_restorable() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("HytaleClient");
        let original = client_bytes();
        fs::write(&bin, &original).unwrap();
        let patcher = BinaryPatcher::new("sanasol.ws");

        let first = patcher.patch_client(&bin).unwrap();
        assert_eq!(first.occurrences, 2);
        assert!(!first.already_patched);
        assert!(first.warning.is_none());
        let patched = fs::read(&bin).unwrap();
        assert_eq!(patched.len(), original.len());
        assert!(bytes::find_all(&patched, b"sanasol.ws").len() == 1);
        assert!(patcher.is_patched_already(&bin));
        assert_eq!(fs::read(backup_path(&bin)).unwrap(), original);

        let before = fs::metadata(&bin).unwrap().modified().unwrap();
        let second = patcher.patch_client(&bin).unwrap();
        assert!(second.already_patched);
        assert_eq!(second.occurrences, 0);
        assert_eq!(fs::metadata(&bin).unwrap().modified().unwrap(), before);

        assert!(patcher.restore_client(&bin).unwrap());
        assert_eq!(fs::read(&bin).unwrap(), original);
        assert!(!patcher.is_patched_already(&bin));
    }

    #[test]
    fn client_without_domain_is_a_warning_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("HytaleClient");
        fs::write(&bin, b"nothing to see").unwrap();

        let report = BinaryPatcher::new("sanasol.ws").patch_client(&bin).unwrap();
        assert!(!report.changed());
        assert!(report.warning.unwrap().contains("No occurrences"));
        assert!(!flag_path(&bin).exists());
        assert!(!backup_path(&bin).exists());
    }

    #[test]
    fn switching_domain_patches_from_backup() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("HytaleClient");
        fs::write(&bin, client_bytes()).unwrap();

        BinaryPatcher::new("sanasol.ws").patch_client(&bin).unwrap();
        let report = BinaryPatcher::new("abcdef.xyz").patch_client(&bin).unwrap();

        assert_eq!(report.occurrences, 2);
        let data = fs::read(&bin).unwrap();
        assert!(bytes::find_all(&data, b"abcdef.xyz").len() == 1);
        assert!(bytes::find_all(&data, b"sanasol.ws").is_empty());
    }

    #[test]
    fn mismatched_domain_uses_fallback_and_warns() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("HytaleClient");
        fs::write(&bin, client_bytes()).unwrap();

        let patcher = BinaryPatcher::new("auth.example.org");
        let report = patcher.patch_client(&bin).unwrap();
        assert_eq!(patcher.target_domain(), FALLBACK_DOMAIN);
        assert_eq!(report.occurrences, 2);
        assert!(report.warning.unwrap().contains("auth.example.org"));
    }

    #[test]
    fn server_jar_patches_text_entries_only() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("HytaleServer.jar");
        build_jar(
            &jar,
            &[
                ("com/hypixel/Auth.class", b"\xCA\xFE\xBA\xBEhttps://hytale.com/x"),
                ("assets/logo.png", b"hytale.com"),
                ("config.json", b"{\"a\":1}"),
            ],
        );
        let patcher = BinaryPatcher::new("sanasol.ws");

        let report = patcher.patch_server(&jar).unwrap();
        assert_eq!(report.occurrences, 1);
        assert_eq!(
            read_entry(&jar, "com/hypixel/Auth.class"),
            b"\xCA\xFE\xBA\xBEhttps://sanasol.ws/x"
        );
        assert_eq!(read_entry(&jar, "assets/logo.png"), b"hytale.com");
        assert_eq!(read_entry(&jar, "config.json"), b"{\"a\":1}");
        assert!(!dir.path().join("HytaleServer.jar.tmp").exists());

        assert!(patcher.patch_server(&jar).unwrap().already_patched);

        assert!(patcher.restore_server(&jar).unwrap());
        assert_eq!(
            read_entry(&jar, "com/hypixel/Auth.class"),
            b"\xCA\xFE\xBA\xBEhttps://hytale.com/x"
        );
        assert!(!patcher.is_patched_already(&jar));
    }

    #[test]
    fn server_without_domain_leaves_jar_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("server.jar");
        build_jar(&jar, &[("A.class", b"plain")]);
        let before = fs::read(&jar).unwrap();

        let report = BinaryPatcher::new("sanasol.ws").patch_server(&jar).unwrap();
        assert!(!report.changed());
        assert_eq!(fs::read(&jar).unwrap(), before);
        assert!(!dir.path().join("server.jar.tmp").exists());
    }

    #[tokio::test]
    async fn patch_binaries_reports_each_binary() {
        let dir = tempfile::tempdir().unwrap();
        let game = dir.path();
        let server_dir = game.join("Server");
        fs::create_dir_all(&server_dir).unwrap();
        build_jar(&server_dir.join("HytaleServer.jar"), &[("A.class", b"hytale.com")]);

        let results = BinaryPatcher::new("sanasol.ws")
            .patch_binaries(game, None)
            .await;
        assert!(results.client.is_none());
        assert_eq!(results.server.unwrap().unwrap().occurrences, 1);
    }
}
