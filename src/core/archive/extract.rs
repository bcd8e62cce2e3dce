use std::fs;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{debug, info};

use crate::core::error::{LauncherError, LauncherResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// Dispatch on file extension.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else {
            None
        }
    }
}

/// Extract `archive` into `dest` on a blocking worker.
pub async fn extract(archive: &Path, dest: &Path) -> LauncherResult<()> {
    let kind = ArchiveKind::detect(archive)
        .ok_or_else(|| LauncherError::UnsupportedArchive(archive.to_path_buf()))?;
    extract_as(archive, dest, kind).await
}

/// Extract with an explicit format, for artifacts whose names carry no extension.
pub async fn extract_as(archive: &Path, dest: &Path, kind: ArchiveKind) -> LauncherResult<()> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_sync(&archive, &dest, kind))
        .await
        .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))?
}

pub fn extract_sync(archive: &Path, dest: &Path, kind: ArchiveKind) -> LauncherResult<()> {
    fs::create_dir_all(dest).map_err(|e| LauncherError::io(dest, e))?;
    info!("Extracting {:?} ({:?}) -> {:?}", archive, kind, dest);
    match kind {
        ArchiveKind::Zip => extract_zip(archive, dest),
        ArchiveKind::TarGz => extract_tar_gz(archive, dest),
    }
}

/// Resolve an archive entry name under `dest`.
///
/// Rejects absolute paths, drive prefixes and any `..` component; returns
/// `None` for names that resolve to `dest` itself.
pub fn safe_join(dest: &Path, entry_name: &str) -> LauncherResult<Option<PathBuf>> {
    let normalized = entry_name.replace('\\', "/");
    let mut relative = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(LauncherError::UnsafeArchivePath(entry_name.to_string()));
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Ok(None);
    }
    Ok(Some(dest.join(relative)))
}

fn extract_zip(archive_path: &Path, dest: &Path) -> LauncherResult<()> {
    let file = fs::File::open(archive_path).map_err(|e| LauncherError::io(archive_path, e))?;
    let mut archive = zip::ZipArchive::new(file)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(out_path) = safe_join(dest, entry.name())? else {
            continue;
        };

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| LauncherError::io(&out_path, e))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| LauncherError::io(parent, e))?;
        }

        {
            let mut out = fs::File::create(&out_path).map_err(|e| LauncherError::io(&out_path, e))?;
            std::io::copy(&mut entry, &mut out).map_err(|e| LauncherError::io(&out_path, e))?;
        }

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777))
                .map_err(|e| LauncherError::io(&out_path, e))?;
        }
    }

    Ok(())
}

fn extract_tar_gz(archive_path: &Path, dest: &Path) -> LauncherResult<()> {
    let file = fs::File::open(archive_path).map_err(|e| LauncherError::io(archive_path, e))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let real_dest = dest.canonicalize().map_err(|e| LauncherError::io(dest, e))?;

    let entries = archive
        .entries()
        .map_err(|e| LauncherError::io(archive_path, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| LauncherError::io(archive_path, e))?;
        let raw_name = entry
            .path()
            .map_err(|e| LauncherError::io(archive_path, e))?
            .to_string_lossy()
            .to_string();
        let Some(out_path) = safe_join(dest, &raw_name)? else {
            continue;
        };
        let parent = create_parent_inside(&real_dest, dest, &out_path)?;

        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            let target = entry
                .link_name()
                .map_err(|e| LauncherError::io(archive_path, e))?
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();
            let base = if entry_type.is_hard_link() {
                &real_dest
            } else {
                &parent
            };
            ensure_link_inside(&real_dest, base, &target)?;
        }

        let unpacked = entry
            .unpack_in(&real_dest)
            .map_err(|e| LauncherError::io(&out_path, e))?;
        if !unpacked {
            return Err(LauncherError::UnsafeArchivePath(raw_name));
        }
    }

    Ok(())
}

/// Create the parent directories of `out_path` one level at a time, checking
/// after each step that links already on disk have not led outside
/// `real_dest`. Returns the resolved parent.
fn create_parent_inside(real_dest: &Path, dest: &Path, out_path: &Path) -> LauncherResult<PathBuf> {
    let relative = out_path
        .parent()
        .and_then(|p| p.strip_prefix(dest).ok())
        .unwrap_or_else(|| Path::new(""));

    let mut current = real_dest.to_path_buf();
    for component in relative.components() {
        let next = current.join(component);
        if fs::symlink_metadata(&next).is_err() {
            fs::create_dir(&next).map_err(|e| LauncherError::io(&next, e))?;
        }
        current = next
            .canonicalize()
            .map_err(|_| LauncherError::UnsafeArchivePath(out_path.display().to_string()))?;
        if !current.starts_with(real_dest) {
            return Err(LauncherError::UnsafeArchivePath(out_path.display().to_string()));
        }
    }
    Ok(current)
}

/// Walk a link target from `base`, resolving anything already on disk, and
/// fail as soon as it leaves `real_dest`. Symlinks resolve from their own
/// directory, hard links from the archive root.
fn ensure_link_inside(real_dest: &Path, base: &Path, target: &str) -> LauncherResult<()> {
    let escape = || LauncherError::UnsafeArchivePath(target.to_string());

    let mut resolved = base.to_path_buf();
    for component in Path::new(target).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                if fs::symlink_metadata(&resolved).is_ok() {
                    resolved = resolved.canonicalize().map_err(|_| escape())?;
                }
            }
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::RootDir | Component::Prefix(_) => return Err(escape()),
        }
        if !resolved.starts_with(real_dest) {
            return Err(escape());
        }
    }
    Ok(())
}

/// Hoist the contents of a lone wrapper directory into `dir`.
///
/// Returns whether anything was flattened.
pub fn flatten_single_dir(dir: &Path) -> LauncherResult<bool> {
    let entries = fs::read_dir(dir)
        .map_err(|e| LauncherError::io(dir, e))?
        .filter_map(Result::ok)
        .collect::<Vec<_>>();
    if entries.len() != 1 {
        return Ok(false);
    }

    let wrapper = entries[0].path();
    let is_real_dir = entries[0]
        .file_type()
        .map(|t| t.is_dir())
        .unwrap_or(false);
    if !is_real_dir {
        return Ok(false);
    }

    // Move the wrapper aside first so a child sharing its name can take its place.
    let staging = dir.join(format!(".flatten-{}", uuid::Uuid::new_v4()));
    fs::rename(&wrapper, &staging).map_err(|e| LauncherError::io(&wrapper, e))?;

    for child in fs::read_dir(&staging).map_err(|e| LauncherError::io(&staging, e))? {
        let child = child.map_err(|e| LauncherError::io(&staging, e))?;
        let target = dir.join(child.file_name());
        fs::rename(child.path(), &target).map_err(|e| LauncherError::io(&target, e))?;
    }
    fs::remove_dir(&staging).map_err(|e| LauncherError::io(&staging, e))?;

    debug!("Flattened wrapper {:?} into {:?}", wrapper, dir);
    Ok(true)
}

/// Add the executable bits to `path` (no-op on Windows).
pub fn make_executable(path: &Path) -> LauncherResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)
            .map_err(|e| LauncherError::io(path, e))?
            .permissions();
        perms.set_mode(perms.mode() | 0o111);
        fs::set_permissions(path, perms).map_err(|e| LauncherError::io(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
