use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use super::probe::probe_java;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::version::Os;

const MAC_JAVA_HOME_HELPER: &str = "/usr/libexec/java_home";

pub fn java_exe() -> &'static str {
    if cfg!(windows) {
        "java.exe"
    } else {
        "java"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JavaSource {
    Override,
    Configured,
    Bundled,
    JavaHome,
    MacJavaHome,
    Path,
}

/// One place a Java executable could come from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaCandidate {
    pub label: String,
    pub source: JavaSource,
    pub path: PathBuf,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl JavaCandidate {
    fn found(source: JavaSource, label: &str, path: PathBuf) -> Self {
        Self {
            label: label.to_string(),
            source,
            exists: path.is_file(),
            path,
            note: None,
        }
    }
}

/// Snapshot of the environment the system lookup reads.
#[derive(Debug, Clone, Default)]
pub struct SystemJava {
    pub java_home: Option<PathBuf>,
    pub path_var: Option<OsString>,
    pub use_mac_helper: bool,
}

impl SystemJava {
    pub fn from_env() -> Self {
        Self {
            java_home: std::env::var_os("JAVA_HOME")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            path_var: std::env::var_os("PATH"),
            use_mac_helper: Os::current() == Os::MacOs,
        }
    }

    fn java_home_binary(&self) -> Option<PathBuf> {
        self.java_home
            .as_ref()
            .map(|home| home.join("bin").join(java_exe()))
    }

    fn mac_helper_binary(&self) -> Option<PathBuf> {
        if !self.use_mac_helper {
            return None;
        }
        let output = std::process::Command::new(MAC_JAVA_HOME_HELPER).output().ok()?;
        let home = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!home.is_empty()).then(|| PathBuf::from(home).join("bin").join(java_exe()))
    }

    fn which(&self, name: &str) -> Option<PathBuf> {
        which_in(name, self.path_var.as_ref()?)
    }
}

/// Picks the Java executable for a launch, first match wins:
/// explicit override, user-configured path, bundled runtime, then the system
/// (`JAVA_HOME`, macOS `java_home`, `PATH`).
#[derive(Debug, Clone)]
pub struct JavaResolver {
    bundled_dir: PathBuf,
    system: SystemJava,
}

impl JavaResolver {
    pub fn new(bundled_dir: impl Into<PathBuf>) -> Self {
        Self::with_system(bundled_dir, SystemJava::from_env())
    }

    pub fn with_system(bundled_dir: impl Into<PathBuf>, system: SystemJava) -> Self {
        Self {
            bundled_dir: bundled_dir.into(),
            system,
        }
    }

    pub fn bundled_dir(&self) -> &Path {
        &self.bundled_dir
    }

    /// An explicitly requested path that cannot be resolved is an error; it
    /// never falls through to the bundled or system runtime.
    pub fn resolve(
        &self,
        override_path: Option<&str>,
        configured: Option<&str>,
    ) -> LauncherResult<JavaCandidate> {
        for (source, label, requested) in [
            (JavaSource::Override, "Launch override", override_path),
            (JavaSource::Configured, "Configured path", configured),
        ] {
            let Some(requested) = requested.map(str::trim).filter(|p| !p.is_empty()) else {
                continue;
            };
            let path = self
                .resolve_java_path(requested)
                .ok_or_else(|| LauncherError::ConfiguredJavaNotFound(requested.to_string()))?;
            info!("Using {} Java at {:?}", label.to_lowercase(), path);
            return Ok(JavaCandidate::found(source, label, path));
        }

        if let Some(path) = bundled_java(&self.bundled_dir) {
            debug!("Using bundled Java at {:?}", path);
            return Ok(JavaCandidate::found(JavaSource::Bundled, "Bundled runtime", path));
        }

        self.detect_system().ok_or_else(|| {
            LauncherError::JavaNotFound("no bundled runtime and no system Java".to_string())
        })
    }

    /// First existing system Java.
    pub fn detect_system(&self) -> Option<JavaCandidate> {
        self.system_candidates().into_iter().find(|c| c.exists)
    }

    /// Every candidate the resolver knows about, existing or not, with the
    /// reported Java version as the note when it runs.
    pub fn list_candidates(&self, configured: Option<&str>) -> Vec<JavaCandidate> {
        let mut candidates = Vec::new();

        if let Some(requested) = configured.map(str::trim).filter(|p| !p.is_empty()) {
            let mut candidate = match self.resolve_java_path(requested) {
                Some(path) => JavaCandidate::found(JavaSource::Configured, "Configured path", path),
                None => JavaCandidate {
                    label: "Configured path".to_string(),
                    source: JavaSource::Configured,
                    path: PathBuf::from(requested),
                    exists: false,
                    note: None,
                },
            };
            if !candidate.exists {
                candidate.note = Some("not found".to_string());
            }
            candidates.push(candidate);
        }

        let bundled = bundled_java(&self.bundled_dir)
            .unwrap_or_else(|| self.bundled_dir.join("bin").join(java_exe()));
        candidates.push(JavaCandidate::found(JavaSource::Bundled, "Bundled runtime", bundled));
        candidates.extend(self.system_candidates());

        for candidate in &mut candidates {
            if candidate.exists && candidate.note.is_none() {
                candidate.note = probe_java(&candidate.path).map(|v| format!("Java {}", v.version));
            }
        }
        candidates
    }

    fn system_candidates(&self) -> Vec<JavaCandidate> {
        let mut out = Vec::new();
        if let Some(path) = self.system.java_home_binary() {
            out.push(JavaCandidate::found(JavaSource::JavaHome, "JAVA_HOME", path));
        }
        if let Some(path) = self.system.mac_helper_binary() {
            out.push(JavaCandidate::found(JavaSource::MacJavaHome, "macOS java_home", path));
        }
        if let Some(path) = self.system.which(java_exe()) {
            out.push(JavaCandidate::found(JavaSource::Path, "PATH", path));
        }
        out
    }

    /// A directory must contain `bin/java`; a bare command name is looked up
    /// on `PATH`; `~` expands to the home directory.
    pub fn resolve_java_path(&self, input: &str) -> Option<PathBuf> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }

        let expanded = expand_home(trimmed);
        if expanded.exists() {
            if expanded.is_dir() {
                let candidate = expanded.join("bin").join(java_exe());
                return candidate.is_file().then_some(candidate);
            }
            return Some(expanded);
        }

        let is_bare_command = !trimmed.contains('/') && !trimmed.contains('\\');
        if is_bare_command {
            return self.system.which(trimmed);
        }
        None
    }
}

/// `jre/<version>/bin/java`, or the macOS `Contents/Home/bin/java` layout.
pub fn bundled_java(jre_dir: &Path) -> Option<PathBuf> {
    bundled_java_candidates(jre_dir)
        .into_iter()
        .find(|p| p.is_file())
}

pub fn bundled_java_candidates(jre_dir: &Path) -> Vec<PathBuf> {
    vec![
        jre_dir.join("bin").join(java_exe()),
        jre_dir
            .join("Contents")
            .join("Home")
            .join("bin")
            .join(java_exe()),
    ]
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

fn which_in(name: &str, path_var: &OsString) -> Option<PathBuf> {
    let mut names = vec![name.to_string()];
    if cfg!(windows) && !name.to_ascii_lowercase().ends_with(".exe") {
        names.push(format!("{name}.exe"));
    }
    std::env::split_paths(path_var).find_map(|dir| {
        names
            .iter()
            .map(|n| dir.join(n))
            .find(|candidate| candidate.is_file())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        bundled: PathBuf,
        configured: PathBuf,
        path_java: PathBuf,
        resolver: JavaResolver,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let jre = dir.path().join("jre").join("latest");
        let bundled = jre.join("bin").join(java_exe());
        let configured = dir.path().join("custom-jdk").join("bin").join(java_exe());
        let path_dir = dir.path().join("usr-bin");
        let path_java = path_dir.join(java_exe());
        for p in [&bundled, &configured, &path_java] {
            touch(p);
        }

        let system = SystemJava {
            java_home: None,
            path_var: Some(std::env::join_paths([&path_dir]).unwrap()),
            use_mac_helper: false,
        };
        Fixture {
            resolver: JavaResolver::with_system(&jre, system),
            _dir: dir,
            bundled,
            configured,
            path_java,
        }
    }

    #[test]
    fn configured_path_beats_bundled_and_path() {
        let fx = fixture();
        let chosen = fx
            .resolver
            .resolve(None, Some(fx.configured.to_str().unwrap()))
            .unwrap();
        assert_eq!(chosen.source, JavaSource::Configured);
        assert_eq!(chosen.path, fx.configured);
    }

    #[test]
    fn configured_directory_resolves_to_bin_java() {
        let fx = fixture();
        let home = fx.configured.parent().unwrap().parent().unwrap();
        let chosen = fx.resolver.resolve(None, Some(home.to_str().unwrap())).unwrap();
        assert_eq!(chosen.path, fx.configured);
    }

    #[test]
    fn missing_configured_path_is_a_hard_failure() {
        let fx = fixture();
        let err = fx
            .resolver
            .resolve(None, Some("/definitely/not/here/java"))
            .unwrap_err();
        assert!(matches!(err, LauncherError::ConfiguredJavaNotFound(_)));
    }

    #[test]
    fn override_beats_configured() {
        let fx = fixture();
        let chosen = fx
            .resolver
            .resolve(
                Some(fx.path_java.to_str().unwrap()),
                Some(fx.configured.to_str().unwrap()),
            )
            .unwrap();
        assert_eq!(chosen.source, JavaSource::Override);
        assert_eq!(chosen.path, fx.path_java);
    }

    #[test]
    fn bundled_then_path() {
        let fx = fixture();
        let chosen = fx.resolver.resolve(None, Some("  ")).unwrap();
        assert_eq!(chosen.source, JavaSource::Bundled);
        assert_eq!(chosen.path, fx.bundled);

        std::fs::remove_file(&fx.bundled).unwrap();
        let chosen = fx.resolver.resolve(None, None).unwrap();
        assert_eq!(chosen.source, JavaSource::Path);
        assert_eq!(chosen.path, fx.path_java);

        std::fs::remove_file(&fx.path_java).unwrap();
        assert!(matches!(
            fx.resolver.resolve(None, None),
            Err(LauncherError::JavaNotFound(_))
        ));
    }

    #[test]
    fn bare_command_is_looked_up_on_path() {
        let fx = fixture();
        assert_eq!(fx.resolver.resolve_java_path("java"), Some(fx.path_java.clone()));
        assert_eq!(fx.resolver.resolve_java_path("not-a-java"), None);
    }

    #[test]
    fn mac_bundle_layout_is_recognized() {
        let dir = tempfile::tempdir().unwrap();
        let mac = dir.path().join("Contents/Home/bin").join(java_exe());
        touch(&mac);
        assert_eq!(bundled_java(dir.path()), Some(mac));
    }

    #[test]
    fn listing_marks_missing_entries() {
        let fx = fixture();
        let list = fx.resolver.list_candidates(Some("/nope/java"));
        assert_eq!(list[0].source, JavaSource::Configured);
        assert!(!list[0].exists);
        assert_eq!(list[0].note.as_deref(), Some("not found"));
        assert!(list.iter().any(|c| c.source == JavaSource::Bundled && c.exists));
        assert!(list.iter().any(|c| c.source == JavaSource::Path && c.exists));
    }
}
