// ─── Platform Fixups ───
// Best-effort OS-specific preparation run right before the game starts.
// Failures are logged and collected as warnings, never returned as errors.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::archive;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::install::layout::app_bundle_of;
use crate::core::version::Os;

pub const JAVA_WRAPPER_NAME: &str = "java-wrapper.sh";

/// Runs an external program to completion.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> LauncherResult<()>;
}

/// Runs commands with `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> LauncherResult<()> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| LauncherError::Permission(format!("{program}: {e}")))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(LauncherError::Permission(format!(
                "{} {} exited with {:?}: {}",
                program,
                args.join(" "),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// Paths the fixups operate on.
#[derive(Debug, Clone)]
pub struct FixupContext<'a> {
    pub client: &'a Path,
    pub java: &'a Path,
    pub jre_dir: &'a Path,
    pub game_dir: &'a Path,
}

#[derive(Debug, Default, Clone)]
pub struct FixupOutcome {
    /// Replacement for `--java-exec`, when the platform needs one.
    pub java_exec: Option<PathBuf>,
    pub warnings: Vec<String>,
}

pub trait PlatformFixups: Send + Sync {
    fn prepare(&self, ctx: &FixupContext<'_>) -> FixupOutcome;
}

/// Platforms that need nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFixups;

impl PlatformFixups for NoFixups {
    fn prepare(&self, _ctx: &FixupContext<'_>) -> FixupOutcome {
        FixupOutcome::default()
    }
}

/// macOS: strip quarantine attributes, ad-hoc sign the client bundle, the
/// Java runtime and the server's native libraries, and wrap Java so the
/// server starts without perf data.
pub struct MacFixups {
    runner: Arc<dyn CommandRunner>,
}

impl MacFixups {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn attempt(&self, warnings: &mut Vec<String>, program: &str, args: Vec<String>) {
        if let Err(e) = self.runner.run(program, &args) {
            warn!("{}", e);
            warnings.push(e.to_string());
        }
    }

    fn clear_quarantine(&self, warnings: &mut Vec<String>, path: &Path) {
        self.attempt(warnings, "xattr", vec!["-cr".into(), path_arg(path)]);
    }

    fn sign(&self, warnings: &mut Vec<String>, path: &Path, deep: bool) {
        let mut args = vec!["--force".to_string()];
        if deep {
            args.push("--deep".into());
        }
        args.extend(["--sign".to_string(), "-".to_string(), path_arg(path)]);
        self.attempt(warnings, "codesign", args);
    }
}

impl PlatformFixups for MacFixups {
    fn prepare(&self, ctx: &FixupContext<'_>) -> FixupOutcome {
        let mut warnings = Vec::new();

        let bundle = app_bundle_of(ctx.client).unwrap_or_else(|| ctx.client.to_path_buf());
        self.clear_quarantine(&mut warnings, &bundle);
        self.sign(&mut warnings, &bundle, true);

        if ctx.jre_dir.is_dir() {
            self.clear_quarantine(&mut warnings, ctx.jre_dir);
            self.sign(&mut warnings, ctx.jre_dir, true);
        }

        let server_dir = ctx.game_dir.join("Server");
        let mut java_exec = None;
        if server_dir.is_dir() {
            self.clear_quarantine(&mut warnings, &server_dir);
            for dylib in files_with_extension(&server_dir, "dylib") {
                self.sign(&mut warnings, &dylib, false);
            }
            match write_java_wrapper(&server_dir, ctx.java) {
                Ok(wrapper) => java_exec = Some(wrapper),
                Err(e) => {
                    warn!("Could not write Java wrapper: {}", e);
                    warnings.push(e.to_string());
                }
            }
        }

        debug!("macOS fixups done with {} warnings", warnings.len());
        FixupOutcome {
            java_exec,
            warnings,
        }
    }
}

/// Fixups for the given OS using real processes.
pub fn fixups_for(os: Os) -> Arc<dyn PlatformFixups> {
    match os {
        Os::MacOs => Arc::new(MacFixups::new(Arc::new(SystemRunner))),
        Os::Windows | Os::Linux => Arc::new(NoFixups),
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().map(|e| e == ext).unwrap_or(false) {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}

/// Single-quote `value` for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Shell wrapper that runs `java` with `-XX:-UsePerfData` prepended.
pub fn write_java_wrapper(server_dir: &Path, java: &Path) -> LauncherResult<PathBuf> {
    let wrapper = server_dir.join(JAVA_WRAPPER_NAME);
    let script = format!(
        "#!/bin/bash\nexec {} -XX:-UsePerfData \"$@\"\n",
        shell_quote(&java.to_string_lossy())
    );
    fs::write(&wrapper, script).map_err(|e| LauncherError::io(&wrapper, e))?;
    archive::make_executable(&wrapper)?;
    Ok(wrapper)
}
