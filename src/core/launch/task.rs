// ─── Launch Task ───
// Builds the game command line and environment, then spawns the client
// detached with its output going to a session log.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::fixups::{FixupContext, PlatformFixups};
use crate::core::archive;
use crate::core::config::ConfigStore;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::profile::GameOptions;
use crate::core::version::Os;

const SETTINGS_FILE: &str = "Settings.json";
const REDACTED: &str = "***";

/// What the caller asks for when starting the game.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    pub player_name: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub identity_token: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub java_override: Option<String>,
    #[serde(default)]
    pub profile_id: Option<String>,
    /// `host[:port]` to join right away.
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub fullscreen: Option<bool>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl LaunchRequest {
    pub fn offline(player_name: impl Into<String>) -> Self {
        Self {
            player_name: player_name.into(),
            ..Self::default()
        }
    }

    /// Both tokens present and non-empty.
    pub fn tokens(&self) -> Option<(&str, &str)> {
        let identity = self.identity_token.as_deref().filter(|t| !t.is_empty())?;
        let session = self.session_token.as_deref().filter(|t| !t.is_empty())?;
        Some((identity, session))
    }

    /// The request as JSON with both tokens masked, for the session log.
    pub fn redacted(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(map) = value.as_object_mut() {
            for key in ["identityToken", "sessionToken"] {
                if map.get(key).map(|v| !v.is_null()).unwrap_or(false) {
                    map.insert(key.to_string(), json!(REDACTED));
                }
            }
        }
        value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Offline,
    Authenticated,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Offline => "offline",
            AuthMode::Authenticated => "authenticated",
        }
    }
}

/// Returned once the game process has been spawned.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchResult {
    pub pid: u32,
    pub uuid: String,
    pub auth_mode: AuthMode,
    pub log_path: PathBuf,
    pub warnings: Vec<String>,
}

/// Session-related variables read from the launcher's own environment.
#[derive(Debug, Clone, Default)]
pub struct SessionEnv {
    pub xdg_session_type: Option<String>,
    pub wayland_display: Option<String>,
    pub ld_library_path: Option<String>,
}

impl SessionEnv {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            xdg_session_type: var("XDG_SESSION_TYPE"),
            wayland_display: var("WAYLAND_DISPLAY"),
            ld_library_path: var("LD_LIBRARY_PATH"),
        }
    }

    pub fn is_wayland(&self) -> bool {
        self.xdg_session_type
            .as_deref()
            .map(|t| t.eq_ignore_ascii_case("wayland"))
            .unwrap_or(false)
            || self.wayland_display.is_some()
    }
}

/// Everything needed to start the client, computed without side effects.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
    pub auth_mode: AuthMode,
}

/// Inputs to [`LaunchPlan::build`].
#[derive(Debug, Clone)]
pub struct PlanInputs<'a> {
    pub os: Os,
    pub client: &'a Path,
    pub game_dir: &'a Path,
    pub user_data_dir: &'a Path,
    /// Real Java binary, used to run `.jar` clients.
    pub java: &'a Path,
    /// Passed to the client as `--java-exec`; may be a wrapper around `java`.
    pub java_exec: &'a Path,
    pub uuid: &'a str,
    pub request: &'a LaunchRequest,
    pub options: &'a GameOptions,
    pub session: &'a SessionEnv,
}

impl LaunchPlan {
    pub fn build(inputs: &PlanInputs<'_>) -> Self {
        let request = inputs.request;
        let jvm_args = jvm_options(inputs.options);

        let mut game_args = vec![
            "--app-dir".to_string(),
            path_str(inputs.game_dir),
            "--java-exec".to_string(),
            path_str(inputs.java_exec),
        ];
        if let Some(server) = request.server.as_deref().filter(|s| !s.trim().is_empty()) {
            game_args.extend(["--connect".to_string(), server.trim().to_string()]);
        }

        let tokens = request.tokens();
        let auth_mode = if tokens.is_some() {
            AuthMode::Authenticated
        } else {
            AuthMode::Offline
        };
        game_args.extend([
            "--auth-mode".to_string(),
            auth_mode.as_str().to_string(),
            "--uuid".to_string(),
            inputs.uuid.to_string(),
            "--name".to_string(),
            request.player_name.clone(),
        ]);
        if let Some((identity, session)) = tokens {
            game_args.extend([
                "--identity-token".to_string(),
                identity.to_string(),
                "--session-token".to_string(),
                session.to_string(),
            ]);
        }
        game_args.extend(["--user-dir".to_string(), path_str(inputs.user_data_dir)]);

        let mut env = vec![("_JAVA_OPTIONS".to_string(), jvm_args.join(" "))];
        let client_dir = inputs
            .client
            .parent()
            .unwrap_or(inputs.game_dir)
            .to_path_buf();
        if inputs.os == Os::Linux {
            if let Some(merged) =
                library_path(&client_dir, inputs.session.ld_library_path.as_deref())
            {
                env.push(("LD_LIBRARY_PATH".to_string(), merged));
            }
            if inputs.session.is_wayland() {
                env.extend(wayland_env());
            }
        }

        let is_jar = inputs
            .client
            .extension()
            .map(|e| e.eq_ignore_ascii_case("jar"))
            .unwrap_or(false);
        let (program, args) = if is_jar {
            let mut args = jvm_args;
            args.extend(["-jar".to_string(), path_str(inputs.client)]);
            args.extend(game_args);
            (inputs.java.to_path_buf(), args)
        } else {
            (inputs.client.to_path_buf(), game_args)
        };

        Self {
            program,
            args,
            env,
            cwd: client_dir,
            auth_mode,
        }
    }

    /// The command line with token values masked.
    pub fn display_redacted(&self) -> String {
        let mut parts = vec![path_str(&self.program)];
        let mut mask_next = false;
        for arg in &self.args {
            if mask_next {
                parts.push(REDACTED.to_string());
                mask_next = false;
            } else {
                mask_next = arg == "--identity-token" || arg == "--session-token";
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

pub fn jvm_options(options: &GameOptions) -> Vec<String> {
    let mut args = vec![
        format!("-Xms{}", options.min_memory),
        format!("-Xmx{}", options.max_memory),
    ];
    args.extend(options.args.iter().filter(|a| !a.trim().is_empty()).cloned());
    args
}

pub fn wayland_env() -> Vec<(String, String)> {
    [
        ("SDL_VIDEODRIVER", "wayland"),
        ("GDK_BACKEND", "wayland"),
        ("QT_QPA_PLATFORM", "wayland"),
        ("MOZ_ENABLE_WAYLAND", "1"),
        ("_JAVA_AWT_WM_NONREPARENTING", "1"),
        ("ELECTRON_OZONE_PLATFORM_HINT", "wayland"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Client dir and its existing `lib`, `bin`, `natives` children, ahead of
/// whatever `LD_LIBRARY_PATH` already holds.
pub fn library_path(client_dir: &Path, existing: Option<&str>) -> Option<String> {
    let dirs: Vec<String> = [
        client_dir.to_path_buf(),
        client_dir.join("lib"),
        client_dir.join("bin"),
        client_dir.join("natives"),
    ]
    .iter()
    .filter(|p| p.exists())
    .map(|p| path_str(p))
    .collect();
    if dirs.is_empty() {
        return None;
    }
    Some(prepend_env_path(existing, &dirs.join(":")))
}

fn prepend_env_path(existing: Option<&str>, value: &str) -> String {
    let separator = if cfg!(target_os = "windows") {
        ";"
    } else {
        ":"
    };
    match existing {
        Some(existing) if !existing.trim().is_empty() => {
            format!("{}{}{}", value, separator, existing)
        }
        _ => value.to_string(),
    }
}

/// Write window preferences into `UserData/Settings.json`, keeping every
/// other key. Returns whether the file changed.
pub fn update_client_settings(
    user_data_dir: &Path,
    fullscreen: Option<bool>,
    size: Option<(u32, u32)>,
) -> LauncherResult<bool> {
    let path = user_data_dir.join(SETTINGS_FILE);
    let mut settings: Map<String, Value> = match fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Ignoring unreadable {:?}: {}", path, e);
            Map::new()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
        Err(e) => return Err(LauncherError::io(&path, e)),
    };

    let mut changed = false;
    let mut set = |key: &str, value: Value| {
        if settings.get(key) != Some(&value) {
            settings.insert(key.to_string(), value);
            changed = true;
        }
    };
    if let Some(fullscreen) = fullscreen {
        set("Fullscreen", json!(fullscreen));
    }
    if let Some((width, height)) = size {
        set("WindowWidth", json!(width));
        set("WindowHeight", json!(height));
    }

    if changed {
        fs::create_dir_all(user_data_dir).map_err(|e| LauncherError::io(user_data_dir, e))?;
        let json = serde_json::to_string_pretty(&settings)?;
        fs::write(&path, json).map_err(|e| LauncherError::io(&path, e))?;
        debug!("Updated {:?}", path);
    }
    Ok(changed)
}

/// UUID the game runs under. An explicit one always wins since tokens are
/// signed for it; otherwise each username keeps the UUID it got first, and a
/// blank username falls back to the installation's client UUID.
pub async fn player_uuid(
    store: &ConfigStore,
    player_name: &str,
    explicit: Option<&str>,
) -> LauncherResult<String> {
    if let Some(uuid) = explicit.map(str::trim).filter(|u| !u.is_empty()) {
        return Ok(uuid.to_string());
    }
    if player_name.trim().is_empty() {
        return store.client_uuid().await;
    }
    if let Some(existing) = store.load().await?.player_uuids.get(player_name) {
        return Ok(existing.clone());
    }
    store
        .update(|config| {
            Ok(config
                .player_uuids
                .entry(player_name.to_string())
                .or_insert_with(|| Uuid::new_v4().to_string())
                .clone())
        })
        .await
        .inspect(|uuid| info!("Assigned UUID {} to player {}", uuid, player_name))
}

/// Paths and settings for one launch.
pub struct LaunchContext<'a> {
    pub os: Os,
    pub client: &'a Path,
    pub game_dir: &'a Path,
    pub user_data_dir: &'a Path,
    pub logs_dir: &'a Path,
    pub java: &'a Path,
    pub jre_dir: &'a Path,
    pub uuid: &'a str,
    pub request: &'a LaunchRequest,
    pub options: &'a GameOptions,
    pub fixups: &'a dyn PlatformFixups,
}

/// Prepare the environment and spawn the client. Returns once the process
/// has started; it is not waited on.
pub fn launch(ctx: &LaunchContext<'_>) -> LauncherResult<LaunchResult> {
    fs::create_dir_all(ctx.user_data_dir).map_err(|e| LauncherError::io(ctx.user_data_dir, e))?;

    let fixed = ctx.fixups.prepare(&FixupContext {
        client: ctx.client,
        java: ctx.java,
        jre_dir: ctx.jre_dir,
        game_dir: ctx.game_dir,
    });
    let mut warnings = fixed.warnings;
    let java_exec = fixed.java_exec.unwrap_or_else(|| ctx.java.to_path_buf());

    let fullscreen = ctx.request.fullscreen.or(ctx.options.fullscreen);
    let size = match (
        ctx.request.width.or(ctx.options.width),
        ctx.request.height.or(ctx.options.height),
    ) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
        _ => None,
    };
    if let Err(e) = update_client_settings(ctx.user_data_dir, fullscreen, size) {
        warn!("Failed to update client settings: {}", e);
        warnings.push(e.to_string());
    }

    let session = SessionEnv::from_env();
    let plan = LaunchPlan::build(&PlanInputs {
        os: ctx.os,
        client: ctx.client,
        game_dir: ctx.game_dir,
        user_data_dir: ctx.user_data_dir,
        java: ctx.java,
        java_exec: &java_exec,
        uuid: ctx.uuid,
        request: ctx.request,
        options: ctx.options,
        session: &session,
    });

    if plan.program == ctx.client && ctx.os != Os::Windows {
        archive::make_executable(ctx.client)?;
    }

    let log_path = ctx
        .logs_dir
        .join(format!("game-session-{}.log", Utc::now().timestamp_millis()));
    let mut log = open_session_log(ctx.logs_dir, &log_path, ctx.request)?;

    info!("Launching {} ({:?} mode)", plan.display_redacted(), plan.auth_mode);
    let pid = spawn_detached(&plan, &log)?;
    if let Err(e) = writeln!(log, "[LAUNCH] PID: {}", pid) {
        warn!("Could not write PID to session log: {}", e);
    }
    info!("Game started with PID {}, logging to {:?}", pid, log_path);

    Ok(LaunchResult {
        pid,
        uuid: ctx.uuid.to_string(),
        auth_mode: plan.auth_mode,
        log_path,
        warnings,
    })
}

fn open_session_log(logs_dir: &Path, path: &Path, request: &LaunchRequest) -> LauncherResult<File> {
    fs::create_dir_all(logs_dir).map_err(|e| LauncherError::io(logs_dir, e))?;
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LauncherError::io(path, e))?;
    let header = format!(
        "[LAUNCH] Timestamp: {}\n[LAUNCH] Options: {}\n",
        Utc::now().format("%Y-%m-%dT%H:%M:%S"),
        request.redacted()
    );
    log.write_all(header.as_bytes())
        .map_err(|e| LauncherError::io(path, e))?;
    Ok(log)
}

fn spawn_detached(plan: &LaunchPlan, log: &File) -> LauncherResult<u32> {
    let stdout = log.try_clone().map_err(|e| LauncherError::io(&plan.cwd, e))?;
    let stderr = log.try_clone().map_err(|e| LauncherError::io(&plan.cwd, e))?;

    let mut cmd = Command::new(&plan.program);
    cmd.args(&plan.args)
        .envs(plan.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&plan.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));
    configure_platform_spawn(&mut cmd);

    let mut child = cmd
        .spawn()
        .map_err(|e| LauncherError::Other(format!("failed to start {:?}: {e}", plan.program)))?;
    let pid = child.id();

    // Reap the child so it does not linger as a zombie; nothing else waits on it.
    std::thread::spawn(move || match child.wait() {
        Ok(status) => info!("Game process {} exited with {}", pid, status),
        Err(e) => warn!("Lost track of game process {}: {}", pid, e),
    });
    Ok(pid)
}

fn configure_platform_spawn(cmd: &mut Command) {
    #[cfg(target_os = "windows")]
    {
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        cmd.env_remove("WT_SESSION");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
}
