// ─── Luyumi Core ───
// Install, patch and profile engine behind the Luyumi launcher UI.
//
// Architecture:
//   core/
//     config/     config.json store (profiles, player UUIDs, paths)
//     downloader/ Resumable HTTP downloads with progress and SHA-256
//     archive/    Zip / tar.gz extraction, hashing, permissions
//     version/    Platform detection + version / JRE endpoints
//     install/    Install layout, patch tool, PatchInstaller
//     java/       Java resolution and bundled JRE provisioning
//     patcher/    Auth-domain rewriting of client and server binaries
//     profile/    Profile model and store
//     mods/       Per-profile mod sync and mod management
//     launch/     Launch plan, platform fixups, detached spawn
//     state/      Facade wiring everything for the UI

pub mod archive;
pub mod config;
pub mod downloader;
pub mod error;
pub mod http;
pub mod install;
pub mod java;
pub mod launch;
pub mod mods;
pub mod patcher;
pub mod profile;
pub mod state;
pub mod version;
