pub mod platform;
pub mod source;

pub use platform::{Arch, Os};
pub use source::{
    normalize_version, HttpVersionSource, JreDownload, JreManifest, PatchTarget,
    StaticVersionSource, VersionInfo, VersionSource,
};
