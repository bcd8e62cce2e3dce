pub mod installer;
pub mod layout;
pub mod tool;

pub use installer::{GameStatus, InstallMetadata, InstallOutcome, PatchInstaller};
pub use layout::{InstallLayout, LATEST};
pub use tool::PatchTool;
