pub mod manager;
pub mod sync;

pub use manager::{ModInstallInfo, ModListing, ModManager, ModToggle};
pub use sync::{reconcile, ModLocation, ModMove, ModSynchronizer, PhysicalMod, SyncReport};
