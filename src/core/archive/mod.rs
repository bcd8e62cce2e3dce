pub mod extract;
pub mod integrity;

pub use extract::{extract, extract_as, flatten_single_dir, make_executable, safe_join, ArchiveKind};
pub use integrity::{sha256_file, verify_sha256};
