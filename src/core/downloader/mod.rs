pub mod client;
pub mod progress;

pub use client::{report, DownloadTask, Downloader};
pub use progress::{ProgressEvent, ProgressFn};
