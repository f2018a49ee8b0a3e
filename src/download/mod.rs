//! Resumable, deduplicating download of generated items from a paginated
//! gallery.

pub mod gallery;
pub mod manager;
pub mod state;

pub use gallery::{DownloadSpec, DriverGallery, Gallery, GalleryEntry, GallerySelectors};
pub use manager::{GenerationDownloadManager, ScanReport};
pub use state::{DownloadState, Identity, JsonStateStore, ScanCursor, ScanMode, StateStore};
