//! Application-facing services.

mod offline;
mod photo_cache;

pub use offline::{OfflineService, PhotoUpload};
pub use photo_cache::PhotoCache;
