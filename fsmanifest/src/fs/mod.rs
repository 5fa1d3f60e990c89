//! File system access: traversal, metadata and stable identifiers.

pub mod metadata;
pub mod stable_id;
pub mod walker;

pub use metadata::{unix_seconds, FileMetadata};
pub use stable_id::{NoStableIds, PlatformStableIds, StableIdProvider};
pub use walker::{walk_directory_with_callback, DiscoveredFile, WalkOptions};
