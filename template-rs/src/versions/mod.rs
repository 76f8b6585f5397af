//! Template version history
//!
//! Append-only snapshots per template with a single active version,
//! rollback-as-new-version, flat diffs and retention cleanup.

pub mod manager;
pub mod types;

pub use manager::VersionManager;
pub use types::*;
