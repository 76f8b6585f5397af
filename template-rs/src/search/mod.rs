//! Template search module
//!
//! Provides an in-memory, JSON-persisted index over template text, tags,
//! categories and channels with usage-boosted scoring.

pub mod index;
pub mod types;

pub use index::SearchIndex;
pub use types::*;
