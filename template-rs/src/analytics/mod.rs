//! Template usage and campaign analytics backed by SQLite

pub mod store;
pub mod types;

pub use store::AnalyticsStore;
pub use types::*;
