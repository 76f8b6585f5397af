//! On-disk storage for the template store
//!
//! - [`json_store`]: atomic JSON file writes and reads
//! - [`metadata`]: template files, `index.json` and `categories.json`
//! - [`journal`]: write-ahead journal replayed after a crash

pub mod journal;
pub mod json_store;
pub mod metadata;

pub use journal::{Journal, JournalEvent, JournalRecord, PendingOperation};
pub use metadata::{MetadataStore, TemplateIndex};
