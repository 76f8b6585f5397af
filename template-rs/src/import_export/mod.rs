//! Bulk template import and export
//!
//! Versioned JSON envelopes carrying templates, metadata, categories and
//! optionally version histories and usage counts.

pub mod envelope;
pub mod types;

pub use envelope::{parse_envelope, read_envelope, write_envelope};
pub use types::*;
