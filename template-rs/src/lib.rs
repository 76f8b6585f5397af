//! template-rs: versioned message templates for email and WhatsApp
//!
//! A file-backed template library with categories, tags, version history,
//! full-text search, usage-based recommendations and SQLite analytics.
//!
//! # Features
//!
//! - **Templates**: `{placeholder}` rendering with system variables (`date`, `time`, `datetime`)
//! - **Versions**: append-only history with rollback and field diffs
//! - **Search**: JSON-persisted index with usage-boosted scoring
//! - **Consistency**: write-ahead journal replayed on open
//! - **Transfer**: versioned JSON export envelopes and bulk import
//!
//! # Example
//!
//! ```no_run
//! use template_rs::templates::{MessageTemplate, SaveOptions};
//! use template_rs::{Config, TemplateManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::with_data_dir("templates_data");
//!     let mut manager = TemplateManager::open(config).await?;
//!
//!     let template =
//!         MessageTemplate::email("welcome", "Welcome", "Hi {name}", "Dear {name}, ...");
//!     manager.save_template(template, SaveOptions::default()).await?;
//!
//!     for result in manager.search_templates("welcome", Default::default()).await? {
//!         println!("{} ({:.1})", result.template.name, result.score);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration management
//! - [`error`]: Error types and handling
//! - [`templates`]: Template types, rendering and the [`TemplateManager`]
//! - [`storage`]: JSON files, index and journal
//! - [`versions`]: Version history
//! - [`search`]: Search index
//! - [`recommend`]: Usage-based recommendations
//! - [`analytics`]: SQLite usage and campaign statistics
//! - [`import_export`]: Export envelopes

pub mod analytics;
pub mod config;
pub mod error;
pub mod import_export;
pub mod recommend;
pub mod search;
pub mod storage;
pub mod templates;
pub mod versions;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, TemplateError};
pub use templates::TemplateManager;
