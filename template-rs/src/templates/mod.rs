//! Message templates
//!
//! Email and WhatsApp templates with `{placeholder}` variables, organised in
//! a category tree, tagged, versioned and searchable through
//! [`TemplateManager`].

mod categories;
pub mod manager;
pub mod renderer;
mod transfer;
pub mod types;
pub mod validation;

pub use manager::TemplateManager;
pub use renderer::{RenderedMessage, TemplateRenderer};
pub use types::*;
