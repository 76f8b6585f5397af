//! Template recommendations from recorded usage

pub mod engine;
pub mod types;

pub use engine::RecommendationEngine;
pub use types::*;
