use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Import error: {0}")]
    Import(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TemplateError {
    /// Shorthand for building a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        TemplateError::Validation(message.into())
    }

    /// True for errors caused by the caller's input rather than I/O
    pub fn is_validation(&self) -> bool {
        matches!(self, TemplateError::Validation(_) | TemplateError::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, TemplateError>;
