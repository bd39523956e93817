//! Error types for the relational catalog core

use thiserror::Error;

/// Catalog error types
#[derive(Error, Debug)]
pub enum Error {
    // Lookup Errors
    #[error("Not found: {0}")]
    NotFound(String),

    // Model Errors
    #[error("Model conflict: {0}")]
    ConflictModel(String),

    #[error("Data conflict: {0}")]
    ConflictData(String),

    #[error("Bad data: {0}")]
    BadData(String),

    // Introspection Errors
    #[error("Introspection failed: {0}")]
    Introspection(String),

    #[error("Structural inconsistency: {0}")]
    Inconsistent(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    // General Errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type alias for catalog operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::ConflictModel(message.into())
    }

    pub fn bad_data(message: impl Into<String>) -> Self {
        Self::BadData(message.into())
    }

    /// HTTP status code surfaced by the request layer
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::BadData(_) | Self::Json(_) => 400,

            // 404 Not Found
            Self::NotFound(_) => 404,

            // 409 Conflict
            Self::ConflictModel(_) | Self::ConflictData(_) => 409,

            // 500 Internal Server Error
            Self::Introspection(_)
            | Self::Inconsistent(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Toml(_) => 500,

            // 503 Service Unavailable
            Self::BackendUnavailable(_) => 503,
        }
    }

    /// Stable error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::ConflictModel(_) => "conflict_model",
            Self::ConflictData(_) => "conflict_data",
            Self::BadData(_) => "bad_data",
            Self::Introspection(_) => "introspection_error",
            Self::Inconsistent(_) => "structural_inconsistency",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Toml(_) => "toml_error",
        }
    }

    /// Only transient backend failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}
