//! Error types for the mview REST layer

use thiserror::Error;

/// mview error types
#[derive(Error, Debug)]
pub enum Error {
    // Request Errors
    #[error("{0}")]
    QueryError(String),

    #[error("{0}")]
    InvalidPayload(String),

    #[error("Lookup {field} was not found in object number {index}")]
    LookupError { field: String, index: usize },

    #[error("Did not contain any valid ids to delete.")]
    MissingIds,

    // Authentication / Authorization Errors
    #[error("Unauthenticated.")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    // Routing Errors
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Method {0} not allowed.")]
    MethodNotAllowed(String),

    // Store Errors
    #[error("{0}")]
    StoreError(String),

    // Serializer Errors
    #[error("Serialization defect: {0}")]
    SerializationDefect(String),

    // General Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for mview operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP status code for each error type
impl Error {
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::QueryError(_)
            | Self::InvalidPayload(_)
            | Self::LookupError { .. }
            | Self::MissingIds => 400,

            // 401 Unauthorized
            Self::Unauthenticated => 401,

            // 403 Forbidden
            Self::Forbidden(_) => 403,

            // 404 Not Found
            Self::ResourceNotFound(_) => 404,

            // 405 Method Not Allowed
            Self::MethodNotAllowed(_) => 405,

            // 500 Internal Server Error
            Self::StoreError(_)
            | Self::SerializationDefect(_)
            | Self::ConfigError(_)
            | Self::IoError(_)
            | Self::JsonError(_) => 500,
        }
    }

    /// Stable error code used in log lines
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::QueryError(_) => "query_error",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::LookupError { .. } => "lookup_error",
            Self::MissingIds => "missing_ids",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::ResourceNotFound(_) => "not_found",
            Self::MethodNotAllowed(_) => "method_not_allowed",
            Self::StoreError(_) => "store_error",
            Self::SerializationDefect(_) => "serialization_defect",
            Self::ConfigError(_) => "config_error",
            Self::IoError(_) => "io_error",
            Self::JsonError(_) => "json_error",
        }
    }
}
