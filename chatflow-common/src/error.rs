//! Error types for the chatflow services.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using the chatflow error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for chatflow services.
///
/// Conversation-level failures (`Adapter`, `Timeout`, `Validation`,
/// `Capacity`, `Blacklisted`) are contained to a single conversation.
/// Only `Config` and `Io` raised during startup are fatal to the process.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network or provider failure reaching an external service
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// A step exceeded its execution budget
    #[error("Step timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Malformed inbound payload
    #[error("Validation error: {0}")]
    Validation(String),

    /// Ready queue is full
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// Conversation is on the blacklist
    #[error("Conversation is blacklisted: {0}")]
    Blacklisted(String),

    /// Unknown flow or resource
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid flow definition
    #[error("Flow definition error: {0}")]
    Definition(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping context wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this is a step timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout(_))
    }

    /// Check if this is an adapter (external service) failure.
    pub fn is_adapter(&self) -> bool {
        matches!(self.root(), Self::Adapter(_))
    }

    /// Get HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Blacklisted(_) => 403,
            Self::NotFound(_) => 404,
            Self::Timeout(_) => 408,
            Self::Capacity(_) => 429,
            Self::Adapter(_) => 502,
            Self::WithContext { source, .. } => source.status_code(),
            _ => 500,
        }
    }
}

/// Extension trait for adding context to any error type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}
