//! Error types for mailshot.

use thiserror::Error;

/// Top-level error type for mailshot.
#[derive(Debug, Error)]
pub enum MailshotError {
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("{0}")]
    Validation(#[from] ValidationErrors),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Provider API errors shared by all mail backends.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    #[error("Rate limited by provider: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<f64>,
    },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

/// Code attached to a single message validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    MissingParameter,
    WrongFormat,
    SendFailed,
}

/// A single validation failure for one message field.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidationError {
    pub code: ValidationCode,
    pub message: String,
}

/// Every validation failure found for one message.
///
/// A message is checked field by field before any network call; all failures
/// are collected so the operator sees them at once.
#[derive(Debug, Clone, Default)]
pub struct ValidationErrors {
    pub list: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn push(&mut self, code: ValidationCode, message: impl Into<String>) {
        self.list.push(ValidationError {
            code,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let messages: Vec<&str> = self.list.iter().map(|e| e.message.as_str()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

impl MailshotError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::RateLimited { .. }
                | Self::Network(_)
                | Self::Provider(ProviderError::RateLimited { .. })
        )
    }

    /// Get retry delay hint in seconds, if applicable.
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            Self::Provider(ProviderError::RateLimited {
                retry_after_secs, ..
            }) => *retry_after_secs,
            _ => None,
        }
    }
}

/// Result type alias for mailshot.
pub type Result<T> = std::result::Result<T, MailshotError>;
