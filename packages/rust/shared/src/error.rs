//! Error types for nodeharvest.
//!
//! Library crates use [`NodeHarvestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all nodeharvest operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeHarvestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Connection, timeout, or body read failure.
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status from an upstream API.
    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    /// Content that could not be decoded (bad Base64, missing URI fields, ...).
    #[error("malformed content: {message}")]
    Malformed { message: String },

    /// Structured document or JSON payload parse error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (invalid URL, unsupported value, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Deploy command could not be started.
    #[error("deploy error: {0}")]
    Deploy(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, NodeHarvestError>;

impl NodeHarvestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a malformed-content error from any displayable message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a retry may succeed: timeouts, connection failures,
    /// rate limiting (403/429) and server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { status, .. } => matches!(*status, 403 | 429 | 500..=599),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = NodeHarvestError::config("missing API token");
        assert_eq!(err.to_string(), "config error: missing API token");

        let err = NodeHarvestError::malformed("no host:port after decode");
        assert!(err.to_string().contains("no host:port"));
    }

    #[test]
    fn transient_classification() {
        assert!(NodeHarvestError::Network("timed out".into()).is_transient());
        for status in [403, 429, 500, 502, 503] {
            let err = NodeHarvestError::Http {
                url: "https://api.example.com".into(),
                status,
            };
            assert!(err.is_transient(), "{status} should be transient");
        }
        for status in [400, 401, 404, 422] {
            let err = NodeHarvestError::Http {
                url: "https://api.example.com".into(),
                status,
            };
            assert!(!err.is_transient(), "{status} should be fatal");
        }
        assert!(!NodeHarvestError::malformed("x").is_transient());
    }
}
