//! Error types for listingscout.
//!
//! Library crates use [`ListingScoutError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all listingscout operations.
#[derive(Debug, thiserror::Error)]
pub enum ListingScoutError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Static HTTP fetch failed (transport error or non-success status).
    #[error("network error: {0}")]
    Network(String),

    /// The browsing session could not load a detail page.
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    /// Any other browsing session failure (launch, script, page source).
    #[error("browser error: {0}")]
    Browser(String),

    /// HTML parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or output sink error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad URL, unusable selector, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ListingScoutError>;

impl ListingScoutError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a navigation error for `url`.
    pub fn navigation(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.into(),
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

    /// Whether this error means the detail page itself could not be loaded.
    pub fn is_navigation(&self) -> bool {
        matches!(self, Self::Navigation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ListingScoutError::config("max_delay_ms below min_delay_ms");
        assert_eq!(
            err.to_string(),
            "config error: max_delay_ms below min_delay_ms"
        );

        let err = ListingScoutError::navigation("https://example.com/a_1.htm", "timed out");
        assert_eq!(
            err.to_string(),
            "navigation to https://example.com/a_1.htm failed: timed out"
        );
        assert!(err.is_navigation());
        assert!(!ListingScoutError::Network("reset".into()).is_navigation());
    }
}
