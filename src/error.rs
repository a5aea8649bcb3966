//! Error handling for the conversion pipeline
//!
//! Every stage surfaces a [`ConvertError`] immediately; nothing is retried.

use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    /// Non-success HTTP status from a registry endpoint
    #[error("Registry error: HTTP code: {status}, URL: {url}{hint}")]
    Registry {
        status: u16,
        url: String,
        hint: String,
    },

    /// Connection or body-read failure talking to a registry
    #[error("Network error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid image reference: {0}")]
    Reference(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("IO error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Layout failed validation: {0}")]
    Layout(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A filesystem entry the archive format cannot represent. This is a
    /// programming fault rather than a user error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// Build a registry error from a failed response, with a short hint for
    /// the statuses registries commonly return.
    pub fn from_status(status: StatusCode, url: impl Into<String>) -> Self {
        let hint = match status.as_u16() {
            401 => " (unauthorized: token missing or rejected)",
            403 => " (forbidden)",
            404 => " (not found)",
            429 => " (rate limited)",
            500..=599 => " (registry server error)",
            _ => "",
        };

        ConvertError::Registry {
            status: status.as_u16(),
            url: url.into(),
            hint: hint.to_string(),
        }
    }

    pub fn transport(url: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ConvertError::Transport {
            url: url.into(),
            message: err.to_string(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ConvertError::Io {
            context: context.into(),
            source,
        }
    }

    /// IO error naming the path it happened on
    pub fn io_at(action: &str, path: &Path, source: std::io::Error) -> Self {
        ConvertError::Io {
            context: format!("{} {}", action, path.display()),
            source,
        }
    }

    /// HTTP status carried by registry errors
    pub fn status(&self) -> Option<u16> {
        match self {
            ConvertError::Registry { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, ConvertError::Internal(_))
    }
}

impl From<std::io::Error> for ConvertError {
    fn from(err: std::io::Error) -> Self {
        ConvertError::Io {
            context: "filesystem operation failed".to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for ConvertError {
    fn from(err: serde_json::Error) -> Self {
        ConvertError::Parse(err.to_string())
    }
}

impl From<url::ParseError> for ConvertError {
    fn from(err: url::ParseError) -> Self {
        ConvertError::Parse(format!("invalid URL: {}", err))
    }
}

impl From<walkdir::Error> for ConvertError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(PathBuf::from).unwrap_or_default();
        let context = format!("walking {}", path.display());
        match err.into_io_error() {
            Some(source) => ConvertError::Io { context, source },
            None => ConvertError::Layout(format!("filesystem loop detected at {}", path.display())),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_carries_status_and_url() {
        let err = ConvertError::from_status(
            StatusCode::NOT_FOUND,
            "https://registry-1.docker.io/v1/images/abc/json",
        );
        let msg = err.to_string();
        assert!(msg.contains("404"));
        assert!(msg.contains("https://registry-1.docker.io/v1/images/abc/json"));
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn test_unlisted_status_has_no_hint() {
        let err = ConvertError::from_status(StatusCode::IM_A_TEAPOT, "https://x/");
        assert_eq!(err.to_string(), "Registry error: HTTP code: 418, URL: https://x/");
    }

    #[test]
    fn test_internal_is_distinct() {
        assert!(ConvertError::Internal("socket".into()).is_internal());
        assert!(!ConvertError::Store("full".into()).is_internal());
    }
}
