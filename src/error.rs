// Error taxonomy for indexing, jobs and external calls

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Parser-internal failure. Caught at the parser boundary, never surfaces to callers.
    #[error("parse error in {file}: {message}")]
    Parse { file: String, message: String },

    #[error("cannot collect {path}: {message}")]
    Collection { path: String, message: String },

    #[error("{dependency} request failed: {message}")]
    Network { dependency: String, message: String },

    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    #[error("job cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn network(dependency: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Network {
            dependency: dependency.into(),
            message: message.to_string(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<r2d2::Error> for Error {
    fn from(e: r2d2::Error) -> Self {
        Error::Storage(format!("connection pool: {}", e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let dependency = e
            .url()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "http".to_string());
        Error::Network {
            dependency,
            message: e.to_string(),
        }
    }
}

/// Decides whether a failed external call is worth another attempt.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        matches!(self, Error::Network { .. } | Error::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::network("vcs", "connection reset").is_retryable());
        assert!(Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow")).is_retryable());
        assert!(!Error::CircuitOpen { name: "vcs".into() }.is_retryable());
        assert!(!Error::Validation("repoUrl is required".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_messages_are_human_readable() {
        let e = Error::network("embeddings", "status 503");
        assert_eq!(e.to_string(), "embeddings request failed: status 503");
        let e = Error::CircuitOpen { name: "vcs".into() };
        assert_eq!(e.to_string(), "circuit breaker 'vcs' is open");
    }
}
