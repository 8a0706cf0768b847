//! Error types for Schedcast

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::PostStatus;

pub type Result<T> = std::result::Result<T, SchedcastError>;

#[derive(Error, Debug)]
pub enum SchedcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Post {id} is {status}, expected pending")]
    StateConflict { id: String, status: PostStatus },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Publishing log write failed: {0}")]
    Logging(String),

    #[error("Platform error: {0}")]
    Platform(#[from] PublishError),
}

impl SchedcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SchedcastError::Validation(_) => 3,
            SchedcastError::Config(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

/// Whether a failed publish may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeout, 5xx, explicit rate limit
    Transient,
    /// Bad credentials, rejected content, unknown resource
    Permanent,
}

/// Classified adapter failure. This is also what gets persisted as a post's
/// `last_error`.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct PublishError {
    pub kind: ErrorKind,
    /// Upstream HTTP status, when there was one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    pub message: String,
}

impl PublishError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            code: None,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }

    /// Classify an upstream HTTP status.
    ///
    /// 408, 425, 429 and every 5xx are transient; any other non-success
    /// status is permanent.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let base = match status {
            408 | 425 | 429 | 500..=599 => Self::transient(message),
            _ => Self::permanent(message),
        };
        base.with_code(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_validation() {
        let error = SchedcastError::Validation("scheduled_at is in the past".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_config() {
        let error = SchedcastError::Config(ConfigError::MissingField("database.path".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_runtime_errors() {
        let conflict = SchedcastError::StateConflict {
            id: "p1".to_string(),
            status: PostStatus::Published,
        };
        assert_eq!(conflict.exit_code(), 1);
        assert_eq!(SchedcastError::NotFound("p1".to_string()).exit_code(), 1);
        assert_eq!(
            SchedcastError::Platform(PublishError::transient("timeout")).exit_code(),
            1
        );
    }

    #[test]
    fn test_state_conflict_message_names_status() {
        let error = SchedcastError::StateConflict {
            id: "abc".to_string(),
            status: PostStatus::Publishing,
        };
        assert_eq!(error.to_string(), "Post abc is publishing, expected pending");
    }

    #[test]
    fn test_status_classification() {
        assert!(PublishError::from_status(503, "unavailable").is_transient());
        assert!(PublishError::from_status(500, "oops").is_transient());
        assert!(PublishError::from_status(429, "slow down").is_transient());
        assert!(PublishError::from_status(408, "request timeout").is_transient());
        assert!(!PublishError::from_status(401, "bad token").is_transient());
        assert!(!PublishError::from_status(400, "bad body").is_transient());
        assert!(!PublishError::from_status(404, "no such page").is_transient());
    }

    #[test]
    fn test_from_status_keeps_code() {
        let error = PublishError::from_status(401, "Invalid OAuth access token");
        assert_eq!(error.code, Some(401));
        assert_eq!(error.kind, ErrorKind::Permanent);
        assert_eq!(error.to_string(), "Invalid OAuth access token");
    }

    #[test]
    fn test_publish_error_json_shape() {
        let error = PublishError::from_status(503, "Service Unavailable");
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["kind"], "transient");
        assert_eq!(json["code"], 503);
        assert_eq!(json["message"], "Service Unavailable");

        let no_code = serde_json::to_value(PublishError::permanent("rejected")).unwrap();
        assert!(no_code.get("code").is_none());
    }

    #[test]
    fn test_publish_error_converts_into_top_level() {
        let error: SchedcastError = PublishError::permanent("bad").into();
        match error {
            SchedcastError::Platform(inner) => assert_eq!(inner.kind, ErrorKind::Permanent),
            _ => panic!("Expected SchedcastError::Platform"),
        }
    }
}
