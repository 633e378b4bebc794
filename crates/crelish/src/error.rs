use crate::validation::ValidationErrors;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrelishError {
    #[error("Schema not found for content type: {0}")]
    SchemaNotFound(String),

    #[error("Schema for {ctype} could not be parsed: {reason}")]
    SchemaParse { ctype: String, reason: String },

    #[error("No model registered for content type: {0}")]
    ModelNotFound(String),

    #[error("Record not found: {ctype}/{uuid}")]
    RecordNotFound { ctype: String, uuid: String },

    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Processor error on field {field}: {message}")]
    Processor { field: String, message: String },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Corrupt record at {path}: {reason}")]
    CorruptRecord { path: PathBuf, reason: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Config error: {0}")]
    Config(#[from] confique::Error),
}

impl CrelishError {
    pub fn processor(field: impl Into<String>, message: impl Into<String>) -> Self {
        CrelishError::Processor {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CrelishError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            CrelishError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CrelishError>;
