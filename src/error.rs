use crate::extraction::ExtractionError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid field '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Duplicate {entity} key: {key}")]
    DuplicateKey { entity: &'static str, key: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Unsupported site: {0}")]
    UnsupportedSite(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl IngestError {
    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        IngestError::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        IngestError::Storage {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
