//! Error types for the audit engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuditError>;

#[derive(Error, Debug)]
pub enum AuditError {
    /// SQLite operation failed. Always surfaced to the caller of a mutation.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// OCR or text-completion provider failed, timed out, or returned garbage.
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("OpenRouter API key missing")]
    MissingApiKey,

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for AuditError {
    fn from(e: serde_json::Error) -> Self {
        AuditError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for AuditError {
    fn from(e: reqwest::Error) -> Self {
        AuditError::Provider(e.to_string())
    }
}
