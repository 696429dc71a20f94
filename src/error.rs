//! Custom error types for archivist

use thiserror::Error;

/// Message fragment identifying vector-store metadata segment corruption.
///
/// When a store-internal error carries this signature the writer wipes the
/// persisted segment directory before recreating its client handle.
pub const CORRUPTION_SIGNATURE: &str = "metadata segment";

/// Main error type for archivist operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

/// Result type alias for archivist
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for SQLite busy/locked contention, the only class the bounded
    /// retry in `meta` is allowed to swallow.
    pub fn is_busy(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db)) => {
                // SQLITE_BUSY = 5, SQLITE_LOCKED = 6 (plus their extended codes)
                if let Some(code) = db.code() {
                    if matches!(code.as_ref(), "5" | "6" | "261" | "262" | "517") {
                        return true;
                    }
                }
                let msg = db.message();
                msg.contains("database is locked") || msg.contains("database table is locked")
            }
            _ => false,
        }
    }

    /// True when a vector-store error carries the metadata segment
    /// corruption signature that warrants wiping the persisted segment.
    pub fn is_corruption(&self) -> bool {
        match self {
            Error::VectorStore(msg) => msg.to_ascii_lowercase().contains(CORRUPTION_SIGNATURE),
            _ => false,
        }
    }
}
