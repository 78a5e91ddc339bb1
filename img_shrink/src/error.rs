//! Error types for the shrinker.
//!
//! Configuration and store errors surface before any scan begins; encode and
//! source errors abort a run before its commit step, so a failed run never
//! leaves a half-written ledger or store.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShrinkError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("\"{root}\", from the config at: \"{config}\", does not exist.")]
    RootNotFound { root: PathBuf, config: PathBuf },

    #[error("Metadata store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("Encoding {path} failed: {reason}")]
    EncodeFailed { path: PathBuf, reason: String },

    #[error("Cannot read {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Attachment record {id}: {reason}")]
    Record { id: i64, reason: String },

    #[error("Ledger line {line}: {reason}")]
    Ledger { line: usize, reason: String },

    #[error("Serialization error: {0}")]
    Serialize(#[from] crate::php_serialize::PhpSerializeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ShrinkError {
    /// Errors raised while loading configuration or opening collaborators,
    /// before the managed tree is touched.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            ShrinkError::Config(_)
                | ShrinkError::RootNotFound { .. }
                | ShrinkError::StoreUnavailable(_)
                | ShrinkError::ToolNotFound(_)
                | ShrinkError::Json(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ShrinkError>;
