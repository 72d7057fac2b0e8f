//! Error types for wrkr-store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store is not connected")]
    NotConnected,

    #[error("insert count mismatch: requested {requested}, inserted {inserted}")]
    InsertCountMismatch { requested: usize, inserted: u64 },

    #[error("invalid criteria: {0}")]
    InvalidCriteria(String),

    #[error("index not ready: {0}")]
    IndexNotReady(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
