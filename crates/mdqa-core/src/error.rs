//! Error types for the markdown Q&A server.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("API configuration error: {0}")]
    ApiConfig(String),

    #[error("API transport error: {0}")]
    ApiTransport(String),

    #[error("API protocol error: {0}")]
    ApiProtocol(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server is not ready. Indexes are still loading.")]
    NotReady,

    #[error("Index inconsistency: {0}")]
    Inconsistency(String),

    #[error("Fatal index error: {0}")]
    Fatal(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error aborts the current index update entirely.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
