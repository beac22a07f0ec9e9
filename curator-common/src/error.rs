//! Common error types for the curator services

use thiserror::Error;

/// Common result type for curator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the dispatcher, worker and stores
#[derive(Error, Debug)]
pub enum Error {
    /// Peer closed the framed connection before a complete message arrived
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Worker connection dropped while the caller was waiting for a reply
    #[error("Connection to scoring worker lost")]
    ConnectionLost,

    /// Malformed frame or undecodable message; fatal to the connection
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Correlation key already has a pending reply slot
    #[error("Duplicate caller: {0}")]
    DuplicateCaller(String),

    /// Caller-side wait expired before the reply arrived
    #[error("Timed out waiting for reply to {0}")]
    Timeout(String),

    /// ID claim retries exceeded for a table
    #[error("ID claim exhausted for table {table} after {attempts} attempts")]
    ClaimExhausted { table: String, attempts: u32 },

    /// Worker reported a scoring failure
    #[error("Classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Row violates a uniqueness constraint other than its claimed ID
    #[error("Already exists: {0}")]
    Duplicate(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
