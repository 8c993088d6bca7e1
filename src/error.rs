//! Error types for the epochdb engine
//!
//! One crate-wide error enum covering configuration, storage, index and
//! wire protocol failures.

use thiserror::Error;

/// Errors that can occur anywhere in the engine
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration (e.g. duration not a multiple of resolution)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database path or index item already exists
    #[error("Already exists: {0}")]
    Exists(String),

    /// Range read with end <= start
    #[error("Invalid time range: end must be greater than start")]
    InvalidRange,

    /// Timestamp beyond the epoch admission horizon
    #[error("Timestamp is set to a future time")]
    FutureTimestamp,

    /// Wildcard field where none is permitted
    #[error("Wildcard fields are not allowed here")]
    Wildcard,

    /// Exact index lookup miss
    #[error("Requested item is not available in the index")]
    ItemNotFound,

    /// Mutation attempted on a read-only index or block store
    #[error("Cannot write to a read-only store")]
    ReadOnlyStore,

    /// On-disk record malformed (bad length, undecodable payload, ...)
    #[error("Corrupt log: {0}")]
    CorruptLog(String),

    /// Write did not cover the expected number of bytes
    #[error("Short write: byte count does not match data size")]
    ShortWrite,

    /// Position or row outside the configured geometry
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    /// Wire decoder found an out-of-range length or bad wire type
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Serialization/deserialization of a persisted record failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// System clock unavailable or before the unix epoch
    #[error("Clock error: {0}")]
    Clock(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;
