//! Error types for scene reconciliation.
//!
//! Data-shaped problems (stale writes, malformed records, writes to deleted
//! entities) are result values, not errors. What lands here is either a
//! resource limit or a wiring mistake.

use meridian_core::PoolError;
use thiserror::Error;

/// Wire encoding errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Output buffer could not be rented.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Destination span is smaller than the record.
    #[error("record needs {needed} bytes, span holds {available}")]
    BufferTooSmall {
        /// Bytes the record occupies.
        needed: usize,
        /// Bytes available in the span.
        available: usize,
    },

    /// Presized total disagrees with the messages being written.
    #[error("presized length {expected} does not match message total {actual}")]
    LengthMismatch {
        /// Caller-supplied total.
        expected: usize,
        /// Sum of message lengths.
        actual: usize,
    },
}

/// Command buffer misuse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Message synced into a buffer that was already finalized.
    #[error("command buffer is finalized, no more messages can be synced")]
    AlreadyFinalized,

    /// Buffer applied before `finalize_and_deserialize`.
    #[error("command buffer must be finalized before it is applied")]
    NotFinalized,

    /// Buffer payload copy could not be rented.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// TOML could not be parsed.
    #[error("failed to parse scene config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file could not be read.
    #[error("failed to read scene config: {0}")]
    Io(#[from] std::io::Error),

    /// A value is out of range.
    #[error("invalid scene config: {field} {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Errors from the scene host and runner.
#[derive(Error, Debug)]
pub enum SceneError {
    /// Batch could not be decoded or processed for lack of pool memory.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Response could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Command buffer misuse.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Host worker is gone.
    #[error("scene host disconnected")]
    Disconnected,

    /// Scene thread could not be spawned or panicked.
    #[error("scene thread failed: {0}")]
    Thread(String),
}

/// Result type for encoding.
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type for command buffers.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for scene operations.
pub type SceneResult<T> = Result<T, SceneError>;
