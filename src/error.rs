//! Error types for Annex.
//!
//! Annex uses a hierarchical error system:
//! - [`AnnexError`] is the top-level error returned by all public APIs
//! - Specific error types ([`ValidationError`], [`SnapshotError`]) provide detail
//!
//! # Error Handling Pattern
//! ```rust,ignore
//! use annex::{Annex, Config, Result};
//!
//! fn example(config: Config) -> Result<()> {
//!     let agent = Annex::open(config)?;
//!     // ... operations that may fail ...
//!     agent.close()?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Result type alias for Annex operations.
pub type Result<T> = std::result::Result<T, AnnexError>;

/// Top-level error enum for all Annex operations.
///
/// This is the only error type returned by public APIs.
/// Use pattern matching to handle specific error cases.
#[derive(Debug, Error)]
pub enum AnnexError {
    /// Input validation error (bad UUID, bad vector, bad config).
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] ValidationError),

    /// UUID is already committed or queued for insert.
    #[error("UUID already exists: {uuid} (conflicting timestamp {timestamp})")]
    AlreadyExists {
        /// The conflicting UUID.
        uuid: String,
        /// Timestamp of the rejected operation.
        timestamp: i64,
    },

    /// UUID is neither committed nor queued for insert.
    #[error("UUID not found: {uuid}")]
    NotFound {
        /// The missing UUID.
        uuid: String,
    },

    /// The agent is draining its queue for shutdown; mutations would be
    /// reordered against the terminal drain.
    #[error("Index is flushing; mutation rejected")]
    FlushingIndex,

    /// Update whose new vector equals the current one.
    #[error("Vector for {uuid} is unchanged")]
    SameVector {
        /// The UUID whose update was rejected.
        uuid: String,
    },

    /// Native index failure (graph construction, search internals).
    #[error("Internal error: {0}")]
    Internal(String),

    /// Storage engine error (redb, serialization).
    #[error("Storage error: {0}")]
    Storage(String),

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot magic/version/checksum failure.
    #[error("Corrupt snapshot: {0}")]
    Corrupt(#[from] SnapshotError),

    /// Operation raced the agent shutting down.
    #[error("Operation cancelled")]
    Cancelled,

    /// The native side could not allocate for an insert.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A drain completed but some individual ops failed.
    ///
    /// The failing ops are logged and counted; the batch is not
    /// re-queued. Only a graph build failure aborts a drain.
    #[error("Drain completed with {insert_failures} insert and {delete_failures} delete failure(s)")]
    PartialDrain {
        /// Queued inserts that failed to apply.
        insert_failures: usize,
        /// Queued deletes that failed to apply.
        delete_failures: usize,
    },

    /// Per-item errors from a multi operation.
    ///
    /// Sibling items are unaffected: each `(uuid, error)` pair reports
    /// one rejected element, everything else was applied.
    #[error("Batch operation failed for {} item(s)", .0.len())]
    Batch(Vec<(String, AnnexError)>),

    /// `start()` was called while the controller is already running.
    #[error("Background controller is already running")]
    AlreadyRunning,
}

impl AnnexError {
    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Creates a storage error with the given message.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Creates a not-found error for the given UUID.
    pub fn not_found(uuid: impl Into<String>) -> Self {
        Self::NotFound { uuid: uuid.into() }
    }

    /// Returns true if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this is an "already exists" error.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns true if this is a validation error.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// Returns true if this is a corrupt-snapshot error.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt(_))
    }

    /// Returns true if this is a storage error.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

// Conversions from redb error types. redb does not expose a stable
// error taxonomy worth mirroring, so everything maps to Storage.
impl From<redb::Error> for AnnexError {
    fn from(err: redb::Error) -> Self {
        AnnexError::Storage(err.to_string())
    }
}

impl From<redb::DatabaseError> for AnnexError {
    fn from(err: redb::DatabaseError) -> Self {
        AnnexError::Storage(err.to_string())
    }
}

impl From<redb::TransactionError> for AnnexError {
    fn from(err: redb::TransactionError) -> Self {
        AnnexError::Storage(err.to_string())
    }
}

impl From<redb::CommitError> for AnnexError {
    fn from(err: redb::CommitError) -> Self {
        AnnexError::Storage(format!("Commit failed: {}", err))
    }
}

impl From<redb::TableError> for AnnexError {
    fn from(err: redb::TableError) -> Self {
        AnnexError::Storage(format!("Table error: {}", err))
    }
}

impl From<redb::StorageError> for AnnexError {
    fn from(err: redb::StorageError) -> Self {
        AnnexError::Storage(format!("Storage error: {}", err))
    }
}

impl From<bincode::Error> for AnnexError {
    fn from(err: bincode::Error) -> Self {
        AnnexError::Storage(format!("Serialization error: {}", err))
    }
}

/// Validation errors for input data and configuration.
///
/// These errors indicate problems with data provided by the caller.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Vector dimension doesn't match the agent's configured dimension.
    #[error("Vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension from agent configuration.
        expected: usize,
        /// Actual dimension provided.
        got: usize,
    },

    /// A vector component is NaN or infinite.
    #[error("Vector component at index {index} is not finite")]
    NonFiniteComponent {
        /// Index of the offending component.
        index: usize,
    },

    /// The UUID is empty.
    #[error("UUID must not be empty")]
    EmptyUuid,

    /// The UUID exceeds the snapshot format's length limit.
    #[error("UUID too long: {got} bytes (max: {max} bytes)")]
    UuidTooLong {
        /// Actual UUID length in bytes.
        got: usize,
        /// Maximum allowed length in bytes.
        max: usize,
    },

    /// A field has an invalid value.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the invalid field.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },
}

impl ValidationError {
    /// Creates a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::DimensionMismatch { expected, got }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while reading a `kvs.snap` snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Invalid magic bytes.
    #[error("Invalid snapshot magic bytes")]
    InvalidMagic,

    /// Unsupported snapshot format version.
    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    /// CRC checksum mismatch.
    #[error("Checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the trailer.
        expected: u32,
        /// Checksum computed over the payload.
        actual: u32,
    },

    /// Data corruption or truncation.
    #[error("Corrupted snapshot: {0}")]
    Truncated(String),

    /// Two entries bind the same UUID.
    #[error("Duplicate UUID in snapshot: {0}")]
    DuplicateUuid(String),

    /// Two entries bind the same internal id.
    #[error("Duplicate internal id in snapshot: {0}")]
    DuplicateId(u32),
}
