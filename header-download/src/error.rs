//! Error types for the header downloader.

use std::io;

use alloy_primitives::B256;
use thiserror::Error;

/// Main error type for the header downloader.
///
/// Only storage and insertion failures are fatal to a caller. Peer penalties and
/// structural rejections are returned as values by the operations that detect them.
#[derive(Debug, Error)]
pub enum HeaderDownloadError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Insert error: {0}")]
    Insert(#[from] InsertError),

    #[error("Hard tips error: {0}")]
    HardTips(#[from] HardTipsError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A segment could not be attached without breaking forest invariants.
///
/// The offending segment is dropped; the forest and the rest of the batch stay intact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("attachment tip {0} not found")]
    AttachmentTipNotFound(B256),

    #[error("anchor {0} not found")]
    AnchorNotFound(B256),

    #[error("cannot attach to preverified tip at height {height} that already has children")]
    PreverifiedWithChildren {
        height: u64,
    },

    #[error("new anchor too far in the past: {height}, latest header in db: {highest_in_db}")]
    AnchorTooFarInPast {
        height: u64,
        highest_in_db: u64,
    },

    #[error("too many anchors: {count}, limit {limit}")]
    TooManyAnchors {
        count: usize,
        limit: usize,
    },

    #[error("tip limit exceeded: {in_flight} in flight + {new} new > {limit}")]
    TipLimitExceeded {
        in_flight: usize,
        new: usize,
        limit: usize,
    },

    #[error("segment reaches genesis, which must come from storage")]
    GenesisSegment,
}

/// Storage-related errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Data not found: {0}")]
    NotFound(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Failures while flushing tips into storage. All of them abort the flush.
#[derive(Debug, Error)]
pub enum InsertError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("headers are unexpectedly unsorted, got {height} after {prev_height}")]
    Unsorted {
        height: u64,
        prev_height: u64,
    },

    #[error("parent header {hash} at height {height} not found")]
    MissingParent {
        hash: B256,
        height: u64,
    },

    #[error("total difficulty of {hash} at height {height} not found")]
    MissingTotalDifficulty {
        hash: B256,
        height: u64,
    },

    #[error("no common ancestor with the canonical chain below {height}")]
    NoCommonAncestor {
        height: u64,
    },

    #[error("genesis header cannot be inserted")]
    Genesis,
}

/// Returned by a seal verifier for a header that fails proof-of-work or signature checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("seal verification failed: {0}")]
pub struct SealError(pub String);

/// Hard-coded tip table errors.
#[derive(Debug, Error)]
pub enum HardTipsError {
    #[error("entry {index}: invalid hex: {reason}")]
    Hex {
        index: usize,
        reason: String,
    },

    #[error("entry {index}: {source}")]
    Decode {
        index: usize,
        source: StorageError,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than 0")]
    Zero(&'static str),

    #[error("{0} must be at least one second")]
    BelowOneSecond(&'static str),

    #[error("Invalid network name: {0}")]
    InvalidNetwork(String),
}

/// Logging-related errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("Subscriber initialization failed: {0}")]
    SubscriberInit(String),

    #[error("Log rotation failed: {0}")]
    RotationFailed(String),
}

impl HeaderDownloadError {
    /// Returns a static string representing the error category.
    pub fn category(&self) -> &'static str {
        match self {
            HeaderDownloadError::Storage(_) | HeaderDownloadError::Io(_) => "storage",
            HeaderDownloadError::Insert(InsertError::Storage(_)) => "storage",
            HeaderDownloadError::Insert(_) => "insert",
            HeaderDownloadError::HardTips(_) => "hard_tips",
            HeaderDownloadError::Config(_) => "config",
            HeaderDownloadError::Logging(_) => "logging",
        }
    }
}

/// Type alias for Result with HeaderDownloadError.
pub type Result<T> = std::result::Result<T, HeaderDownloadError>;

/// Type alias for storage operation results.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Type alias for flush results.
pub type InsertResult<T> = std::result::Result<T, InsertError>;

/// Type alias for logging operation results.
pub type LoggingResult<T> = std::result::Result<T, LoggingError>;
