//! Error types for the depot.

use crate::types::{HolderId, NamespaceId, Version};
use thiserror::Error;

/// Main error type for depot operations.
///
/// Ledger, session and lock operations report failures as values; nothing
/// in the crate panics on a failed take or a refused lock.
#[derive(Debug, Error)]
pub enum DepotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Namespace {namespace} is locked by holder {holder}")]
    LockConflict {
        namespace: NamespaceId,
        holder: HolderId,
    },

    #[error("Takeover of {namespace} requested; repeat the request to confirm")]
    TakeoverPending { namespace: NamespaceId },

    #[error("Holder {holder} does not hold the lock on {namespace}")]
    NotLockHolder {
        namespace: NamespaceId,
        holder: HolderId,
    },

    #[error("Insufficient quantity in {namespace}: requested {requested}, available {available}")]
    InsufficientQuantity {
        namespace: NamespaceId,
        requested: u64,
        available: u64,
    },

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("No open session for namespace {0}")]
    NoSession(NamespaceId),

    #[error("Previous page load is still settling")]
    PageLoadInFlight,

    #[error("Version gap in {namespace}: expected previous version {expected:?}, got {got:?}")]
    VersionGap {
        namespace: NamespaceId,
        expected: Version,
        got: Version,
    },

    #[error("Persisted holder not ready: {0}")]
    HolderNotReady(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Holder directory is locked by another process")]
    Locked,
}

impl From<serde_json::Error> for DepotError {
    fn from(e: serde_json::Error) -> Self {
        DepotError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for DepotError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        DepotError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for DepotError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        DepotError::Decode(e.to_string())
    }
}

/// Result type for depot operations.
pub type Result<T> = std::result::Result<T, DepotError>;
