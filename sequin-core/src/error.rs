//! Error types for the coordination service and the recipes built on it.

use thiserror::Error;

use crate::types::SessionId;

pub type CoordResult<T> = Result<T, CoordError>;

/// Errors reported by a [`CoordinationClient`](crate::infrastructure::CoordinationClient).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    #[error("node already exists: {0}")]
    NodeExists(String),
    #[error("no node: {0}")]
    NoNode(String),
    #[error("bad version for {path}: expected {expected}, found {actual}")]
    BadVersion {
        path: String,
        expected: u32,
        actual: u32,
    },
    #[error("node has children: {0}")]
    NotEmpty(String),
    #[error("ephemeral nodes may not have children: {0}")]
    NoChildrenForEphemerals(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("connection to coordination service lost")]
    ConnectionLoss,
    #[error("session {0} expired")]
    SessionExpired(SessionId),
    #[error("storage error: {0}")]
    Storage(String),
}

impl CoordError {
    /// Benign races between independent participants: someone else created
    /// the node first, deleted it first, or changed it first.
    pub fn is_race_lost(&self) -> bool {
        matches!(
            self,
            CoordError::NodeExists(_) | CoordError::NoNode(_) | CoordError::BadVersion { .. }
        )
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for CoordError {
    fn from(e: rusqlite::Error) -> Self {
        CoordError::Storage(e.to_string())
    }
}

/// Errors raised while encoding or decoding queue payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("failed to encode payload: {0}")]
    Encode(String),
    #[error("failed to decode payload: {0}")]
    Decode(String),
    #[error("unsupported payload format version {0}")]
    UnsupportedVersion(u8),
}

/// Errors surfaced by [`FairLock`](crate::lock::FairLock) and
/// [`DistributedQueue`](crate::queue::DistributedQueue).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecipeError {
    #[error("coordination service unavailable")]
    ServiceUnavailable,
    #[error("wait cancelled")]
    Cancelled,
    #[error("coordination session lost")]
    SessionLost,
    #[error("serialization error: {0}")]
    Serialization(#[from] CodecError),
    #[error("lock is not held by this instance")]
    NotHeld,
    #[error("invalid recipe config: {0}")]
    InvalidConfig(String),
    #[error("coordination error: {0}")]
    Coordination(CoordError),
}

impl From<CoordError> for RecipeError {
    fn from(e: CoordError) -> Self {
        match e {
            CoordError::ConnectionLoss => RecipeError::ServiceUnavailable,
            CoordError::SessionExpired(_) => RecipeError::SessionLost,
            other => RecipeError::Coordination(other),
        }
    }
}
