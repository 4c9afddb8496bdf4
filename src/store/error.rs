// Store errors — the failure vocabulary shared by every DocumentStore backend.
//
// Errors are Clone because one backend failure can be fanned out to several
// live listeners at once.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad category of a store failure. Callers branch on this, not on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    /// Connectivity or backend availability problem. Worth retrying.
    Unavailable,
    /// The caller may not read or write the requested collection.
    PermissionDenied,
    /// The query or write was malformed.
    InvalidQuery,
    /// A document the caller required does not exist.
    NotFound,
    /// The backing storage failed (disk, SQLite, corrupt JSON).
    Storage,
    /// A batch precondition did not hold at commit time; nothing was written.
    FailedPrecondition,
}

impl StoreErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreErrorKind::Unavailable => "unavailable",
            StoreErrorKind::PermissionDenied => "permission denied",
            StoreErrorKind::InvalidQuery => "invalid query",
            StoreErrorKind::NotFound => "not found",
            StoreErrorKind::Storage => "storage failure",
            StoreErrorKind::FailedPrecondition => "failed precondition",
        }
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Unavailable, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::PermissionDenied, message)
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::InvalidQuery, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Storage, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::FailedPrecondition, message)
    }

    /// Only connectivity failures are retried; everything else is a hard failure.
    pub fn is_transient(&self) -> bool {
        self.kind == StoreErrorKind::Unavailable
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::storage(format!("malformed document JSON: {e}"))
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::storage(e.to_string())
    }
}
