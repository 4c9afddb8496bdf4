// Aggregator errors.
//
// Only misuse of the aggregator's lifecycle reaches callers. Per-source
// failures are SourceErrors: logged and reflected in the summary's health,
// never returned.

use super::models::{SourceKind, SourceStatus, UserId};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregatorError {
    #[error("invalid state: aggregator is active for {active}; stop it before starting for {requested}")]
    InvalidState { active: UserId, requested: UserId },

    #[error("invalid state: cannot start for an empty user id")]
    EmptyUserId,

    #[error(transparent)]
    InvalidUserId(#[from] InvalidUserId),
}

/// A user id that can't be used as a document key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidUserId {
    #[error("user id is empty")]
    Empty,

    #[error("user id {id:?} contains reserved character '{reserved}'")]
    ReservedChar { id: String, reserved: char },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The live query could not be opened, or broke while open.
    #[error("{source_kind} subscription failed: {error}")]
    SubscriptionFailure {
        source_kind: SourceKind,
        error: StoreError,
    },

    /// The following-set lookup failed, so the posts query can't be built.
    #[error("following list unavailable: {error}")]
    DependencyUnavailable { error: StoreError },
}

impl SourceError {
    pub fn store_error(&self) -> &StoreError {
        match self {
            SourceError::SubscriptionFailure { error, .. } => error,
            SourceError::DependencyUnavailable { error } => error,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.store_error().is_transient()
    }

    /// How this failure shows up in the summary.
    ///
    /// `retrying` is whether the backend's policy granted another attempt.
    pub fn status(&self, retrying: bool) -> SourceStatus {
        let reason = self.store_error().to_string();
        match self {
            SourceError::DependencyUnavailable { .. } => SourceStatus::Unavailable { reason },
            SourceError::SubscriptionFailure { .. } if retrying => SourceStatus::Stale { reason },
            SourceError::SubscriptionFailure { .. } => SourceStatus::Failed { reason },
        }
    }
}
