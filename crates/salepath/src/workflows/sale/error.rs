use serde::Serialize;

use super::domain::{ActorRole, Phase, TransactionId};
use super::repository::{AuditError, RepositoryError, StoreError};

/// Failure taxonomy for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("transaction {transaction_id} not found")]
    NotFound { transaction_id: TransactionId },
    #[error("invalid request: {message}")]
    Validation { message: String },
    #[error("transaction {transaction_id}: no edge {from} -> {to} in the phase graph")]
    InvalidTransition {
        transaction_id: TransactionId,
        from: Phase,
        to: Phase,
    },
    #[error("transaction {transaction_id}: role {role} may not move {from} -> {to}")]
    PermissionDenied {
        transaction_id: TransactionId,
        role: ActorRole,
        from: Phase,
        to: Phase,
    },
    #[error("transaction {transaction_id}: expected phase {expected}, found {}", .actual.map_or("an unknown phase", Phase::code))]
    Conflict {
        transaction_id: TransactionId,
        expected: Phase,
        actual: Option<Phase>,
        to: Phase,
    },
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<RepositoryError> for TransitionError {
    fn from(value: RepositoryError) -> Self {
        Self::Storage(StoreError::Repository(value))
    }
}

impl From<AuditError> for TransitionError {
    fn from(value: AuditError) -> Self {
        Self::Storage(StoreError::Audit(value))
    }
}

/// Stable, transport-neutral error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    InvalidTransition,
    PermissionDenied,
    Conflict,
    Storage,
}

impl ErrorKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::InvalidTransition => "invalid_transition",
            Self::PermissionDenied => "permission_denied",
            Self::Conflict => "conflict",
            Self::Storage => "storage",
        }
    }
}

impl TransitionError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Only a stale `expected_current_phase` is safe to retry after reloading.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn transaction_id(&self) -> Option<&TransactionId> {
        match self {
            Self::NotFound { transaction_id }
            | Self::InvalidTransition { transaction_id, .. }
            | Self::PermissionDenied { transaction_id, .. }
            | Self::Conflict { transaction_id, .. } => Some(transaction_id),
            Self::Validation { .. } | Self::Storage(_) => None,
        }
    }

    /// Attempted `(from, to)` edge where one is known.
    pub fn edge(&self) -> Option<(Phase, Phase)> {
        match self {
            Self::InvalidTransition { from, to, .. } | Self::PermissionDenied { from, to, .. } => {
                Some((*from, *to))
            }
            Self::Conflict { expected, to, .. } => Some((*expected, *to)),
            _ => None,
        }
    }

    pub fn role(&self) -> Option<ActorRole> {
        match self {
            Self::PermissionDenied { role, .. } => Some(*role),
            _ => None,
        }
    }
}
