use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{
    Metadata, Phase, Transaction, TransactionFilter, TransactionId, TransitionRecord,
};

/// Storage abstraction for transaction records with an explicit compare-and-swap.
pub trait TransactionRepository: Send + Sync {
    fn insert(&self, transaction: Transaction) -> Result<Transaction, RepositoryError>;
    fn get(&self, id: &TransactionId) -> Result<Option<Transaction>, RepositoryError>;
    fn list(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, RepositoryError>;

    /// Set `current_phase = target` only if the record is still at `expected`.
    fn compare_and_swap_phase(
        &self,
        id: &TransactionId,
        expected: Phase,
        target: Phase,
        metadata: &Metadata,
    ) -> Result<CasOutcome, RepositoryError>;

    /// Put `snapshot` back only if the record is still at `version`. Undoes a swap whose
    /// follow-up write failed. Returns `false` when the record has moved on.
    fn restore(&self, snapshot: &Transaction, version: u64) -> Result<bool, RepositoryError>;
}

/// Result of a conditional phase update.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The record as it was before the swap, and as it is now.
    Swapped {
        previous: Transaction,
        updated: Transaction,
    },
    /// No row changed: the record moved on, or vanished.
    Stale,
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Append-only per-transaction history.
pub trait AuditStore: Send + Sync {
    fn append(&self, record: &TransitionRecord) -> Result<(), AuditError>;
    /// Oldest first.
    fn history(&self, id: &TransactionId) -> Result<Vec<TransitionRecord>, AuditError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("failed to open audit log at {path}: {source}")]
    Open {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to append audit record: {0}")]
    Write(#[from] std::io::Error),
    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("audit store unavailable: {0}")]
    Unavailable(String),
}

/// One unit of work: the guarded phase update plus its audit record.
#[derive(Debug, Clone)]
pub struct PhaseChange {
    pub transaction_id: TransactionId,
    pub expected: Phase,
    pub target: Phase,
    pub metadata: Metadata,
    pub record: TransitionRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(Transaction),
    Stale,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Everything the engine needs from storage. `commit` must either apply both the phase
/// update and the audit append, or neither.
pub trait SaleStore: TransactionRepository + AuditStore {
    fn commit(&self, change: PhaseChange) -> Result<CommitOutcome, StoreError>;
}

/// Post-commit "phase reached" event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReachedEvent {
    pub transaction_id: TransactionId,
    pub from_phase: Phase,
    pub to_phase: Phase,
    pub transition_id: String,
    pub metadata: Metadata,
    pub occurred_at: DateTime<Utc>,
}

/// Outbound notification/milestone hook. Delivery guarantees belong to the implementor.
pub trait SideEffectDispatcher: Send + Sync {
    fn notify_phase_reached(&self, event: &PhaseReachedEvent) -> Result<(), DispatchError>;
}

/// Side-effect delivery failure. Logged by the engine, never surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("side-effect transport unavailable: {0}")]
    Transport(String),
}
