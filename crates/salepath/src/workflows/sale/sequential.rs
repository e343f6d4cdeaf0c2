use std::sync::Arc;

use tracing::{error, warn};

use super::domain::{
    Metadata, Phase, Transaction, TransactionFilter, TransactionId, TransitionRecord,
};
use super::repository::{
    AuditError, AuditStore, CasOutcome, CommitOutcome, PhaseChange, RepositoryError, SaleStore,
    StoreError, TransactionRepository,
};

/// Pairs a repository with an audit store that cannot share a database transaction.
///
/// The phase swap is written first. If the audit append then fails, the record is restored to
/// its pre-swap snapshot (phase, metadata, version, timestamps) and the commit is reported as
/// failed. A failed restore leaves the phase committed without its audit entry; that is logged
/// at `error` for manual reconciliation.
pub struct SequentialStore<R, A> {
    repository: Arc<R>,
    audit: Arc<A>,
}

impl<R, A> SequentialStore<R, A>
where
    R: TransactionRepository,
    A: AuditStore,
{
    pub fn new(repository: Arc<R>, audit: Arc<A>) -> Self {
        Self { repository, audit }
    }

    fn compensate(
        &self,
        change: &PhaseChange,
        previous: &Transaction,
        updated: &Transaction,
        cause: &AuditError,
    ) {
        match self.repository.restore(previous, updated.version) {
            Ok(true) => {
                warn!(
                    transaction_id = %change.transaction_id,
                    from = %change.expected,
                    to = %change.target,
                    error = %cause,
                    "audit append failed; phase change reverted"
                );
            }
            Ok(false) => {
                error!(
                    transaction_id = %change.transaction_id,
                    from = %change.expected,
                    to = %change.target,
                    record_id = %change.record.id,
                    error = %cause,
                    "audit inconsistency: phase committed without audit record and moved on before revert; manual reconciliation required"
                );
            }
            Err(revert_error) => {
                error!(
                    transaction_id = %change.transaction_id,
                    from = %change.expected,
                    to = %change.target,
                    record_id = %change.record.id,
                    error = %cause,
                    revert_error = %revert_error,
                    "audit inconsistency: phase committed without audit record; manual reconciliation required"
                );
            }
        }
    }
}

impl<R, A> TransactionRepository for SequentialStore<R, A>
where
    R: TransactionRepository,
    A: AuditStore,
{
    fn insert(&self, transaction: Transaction) -> Result<Transaction, RepositoryError> {
        self.repository.insert(transaction)
    }

    fn get(&self, id: &TransactionId) -> Result<Option<Transaction>, RepositoryError> {
        self.repository.get(id)
    }

    fn list(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, RepositoryError> {
        self.repository.list(filter)
    }

    fn compare_and_swap_phase(
        &self,
        id: &TransactionId,
        expected: Phase,
        target: Phase,
        metadata: &Metadata,
    ) -> Result<CasOutcome, RepositoryError> {
        self.repository
            .compare_and_swap_phase(id, expected, target, metadata)
    }

    fn restore(&self, snapshot: &Transaction, version: u64) -> Result<bool, RepositoryError> {
        self.repository.restore(snapshot, version)
    }
}

impl<R, A> AuditStore for SequentialStore<R, A>
where
    R: TransactionRepository,
    A: AuditStore,
{
    fn append(&self, record: &TransitionRecord) -> Result<(), AuditError> {
        self.audit.append(record)
    }

    fn history(&self, id: &TransactionId) -> Result<Vec<TransitionRecord>, AuditError> {
        self.audit.history(id)
    }
}

impl<R, A> SaleStore for SequentialStore<R, A>
where
    R: TransactionRepository,
    A: AuditStore,
{
    fn commit(&self, change: PhaseChange) -> Result<CommitOutcome, StoreError> {
        let (previous, updated) = match self.repository.compare_and_swap_phase(
            &change.transaction_id,
            change.expected,
            change.target,
            &change.metadata,
        )? {
            CasOutcome::Swapped { previous, updated } => (previous, updated),
            CasOutcome::Stale => return Ok(CommitOutcome::Stale),
        };

        if let Err(cause) = self.audit.append(&change.record) {
            self.compensate(&change, &previous, &updated, &cause);
            return Err(StoreError::Audit(cause));
        }

        Ok(CommitOutcome::Committed(updated))
    }
}
