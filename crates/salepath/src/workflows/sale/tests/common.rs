use std::sync::{Arc, Mutex};

use axum::response::Response;
use serde_json::Value;

use crate::workflows::sale::domain::{
    ActorIdentity, ActorRole, Metadata, OpenTransaction, Phase, Transaction, TransactionFilter,
    TransactionId, TransitionRecord, TransitionRequest,
};
use crate::workflows::sale::engine::TransactionEngine;
use crate::workflows::sale::memory::InMemorySaleStore;
use crate::workflows::sale::repository::{
    AuditError, AuditStore, CasOutcome, CommitOutcome, DispatchError, PhaseChange,
    PhaseReachedEvent, RepositoryError, SaleStore, SideEffectDispatcher, StoreError,
    TransactionRepository,
};

/// Admin route from `ENQUIRY` to every phase.
pub(super) const FORWARD_PATH: [Phase; 11] = [
    Phase::Enquiry,
    Phase::ViewingScheduled,
    Phase::Viewed,
    Phase::Reservation,
    Phase::ContractIssued,
    Phase::ContractSigned,
    Phase::DepositPaid,
    Phase::MortgageApproved,
    Phase::Closing,
    Phase::Completed,
    Phase::HandedOver,
];

pub(super) fn actor(role: ActorRole) -> ActorIdentity {
    let id = match role {
        ActorRole::Buyer => "buyer-001",
        ActorRole::Agent => "agent-014",
        ActorRole::Solicitor => "solicitor-203",
        ActorRole::Developer => "developer-fitzgerald",
        ActorRole::Admin => "admin-ops",
    };
    ActorIdentity::new(id, role)
}

pub(super) fn open_request() -> OpenTransaction {
    OpenTransaction {
        unit_id: "fitzgerald-gardens-unit-12".to_string(),
        buyer_id: "buyer-001".to_string(),
        selling_agent_id: Some("agent-014".to_string()),
        solicitor_id: Some("solicitor-203".to_string()),
        developer_id: "developer-fitzgerald".to_string(),
        metadata: Metadata::new(),
    }
}

pub(super) type MemoryEngine<D> = TransactionEngine<InMemorySaleStore, D>;

pub(super) fn build_engine() -> (
    MemoryEngine<MemoryDispatcher>,
    Arc<InMemorySaleStore>,
    Arc<MemoryDispatcher>,
) {
    let store = Arc::new(InMemorySaleStore::default());
    let dispatcher = Arc::new(MemoryDispatcher::default());
    let engine = TransactionEngine::new(store.clone(), dispatcher.clone());
    (engine, store, dispatcher)
}

pub(super) fn request(
    transaction: &Transaction,
    role: ActorRole,
    expected: Phase,
    target: Phase,
) -> TransitionRequest {
    TransitionRequest::new(transaction.id.clone(), actor(role), expected, target)
}

/// Open a transaction and walk it to `phase` as ADMIN.
pub(super) fn transaction_at<S, D>(engine: &TransactionEngine<S, D>, phase: Phase) -> Transaction
where
    S: SaleStore + 'static,
    D: SideEffectDispatcher + 'static,
{
    let mut transaction = engine
        .open(&actor(ActorRole::Agent), open_request())
        .expect("transaction opens");

    let path: Vec<Phase> = if phase == Phase::Cancelled {
        vec![Phase::Enquiry, Phase::Cancelled]
    } else {
        FORWARD_PATH
            .iter()
            .copied()
            .take_while(|step| *step != phase)
            .chain(std::iter::once(phase))
            .collect()
    };

    for pair in path.windows(2) {
        transaction = engine
            .transition(request(&transaction, ActorRole::Admin, pair[0], pair[1]))
            .expect("admin follows graph edges")
            .transaction;
    }
    assert_eq!(transaction.current_phase, phase);
    transaction
}

#[derive(Default)]
pub(super) struct MemoryDispatcher {
    events: Mutex<Vec<PhaseReachedEvent>>,
}

impl MemoryDispatcher {
    pub(super) fn events(&self) -> Vec<PhaseReachedEvent> {
        self.events.lock().expect("dispatcher mutex poisoned").clone()
    }
}

impl SideEffectDispatcher for MemoryDispatcher {
    fn notify_phase_reached(&self, event: &PhaseReachedEvent) -> Result<(), DispatchError> {
        self.events
            .lock()
            .expect("dispatcher mutex poisoned")
            .push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct FailingDispatcher;

impl SideEffectDispatcher for FailingDispatcher {
    fn notify_phase_reached(&self, _event: &PhaseReachedEvent) -> Result<(), DispatchError> {
        Err(DispatchError::Transport("smtp relay offline".to_string()))
    }
}

#[derive(Default)]
pub(super) struct FailingAudit;

impl AuditStore for FailingAudit {
    fn append(&self, _record: &TransitionRecord) -> Result<(), AuditError> {
        Err(AuditError::Unavailable("audit volume full".to_string()))
    }

    fn history(&self, _id: &TransactionId) -> Result<Vec<TransitionRecord>, AuditError> {
        Ok(Vec::new())
    }
}

/// Reads from an inner store but reports every commit as stale, as if another writer won.
pub(super) struct StaleCommitStore {
    pub(super) inner: InMemorySaleStore,
}

impl TransactionRepository for StaleCommitStore {
    fn insert(&self, transaction: Transaction) -> Result<Transaction, RepositoryError> {
        self.inner.insert(transaction)
    }

    fn get(&self, id: &TransactionId) -> Result<Option<Transaction>, RepositoryError> {
        self.inner.get(id)
    }

    fn list(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, RepositoryError> {
        self.inner.list(filter)
    }

    fn compare_and_swap_phase(
        &self,
        _id: &TransactionId,
        _expected: Phase,
        _target: Phase,
        _metadata: &Metadata,
    ) -> Result<CasOutcome, RepositoryError> {
        Ok(CasOutcome::Stale)
    }

    fn restore(&self, _snapshot: &Transaction, _version: u64) -> Result<bool, RepositoryError> {
        Ok(false)
    }
}

impl AuditStore for StaleCommitStore {
    fn append(&self, record: &TransitionRecord) -> Result<(), AuditError> {
        self.inner.append(record)
    }

    fn history(&self, id: &TransactionId) -> Result<Vec<TransitionRecord>, AuditError> {
        self.inner.history(id)
    }
}

impl SaleStore for StaleCommitStore {
    fn commit(&self, _change: PhaseChange) -> Result<CommitOutcome, StoreError> {
        Ok(CommitOutcome::Stale)
    }
}

pub(super) struct UnavailableStore;

impl TransactionRepository for UnavailableStore {
    fn insert(&self, _transaction: Transaction) -> Result<Transaction, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn get(&self, _id: &TransactionId) -> Result<Option<Transaction>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn list(&self, _filter: &TransactionFilter) -> Result<Vec<Transaction>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn compare_and_swap_phase(
        &self,
        _id: &TransactionId,
        _expected: Phase,
        _target: Phase,
        _metadata: &Metadata,
    ) -> Result<CasOutcome, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn restore(&self, _snapshot: &Transaction, _version: u64) -> Result<bool, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

impl AuditStore for UnavailableStore {
    fn append(&self, _record: &TransitionRecord) -> Result<(), AuditError> {
        Err(AuditError::Unavailable("database offline".to_string()))
    }

    fn history(&self, _id: &TransactionId) -> Result<Vec<TransitionRecord>, AuditError> {
        Err(AuditError::Unavailable("database offline".to_string()))
    }
}

impl SaleStore for UnavailableStore {
    fn commit(&self, _change: PhaseChange) -> Result<CommitOutcome, StoreError> {
        Err(StoreError::Repository(RepositoryError::Unavailable(
            "database offline".to_string(),
        )))
    }
}

#[derive(Debug, Clone, Copy)]
pub(super) enum UndoFailure {
    /// Another writer moved the record on before the undo.
    Moved,
    /// The repository went away before the undo.
    Offline,
}

/// Delegates to an in-memory store, except that `restore` always fails.
pub(super) struct UndoFailingRepository {
    pub(super) inner: InMemorySaleStore,
    pub(super) failure: UndoFailure,
}

impl TransactionRepository for UndoFailingRepository {
    fn insert(&self, transaction: Transaction) -> Result<Transaction, RepositoryError> {
        self.inner.insert(transaction)
    }

    fn get(&self, id: &TransactionId) -> Result<Option<Transaction>, RepositoryError> {
        self.inner.get(id)
    }

    fn list(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, RepositoryError> {
        self.inner.list(filter)
    }

    fn compare_and_swap_phase(
        &self,
        id: &TransactionId,
        expected: Phase,
        target: Phase,
        metadata: &Metadata,
    ) -> Result<CasOutcome, RepositoryError> {
        self.inner
            .compare_and_swap_phase(id, expected, target, metadata)
    }

    fn restore(&self, _snapshot: &Transaction, _version: u64) -> Result<bool, RepositoryError> {
        match self.failure {
            UndoFailure::Moved => Ok(false),
            UndoFailure::Offline => Err(RepositoryError::Unavailable(
                "connection reset during undo".to_string(),
            )),
        }
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
