use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use super::domain::{Metadata, Phase, Transaction, TransactionFilter, TransactionId, TransitionRecord};
use super::repository::{
    AuditError, AuditStore, CasOutcome, CommitOutcome, PhaseChange, RepositoryError, SaleStore,
    StoreError, TransactionRepository,
};

/// Process-local store. Records and history share one lock, so `commit` is atomic.
#[derive(Default, Clone)]
pub struct InMemorySaleStore {
    state: Arc<Mutex<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    transactions: HashMap<TransactionId, Transaction>,
    order: Vec<TransactionId>,
    history: HashMap<TransactionId, Vec<TransitionRecord>>,
}

impl StoreState {
    fn swap_phase(
        &mut self,
        id: &TransactionId,
        expected: Phase,
        target: Phase,
        metadata: &Metadata,
    ) -> Option<(Transaction, Transaction)> {
        let transaction = self.transactions.get_mut(id)?;
        if transaction.current_phase != expected {
            return None;
        }
        let previous = transaction.clone();
        transaction.current_phase = target;
        transaction.version += 1;
        transaction
            .metadata
            .extend(metadata.iter().map(|(key, value)| (key.clone(), value.clone())));
        transaction.updated_at = Utc::now();
        Some((previous, transaction.clone()))
    }
}

impl InMemorySaleStore {
    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("sale store lock poisoned".to_string()))
    }
}

impl TransactionRepository for InMemorySaleStore {
    fn insert(&self, transaction: Transaction) -> Result<Transaction, RepositoryError> {
        let mut state = self.lock()?;
        if state.transactions.contains_key(&transaction.id) {
            return Err(RepositoryError::Conflict);
        }
        state.order.push(transaction.id.clone());
        state
            .transactions
            .insert(transaction.id.clone(), transaction.clone());
        Ok(transaction)
    }

    fn get(&self, id: &TransactionId) -> Result<Option<Transaction>, RepositoryError> {
        Ok(self.lock()?.transactions.get(id).cloned())
    }

    fn list(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.transactions.get(id))
            .filter(|transaction| filter.matches(transaction))
            .cloned()
            .collect())
    }

    fn compare_and_swap_phase(
        &self,
        id: &TransactionId,
        expected: Phase,
        target: Phase,
        metadata: &Metadata,
    ) -> Result<CasOutcome, RepositoryError> {
        let mut state = self.lock()?;
        Ok(match state.swap_phase(id, expected, target, metadata) {
            Some((previous, updated)) => CasOutcome::Swapped { previous, updated },
            None => CasOutcome::Stale,
        })
    }

    fn restore(&self, snapshot: &Transaction, version: u64) -> Result<bool, RepositoryError> {
        let mut state = self.lock()?;
        match state.transactions.get_mut(&snapshot.id) {
            Some(current) if current.version == version => {
                *current = snapshot.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl AuditStore for InMemorySaleStore {
    fn append(&self, record: &TransitionRecord) -> Result<(), AuditError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| AuditError::Unavailable("sale store lock poisoned".to_string()))?;
        state
            .history
            .entry(record.transaction_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn history(&self, id: &TransactionId) -> Result<Vec<TransitionRecord>, AuditError> {
        let state = self
            .state
            .lock()
            .map_err(|_| AuditError::Unavailable("sale store lock poisoned".to_string()))?;
        Ok(state.history.get(id).cloned().unwrap_or_default())
    }
}

impl SaleStore for InMemorySaleStore {
    fn commit(&self, change: PhaseChange) -> Result<CommitOutcome, StoreError> {
        let mut state = self.lock()?;
        let Some((_, transaction)) = state.swap_phase(
            &change.transaction_id,
            change.expected,
            change.target,
            &change.metadata,
        ) else {
            return Ok(CommitOutcome::Stale);
        };
        state
            .history
            .entry(change.transaction_id)
            .or_default()
            .push(change.record);
        Ok(CommitOutcome::Committed(transaction))
    }
}
