use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::audit::AuditReport;
use super::domain::{
    ActorIdentity, OpenTransaction, Phase, PipelineSummary, Transaction, TransactionFilter,
    TransactionId, TransitionRecord, TransitionRequest, TransitionResult,
};
use super::error::TransitionError;
use super::graph::PhaseGraph;
use super::permissions::PermissionMatrix;
use super::repository::{
    CommitOutcome, PhaseChange, PhaseReachedEvent, SaleStore, SideEffectDispatcher,
};

/// Sole writer of `current_phase`. Validates, commits, records, then notifies.
pub struct TransactionEngine<S, D> {
    store: Arc<S>,
    dispatcher: Arc<D>,
    graph: Arc<PhaseGraph>,
    permissions: Arc<PermissionMatrix>,
}

fn next_transaction_id() -> TransactionId {
    TransactionId(format!("txn-{}", Uuid::new_v4().simple()))
}

fn next_record_id() -> String {
    format!("trn-{}", Uuid::new_v4().simple())
}

fn require(field: &str, value: &str) -> Result<(), TransitionError> {
    if value.trim().is_empty() {
        return Err(TransitionError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

impl<S, D> TransactionEngine<S, D>
where
    S: SaleStore + 'static,
    D: SideEffectDispatcher + 'static,
{
    pub fn new(store: Arc<S>, dispatcher: Arc<D>) -> Self {
        Self::with_permissions(store, dispatcher, PermissionMatrix::standard())
    }

    pub fn with_permissions(
        store: Arc<S>,
        dispatcher: Arc<D>,
        permissions: PermissionMatrix,
    ) -> Self {
        Self {
            store,
            dispatcher,
            graph: Arc::new(PhaseGraph::standard()),
            permissions: Arc::new(permissions),
        }
    }

    pub fn graph(&self) -> &PhaseGraph {
        &self.graph
    }

    pub fn permissions(&self) -> &PermissionMatrix {
        &self.permissions
    }

    /// Record a new buyer enquiry. The transaction starts at `ENQUIRY` with no history.
    pub fn open(
        &self,
        actor: &ActorIdentity,
        request: OpenTransaction,
    ) -> Result<Transaction, TransitionError> {
        require("actorId", &actor.actor_id)?;
        require("unitId", &request.unit_id)?;
        require("buyerId", &request.buyer_id)?;
        require("developerId", &request.developer_id)?;

        let now = Utc::now();
        let transaction = Transaction {
            id: next_transaction_id(),
            unit_id: request.unit_id,
            buyer_id: request.buyer_id,
            selling_agent_id: request.selling_agent_id,
            solicitor_id: request.solicitor_id,
            developer_id: request.developer_id,
            current_phase: Phase::Enquiry,
            version: 1,
            metadata: request.metadata,
            created_at: now,
            updated_at: now,
        };

        let stored = self.store.insert(transaction)?;
        info!(
            transaction_id = %stored.id,
            unit_id = %stored.unit_id,
            actor_id = %actor.actor_id,
            role = %actor.actor_role,
            "sale transaction opened"
        );
        Ok(stored)
    }

    /// Advance a transaction by one edge.
    pub fn transition(
        &self,
        request: TransitionRequest,
    ) -> Result<TransitionResult, TransitionError> {
        self.try_transition(request).map_err(|error| {
            debug!(
                kind = error.kind().label(),
                transaction_id = ?error.transaction_id(),
                edge = ?error.edge(),
                %error,
                "transition rejected"
            );
            error
        })
    }

    fn try_transition(
        &self,
        request: TransitionRequest,
    ) -> Result<TransitionResult, TransitionError> {
        let TransitionRequest {
            transaction_id,
            actor,
            expected_current_phase,
            target_phase,
            notes,
            document_refs,
            metadata,
        } = request;

        require("actorId", &actor.actor_id)?;
        if document_refs.iter().any(|reference| reference.trim().is_empty()) {
            return Err(TransitionError::validation(
                "documentRefs must not contain empty identifiers",
            ));
        }

        let current = self
            .store
            .get(&transaction_id)?
            .ok_or_else(|| TransitionError::NotFound {
                transaction_id: transaction_id.clone(),
            })?;

        if current.current_phase != expected_current_phase {
            return Err(TransitionError::Conflict {
                transaction_id,
                expected: expected_current_phase,
                actual: Some(current.current_phase),
                to: target_phase,
            });
        }

        let from = current.current_phase;
        if !self.graph.is_valid_edge(from, target_phase) {
            return Err(TransitionError::InvalidTransition {
                transaction_id,
                from,
                to: target_phase,
            });
        }

        if !self
            .permissions
            .is_permitted(&self.graph, actor.actor_role, from, target_phase)
        {
            return Err(TransitionError::PermissionDenied {
                transaction_id,
                role: actor.actor_role,
                from,
                to: target_phase,
            });
        }

        let record = TransitionRecord {
            id: next_record_id(),
            transaction_id: transaction_id.clone(),
            from_phase: from,
            to_phase: target_phase,
            actor_id: actor.actor_id,
            actor_role: actor.actor_role,
            timestamp: Utc::now(),
            notes: notes.filter(|notes| !notes.trim().is_empty()),
            document_refs,
            rules_version: self.permissions.version().to_string(),
        };

        let change = PhaseChange {
            transaction_id: transaction_id.clone(),
            expected: from,
            target: target_phase,
            metadata: metadata.clone(),
            record: record.clone(),
        };

        let transaction = match self.store.commit(change)? {
            CommitOutcome::Committed(transaction) => transaction,
            CommitOutcome::Stale => {
                let actual = self
                    .store
                    .get(&transaction_id)
                    .ok()
                    .flatten()
                    .map(|transaction| transaction.current_phase);
                return Err(TransitionError::Conflict {
                    transaction_id,
                    expected: expected_current_phase,
                    actual,
                    to: target_phase,
                });
            }
        };

        info!(
            transaction_id = %transaction.id,
            from = %from,
            to = %target_phase,
            role = %record.actor_role,
            record_id = %record.id,
            version = transaction.version,
            "phase transition committed"
        );

        self.dispatch(PhaseReachedEvent {
            transaction_id: transaction.id.clone(),
            from_phase: from,
            to_phase: target_phase,
            transition_id: record.id.clone(),
            metadata,
            occurred_at: record.timestamp,
        });

        Ok(TransitionResult {
            transaction,
            transition: record,
        })
    }

    fn dispatch(&self, event: PhaseReachedEvent) {
        if let Err(error) = self.dispatcher.notify_phase_reached(&event) {
            warn!(
                transaction_id = %event.transaction_id,
                to = %event.to_phase,
                %error,
                "phase reached notification failed; transition stands"
            );
        }
    }

    pub fn get(&self, transaction_id: &TransactionId) -> Result<Transaction, TransitionError> {
        self.store
            .get(transaction_id)?
            .ok_or_else(|| TransitionError::NotFound {
                transaction_id: transaction_id.clone(),
            })
    }

    pub fn list(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, TransitionError> {
        Ok(self.store.list(filter)?)
    }

    pub fn summary(&self) -> Result<PipelineSummary, TransitionError> {
        let transactions = self.store.list(&TransactionFilter::default())?;
        Ok(PipelineSummary::from_transactions(&transactions))
    }

    /// Oldest first; read-only, for reporting.
    pub fn history(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<TransitionRecord>, TransitionError> {
        self.get(transaction_id)?;
        Ok(self.store.history(transaction_id)?)
    }

    pub fn verify_audit(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<AuditReport, TransitionError> {
        let transaction = self.get(transaction_id)?;
        let records = self.store.history(transaction_id)?;
        let report = AuditReport::build(transaction.id, transaction.current_phase, &records);
        if !report.consistent {
            warn!(
                transaction_id = %report.transaction_id,
                current = %report.current_phase,
                replayed = ?report.replayed_phase,
                "audit history does not reconstruct the current phase"
            );
        }
        Ok(report)
    }
}
