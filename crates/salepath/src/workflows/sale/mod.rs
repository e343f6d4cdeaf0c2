//! Sale transaction phase lifecycle.
//!
//! `TransactionEngine` is the only writer of a transaction's phase. Each transition is checked
//! against the static `PhaseGraph`, then against the role-based `PermissionMatrix`, committed
//! with an optimistic compare-and-swap together with its audit record, and finally announced to
//! a best-effort `SideEffectDispatcher`.

pub mod audit;
pub mod domain;
pub mod engine;
pub mod error;
pub mod graph;
pub mod memory;
pub mod permissions;
pub mod repository;
pub mod router;
pub mod sequential;

#[cfg(test)]
mod tests;

pub use audit::{replay_phase, AuditReport, JsonlAuditStore, ReplayGap};
pub use domain::{
    ActorIdentity, ActorRole, Metadata, OpenTransaction, Phase, PipelineSummary, Transaction,
    TransactionFilter, TransactionId, TransitionRecord, TransitionRequest, TransitionResult,
    UnknownPhase, UnknownRole,
};
pub use engine::TransactionEngine;
pub use error::{ErrorKind, TransitionError};
pub use graph::{PhaseEdge, PhaseGraph};
pub use memory::InMemorySaleStore;
pub use permissions::{
    PermissionGrant, PermissionMatrix, PermissionRules, PermissionRulesError, RulesView,
    STANDARD_RULES_VERSION,
};
pub use repository::{
    AuditError, AuditStore, CasOutcome, CommitOutcome, DispatchError, PhaseChange,
    PhaseReachedEvent, RepositoryError, SaleStore, SideEffectDispatcher, StoreError,
    TransactionRepository,
};
pub use router::{transaction_router, TransitionBody, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
pub use sequential::SequentialStore;
