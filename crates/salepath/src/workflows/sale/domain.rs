use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Legal/financial stage of a property sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Enquiry,
    ViewingScheduled,
    Viewed,
    Reservation,
    ContractIssued,
    ContractSigned,
    DepositPaid,
    MortgageApproved,
    Closing,
    Completed,
    HandedOver,
    Cancelled,
}

impl Phase {
    pub const fn ordered() -> [Self; 12] {
        [
            Self::Enquiry,
            Self::ViewingScheduled,
            Self::Viewed,
            Self::Reservation,
            Self::ContractIssued,
            Self::ContractSigned,
            Self::DepositPaid,
            Self::MortgageApproved,
            Self::Closing,
            Self::Completed,
            Self::HandedOver,
            Self::Cancelled,
        ]
    }

    /// Wire literal, e.g. `CONTRACT_SIGNED`.
    pub const fn code(self) -> &'static str {
        match self {
            Self::Enquiry => "ENQUIRY",
            Self::ViewingScheduled => "VIEWING_SCHEDULED",
            Self::Viewed => "VIEWED",
            Self::Reservation => "RESERVATION",
            Self::ContractIssued => "CONTRACT_ISSUED",
            Self::ContractSigned => "CONTRACT_SIGNED",
            Self::DepositPaid => "DEPOSIT_PAID",
            Self::MortgageApproved => "MORTGAGE_APPROVED",
            Self::Closing => "CLOSING",
            Self::Completed => "COMPLETED",
            Self::HandedOver => "HANDED_OVER",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Enquiry => "Enquiry",
            Self::ViewingScheduled => "Viewing Scheduled",
            Self::Viewed => "Viewed",
            Self::Reservation => "Reservation",
            Self::ContractIssued => "Contract Issued",
            Self::ContractSigned => "Contract Signed",
            Self::DepositPaid => "Deposit Paid",
            Self::MortgageApproved => "Mortgage Approved",
            Self::Closing => "Closing",
            Self::Completed => "Completed",
            Self::HandedOver => "Handed Over",
            Self::Cancelled => "Cancelled",
        }
    }

    /// No outgoing edges.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::HandedOver | Self::Cancelled)
    }

    pub const fn is_completed(self) -> bool {
        matches!(self, Self::Completed | Self::HandedOver)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Raised when a phase literal does not name a known phase.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown phase '{0}'")]
pub struct UnknownPhase(pub String);

impl FromStr for Phase {
    type Err = UnknownPhase;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ordered()
            .into_iter()
            .find(|phase| phase.code() == normalized)
            .ok_or_else(|| UnknownPhase(value.to_string()))
    }
}

/// Role of an authenticated actor, as asserted by the upstream identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    Buyer,
    Agent,
    Solicitor,
    Developer,
    Admin,
}

impl ActorRole {
    pub const fn ordered() -> [Self; 5] {
        [
            Self::Buyer,
            Self::Agent,
            Self::Solicitor,
            Self::Developer,
            Self::Admin,
        ]
    }

    pub const fn code(self) -> &'static str {
        match self {
            Self::Buyer => "BUYER",
            Self::Agent => "AGENT",
            Self::Solicitor => "SOLICITOR",
            Self::Developer => "DEVELOPER",
            Self::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown actor role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for ActorRole {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ordered()
            .into_iter()
            .find(|role| role.code() == normalized)
            .ok_or_else(|| UnknownRole(value.to_string()))
    }
}

/// Already-verified identity of the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorIdentity {
    pub actor_id: String,
    pub actor_role: ActorRole,
}

impl ActorIdentity {
    pub fn new(actor_id: impl Into<String>, actor_role: ActorRole) -> Self {
        Self {
            actor_id: actor_id.into(),
            actor_role,
        }
    }
}

/// Identifier wrapper for sale transactions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub String);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Phase-specific data owned by collaborators (deposit amount, lender, ...).
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// One buyer-unit sale process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    pub unit_id: String,
    pub buyer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selling_agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solicitor_id: Option<String>,
    pub developer_id: String,
    pub current_phase: Phase,
    pub version: u64,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input recorded when a buyer enquiry first arrives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenTransaction {
    pub unit_id: String,
    pub buyer_id: String,
    #[serde(default)]
    pub selling_agent_id: Option<String>,
    #[serde(default)]
    pub solicitor_id: Option<String>,
    pub developer_id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Immutable audit entry for one committed phase change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    pub id: String,
    pub transaction_id: TransactionId,
    pub from_phase: Phase,
    pub to_phase: Phase,
    pub actor_id: String,
    pub actor_role: ActorRole,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub document_refs: Vec<String>,
    pub rules_version: String,
}

/// Caller intent for a single `transition()` call.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest {
    pub transaction_id: TransactionId,
    pub actor: ActorIdentity,
    pub expected_current_phase: Phase,
    pub target_phase: Phase,
    pub notes: Option<String>,
    pub document_refs: Vec<String>,
    pub metadata: Metadata,
}

impl TransitionRequest {
    pub fn new(
        transaction_id: TransactionId,
        actor: ActorIdentity,
        expected_current_phase: Phase,
        target_phase: Phase,
    ) -> Self {
        Self {
            transaction_id,
            actor,
            expected_current_phase,
            target_phase,
            notes: None,
            document_refs: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_document(mut self, document_ref: impl Into<String>) -> Self {
        self.document_refs.push(document_ref.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Successful outcome of `transition()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResult {
    pub transaction: Transaction,
    pub transition: TransitionRecord,
}

/// Listing filter; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    pub phase: Option<Phase>,
    pub buyer_id: Option<String>,
    pub developer_id: Option<String>,
}

impl TransactionFilter {
    pub fn matches(&self, transaction: &Transaction) -> bool {
        self.phase
            .map_or(true, |phase| transaction.current_phase == phase)
            && self
                .buyer_id
                .as_deref()
                .map_or(true, |buyer| transaction.buyer_id == buyer)
            && self
                .developer_id
                .as_deref()
                .map_or(true, |developer| transaction.developer_id == developer)
    }
}

/// Pipeline counts across all transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSummary {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub by_phase: BTreeMap<Phase, usize>,
}

impl PipelineSummary {
    pub fn from_transactions<'a>(transactions: impl IntoIterator<Item = &'a Transaction>) -> Self {
        let mut summary = Self::default();
        for transaction in transactions {
            let phase = transaction.current_phase;
            summary.total += 1;
            *summary.by_phase.entry(phase).or_default() += 1;
            if phase == Phase::Cancelled {
                summary.cancelled += 1;
            } else if phase.is_completed() {
                summary.completed += 1;
            } else {
                summary.active += 1;
            }
        }
        summary
    }
}
