use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::domain::{ActorRole, Phase};
use super::graph::{PhaseEdge, PhaseGraph};

pub const STANDARD_RULES_VERSION: &str = "standard-v1";

/// Errors raised while loading a permission rules document.
#[derive(Debug, thiserror::Error)]
pub enum PermissionRulesError {
    #[error("failed to read permission rules at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed permission rules: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("permission rules grant {role} the edge {from} -> {to}, which is not in the phase graph")]
    UnknownEdge {
        role: ActorRole,
        from: Phase,
        to: Phase,
    },
    #[error("permission rules must not list ADMIN; admins may traverse every graph edge")]
    AdminGrant,
    #[error("permission rules version must not be empty")]
    MissingVersion,
}

/// Serialized form of the matrix: `{ "version", "grants": [{ "role", "from", "to": [..] }] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRules {
    pub version: String,
    pub grants: Vec<PermissionGrant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub role: ActorRole,
    pub from: Phase,
    pub to: Vec<Phase>,
}

/// Fail-closed `(role, from) -> {to}` lookup. Anything not granted is denied.
#[derive(Debug, Clone)]
pub struct PermissionMatrix {
    version: String,
    grants: BTreeMap<(ActorRole, Phase), BTreeSet<Phase>>,
}

impl PermissionMatrix {
    /// Built-in business rules.
    pub fn standard() -> Self {
        use ActorRole::{Agent, Buyer, Developer, Solicitor};
        use Phase::*;

        let mut matrix = Self::empty(STANDARD_RULES_VERSION);

        // forward progress
        matrix.grant(&[Agent, Buyer], Enquiry, &[ViewingScheduled]);
        matrix.grant(&[Agent, Buyer], ViewingScheduled, &[Viewed]);
        matrix.grant(&[Agent, Buyer], Viewed, &[Reservation]);
        matrix.grant(&[Developer, Solicitor], Reservation, &[ContractIssued]);
        matrix.grant(&[Buyer, Solicitor], ContractIssued, &[ContractSigned]);
        matrix.grant(&[Solicitor, Developer], ContractSigned, &[DepositPaid]);
        matrix.grant(&[Buyer, Solicitor], DepositPaid, &[MortgageApproved]);
        matrix.grant(&[Solicitor], DepositPaid, &[Closing]);
        matrix.grant(&[Solicitor], MortgageApproved, &[Closing]);
        matrix.grant(&[Solicitor], Closing, &[Completed]);
        matrix.grant(&[Developer, Agent], Completed, &[HandedOver]);

        // cancellation narrows as the sale becomes contractually binding
        for phase in [Enquiry, ViewingScheduled, Viewed] {
            matrix.grant(&[Buyer, Agent], phase, &[Cancelled]);
        }
        for phase in [Reservation, ContractIssued] {
            matrix.grant(&[Buyer, Agent, Developer], phase, &[Cancelled]);
        }
        for phase in [ContractSigned, DepositPaid, MortgageApproved, Closing] {
            matrix.grant(&[Agent], phase, &[Cancelled]);
        }

        matrix
    }

    fn empty(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            grants: BTreeMap::new(),
        }
    }

    fn grant(&mut self, roles: &[ActorRole], from: Phase, to: &[Phase]) {
        for role in roles {
            self.grants
                .entry((*role, from))
                .or_default()
                .extend(to.iter().copied());
        }
    }

    /// Build a matrix from a rules document, validating every edge against `graph`.
    pub fn from_rules(
        rules: PermissionRules,
        graph: &PhaseGraph,
    ) -> Result<Self, PermissionRulesError> {
        if rules.version.trim().is_empty() {
            return Err(PermissionRulesError::MissingVersion);
        }

        let mut matrix = Self::empty(rules.version);
        for grant in rules.grants {
            if grant.role == ActorRole::Admin {
                return Err(PermissionRulesError::AdminGrant);
            }
            if let Some(to) = grant
                .to
                .iter()
                .find(|to| !graph.is_valid_edge(grant.from, **to))
            {
                return Err(PermissionRulesError::UnknownEdge {
                    role: grant.role,
                    from: grant.from,
                    to: *to,
                });
            }
            matrix.grant(&[grant.role], grant.from, &grant.to);
        }
        Ok(matrix)
    }

    pub fn from_json_str(raw: &str, graph: &PhaseGraph) -> Result<Self, PermissionRulesError> {
        let rules: PermissionRules = serde_json::from_str(raw)?;
        Self::from_rules(rules, graph)
    }

    pub fn from_path(
        path: impl AsRef<Path>,
        graph: &PhaseGraph,
    ) -> Result<Self, PermissionRulesError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| PermissionRulesError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw, graph)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// ADMIN is permitted every edge the graph allows; everyone else only what is granted.
    pub fn is_permitted(&self, graph: &PhaseGraph, role: ActorRole, from: Phase, to: Phase) -> bool {
        if role == ActorRole::Admin {
            return graph.is_valid_edge(from, to);
        }
        self.grants
            .get(&(role, from))
            .is_some_and(|targets| targets.contains(&to))
    }

    pub fn rules(&self) -> PermissionRules {
        PermissionRules {
            version: self.version.clone(),
            grants: self
                .grants
                .iter()
                .map(|((role, from), to)| PermissionGrant {
                    role: *role,
                    from: *from,
                    to: to.iter().copied().collect(),
                })
                .collect(),
        }
    }
}

impl Default for PermissionMatrix {
    fn default() -> Self {
        Self::standard()
    }
}

/// Effective rule set for inspection: phases, graph edges, and the active matrix.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesView {
    pub phases: Vec<PhaseView>,
    pub edges: Vec<PhaseEdge>,
    pub permissions: PermissionRules,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseView {
    pub code: Phase,
    pub label: &'static str,
    pub terminal: bool,
}

impl RulesView {
    pub fn new(graph: &PhaseGraph, matrix: &PermissionMatrix) -> Self {
        Self {
            phases: Phase::ordered()
                .into_iter()
                .map(|phase| PhaseView {
                    code: phase,
                    label: phase.label(),
                    terminal: phase.is_terminal(),
                })
                .collect(),
            edges: graph.edges(),
            permissions: matrix.rules(),
        }
    }
}
