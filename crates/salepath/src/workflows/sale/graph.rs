use std::collections::BTreeSet;

use serde::Serialize;

use super::domain::Phase;

/// Forward progress edges; cancellation edges are derived from `Phase::is_terminal`.
const FORWARD_EDGES: [(Phase, Phase); 11] = [
    (Phase::Enquiry, Phase::ViewingScheduled),
    (Phase::ViewingScheduled, Phase::Viewed),
    (Phase::Viewed, Phase::Reservation),
    (Phase::Reservation, Phase::ContractIssued),
    (Phase::ContractIssued, Phase::ContractSigned),
    (Phase::ContractSigned, Phase::DepositPaid),
    (Phase::DepositPaid, Phase::MortgageApproved),
    // cash purchase, no lender involved
    (Phase::DepositPaid, Phase::Closing),
    (Phase::MortgageApproved, Phase::Closing),
    (Phase::Closing, Phase::Completed),
    (Phase::Completed, Phase::HandedOver),
];

/// Structurally legal phase edges, independent of who may traverse them.
#[derive(Debug, Clone)]
pub struct PhaseGraph {
    edges: BTreeSet<(Phase, Phase)>,
}

/// Serializable edge for rule inspection endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseEdge {
    pub from: Phase,
    pub to: Phase,
}

impl PhaseGraph {
    pub fn standard() -> Self {
        let mut edges: BTreeSet<(Phase, Phase)> = FORWARD_EDGES.into_iter().collect();
        for phase in Phase::ordered() {
            if !phase.is_terminal() {
                edges.insert((phase, Phase::Cancelled));
            }
        }
        Self { edges }
    }

    pub fn is_valid_edge(&self, from: Phase, to: Phase) -> bool {
        self.edges.contains(&(from, to))
    }

    pub fn successors(&self, from: Phase) -> Vec<Phase> {
        self.edges
            .iter()
            .filter(|(source, _)| *source == from)
            .map(|(_, target)| *target)
            .collect()
    }

    pub fn edges(&self) -> Vec<PhaseEdge> {
        self.edges
            .iter()
            .map(|(from, to)| PhaseEdge {
                from: *from,
                to: *to,
            })
            .collect()
    }
}

impl Default for PhaseGraph {
    fn default() -> Self {
        Self::standard()
    }
}
