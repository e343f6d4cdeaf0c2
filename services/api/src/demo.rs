use crate::infra::{load_permissions, OutboxDispatcher, OUTBOX_CAPACITY};
use clap::Args;
use salepath::error::AppError;
use salepath::workflows::sale::{
    ActorIdentity, ActorRole, InMemorySaleStore, OpenTransaction, Phase, PhaseGraph, RulesView,
    TransactionEngine, TransactionId, TransitionRecord, TransitionRequest,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Unit identifier used for the sample sale
    #[arg(long, default_value = "fitzgerald-gardens-unit-12")]
    pub(crate) unit: String,
    /// Optional permission rules document (JSON) to run the demo against
    #[arg(long)]
    pub(crate) rules: Option<PathBuf>,
    /// Emit the outcome as JSON instead of a text report
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct RulesArgs {
    /// Permission rules document (JSON) to validate and print; defaults to the built-in rules
    #[arg(long)]
    pub(crate) rules: Option<PathBuf>,
    /// Emit the rule set as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DemoStep {
    actor: ActorRole,
    from: Phase,
    to: Phase,
    outcome: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DemoOutcome {
    transaction_id: TransactionId,
    final_phase: Phase,
    rules_version: String,
    steps: Vec<DemoStep>,
    history: Vec<TransitionRecord>,
    notifications: usize,
    audit_consistent: bool,
}

fn demo_actor(role: ActorRole) -> ActorIdentity {
    let id = match role {
        ActorRole::Buyer => "buyer-demo",
        ActorRole::Agent => "agent-demo",
        ActorRole::Solicitor => "solicitor-demo",
        ActorRole::Developer => "developer-demo",
        ActorRole::Admin => "admin-demo",
    };
    ActorIdentity::new(id, role)
}

/// Attempts in order, including a stale write and a skipped edge that must be rejected.
const SCRIPT: [(ActorRole, Phase, Phase); 12] = [
    (ActorRole::Agent, Phase::Enquiry, Phase::ViewingScheduled),
    (ActorRole::Buyer, Phase::Enquiry, Phase::Reservation),
    (ActorRole::Buyer, Phase::ViewingScheduled, Phase::Viewed),
    (ActorRole::Agent, Phase::Viewed, Phase::ContractSigned),
    (ActorRole::Buyer, Phase::Viewed, Phase::Reservation),
    (ActorRole::Developer, Phase::Reservation, Phase::ContractIssued),
    (ActorRole::Buyer, Phase::ContractIssued, Phase::ContractSigned),
    (ActorRole::Solicitor, Phase::ContractSigned, Phase::DepositPaid),
    (ActorRole::Buyer, Phase::DepositPaid, Phase::MortgageApproved),
    (ActorRole::Solicitor, Phase::MortgageApproved, Phase::Closing),
    (ActorRole::Solicitor, Phase::Closing, Phase::Completed),
    (ActorRole::Developer, Phase::Completed, Phase::HandedOver),
];

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs { unit, rules, json } = args;

    let permissions = load_permissions(rules.as_deref(), &PhaseGraph::standard())?;
    let rules_version = permissions.version().to_string();
    let (dispatcher, mut outbox) = OutboxDispatcher::channel(OUTBOX_CAPACITY);
    let engine = TransactionEngine::with_permissions(
        Arc::new(InMemorySaleStore::default()),
        Arc::new(dispatcher),
        permissions,
    );

    let transaction = engine
        .open(
            &demo_actor(ActorRole::Agent),
            OpenTransaction {
                unit_id: unit,
                buyer_id: "buyer-demo".to_string(),
                selling_agent_id: Some("agent-demo".to_string()),
                solicitor_id: Some("solicitor-demo".to_string()),
                developer_id: "developer-demo".to_string(),
                ..OpenTransaction::default()
            },
        )?;

    let steps: Vec<DemoStep> = SCRIPT
        .iter()
        .map(|&(role, from, to)| {
            let request =
                TransitionRequest::new(transaction.id.clone(), demo_actor(role), from, to);
            let outcome = match engine.transition(request) {
                Ok(result) => format!("committed as {}", result.transition.id),
                Err(error) => format!("rejected ({}): {error}", error.kind().label()),
            };
            DemoStep {
                actor: role,
                from,
                to,
                outcome,
            }
        })
        .collect();

    let current = engine.get(&transaction.id)?;
    let history = engine.history(&transaction.id)?;
    let report = engine.verify_audit(&transaction.id)?;
    let notifications = std::iter::from_fn(|| outbox.try_recv().ok()).count();

    let outcome = DemoOutcome {
        transaction_id: current.id,
        final_phase: current.current_phase,
        rules_version,
        steps,
        history,
        notifications,
        audit_consistent: report.consistent,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        render_demo(&outcome);
    }
    Ok(())
}

fn render_demo(outcome: &DemoOutcome) {
    println!("Sale lifecycle demo");
    println!(
        "Transaction {} (rules {})",
        outcome.transaction_id, outcome.rules_version
    );

    println!("\nAttempts");
    for step in &outcome.steps {
        println!(
            "- {:<9} {:<18} -> {:<18} {}",
            step.actor.code(),
            step.from.code(),
            step.to.code(),
            step.outcome
        );
    }

    println!("\nAudit history");
    for record in &outcome.history {
        println!(
            "- {} {} -> {} by {} ({})",
            record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            record.from_phase.label(),
            record.to_phase.label(),
            record.actor_id,
            record.actor_role
        );
    }

    println!(
        "\nFinal phase: {} | notifications queued: {} | audit replay consistent: {}",
        outcome.final_phase.label(),
        outcome.notifications,
        if outcome.audit_consistent { "yes" } else { "no" }
    );
}

pub(crate) fn run_rules(args: RulesArgs) -> Result<(), AppError> {
    let graph = PhaseGraph::standard();
    let permissions = load_permissions(args.rules.as_deref(), &graph)?;
    let view = RulesView::new(&graph, &permissions);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("Phase rules ({})", view.permissions.version);
    for phase in &view.phases {
        let successors = graph.successors(phase.code);
        let marker = if phase.terminal { " [terminal]" } else { "" };
        println!("\n{}{}", phase.label, marker);
        for to in successors {
            let roles: Vec<&str> = view
                .permissions
                .grants
                .iter()
                .filter(|grant| grant.from == phase.code && grant.to.contains(&to))
                .map(|grant| grant.role.code())
                .collect();
            let roles = if roles.is_empty() {
                "ADMIN only".to_string()
            } else {
                format!("{}, ADMIN", roles.join(", "))
            };
            println!("  -> {:<18} {}", to.code(), roles);
        }
    }
    Ok(())
}
