use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::audit::AuditReport;
use super::domain::{
    ActorIdentity, ActorRole, Metadata, OpenTransaction, Phase, TransactionFilter, TransactionId,
    TransitionRecord, TransitionRequest,
};
use super::engine::TransactionEngine;
use super::error::{ErrorKind, TransitionError};
use super::permissions::RulesView;
use super::repository::{RepositoryError, SaleStore, SideEffectDispatcher};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

type Engine<S, D> = Arc<TransactionEngine<S, D>>;

/// Router builder exposing the transaction lifecycle endpoints.
pub fn transaction_router<S, D>(engine: Engine<S, D>) -> Router
where
    S: SaleStore + 'static,
    D: SideEffectDispatcher + 'static,
{
    Router::new()
        .route(
            "/api/v1/transactions",
            post(open_handler::<S, D>).get(list_handler::<S, D>),
        )
        .route(
            "/api/v1/transactions/summary",
            get(summary_handler::<S, D>),
        )
        .route(
            "/api/v1/transactions/:transaction_id",
            get(get_handler::<S, D>),
        )
        .route(
            "/api/v1/transactions/:transaction_id/transition",
            post(transition_handler::<S, D>),
        )
        .route(
            "/api/v1/transactions/:transaction_id/history",
            get(history_handler::<S, D>),
        )
        .route(
            "/api/v1/transactions/:transaction_id/audit",
            get(audit_handler::<S, D>),
        )
        .route("/api/v1/phases", get(rules_handler::<S, D>))
        .with_state(engine)
}

/// Body of `POST /transactions/{id}/transition`. Phases arrive as literals and are parsed
/// here so an unknown name is a validation failure rather than a deserializer rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionBody {
    pub target_phase: String,
    pub expected_current_phase: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub document_refs: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListQuery {
    phase: Option<String>,
    buyer_id: Option<String>,
    developer_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryView {
    transaction_id: TransactionId,
    transitions: Vec<TransitionRecord>,
}

fn parse_phase(field: &str, raw: &str) -> Result<Phase, TransitionError> {
    raw.parse::<Phase>()
        .map_err(|error| TransitionError::validation(format!("{field}: {error}")))
}

/// Upstream auth places the verified identity in headers; absent or unrecognised means 401.
pub(crate) fn identity_from_headers(headers: &HeaderMap) -> Result<ActorIdentity, Response> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let (Some(actor_id), Some(raw_role)) = (header(ACTOR_ID_HEADER), header(ACTOR_ROLE_HEADER))
    else {
        return Err(unauthorized("missing actor identity"));
    };
    let role = raw_role
        .parse::<ActorRole>()
        .map_err(|error| unauthorized(&error.to_string()))?;

    Ok(ActorIdentity::new(actor_id, role))
}

fn unauthorized(message: &str) -> Response {
    let payload = json!({
        "error": {
            "kind": "unauthenticated",
            "message": message,
            "retryable": false,
        }
    });
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

pub(crate) fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::InvalidTransition => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Single mapping from the engine taxonomy to HTTP.
pub(crate) fn error_response(error: &TransitionError) -> Response {
    let kind = error.kind();
    let mut body = Map::new();
    body.insert("kind".to_string(), json!(kind.label()));
    body.insert("message".to_string(), json!(error.to_string()));
    body.insert("retryable".to_string(), json!(error.is_retryable()));
    if let Some(transaction_id) = error.transaction_id() {
        body.insert("transactionId".to_string(), json!(transaction_id));
    }
    if let Some((from, to)) = error.edge() {
        body.insert("from".to_string(), json!(from));
        body.insert("to".to_string(), json!(to));
    }
    if let Some(role) = error.role() {
        body.insert("role".to_string(), json!(role));
    }
    if let TransitionError::Conflict {
        actual: Some(actual),
        ..
    } = error
    {
        body.insert("currentPhase".to_string(), json!(actual));
    }

    (status_for(kind), Json(json!({ "error": Value::Object(body) }))).into_response()
}

/// Runs a storage-bound engine call on the blocking pool so file I/O stays off the async workers.
async fn run_blocking<S, D, T, F>(engine: Engine<S, D>, call: F) -> Result<T, TransitionError>
where
    S: SaleStore + 'static,
    D: SideEffectDispatcher + 'static,
    T: Send + 'static,
    F: FnOnce(&TransactionEngine<S, D>) -> Result<T, TransitionError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || call(&engine))
        .await
        .unwrap_or_else(|join_error| {
            Err(RepositoryError::Unavailable(format!("storage task failed: {join_error}")).into())
        })
}

fn rejection_response(message: String) -> Response {
    error_response(&TransitionError::validation(message))
}

pub(crate) async fn open_handler<S, D>(
    State(engine): State<Engine<S, D>>,
    headers: HeaderMap,
    payload: Result<Json<OpenTransaction>, JsonRejection>,
) -> Response
where
    S: SaleStore + 'static,
    D: SideEffectDispatcher + 'static,
{
    let actor = match identity_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection_response(rejection.body_text()),
    };

    match run_blocking(engine, move |engine| engine.open(&actor, request)).await {
        Ok(transaction) => (StatusCode::CREATED, Json(transaction)).into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) async fn transition_handler<S, D>(
    State(engine): State<Engine<S, D>>,
    Path(transaction_id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<TransitionBody>, JsonRejection>,
) -> Response
where
    S: SaleStore + 'static,
    D: SideEffectDispatcher + 'static,
{
    let actor = match identity_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let Json(body) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection_response(rejection.body_text()),
    };

    let request = parse_phase("expectedCurrentPhase", &body.expected_current_phase).and_then(
        |expected| {
            let target = parse_phase("targetPhase", &body.target_phase)?;
            Ok(TransitionRequest {
                transaction_id: TransactionId(transaction_id),
                actor,
                expected_current_phase: expected,
                target_phase: target,
                notes: body.notes,
                document_refs: body.document_refs,
                metadata: body.metadata,
            })
        },
    );

    let outcome = match request {
        Ok(request) => run_blocking(engine, move |engine| engine.transition(request)).await,
        Err(error) => Err(error),
    };
    match outcome {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) async fn get_handler<S, D>(
    State(engine): State<Engine<S, D>>,
    Path(transaction_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: SaleStore + 'static,
    D: SideEffectDispatcher + 'static,
{
    if let Err(response) = identity_from_headers(&headers) {
        return response;
    }
    let transaction_id = TransactionId(transaction_id);
    match run_blocking(engine, move |engine| engine.get(&transaction_id)).await {
        Ok(transaction) => (StatusCode::OK, Json(transaction)).into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) async fn list_handler<S, D>(
    State(engine): State<Engine<S, D>>,
    headers: HeaderMap,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Response
where
    S: SaleStore + 'static,
    D: SideEffectDispatcher + 'static,
{
    if let Err(response) = identity_from_headers(&headers) {
        return response;
    }
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return rejection_response(rejection.body_text()),
    };

    let phase = match query.phase.as_deref().map(|raw| parse_phase("phase", raw)) {
        Some(Err(error)) => return error_response(&error),
        Some(Ok(phase)) => Some(phase),
        None => None,
    };
    let filter = TransactionFilter {
        phase,
        buyer_id: query.buyer_id,
        developer_id: query.developer_id,
    };

    match run_blocking(engine, move |engine| engine.list(&filter)).await {
        Ok(transactions) => (StatusCode::OK, Json(transactions)).into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) async fn summary_handler<S, D>(
    State(engine): State<Engine<S, D>>,
    headers: HeaderMap,
) -> Response
where
    S: SaleStore + 'static,
    D: SideEffectDispatcher + 'static,
{
    if let Err(response) = identity_from_headers(&headers) {
        return response;
    }
    match run_blocking(engine, |engine| engine.summary()).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) async fn history_handler<S, D>(
    State(engine): State<Engine<S, D>>,
    Path(transaction_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: SaleStore + 'static,
    D: SideEffectDispatcher + 'static,
{
    if let Err(response) = identity_from_headers(&headers) {
        return response;
    }
    let transaction_id = TransactionId(transaction_id);
    let lookup = transaction_id.clone();
    match run_blocking(engine, move |engine| engine.history(&lookup)).await {
        Ok(transitions) => (
            StatusCode::OK,
            Json(HistoryView {
                transaction_id,
                transitions,
            }),
        )
            .into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) async fn audit_handler<S, D>(
    State(engine): State<Engine<S, D>>,
    Path(transaction_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: SaleStore + 'static,
    D: SideEffectDispatcher + 'static,
{
    if let Err(response) = identity_from_headers(&headers) {
        return response;
    }
    let transaction_id = TransactionId(transaction_id);
    let report: Result<AuditReport, _> =
        run_blocking(engine, move |engine| engine.verify_audit(&transaction_id)).await;
    match report {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) async fn rules_handler<S, D>(State(engine): State<Engine<S, D>>) -> Response
where
    S: SaleStore + 'static,
    D: SideEffectDispatcher + 'static,
{
    let view = RulesView::new(engine.graph(), engine.permissions());
    (StatusCode::OK, Json(view)).into_response()
}
