use super::common::*;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    Json,
};
use serde_json::json;
use tower::ServiceExt;

use crate::workflows::sale::domain::{Metadata, Phase};
use crate::workflows::sale::engine::TransactionEngine;
use crate::workflows::sale::router::{
    transaction_router, transition_handler, TransitionBody, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER,
};

fn identity(role: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACTOR_ID_HEADER, HeaderValue::from_static("agent-014"));
    headers.insert(
        ACTOR_ROLE_HEADER,
        HeaderValue::from_str(role).expect("header value"),
    );
    headers
}

fn body(expected: &str, target: &str) -> TransitionBody {
    TransitionBody {
        target_phase: target.to_string(),
        expected_current_phase: expected.to_string(),
        notes: None,
        document_refs: Vec::new(),
        metadata: Metadata::new(),
    }
}

fn post_transition(id: &str, role: Option<&str>, payload: String) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/transactions/{id}/transition"))
        .header("content-type", "application/json");
    if let Some(role) = role {
        builder = builder
            .header(ACTOR_ID_HEADER, "actor-77")
            .header(ACTOR_ROLE_HEADER, role);
    }
    builder.body(Body::from(payload)).expect("request")
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(ACTOR_ID_HEADER, "agent-014")
        .header(ACTOR_ROLE_HEADER, "AGENT")
        .body(Body::empty())
        .expect("request")
}

#[tokio::test]
async fn transition_handler_advances_phase() {
    let (engine, _, _) = build_engine();
    let transaction = transaction_at(&engine, Phase::Enquiry);

    let response = transition_handler::<_, MemoryDispatcher>(
        State(Arc::new(engine)),
        Path(transaction.id.0.clone()),
        identity("AGENT"),
        Ok(Json(body("ENQUIRY", "VIEWING_SCHEDULED"))),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["transaction"]["currentPhase"], "VIEWING_SCHEDULED");
    assert_eq!(payload["transition"]["fromPhase"], "ENQUIRY");
    assert_eq!(payload["transition"]["actorRole"], "AGENT");
}

#[tokio::test(flavor = "current_thread")]
async fn concurrent_handler_calls_on_one_worker_commit_exactly_once() {
    let (engine, _, _) = build_engine();
    let transaction = transaction_at(&engine, Phase::Enquiry);
    let engine = Arc::new(engine);

    let attempt = || {
        transition_handler::<_, MemoryDispatcher>(
            State(engine.clone()),
            Path(transaction.id.0.clone()),
            identity("AGENT"),
            Ok(Json(body("ENQUIRY", "VIEWING_SCHEDULED"))),
        )
    };
    let (first, second) = tokio::join!(attempt(), attempt());

    let mut statuses = vec![first.status(), second.status()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);
    let stored = engine.get(&transaction.id).expect("stored");
    assert_eq!(stored.current_phase, Phase::ViewingScheduled);
    assert_eq!(engine.history(&transaction.id).expect("history").len(), 1);
}

#[tokio::test]
async fn transition_handler_maps_permission_denied_to_forbidden() {
    let (engine, _, _) = build_engine();
    let transaction = transaction_at(&engine, Phase::Closing);

    let response = transition_handler::<_, MemoryDispatcher>(
        State(Arc::new(engine)),
        Path(transaction.id.0.clone()),
        identity("buyer"),
        Ok(Json(body("CLOSING", "COMPLETED"))),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"]["kind"], "permission_denied");
    assert_eq!(payload["error"]["role"], "BUYER");
    assert_eq!(payload["error"]["from"], "CLOSING");
    assert_eq!(payload["error"]["to"], "COMPLETED");
    assert_eq!(payload["error"]["retryable"], false);
}

#[tokio::test]
async fn stale_expected_phase_is_a_retryable_conflict() {
    let (engine, _, _) = build_engine();
    let transaction = transaction_at(&engine, Phase::ViewingScheduled);
    let app = transaction_router(Arc::new(engine));

    let payload = json!({
        "expectedCurrentPhase": "ENQUIRY",
        "targetPhase": "VIEWING_SCHEDULED",
    })
    .to_string();
    let response = app
        .oneshot(post_transition(&transaction.id.0, Some("AGENT"), payload))
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"]["kind"], "conflict");
    assert_eq!(payload["error"]["retryable"], true);
    assert_eq!(payload["error"]["currentPhase"], "VIEWING_SCHEDULED");
    assert_eq!(payload["error"]["transactionId"], transaction.id.0);
}

#[tokio::test]
async fn edge_outside_graph_is_unprocessable() {
    let (engine, _, _) = build_engine();
    let transaction = transaction_at(&engine, Phase::Viewed);
    let app = transaction_router(Arc::new(engine));

    let payload = json!({
        "expectedCurrentPhase": "VIEWED",
        "targetPhase": "CONTRACT_SIGNED",
    })
    .to_string();
    let response = app
        .oneshot(post_transition(&transaction.id.0, Some("ADMIN"), payload))
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"]["kind"], "invalid_transition");
}

#[tokio::test]
async fn missing_or_unknown_identity_is_unauthorized() {
    let (engine, _, _) = build_engine();
    let transaction = transaction_at(&engine, Phase::Enquiry);
    let app = transaction_router(Arc::new(engine));
    let payload = json!({
        "expectedCurrentPhase": "ENQUIRY",
        "targetPhase": "VIEWING_SCHEDULED",
    })
    .to_string();

    let anonymous = app
        .clone()
        .oneshot(post_transition(&transaction.id.0, None, payload.clone()))
        .await
        .expect("router response");
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    let body = read_json_body(anonymous).await;
    assert_eq!(body["error"]["kind"], "unauthenticated");

    let lender = app
        .oneshot(post_transition(&transaction.id.0, Some("LENDER"), payload))
        .await
        .expect("router response");
    assert_eq!(lender.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_phase_and_malformed_body_are_bad_requests() {
    let (engine, _, _) = build_engine();
    let transaction = transaction_at(&engine, Phase::Enquiry);
    let app = transaction_router(Arc::new(engine));

    let unknown = json!({
        "expectedCurrentPhase": "ENQUIRY",
        "targetPhase": "SURVEYED",
    })
    .to_string();
    let response = app
        .clone()
        .oneshot(post_transition(&transaction.id.0, Some("AGENT"), unknown))
        .await
        .expect("router response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"]["kind"], "validation");
    assert!(payload["error"]["message"]
        .as_str()
        .expect("message")
        .contains("targetPhase"));

    let malformed = app
        .oneshot(post_transition(
            &transaction.id.0,
            Some("AGENT"),
            "{\"targetPhase\":".to_string(),
        ))
        .await
        .expect("router response");
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_transaction_is_not_found() {
    let (engine, _, _) = build_engine();
    let app = transaction_router(Arc::new(engine));
    let payload = json!({
        "expectedCurrentPhase": "ENQUIRY",
        "targetPhase": "VIEWING_SCHEDULED",
    })
    .to_string();

    let response = app
        .clone()
        .oneshot(post_transition("txn-missing", Some("AGENT"), payload))
        .await
        .expect("router response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(get_request("/api/v1/transactions/txn-missing/history"))
        .await
        .expect("router response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn storage_failure_is_internal_server_error() {
    let engine = TransactionEngine::new(
        Arc::new(UnavailableStore),
        Arc::new(MemoryDispatcher::default()),
    );
    let app = transaction_router(Arc::new(engine));

    let response = app
        .oneshot(get_request("/api/v1/transactions/txn-any"))
        .await
        .expect("router response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"]["kind"], "storage");
}

#[tokio::test]
async fn open_route_creates_transaction_at_enquiry() {
    let (engine, _, _) = build_engine();
    let app = transaction_router(Arc::new(engine));
    let payload = json!({
        "unitId": "fitzgerald-gardens-unit-4",
        "buyerId": "buyer-002",
        "developerId": "developer-fitzgerald",
        "metadata": { "source": "showroom" },
    })
    .to_string();

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/transactions")
        .header("content-type", "application/json")
        .header(ACTOR_ID_HEADER, "agent-014")
        .header(ACTOR_ROLE_HEADER, "AGENT")
        .body(Body::from(payload))
        .expect("request");
    let response = app.oneshot(request).await.expect("router response");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["currentPhase"], "ENQUIRY");
    assert_eq!(payload["unitId"], "fitzgerald-gardens-unit-4");
    assert_eq!(payload["metadata"]["source"], "showroom");
}

#[tokio::test]
async fn history_route_lists_records_oldest_first() {
    let (engine, _, _) = build_engine();
    let transaction = transaction_at(&engine, Phase::Reservation);
    let app = transaction_router(Arc::new(engine));

    let response = app
        .oneshot(get_request(&format!(
            "/api/v1/transactions/{}/history",
            transaction.id
        )))
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    let transitions = payload["transitions"].as_array().expect("transitions");
    assert_eq!(transitions.len(), 3);
    assert_eq!(transitions[0]["fromPhase"], "ENQUIRY");
    assert_eq!(transitions[2]["toPhase"], "RESERVATION");
}

#[tokio::test]
async fn list_route_filters_by_phase_and_rejects_unknown_literals() {
    let (engine, _, _) = build_engine();
    transaction_at(&engine, Phase::Enquiry);
    transaction_at(&engine, Phase::Closing);
    let app = transaction_router(Arc::new(engine));

    let response = app
        .clone()
        .oneshot(get_request("/api/v1/transactions?phase=closing"))
        .await
        .expect("router response");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    let listed = payload.as_array().expect("array");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["currentPhase"], "CLOSING");

    let response = app
        .oneshot(get_request("/api/v1/transactions?phase=SNAGGING"))
        .await
        .expect("router response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn summary_and_audit_routes_report_pipeline_state() {
    let (engine, _, _) = build_engine();
    let completed = transaction_at(&engine, Phase::Completed);
    transaction_at(&engine, Phase::Cancelled);
    let app = transaction_router(Arc::new(engine));

    let response = app
        .clone()
        .oneshot(get_request("/api/v1/transactions/summary"))
        .await
        .expect("router response");
    assert_eq!(response.status(), StatusCode::OK);
    let summary = read_json_body(response).await;
    assert_eq!(summary["total"], 2);
    assert_eq!(summary["completed"], 1);
    assert_eq!(summary["cancelled"], 1);

    let response = app
        .oneshot(get_request(&format!(
            "/api/v1/transactions/{}/audit",
            completed.id
        )))
        .await
        .expect("router response");
    assert_eq!(response.status(), StatusCode::OK);
    let report = read_json_body(response).await;
    assert_eq!(report["consistent"], true);
    assert_eq!(report["replayedPhase"], "COMPLETED");
}

#[tokio::test]
async fn phases_route_exposes_graph_and_matrix() {
    let (engine, _, _) = build_engine();
    let app = transaction_router(Arc::new(engine));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/phases")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["phases"].as_array().expect("phases").len(), 12);
    assert_eq!(payload["permissions"]["version"], "standard-v1");
    assert!(payload["edges"]
        .as_array()
        .expect("edges")
        .iter()
        .any(|edge| edge["from"] == "COMPLETED" && edge["to"] == "HANDED_OVER"));
}
