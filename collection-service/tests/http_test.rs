//! HTTP round-trips through the router, backed by the in-memory store.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Duration;
use collection_service::services::DuplicatePolicy;
use common::{app, seeded_store, service, t0, ManualClock};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, value)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-User-ID", "4")
        .header("X-User-Name", "Amina")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_raw(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-User-ID", "4")
        .header("X-User-Name", "Amina")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn setup() -> (Router, Arc<ManualClock>) {
    let store = seeded_store().await;
    let clock = ManualClock::new(t0());
    let router = app(service(&store, clock.clone(), DuplicatePolicy::default()));
    (router, clock)
}

#[tokio::test]
async fn collect_returns_receipt() {
    let (app, _) = setup().await;

    let (status, body) = send(
        &app,
        post_json(
            "/collect",
            json!({ "vehicle_id": 7, "movement_id": 2, "reference_number": "RCPT-001" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "success");
    assert_eq!(body["amount"], "15.00");
    assert_eq!(body["movement"], "Transit");
    assert_eq!(body["collector"], "Amina");
    assert_eq!(body["reference_number"], "RCPT-001");

    let (status, body) = send(&app, get("/references/RCPT-001")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "used");
    assert_eq!(body["vehicle_id"], 7);
}

#[tokio::test]
async fn reused_reference_is_a_conflict() {
    let (app, _) = setup().await;
    let payload = json!({ "plate_number": "abc-123", "movement_id": 2, "reference_number": "RCPT-001" });

    let (status, _) = send(&app, post_json("/collect", payload.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, post_json("/collect", payload)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "error");
    assert_eq!(body["code"], "REFERENCE_USED");
}

#[tokio::test]
async fn duplicate_block_warning_and_force() {
    let (app, clock) = setup().await;

    send(
        &app,
        post_json(
            "/collect",
            json!({ "vehicle_id": 7, "movement_id": 2, "reference_number": "RCPT-001" }),
        ),
    )
    .await;

    clock.advance(Duration::minutes(5));
    let (status, body) = send(
        &app,
        post_json(
            "/collect",
            json!({ "vehicle_id": 7, "movement_id": 2, "reference_number": "RCPT-002" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "DUPLICATE_BLOCKED");
    assert!(body["last_payment_at"].is_string());

    clock.advance(Duration::minutes(10));
    let (status, body) = send(
        &app,
        post_json(
            "/collect",
            json!({ "vehicle_id": 7, "movement_id": 2, "reference_number": "RCPT-002" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "warning");
    assert_eq!(body["code"], "DUPLICATE_WARNING");
    assert_eq!(body["needs_force"], true);

    let (status, body) = send(
        &app,
        post_json(
            "/collect",
            json!({ "vehicle_id": 7, "movement_id": 2, "reference_number": "RCPT-002", "force": true }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "success");
}

#[tokio::test]
async fn revert_flow_over_http() {
    let (app, _) = setup().await;

    let (_, body) = send(
        &app,
        post_json(
            "/collect",
            json!({ "vehicle_id": 7, "movement_id": 2, "reference_number": "RCPT-001" }),
        ),
    )
    .await;
    let payment_id = body["payment_id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        post_json(
            &format!("/payments/{}/revert", payment_id),
            json!({ "reason": "" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "REASON_REQUIRED");

    let (status, body) = send(
        &app,
        post_json(
            &format!("/payments/{}/revert", payment_id),
            json!({ "reason": "wrong vehicle" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reverted_by_id"], 4);

    let (status, body) = send(&app, get(&format!("/payments/{}", payment_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_reverted"], true);

    let (_, body) = send(&app, get("/references/RCPT-001")).await;
    assert_eq!(body["status"], "available");

    let (status, body) = send(&app, get("/payments/999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "PAYMENT_NOT_FOUND");
}

#[tokio::test]
async fn missing_collector_identity_is_rejected() {
    let (app, _) = setup().await;

    let request = Request::builder()
        .method("POST")
        .uri("/collect")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "vehicle_id": 7, "movement_id": 2, "reference_number": "RCPT-001" })
                .to_string(),
        ))
        .unwrap();

    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_collect_payloads() {
    let (app, _) = setup().await;

    let (status, body) = send(
        &app,
        post_json(
            "/collect",
            json!({ "movement_id": 2, "reference_number": "RCPT-001" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");

    let (status, body) = send(
        &app,
        post_json(
            "/collect",
            json!({ "vehicle_id": 7, "movement_id": 2, "reference_number": "" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = send(
        &app,
        post_json(
            "/collect",
            json!({ "vehicle_id": 70, "movement_id": 2, "reference_number": "RCPT-001" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "VEHICLE_NOT_FOUND");

    let (status, body) = send(
        &app,
        post_json(
            "/collect",
            json!({ "vehicle_id": 7, "movement_id": 2, "reference_number": "RCPT-001", "quantity": 10001 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, _) = send(&app, get("/quote?vehicle_id=7&movement_id=2&quantity=10001")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, body) = send(&app, get("/references/RCPT-001")).await;
    assert_eq!(body["status"], "available");
}

#[tokio::test]
async fn references_register_lookup_and_cancel() {
    let (app, _) = setup().await;

    let (status, body) = send(
        &app,
        post_json("/references", json!({ "reference_number": "BOOK-7-001" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let token_id = body["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        post_json("/references", json!({ "reference_number": "BOOK-7-001" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "REFERENCE_EXISTS");

    let (status, body) = send(
        &app,
        post_json(
            &format!("/tokens/{}/cancel", token_id),
            json!({ "reason": "torn" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["cancelled_by"], "Amina");

    let (_, body) = send(&app, get("/references/BOOK-7-001")).await;
    assert_eq!(body["status"], "cancelled");

    let (status, body) = send(&app, get("/references/UNKNOWN")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], false);
}

#[tokio::test]
async fn malformed_cancel_body_leaves_token_available() {
    let (app, _) = setup().await;

    let (_, body) = send(
        &app,
        post_json("/references", json!({ "reference_number": "BOOK-9-001" })),
    )
    .await;
    let token_id = body["id"].as_i64().unwrap();
    let uri = format!("/tokens/{}/cancel", token_id);

    for bad in [r#"{"reason": 5"#, r#"{"reason": 5}"#, "not json"] {
        let (status, body) = send(&app, post_raw(&uri, bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {:?}", bad);
        assert_eq!(body["code"], "INVALID_INPUT");
    }

    let (_, body) = send(&app, get("/references/BOOK-9-001")).await;
    assert_eq!(body["status"], "available");

    // An empty body still cancels, without a reason.
    let (status, body) = send(&app, post_raw(&uri, "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");
    assert!(body["cancelled_reason"].is_null());
}

#[tokio::test]
async fn quote_totals_and_listings() {
    let (app, clock) = setup().await;

    let (status, body) = send(&app, get("/quote?plate_number=XYZ-900&movement_id=2&quantity=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unit_amount"], "20.00");
    assert_eq!(body["amount"], "40.00");
    assert_eq!(body["quantity"], 2);

    send(
        &app,
        post_json(
            "/collect",
            json!({ "vehicle_id": 8, "movement_id": 2, "reference_number": "RCPT-001" }),
        ),
    )
    .await;
    clock.advance(Duration::minutes(1));
    send(
        &app,
        post_json(
            "/collect",
            json!({ "vehicle_id": 7, "movement_id": 3, "reference_number": "RCPT-002" }),
        ),
    )
    .await;

    let (status, body) = send(
        &app,
        get("/totals?from=2026-03-01T00:00:00Z&to=2026-03-02T00:00:00Z"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["total"], "50.00");

    let (status, body) = send(&app, get("/vehicles/XYZ-900/payments")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["vehicle"]["id"], 8);
    assert_eq!(body["payments"].as_array().unwrap().len(), 1);

    let (status, body) = send(&app, get("/collectors/4/payments")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    let latest = &body["payments"][0];
    assert_eq!(latest["plate_number"], "ABC-123");
    assert_eq!(latest["owner_name"], "Lina Haddad");
    assert_eq!(latest["reference_number"], "RCPT-002");
    assert_eq!(latest["collector_name"], "Amina");
    assert_eq!(latest["amount"], "30.00");
    assert_eq!(body["payments"][1]["plate_number"], "XYZ-900");
}

#[tokio::test]
async fn metrics_endpoint_serves_text() {
    collection_service::services::init_metrics();
    let (app, _) = setup().await;

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
}
