//! Router tests for the Stripe webhook endpoint
//!
//! Tests cover:
//! - Signed deliveries (applied, duplicate)
//! - Authentication failures (missing header, wrong secret)
//! - Reconciliation failures, conflicts and in-flight redeliveries
//! - Oversized and truncated bodies

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use tiersync_billing::{
    fixtures::{customer_object, event_envelope, subscription_object},
    signature::signature_header,
    CapturingReporter, CustomerStore, DeliveryLedger, FailureStage, InMemoryCustomerStore,
    InMemoryDeliveryLedger, InMemoryUserRegistry, NewCustomerProjection, ProcessingResult,
    StripeEvent, WebhookHandler,
};
use tower::ServiceExt;

use super::create_router;
use crate::{config::Config, state::AppState};

const SECRET: &str = "whsec_router_test_secret";

struct TestApp {
    router: Router,
    customers: Arc<InMemoryCustomerStore>,
    users: Arc<InMemoryUserRegistry>,
    ledger: Arc<InMemoryDeliveryLedger>,
    reporter: Arc<CapturingReporter>,
}

fn test_config() -> Config {
    Config {
        stripe_webhook_secret: SECRET.to_string(),
        database_url: "postgres://localhost/unused".to_string(),
        bind_address: "127.0.0.1:0".to_string(),
        production: false,
        webhook_tolerance_secs: 300,
        webhook_max_body_bytes: 64 * 1024,
        request_timeout_secs: 30,
        run_migrations: false,
    }
}

fn test_app() -> TestApp {
    let config = test_config();
    let customers = Arc::new(InMemoryCustomerStore::new());
    let users = Arc::new(InMemoryUserRegistry::new());
    let ledger = Arc::new(InMemoryDeliveryLedger::new());
    let reporter = Arc::new(CapturingReporter::new());
    let handler = WebhookHandler::new(
        config.webhook_verifier(),
        customers.clone(),
        users.clone(),
        ledger.clone(),
        reporter.clone(),
    );

    TestApp {
        router: create_router(AppState::new(config, handler)),
        customers,
        users,
        ledger,
        reporter,
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn event_body(id: &str, event_type: &str, object: Value) -> Vec<u8> {
    serde_json::to_vec(&event_envelope(id, event_type, now(), object)).unwrap()
}

fn customer_created_body(id: &str, customer: &str, email: &str) -> Vec<u8> {
    event_body(id, "customer.created", customer_object(customer, Some(email)))
}

fn signed_request(payload: Vec<u8>) -> Request<Body> {
    let header = signature_header(SECRET, now(), &payload);
    Request::builder()
        .method("POST")
        .uri("/webhooks/stripe")
        .header("content-type", "application/json")
        .header("stripe-signature", header)
        .body(Body::from(payload))
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = test_app();

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}

#[tokio::test]
async fn test_unknown_route_not_found() {
    let app = test_app();

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/webhooks/paypal")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_signed_customer_created_applied() {
    let app = test_app();
    app.users.add_user("a@b.com").await;

    let response = app
        .router
        .oneshot(signed_request(customer_created_body("evt_1", "cus_1", "a@b.com")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["received"], true);
    assert_eq!(body["event_id"], "evt_1");
    assert_eq!(body["outcome"], "applied");

    let rows = app.customers.all().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].tier, 0);
    assert!(rows[0].stripe_subscription_id.is_none());
}

#[tokio::test]
async fn test_redelivery_acknowledged_as_duplicate() {
    let app = test_app();
    app.users.add_user("a@b.com").await;
    let payload = customer_created_body("evt_1", "cus_1", "a@b.com");

    let first = app
        .router
        .clone()
        .oneshot(signed_request(payload.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .router
        .oneshot(signed_request(payload))
        .await
        .unwrap();

    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(json_body(second).await["outcome"], "duplicate");
    assert_eq!(app.customers.len().await, 1);
}

#[tokio::test]
async fn test_missing_signature_is_bad_request() {
    let app = test_app();

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/stripe")
                .header("content-type", "application/json")
                .body(Body::from(customer_created_body("evt_1", "cus_1", "a@b.com")))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "missing_signature");

    let reports = app.reporter.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].stage, FailureStage::Authentication);
    assert_eq!(
        body["correlation_id"],
        reports[0].correlation_id.to_string()
    );
}

#[tokio::test]
async fn test_wrong_secret_is_bad_request() {
    let app = test_app();
    app.users.add_user("a@b.com").await;
    let payload = customer_created_body("evt_1", "cus_1", "a@b.com");
    let header = signature_header("whsec_not_ours", now(), &payload);

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/stripe")
                .header("stripe-signature", header)
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "invalid_signature");
    assert!(app.customers.is_empty().await);
}

#[tokio::test]
async fn test_unsupported_event_is_server_error_with_correlation_id() {
    let app = test_app();

    let response = app
        .router
        .oneshot(signed_request(event_body(
            "evt_inv",
            "invoice.paid",
            json!({ "id": "in_1", "customer": "cus_1" }),
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["code"], "unsupported_event");

    let reports = app.reporter.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].stage, FailureStage::Reconciliation);
    assert_eq!(
        body["correlation_id"],
        reports[0].correlation_id.to_string()
    );
    assert!(app.customers.is_empty().await);
}

#[tokio::test]
async fn test_unknown_user_is_server_error() {
    let app = test_app();

    let response = app
        .router
        .oneshot(signed_request(customer_created_body(
            "evt_1",
            "cus_1",
            "nobody@example.com",
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["code"], "user_not_found");
}

#[tokio::test]
async fn test_conflicting_projection_is_conflict() {
    let app = test_app();
    let user_id = app.users.add_user("a@b.com").await;
    app.customers
        .create(NewCustomerProjection {
            user_id,
            stripe_customer_id: "cus_existing".to_string(),
            last_event_at: 0,
        })
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(signed_request(customer_created_body("evt_1", "cus_1", "a@b.com")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json_body(response).await;
    assert_eq!(body["code"], "conflict");
    assert!(body["correlation_id"].is_string());
}

#[tokio::test]
async fn test_declared_oversized_body_is_unavailable() {
    let app = test_app();
    let payload = vec![b' '; 64 * 1024 + 1];

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/stripe")
                .header("content-length", payload.len())
                .header("stripe-signature", "t=1,v1=00")
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["code"], "payload_too_large");

    let reports = app.reporter.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].stage, FailureStage::Intake);
}

#[tokio::test]
async fn test_undeclared_oversized_body_is_unavailable() {
    let app = test_app();

    let response = app
        .router
        .oneshot(signed_request(vec![b'x'; 100 * 1024]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["code"], "body_unreadable");
}

#[tokio::test]
async fn test_subscription_lifecycle_through_router() {
    let app = test_app();
    app.users.add_user("a@b.com").await;

    let steps = [
        customer_created_body("evt_1", "cus_1", "a@b.com"),
        event_body(
            "evt_2",
            "customer.subscription.created",
            subscription_object("sub_1", "cus_1", Some("2")),
        ),
        event_body(
            "evt_3",
            "customer.subscription.deleted",
            subscription_object("sub_1", "cus_1", None),
        ),
    ];

    for payload in steps {
        let response = app
            .router
            .clone()
            .oneshot(signed_request(payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["outcome"], "applied");
    }

    let rows = app.customers.all().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].tier, 0);
    assert!(rows[0].stripe_subscription_id.is_none());
}

#[tokio::test]
async fn test_redelivery_while_processing_is_conflict() {
    let app = test_app();
    app.users.add_user("a@b.com").await;
    let payload = customer_created_body("evt_1", "cus_1", "a@b.com");
    let event = StripeEvent::from_bytes(&payload).unwrap();
    app.ledger.claim(&event).await.unwrap();

    let response = app
        .router
        .oneshot(signed_request(payload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json_body(response).await;
    assert_eq!(body["code"], "event_in_flight");
    assert_ne!(body["outcome"], "duplicate");
    assert!(app.customers.is_empty().await);
    assert_eq!(
        app.ledger.status("evt_1").await,
        Some(ProcessingResult::Processing)
    );
}
