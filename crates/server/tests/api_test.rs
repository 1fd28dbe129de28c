// Router tests over in-memory backends
// Run with: cargo test -p lifecycle-server --test api_test

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use lifecycle_durable::{Clock, ExecutorConfig, InMemoryWorkflowStore, ManualClock};
use lifecycle_onboarding::{
    DispatchError, EmailMessage, InMemoryUserDirectory, MailTransport, OnboardingConfig,
};
use lifecycle_server::{onboarding_executor, router, AppState, Backends};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<EmailMessage>>,
    /// Time the provider takes to accept a message
    latency: Mutex<Duration>,
}

#[async_trait]
impl MailTransport for Outbox {
    async fn deliver(&self, message: &EmailMessage) -> Result<String, DispatchError> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.sent.lock().push(message.clone());
        Ok(Uuid::now_v7().to_string())
    }
}

struct TestApp {
    router: Router,
    clock: Arc<ManualClock>,
    outbox: Arc<Outbox>,
}

fn test_app() -> TestApp {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let outbox = Arc::new(Outbox::default());
    let directory = Arc::new(InMemoryUserDirectory::new());
    directory.insert("ann@example.com", Some(clock.now()));

    let backends = Backends {
        store: Arc::new(InMemoryWorkflowStore::new()),
        directory,
        transport: outbox.clone(),
    };
    let executor = onboarding_executor(
        backends,
        clock.clone(),
        ExecutorConfig::default(),
        OnboardingConfig::default(),
    );

    TestApp {
        router: router(AppState::new(Arc::new(executor))),
        clock,
        outbox,
    }
}

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn submit_ann(app: &TestApp) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/workflows/onboarding",
        Some(json!({ "email": "ann@example.com", "fullName": "Ann" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["instanceId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let app = test_app();
    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_openapi_document() {
    let app = test_app();
    let (status, body) = send(&app, "GET", "/api-doc/openapi.json", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/workflows/onboarding"].is_object());
}

#[tokio::test]
async fn test_submit_sends_welcome_and_sleeps() {
    let app = test_app();
    let id = submit_ann(&app).await;

    assert_eq!(app.outbox.sent.lock().len(), 1);
    assert_eq!(app.outbox.sent.lock()[0].subject, "Welcome to the platform");

    let (status, body) = send(&app, "GET", &format!("/v1/workflows/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "sleeping");
    assert_eq!(body["sleepName"], "wait-for-3-days");
    assert_eq!(body["input"]["email"], "ann@example.com");
}

#[tokio::test]
async fn test_submit_missing_field_is_bad_request() {
    let app = test_app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/workflows/onboarding",
        Some(json!({ "email": "ann@example.com" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert!(app.outbox.sent.lock().is_empty());
}

#[tokio::test]
async fn test_submit_invalid_email_is_bad_request() {
    let app = test_app();
    let (status, _) = send(
        &app,
        "POST",
        "/api/workflows/onboarding",
        Some(json!({ "email": "ann", "fullName": "Ann" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_instance_is_not_found() {
    let app = test_app();
    let id = Uuid::now_v7();

    let (status, _) = send(&app, "GET", &format!("/v1/workflows/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", &format!("/v1/workflows/{id}/resume"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", &format!("/v1/workflows/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_resume_advances_after_wake() {
    let app = test_app();
    let id = submit_ann(&app).await;

    // early resume changes nothing
    let (status, body) = send(&app, "POST", &format!("/v1/workflows/{id}/resume"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stepsExecuted"], 0);

    app.clock.advance(chrono::Duration::days(3));
    let (status, body) = send(&app, "POST", &format!("/v1/workflows/{id}/resume"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "sleeping");
    assert_eq!(body["sleepName"], "wait-for-1-month#0");
    assert_eq!(app.outbox.sent.lock().len(), 2);
}

#[tokio::test]
async fn test_resume_survives_client_disconnect() {
    let app = test_app();
    let id = submit_ann(&app).await;
    app.clock.advance(chrono::Duration::days(3));
    *app.outbox.latency.lock() = Duration::from_millis(100);

    let request = Request::builder()
        .method("POST")
        .uri(format!("/v1/workflows/{id}/resume"))
        .body(Body::empty())
        .unwrap();
    // the client gives up while the check-in email is still being sent
    let gave_up =
        tokio::time::timeout(Duration::from_millis(20), app.router.clone().oneshot(request)).await;
    assert!(gave_up.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(app.outbox.sent.lock().len(), 2);
    let (_, body) = send(&app, "GET", &format!("/v1/workflows/{id}"), None).await;
    assert_eq!(body["status"], "sleeping");
    assert_eq!(body["sleepName"], "wait-for-1-month#0");
}

#[tokio::test]
async fn test_cancel() {
    let app = test_app();
    let id = submit_ann(&app).await;

    let (status, _) = send(&app, "POST", &format!("/v1/workflows/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&app, "GET", &format!("/v1/workflows/{id}"), None).await;
    assert_eq!(body["status"], "cancelled");

    app.clock.advance(chrono::Duration::days(3));
    let (status, body) = send(&app, "POST", &format!("/v1/workflows/{id}/resume"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");
    assert_eq!(app.outbox.sent.lock().len(), 1);
}

#[tokio::test]
async fn test_malformed_instance_id() {
    let app = test_app();
    let (status, _) = send(&app, "GET", "/v1/workflows/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
