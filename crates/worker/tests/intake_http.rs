//! HTTP intake routes over an in-memory pipeline

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use timeglow_core::{CreditLedger, ObjectStore, SourceImage};
use timeglow_durable::{InMemoryCheckpointStore, RunnerConfig};
use timeglow_gemini::ScriptedProvider;
use timeglow_storage::{InMemoryObjectStore, InMemoryStore};
use timeglow_worker::{Collaborators, Pipeline, WorkflowSettings};
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    store: Arc<InMemoryStore>,
    pipeline: Pipeline,
}

impl TestApp {
    async fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let objects = Arc::new(InMemoryObjectStore::new());
        objects
            .put("originals/user_1/img_1.png", b"png".to_vec(), "image/png")
            .await
            .unwrap();
        store.insert_image(SourceImage {
            id: "img_1".into(),
            user_id: "user_1".into(),
            original_ref: "originals/user_1/img_1.png".into(),
            original_size_bytes: 3,
            content_type: "image/png".into(),
            preset_used: Some("denoise".into()),
            created_at: Utc::now(),
        });

        let collaborators = Collaborators::with_store(
            store.clone(),
            store.clone(),
            objects,
            Arc::new(ScriptedProvider::new().with_delay(Duration::from_millis(50))),
        );
        let settings = WorkflowSettings {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..WorkflowSettings::default()
        };
        let pipeline = Pipeline::new(
            Arc::new(InMemoryCheckpointStore::new()),
            collaborators,
            settings,
            RunnerConfig::default(),
        );

        Self { store, pipeline }
    }

    fn app(&self) -> Router {
        self.pipeline.router()
    }
}

async fn post_event(app: Router, event: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/events")
                .header("content-type", "application/json")
                .body(Body::from(event.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn upload(image_id: &str, preset: &str) -> Value {
    json!({
        "type": "image.uploaded",
        "data": { "imageId": image_id, "preset": preset, "userId": "user_1" }
    })
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new().await;
    let (status, body) = get_json(app.app(), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_upload_accepted_and_job_readable() {
    let app = TestApp::new().await;
    app.store.set_balance("user_1", 3);

    let (status, body) = post_event(app.app(), upload("img_1", "denoise")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["rerollNumber"], 0);
    let job_id: Uuid = serde_json::from_value(body["jobId"].clone()).unwrap();

    // Wait for the background run
    let mut view = Value::Null;
    for _ in 0..200 {
        let (status, body) = get_json(app.app(), &format!("/jobs/{job_id}")).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == "completed" && !body["resultRef"].is_null() {
            view = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(view["imageId"], "img_1");
    assert_eq!(view["presetId"], "denoise");
    assert_eq!(
        view["resultRef"],
        format!("restored/user_1/img_1/{job_id}.png")
    );
}

#[tokio::test]
async fn test_upload_rejections_map_to_status_codes() {
    let app = TestApp::new().await;

    let (status, body) = post_event(app.app(), upload("img_1", "denoise")).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["code"], "INSUFFICIENT_CREDIT");

    app.store.set_balance("user_1", 3);
    let (status, body) = post_event(app.app(), upload("img_1", "sepia")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_PRESET");

    let (status, _) = post_event(app.app(), upload("img_1", "denoise")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, body) = post_event(app.app(), upload("img_1", "denoise")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "DUPLICATE_JOB");
}

#[tokio::test]
async fn test_upload_without_preset_uses_default() {
    let app = TestApp::new().await;
    app.store.set_balance("user_1", 1);

    let (status, body) = post_event(
        app.app(),
        json!({ "type": "image.uploaded", "data": { "imageId": "img_1", "userId": "user_1" } }),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let (_, job) = get_json(app.app(), &format!("/jobs/{}", body["jobId"].as_str().unwrap())).await;
    assert_eq!(job["presetId"], "automagic");
}

#[tokio::test]
async fn test_unknown_event_type_is_bad_request() {
    let app = TestApp::new().await;

    let (status, body) = post_event(
        app.app(),
        json!({ "type": "image.deleted", "data": { "imageId": "img_1" } }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_EVENT");
}

#[tokio::test]
async fn test_billing_topup_refills_credits() {
    let app = TestApp::new().await;
    app.store.set_balance("user_1", 0);

    let (status, body) = post_event(
        app.app(),
        json!({ "type": "billing.topup", "data": { "userId": "user_1" } }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["creditsRemaining"], 50);
    let account = app.store.balance("user_1").await.unwrap().unwrap();
    assert_eq!(account.credits_remaining, 50);
}

#[tokio::test]
async fn test_account_opened_grants_once() {
    let app = TestApp::new().await;
    let opened = json!({ "type": "account.opened", "data": { "userId": "user_2" } });

    let (status, body) = post_event(app.app(), opened.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["creditsRemaining"], 50);

    app.store.set_balance("user_2", 12);
    let (_, body) = post_event(app.app(), opened).await;
    assert_eq!(body["creditsRemaining"], 12);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let app = TestApp::new().await;
    let (status, _) = get_json(app.app(), &format!("/jobs/{}", Uuid::now_v7())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
