//! HTTP surface tests: submission, duplicate handling, item inspection,
//! operator actions, and the admin switches. Exercised with tower's
//! `oneshot` against the real router, no network.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use jobscout::api::{create_router, AppState};
use jobscout::coordinator::ProcessingControl;
use jobscout::dedup::DuplicateIndex;
use jobscout::policy::{MatchPolicy, PolicyHandle, PolicySet, PrefilterPolicy};
use jobscout::store::MemoryStore;

const PREFILTER_TOML: &str = r#"
version = 1

[prefilter]
strike_threshold = 6.0
max_age_days = 30

[timezone]
user_offset_hours = 1.0
max_diff_hours = 10.0
per_hour_strike = 0.5
"#;

const MATCH_TOML: &str = r#"
version = 1

[thresholds]
high = 85.0
medium = 60.0

[timezone]
per_hour_penalty = 2.0
max_diff_hours = 10.0
hard_reject_penalty = -40.0
"#;

fn test_app() -> (Router, ProcessingControl) {
    let store = Arc::new(MemoryStore::new());
    let control = ProcessingControl::new();
    let state = AppState {
        dedup: DuplicateIndex::new(Arc::clone(&store)),
        store,
        control: control.clone(),
        policies: PolicyHandle::new(PolicySet {
            prefilter: PrefilterPolicy::from_toml_str(PREFILTER_TOML).unwrap(),
            matching: MatchPolicy::from_toml_str(MATCH_TOML).unwrap(),
        }),
    };
    (create_router(state), control)
}

async fn request(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let req = match body {
        Some(v) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    };
    (status, value)
}

#[tokio::test]
async fn submit_then_resubmit_reports_the_duplicate() {
    let (app, _) = test_app();
    let sub = json!({
        "url": "https://jobs.example.com/listing/42/?utm_source=feed",
        "title": "Senior Rust Engineer"
    });

    let (status, body) = request(&app, "POST", "/submit", Some(sub.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["outcome"], "created");
    assert_eq!(body["canonical_url"], "https://jobs.example.com/listing/42");
    let item_id = body["item_id"].as_str().unwrap().to_string();

    // Same listing, different tracking params and casing.
    let again = json!({
        "url": "HTTPS://Jobs.Example.COM/listing/42?utm_medium=email",
        "title": "Senior Rust Engineer"
    });
    let (status, body) = request(&app, "POST", "/submit", Some(again)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "duplicate");
    assert_eq!(body["item_id"], item_id.as_str());
    assert_eq!(body["status"], "pending");
}

#[tokio::test]
async fn invalid_url_is_a_bad_request() {
    let (app, _) = test_app();
    let (status, body) = request(
        &app,
        "POST",
        "/submit",
        Some(json!({ "url": "ftp://example.com/x" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid submission"));
}

#[tokio::test]
async fn item_lookup_and_not_found() {
    let (app, _) = test_app();
    let (_, body) = request(
        &app,
        "POST",
        "/submit",
        Some(json!({ "url": "https://jobs.example.com/x" })),
    )
    .await;
    let id = body["item_id"].as_str().unwrap().to_string();

    let (status, body) = request(&app, "GET", &format!("/items/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["item_type"], "job");

    let missing = uuid::Uuid::new_v4();
    let (status, _) = request(&app, "GET", &format!("/items/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn retry_on_a_pending_item_is_a_conflict() {
    let (app, _) = test_app();
    let (_, body) = request(
        &app,
        "POST",
        "/submit",
        Some(json!({ "url": "https://jobs.example.com/y" })),
    )
    .await;
    let id = body["item_id"].as_str().unwrap().to_string();

    let (status, body) = request(&app, "POST", &format!("/items/{id}/retry"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("failed items"));
}

#[tokio::test]
async fn skip_marks_the_item_and_shows_up_on_lookup() {
    let (app, _) = test_app();
    let (_, body) = request(
        &app,
        "POST",
        "/submit",
        Some(json!({ "url": "https://jobs.example.com/z" })),
    )
    .await;
    let id = body["item_id"].as_str().unwrap().to_string();

    let (status, body) = request(&app, "POST", &format!("/items/{id}/skip"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["skip_requested"], true);

    let (_, body) = request(&app, "GET", &format!("/items/{id}"), None).await;
    assert_eq!(body["skip_requested"], true);
}

#[tokio::test]
async fn pause_and_resume_flip_the_shared_control() {
    let (app, control) = test_app();

    let (status, body) = request(&app, "POST", "/admin/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["paused"], true);
    assert!(control.is_paused());

    let (_, stats) = request(&app, "GET", "/stats", None).await;
    assert_eq!(stats["paused"], true);
    assert_eq!(stats["policy_version"], "p1/m1");

    let (_, body) = request(&app, "POST", "/admin/resume", None).await;
    assert_eq!(body["paused"], false);
    assert!(!control.is_paused());
}

#[tokio::test]
async fn stats_counts_queue_depth() {
    let (app, _) = test_app();
    for i in 0..3 {
        request(
            &app,
            "POST",
            "/submit",
            Some(json!({ "url": format!("https://jobs.example.com/depth/{i}") })),
        )
        .await;
    }
    let (status, stats) = request(&app, "GET", "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["queue"]["depth"], 3);
    assert_eq!(stats["queue"]["counts"]["pending"], 3);
}

#[tokio::test]
async fn health_answers_ok() {
    let (app, _) = test_app();
    let (status, body) = request(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".into()));
}
