use super::*;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request};
use serde_json::json;
use tower::ServiceExt;

use crate::db::{NewProject, NewUser};
use super::error::FORBIDDEN_BODY;
use super::signature::sign;

const SECRET: &str = "webhook-secret";
const REPOSITORY: &str = "org/repo";

async fn temp_db() -> DbClient {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let db_path = tempdir.path().join("preview.db");
    std::mem::forget(tempdir);
    DbClient::initialize(&db_path.to_string_lossy())
        .await
        .expect("db init")
}

async fn seeded_db() -> (DbClient, String) {
    let db = temp_db().await;
    db.insert_user(&NewUser {
        id: "user-1".to_string(),
        username: "alice".to_string(),
        api_token: "token-1".to_string(),
    })
    .await
    .expect("insert user");

    let (_, project_id) = db
        .create_or_restore_project(&NewProject {
            id: "project-1".to_string(),
            user_id: "user-1".to_string(),
            repository: REPOSITORY.to_string(),
            webhook_secret: SECRET.to_string(),
            server_id: 7,
            site_url_pattern: "*.preview.test".to_string(),
            deployment_script: "composer install".to_string(),
            initial_deployment_script: "php artisan key:generate".to_string(),
        })
        .await
        .expect("create project");

    (db, project_id)
}

fn event(action: &str, number: i64) -> serde_json::Value {
    json!({
        "action": action,
        "number": number,
        "repository": {"full_name": REPOSITORY},
        "pull_request": {"number": number, "head": {"ref": "feature/login"}}
    })
}

struct Delivery<'a> {
    body: Vec<u8>,
    signature: Option<String>,
    delivery_id: Option<&'a str>,
}

impl<'a> Delivery<'a> {
    fn signed(payload: &serde_json::Value) -> Self {
        Self::signed_with(payload, SECRET)
    }

    fn signed_with(payload: &serde_json::Value, secret: &str) -> Self {
        let body = serde_json::to_vec_pretty(payload).expect("serialize payload");
        let signature = Some(sign(secret, &body));
        Self {
            body,
            signature,
            delivery_id: None,
        }
    }

    fn unsigned(payload: &serde_json::Value) -> Self {
        Self {
            body: serde_json::to_vec(payload).expect("serialize payload"),
            signature: None,
            delivery_id: None,
        }
    }

    fn with_delivery_id(mut self, delivery_id: &'a str) -> Self {
        self.delivery_id = Some(delivery_id);
        self
    }
}

async fn send(db: &DbClient, delivery: Delivery<'_>) -> (StatusCode, String) {
    let mut request = Request::builder()
        .method("POST")
        .uri(PULL_REQUEST_WEBHOOK_PATH)
        .header(header::CONTENT_TYPE, "application/json")
        .header(EVENT_HEADER, "pull_request");
    if let Some(signature) = &delivery.signature {
        request = request.header(SIGNATURE_HEADER, signature);
    }
    if let Some(delivery_id) = delivery.delivery_id {
        request = request.header(DELIVERY_HEADER, delivery_id);
    }

    let response = router(WebhookState { db: db.clone() })
        .oneshot(request.body(Body::from(delivery.body)).expect("request"))
        .await
        .expect("response");

    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, String::from_utf8_lossy(&body).to_string())
}

async fn job_count(db: &DbClient) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs")
        .fetch_one(&db.pool())
        .await
        .expect("count jobs")
}

async fn job_kinds(db: &DbClient, project_id: &str, number: i64) -> Vec<String> {
    let branch = db
        .find_branch(project_id, number)
        .await
        .expect("find branch")
        .expect("branch exists");
    db.list_jobs_for_branch(&branch.id)
        .await
        .expect("list jobs")
        .into_iter()
        .map(|job| job.kind)
        .collect()
}

#[tokio::test]
async fn healthz_responds_ok() {
    let (db, _) = seeded_db().await;

    let response = router(WebhookState { db })
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_pull_request_is_forbidden() {
    let (db, _) = seeded_db().await;
    let payload = json!({"action": "opened", "repository": {"full_name": REPOSITORY}});

    let (status, body) = send(&db, Delivery::signed(&payload)).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, FORBIDDEN_BODY);
}

#[tokio::test]
async fn missing_repository_is_forbidden() {
    let (db, _) = seeded_db().await;
    let payload = json!({"action": "opened", "pull_request": {"number": 42}});

    let (status, body) = send(&db, Delivery::signed(&payload)).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, FORBIDDEN_BODY);
}

#[tokio::test]
async fn missing_signature_is_forbidden() {
    let (db, _) = seeded_db().await;

    let (status, body) = send(&db, Delivery::unsigned(&event("opened", 42))).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, FORBIDDEN_BODY);
    assert_eq!(job_count(&db).await, 0);
}

#[tokio::test]
async fn signature_must_match_project_secret() {
    let (db, _) = seeded_db().await;
    let payload = event("opened", 42);

    let (status, body) = send(&db, Delivery::signed_with(&payload, "wrong-secret")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, FORBIDDEN_BODY);
    assert_eq!(job_count(&db).await, 0);

    let (status, _) = send(&db, Delivery::signed(&payload)).await;
    assert!(status.is_success());
}

#[tokio::test]
async fn unknown_repository_is_forbidden() {
    let (db, _) = seeded_db().await;
    let mut payload = event("opened", 42);
    payload["repository"]["full_name"] = json!("someone/else");

    let (status, body) = send(&db, Delivery::signed(&payload)).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, FORBIDDEN_BODY);
}

#[tokio::test]
async fn soft_deleted_project_no_longer_resolves() {
    let (db, _) = seeded_db().await;
    assert!(db.soft_delete_project(REPOSITORY).await.expect("soft delete"));

    let (status, _) = send(&db, Delivery::signed(&event("opened", 42))).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn closed_or_synchronize_without_branch_is_bad_request() {
    let (db, project_id) = seeded_db().await;

    for action in ["closed", "synchronize"] {
        let (status, _) = send(&db, Delivery::signed(&event(action, 42))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{action}");
    }

    assert_eq!(job_count(&db).await, 0);
    assert!(db
        .find_branch(&project_id, 42)
        .await
        .expect("find branch")
        .is_none());
}

#[tokio::test]
async fn negative_number_without_branch_is_bad_request() {
    let (db, project_id) = seeded_db().await;

    for action in ["closed", "synchronize"] {
        let (status, body) = send(&db, Delivery::signed(&event(action, -1))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{action}");
        assert_eq!(body, "Unknown pull request branch");
    }

    assert_eq!(job_count(&db).await, 0);
    assert!(db
        .find_branch(&project_id, -1)
        .await
        .expect("find branch")
        .is_none());
}

#[tokio::test]
async fn opened_creates_branch_and_enqueues_provisioning_chain() {
    let (db, project_id) = seeded_db().await;

    let (status, _) = send(&db, Delivery::signed(&event("opened", 42))).await;

    assert_eq!(status, StatusCode::OK);
    let branch = db
        .find_branch(&project_id, 42)
        .await
        .expect("find branch")
        .expect("branch created");
    assert_eq!(branch.state, BranchState::Provisioning);
    assert_eq!(branch.head_ref.as_deref(), Some("feature/login"));
    assert_eq!(
        job_kinds(&db, &project_id, 42).await,
        vec![
            "create_site",
            "setup_database",
            "redeploy",
            "strip_initial_deployment"
        ]
    );
}

#[tokio::test]
async fn reopened_provisions_a_new_branch() {
    let (db, project_id) = seeded_db().await;

    let (status, _) = send(&db, Delivery::signed(&event("reopened", 9))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(job_kinds(&db, &project_id, 9).await.len(), 4);
}

#[tokio::test]
async fn synchronize_enqueues_only_redeploy() {
    let (db, project_id) = seeded_db().await;
    send(&db, Delivery::signed(&event("opened", 42))).await;

    let (status, _) = send(&db, Delivery::signed(&event("synchronize", 42))).await;

    assert_eq!(status, StatusCode::OK);
    let kinds = job_kinds(&db, &project_id, 42).await;
    assert_eq!(kinds.len(), 5);
    assert_eq!(kinds[4], "redeploy");
}

#[tokio::test]
async fn closed_enqueues_teardown_and_marks_branch_removed() {
    let (db, project_id) = seeded_db().await;
    send(&db, Delivery::signed(&event("opened", 42))).await;

    let (status, _) = send(&db, Delivery::signed(&event("closed", 42))).await;

    assert_eq!(status, StatusCode::OK);
    let kinds = job_kinds(&db, &project_id, 42).await;
    assert_eq!(kinds.last().map(String::as_str), Some("teardown_site"));
    let branch = db
        .find_branch(&project_id, 42)
        .await
        .expect("find branch")
        .expect("branch exists");
    assert_eq!(branch.state, BranchState::Removed);

    let (status, _) = send(&db, Delivery::signed(&event("closed", 42))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job_kinds(&db, &project_id, 42).await.len(), kinds.len());
}

#[tokio::test]
async fn other_action_is_accepted_without_jobs() {
    let (db, project_id) = seeded_db().await;

    let (status, _) = send(&db, Delivery::signed(&event("labeled", 42))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(job_count(&db).await, 0);
    assert!(db
        .find_branch(&project_id, 42)
        .await
        .expect("find branch")
        .is_none());
}

#[tokio::test]
async fn redelivered_event_is_not_enqueued_twice() {
    let (db, _) = seeded_db().await;
    let payload = event("opened", 42);

    let (first, _) = send(&db, Delivery::signed(&payload).with_delivery_id("delivery-1")).await;
    let (second, body) =
        send(&db, Delivery::signed(&payload).with_delivery_id("delivery-1")).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(body, "Duplicate delivery ignored");
    assert_eq!(job_count(&db).await, 4);
}

#[tokio::test]
async fn repeated_open_without_delivery_id_reuses_branch() {
    let (db, project_id) = seeded_db().await;

    send(&db, Delivery::signed(&event("opened", 42))).await;
    send(&db, Delivery::signed(&event("opened", 42))).await;

    let branches = db
        .list_branches_for_project(&project_id)
        .await
        .expect("list branches");
    assert_eq!(branches.len(), 1);
}

#[tokio::test]
async fn rejected_delivery_id_is_released_for_redelivery() {
    let (db, project_id) = seeded_db().await;

    let (status, _) = send(
        &db,
        Delivery::signed(&event("closed", 42)).with_delivery_id("delivery-2"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let recorded = db
        .record_webhook_delivery(&NewWebhookDelivery {
            delivery_id: "delivery-2".to_string(),
            event_type: "pull_request".to_string(),
            project_id,
            pull_request_number: 42,
            action: "closed".to_string(),
        })
        .await
        .expect("record delivery");
    assert!(recorded);
}
