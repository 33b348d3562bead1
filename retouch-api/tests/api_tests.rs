/// End-to-end tests for the Retouch API
///
/// These tests drive the router the way a client would:
/// - Caller identity and security headers
/// - Upload validation and ownership
/// - Enhancement lifecycle through the embedded worker
/// - Free tier and paid authorization
/// - Payment webhooks

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{photo_id, settled, TestContext, JPEG};
use serde_json::json;
use tower::Service as _;
use uuid::Uuid;

fn completed_payment(event_id: &str, user: Uuid, credits: i32) -> serde_json::Value {
    json!({
        "event_id": event_id,
        "user_id": user,
        "credits_granted": credits,
        "amount_paid": 499,
        "status": "completed"
    })
}

#[tokio::test]
async fn test_health_check() {
    let ctx = TestContext::new();

    let (status, body) = ctx
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_identity_required() {
    let ctx = TestContext::new();

    let (status, body) = ctx
        .send(Request::builder().uri("/v1/account").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = ctx
        .send(
            Request::builder()
                .uri("/v1/account")
                .header("x-user-id", "not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_security_headers_on_responses() {
    let ctx = TestContext::new();

    let response = ctx
        .app
        .clone()
        .call(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.headers().get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
}

#[tokio::test]
async fn test_new_account_summary() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();

    let (status, body) = ctx.get(user, "/v1/account").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], user.to_string());
    assert_eq!(body["credits"], 0);
    assert_eq!(body["unlimited"], false);
    assert_eq!(body["free_enhancements_used"], 0);
    assert_eq!(body["free_enhancements_remaining"], 2);
    assert_eq!(body["storage_used_bytes"], 0);
}

#[tokio::test]
async fn test_upload_and_read_photo() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();

    let (status, body) = ctx.upload(user, JPEG, "image/jpeg", "colorize").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["mode"], "colorize");
    assert_eq!(body["content_type"], "image/jpeg");
    assert_eq!(body["original_size_bytes"], JPEG.len());
    assert!(body["enhanced_asset_ref"].is_null());
    assert!(body.get("original_asset_ref").is_none());

    let id = photo_id(&body);
    let (status, fetched) = ctx.get(user, &format!("/v1/photos/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], id.to_string());

    let (_, account) = ctx.get(user, "/v1/account").await;
    assert_eq!(account["storage_used_bytes"], JPEG.len());
}

#[tokio::test]
async fn test_upload_validation() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();

    let (status, body) = ctx.upload(user, JPEG, "image/jpeg", "sharpen").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = ctx.upload(user, JPEG, "image/gif", "restore").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = ctx.upload(user, JPEG, "image/png", "restore").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = ctx.upload(user, b"", "image/jpeg", "restore").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // Nothing was stored
    let (_, account) = ctx.get(user, "/v1/account").await;
    assert_eq!(account["storage_used_bytes"], 0);
}

#[tokio::test]
async fn test_storage_quota_enforced() {
    let ctx = TestContext::with_env(&[("RETOUCH_STORAGE_LIMIT_BYTES", "15")]);
    let user = Uuid::new_v4();

    ctx.upload_jpeg(user).await;
    let (status, body) = ctx.upload(user, JPEG, "image/jpeg", "restore").await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["message"].as_str().unwrap().contains("storage quota"));
}

#[tokio::test]
async fn test_photos_are_private() {
    let ctx = TestContext::new();
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();

    let id = ctx.upload_jpeg(owner).await;

    let (status, _) = ctx.get(stranger, &format!("/v1/photos/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = ctx.post(stranger, &format!("/v1/photos/{}/enhance", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = ctx.get(owner, &format!("/v1/photos/{}", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_enhancement_completes() {
    let mut ctx = TestContext::new();
    let worker = ctx.start_worker();
    let user = Uuid::new_v4();

    let id = ctx.upload_jpeg(user).await;
    let (status, body) = ctx.post(user, &format!("/v1/photos/{}/enhance", id)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "processing");

    let photo = settled(&ctx, user, id).await;
    assert_eq!(photo["status"], "completed");
    assert!(photo["enhanced_asset_ref"].is_string());
    assert!(photo["error_reason"].is_null());
    assert_eq!(photo["enhanced_size_bytes"], JPEG.len());
    assert!(photo["processing_completed_at"].is_string());

    let (_, account) = ctx.get(user, "/v1/account").await;
    assert_eq!(account["free_enhancements_used"], 1);
    assert_eq!(account["free_enhancements_remaining"], 1);
    assert_eq!(account["storage_used_bytes"], 2 * JPEG.len());

    worker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_enhance_twice_conflicts() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let id = ctx.upload_jpeg(user).await;

    let (status, _) = ctx.post(user, &format!("/v1/photos/{}/enhance", id)).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = ctx.post(user, &format!("/v1/photos/{}/enhance", id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    // Only one free slot was spent
    let (_, account) = ctx.get(user, "/v1/account").await;
    assert_eq!(account["free_enhancements_used"], 1);
}

#[tokio::test]
async fn test_retry_requires_failed_photo() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let id = ctx.upload_jpeg(user).await;

    let (status, _) = ctx.post(user, &format!("/v1/photos/{}/retry", id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_payment_required_after_free_tier() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();

    for _ in 0..2 {
        let id = ctx.upload_jpeg(user).await;
        let (status, _) = ctx.post(user, &format!("/v1/photos/{}/enhance", id)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    let id = ctx.upload_jpeg(user).await;
    let (status, body) = ctx.post(user, &format!("/v1/photos/{}/enhance", id)).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "insufficient_credits");

    let (_, photo) = ctx.get(user, &format!("/v1/photos/{}", id)).await;
    assert_eq!(photo["status"], "pending");

    // A purchase unlocks the photo
    let (status, _) = ctx.deliver_payment(&completed_payment("evt_unlock", user, 1)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = ctx.post(user, &format!("/v1/photos/{}/enhance", id)).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (_, account) = ctx.get(user, "/v1/account").await;
    assert_eq!(account["credits"], 0);
}

#[tokio::test]
async fn test_payment_webhook_is_idempotent() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    ctx.get(user, "/v1/account").await;

    let event = completed_payment("evt_1", user, 10);

    let (status, body) = ctx.deliver_payment(&event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "applied");

    let (status, body) = ctx.deliver_payment(&event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "duplicate");

    let (_, account) = ctx.get(user, "/v1/account").await;
    assert_eq!(account["credits"], 10);
}

#[tokio::test]
async fn test_pending_payment_is_recorded_only() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    ctx.get(user, "/v1/account").await;

    let mut event = completed_payment("evt_pending", user, 5);
    event["status"] = json!("pending");

    let (status, body) = ctx.deliver_payment(&event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "recorded");

    let (_, account) = ctx.get(user, "/v1/account").await;
    assert_eq!(account["credits"], 0);
}

#[tokio::test]
async fn test_payment_webhook_rejections() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    ctx.get(user, "/v1/account").await;

    let body = completed_payment("evt_forged", user, 100).to_string();

    let (status, _) = ctx.deliver_raw(body.clone(), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = format!("sha256={}", "0".repeat(64));
    let (status, _) = ctx.deliver_raw(body, Some(forged)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = ctx.deliver_payment(&json!({ "event_id": "evt_bad" })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = ctx
        .deliver_payment(&completed_payment("evt_nobody", Uuid::new_v4(), 5))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, account) = ctx.get(user, "/v1/account").await;
    assert_eq!(account["credits"], 0);
}
