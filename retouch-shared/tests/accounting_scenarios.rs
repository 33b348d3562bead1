/// End-to-end accounting scenarios on the in-memory store
///
/// These drive the lifecycle manager, quota enforcer, ledger and webhook
/// handler together the way the API and the worker do, and check the
/// balance and photo invariants after every step.

use bytes::Bytes;
use futures::future::join_all;
use retouch_shared::config::CoreConfig;
use retouch_shared::context::CoreServices;
use retouch_shared::error::CoreError;
use retouch_shared::lifecycle::EnhancementJob;
use retouch_shared::models::photo::{Photo, PhotoStatus};
use retouch_shared::models::user::User;
use retouch_shared::models::purchase::PurchaseStatus;
use retouch_shared::payments::{
    ClawbackPolicy, HmacSignatureVerifier, PaymentEvent, WebhookOutcome, MAX_CREDITS_PER_EVENT,
};
use retouch_shared::storage::AssetRef;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

const SECRET: &str = "whsec_0123456789abcdef0123456789abcdef";
const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

struct World {
    services: CoreServices,
    jobs: UnboundedReceiver<EnhancementJob>,
}

impl World {
    fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    fn with_config(config: CoreConfig) -> Self {
        let (services, jobs) = CoreServices::in_memory(config, SECRET);
        Self { services, jobs }
    }

    async fn user(&self) -> Uuid {
        self.services.ensure_user(Uuid::new_v4()).await.unwrap().id
    }

    /// A user with no free enhancements left and `credits` paid credits
    async fn paying_user(&self, credits: i32) -> Uuid {
        let id = self.user().await;
        let store = self.services.store();
        store.consume_free_slot(id, 2).await.unwrap().unwrap();
        store.consume_free_slot(id, 2).await.unwrap().unwrap();
        if credits > 0 {
            self.services
                .ledger()
                .grant(id, credits, &format!("seed_{}", id))
                .await
                .unwrap();
        }
        id
    }

    async fn account(&self, id: Uuid) -> User {
        self.services.ledger().balance(id).await.unwrap()
    }

    async fn upload(&self, owner: Uuid) -> Photo {
        self.services
            .lifecycle()
            .create_photo(owner, Bytes::from_static(JPEG), "image/jpeg", "restore")
            .await
            .unwrap()
    }

    async fn photo(&self, owner: Uuid, id: Uuid) -> Photo {
        self.services.lifecycle().get_photo(owner, id).await.unwrap()
    }

    async fn succeed(&self, photo_id: Uuid) -> Photo {
        self.services
            .lifecycle()
            .on_enhancement_succeeded(photo_id, &AssetRef::new("mem://enhanced.jpg"), 20)
            .await
            .unwrap()
    }

    async fn fail(&self, photo_id: Uuid, retryable: bool) -> Photo {
        self.services
            .lifecycle()
            .on_enhancement_failed(photo_id, "provider rejected image", retryable)
            .await
            .unwrap()
    }

    async fn deliver(&self, body: &str) -> Result<WebhookOutcome, CoreError> {
        let signature = HmacSignatureVerifier::new(SECRET).sign(body.as_bytes());
        self.services
            .payments()
            .handle_event(body.as_bytes(), Some(&signature))
            .await
    }
}

fn event(event_id: &str, user_id: Uuid, credits: i32, status: &str) -> String {
    serde_json::json!({
        "event_id": event_id,
        "user_id": user_id,
        "credits_granted": credits,
        "amount_paid": credits as i64 * 100,
        "status": status,
    })
    .to_string()
}

#[tokio::test]
async fn test_free_tier_then_insufficient_credits() {
    let mut world = World::new();
    let owner = world.user().await;

    for _ in 0..2 {
        let photo = world.upload(owner).await;
        let started = world
            .services
            .lifecycle()
            .start_enhancement(owner, photo.id)
            .await
            .unwrap();
        assert!(started.used_free_slot);
        assert_eq!(world.jobs.recv().await.unwrap().photo_id, photo.id);

        let done = world.succeed(photo.id).await;
        assert_eq!(done.status, PhotoStatus::Completed);
    }

    let third = world.upload(owner).await;
    let err = world
        .services
        .lifecycle()
        .start_enhancement(owner, third.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InsufficientCredits { .. }));
    assert_eq!(world.photo(owner, third.id).await.status, PhotoStatus::Pending);

    let account = world.account(owner).await;
    assert_eq!(account.free_enhancements_used, 2);
    assert_eq!(account.credits, 0);
}

#[tokio::test]
async fn test_permanent_failure_refunds_credit() {
    let world = World::new();
    let owner = world.paying_user(1).await;
    let photo = world.upload(owner).await;

    let started = world
        .services
        .lifecycle()
        .start_enhancement(owner, photo.id)
        .await
        .unwrap();
    assert!(started.credit_reservation_id.is_some());
    assert_eq!(world.account(owner).await.credits, 0);

    let failed = world.fail(photo.id, false).await;
    assert_eq!(failed.status, PhotoStatus::Failed);
    assert!(!failed.retryable);
    assert!(failed.is_consistent());
    assert_eq!(world.account(owner).await.credits, 1);

    let reservation = world
        .services
        .store()
        .find_reservation(started.credit_reservation_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(reservation.state.is_resolved());
}

#[tokio::test]
async fn test_failed_free_attempt_restores_slot() {
    let world = World::new();
    let owner = world.user().await;
    let photo = world.upload(owner).await;

    world
        .services
        .lifecycle()
        .start_enhancement(owner, photo.id)
        .await
        .unwrap();
    assert_eq!(world.account(owner).await.free_enhancements_used, 1);

    world.fail(photo.id, true).await;
    assert_eq!(world.account(owner).await.free_enhancements_used, 0);
}

#[tokio::test]
async fn test_no_double_spend_across_photos() {
    let world = World::new();
    let owner = world.paying_user(1).await;
    let first = world.upload(owner).await;
    let second = world.upload(owner).await;

    let lifecycle = world.services.lifecycle();
    let results = join_all([
        lifecycle.start_enhancement(owner, first.id),
        lifecycle.start_enhancement(owner, second.id),
    ])
    .await;

    let started = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(CoreError::InsufficientCredits { .. })))
        .count();
    assert_eq!((started, refused), (1, 1));
    assert_eq!(world.account(owner).await.credits, 0);
}

#[tokio::test]
async fn test_concurrent_start_on_one_photo() {
    let world = World::new();
    let owner = world.user().await;
    let photo = world.upload(owner).await;

    let lifecycle = world.services.lifecycle();
    let (a, b) = tokio::join!(
        lifecycle.start_enhancement(owner, photo.id),
        lifecycle.start_enhancement(owner, photo.id)
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(CoreError::Conflict(_)))));

    // The loser gave its free slot back
    assert_eq!(world.account(owner).await.free_enhancements_used, 1);
    let photo = world.photo(owner, photo.id).await;
    assert_eq!(photo.status, PhotoStatus::Processing);
    assert!(photo.is_consistent());
}

#[tokio::test]
async fn test_retry_charges_a_fresh_attempt() {
    let world = World::new();
    let owner = world.paying_user(2).await;
    let photo = world.upload(owner).await;
    let lifecycle = world.services.lifecycle();

    // Retry is only valid from failed
    assert!(matches!(
        lifecycle.retry(owner, photo.id).await,
        Err(CoreError::Conflict(_))
    ));

    lifecycle.start_enhancement(owner, photo.id).await.unwrap();
    world.fail(photo.id, true).await;
    assert_eq!(world.account(owner).await.credits, 2);

    let retried = lifecycle.retry(owner, photo.id).await.unwrap();
    assert_eq!(retried.status, PhotoStatus::Processing);
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.error_reason, None);
    assert_eq!(world.account(owner).await.credits, 1);

    world.succeed(photo.id).await;
    assert_eq!(world.account(owner).await.credits, 1);

    // Completed photos cannot be retried
    assert!(matches!(
        lifecycle.retry(owner, photo.id).await,
        Err(CoreError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_stale_callback_settles_nothing() {
    let mut world = World::new();
    let owner = world.paying_user(2).await;
    let photo = world.upload(owner).await;
    let lifecycle = world.services.lifecycle().clone();

    lifecycle.start_enhancement(owner, photo.id).await.unwrap();
    let first = world.jobs.recv().await.unwrap();
    lifecycle
        .on_job_failed(&first, "provider timed out", true)
        .await
        .unwrap();

    lifecycle.retry(owner, photo.id).await.unwrap();
    let second = world.jobs.recv().await.unwrap();
    assert_eq!(second.attempt, first.attempt + 1);
    assert_eq!(world.account(owner).await.credits, 1);

    // The first attempt's result is delivered again
    let err = lifecycle
        .on_job_failed(&first, "provider timed out", true)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    let err = lifecycle
        .on_job_succeeded(&first, &AssetRef::new("mem://stale.jpg"), 5)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    assert_eq!(world.account(owner).await.credits, 1);
    assert_eq!(world.photo(owner, photo.id).await.status, PhotoStatus::Processing);

    let done = lifecycle
        .on_job_succeeded(&second, &AssetRef::new("mem://fresh.jpg"), 5)
        .await
        .unwrap();
    assert_eq!(done.status, PhotoStatus::Completed);
}

#[tokio::test]
async fn test_webhook_delivered_twice() {
    let world = World::new();
    let owner = world.user().await;
    let body = event("evt_1", owner, 10, "completed");

    assert_eq!(world.deliver(&body).await.unwrap(), WebhookOutcome::Applied);
    assert_eq!(world.deliver(&body).await.unwrap(), WebhookOutcome::Duplicate);
    assert_eq!(world.account(owner).await.credits, 10);
}

#[tokio::test]
async fn test_concurrent_webhook_deliveries() {
    let world = World::new();
    let owner = world.user().await;
    let body = event("evt_race", owner, 5, "completed");

    let outcomes = join_all((0..5).map(|_| world.deliver(&body))).await;
    assert!(outcomes.iter().all(|o| o.is_ok()));
    assert_eq!(world.account(owner).await.credits, 5);
}

#[tokio::test]
async fn test_webhook_non_completed_statuses() {
    let world = World::new();
    let owner = world.user().await;

    for (id, status) in [("evt_p", "pending"), ("evt_f", "failed"), ("evt_r", "refunded")] {
        let outcome = world.deliver(&event(id, owner, 10, status)).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Recorded, "{status}");
    }
    assert_eq!(world.account(owner).await.credits, 0);
}

#[tokio::test]
async fn test_capped_clawback_never_negative() {
    let world = World::with_config(CoreConfig {
        clawback: ClawbackPolicy::Capped,
        ..CoreConfig::default()
    });
    let owner = world.user().await;

    world.deliver(&event("evt_buy", owner, 5, "completed")).await.unwrap();
    world
        .services
        .ledger()
        .reserve(owner)
        .await
        .unwrap();
    world.services.ledger().reserve(owner).await.unwrap();
    assert_eq!(world.account(owner).await.credits, 3);

    let outcome = world
        .deliver(&event("evt_refund", owner, 5, "refunded"))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied);
    assert_eq!(world.account(owner).await.credits, 0);
}

#[tokio::test]
async fn test_refund_event_gets_its_own_row() {
    let world = World::new();
    let owner = world.user().await;
    let store = world.services.store();

    world.deliver(&event("evt_paid", owner, 5, "completed")).await.unwrap();
    world.deliver(&event("evt_paid_refund", owner, 5, "refunded")).await.unwrap();

    let paid = store.find_purchase("evt_paid").await.unwrap().unwrap();
    let refund = store.find_purchase("evt_paid_refund").await.unwrap().unwrap();
    assert_eq!(paid.status, PurchaseStatus::Completed);
    assert_eq!(refund.status, PurchaseStatus::Refunded);
    assert_ne!(paid.id, refund.id);
}

#[tokio::test]
async fn test_webhook_rejections() {
    let world = World::new();
    let owner = world.user().await;
    let body = event("evt_sig", owner, 10, "completed");
    let payments = world.services.payments();

    let err = payments.handle_event(body.as_bytes(), None).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidSignature));

    let forged = HmacSignatureVerifier::new("not-the-real-secret-not-the-real!").sign(body.as_bytes());
    let err = payments
        .handle_event(body.as_bytes(), Some(&forged))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidSignature));

    let err = world.deliver("{\"event_id\": 7}").await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let err = world
        .deliver(&event("", owner, 10, "completed"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let err = world
        .deliver(&event("evt_ghost", Uuid::new_v4(), 10, "completed"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));

    assert_eq!(world.account(owner).await.credits, 0);
}

#[tokio::test]
async fn test_oversized_grant_event_rejected() {
    let world = World::new();
    let owner = world.user().await;

    let err = world
        .deliver(&event("evt_huge", owner, MAX_CREDITS_PER_EVENT + 1, "completed"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert_eq!(world.account(owner).await.credits, 0);
}

#[tokio::test]
async fn test_grant_overflow_leaves_balance_untouched() {
    let world = World::new();
    let owner = world.user().await;
    let payments = world.services.payments();
    let big = |event_id: &str| PaymentEvent {
        event_id: event_id.to_string(),
        user_id: owner,
        credits_granted: i32::MAX,
        amount_paid: 0,
        status: PurchaseStatus::Completed,
    };

    assert_eq!(payments.process(big("evt_big_1")).await.unwrap(), WebhookOutcome::Applied);

    let err = payments.process(big("evt_big_2")).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert_eq!(world.account(owner).await.credits, i32::MAX);
    assert!(world
        .services
        .store()
        .find_purchase("evt_big_2")
        .await
        .unwrap()
        .is_none());

    // The applied event still replays as a duplicate
    assert_eq!(
        payments.process(big("evt_big_1")).await.unwrap(),
        WebhookOutcome::Duplicate
    );

    let err = world
        .services
        .ledger()
        .grant(owner, 1, "evt_one_more")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}
