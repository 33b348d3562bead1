/// Persistence for the accounting and lifecycle core
///
/// Every check-then-act on a user's counters and every photo transition goes
/// through one `Store` method, and each method is atomic on its own. The
/// components above never hold a lock across two calls.
///
/// # Backends
///
/// - `postgres`: `PgStore`, delegating to the SQL in `crate::models`
/// - `memory`: `MemoryStore`, a per-user locked map for tests and local runs
///
/// Conditional operations return `Ok(None)` when their guard does not hold
/// (insufficient balance, wrong status, unknown id). Callers decide which
/// error that becomes.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::{CoreError, CoreResult};
use crate::models::ledger_entry::{LedgerEntry, NewLedgerEntry};
use crate::models::photo::{NewPhoto, Photo, PhotoStatus};
use crate::models::purchase::{NewPurchase, Purchase};
use crate::models::reservation::CreditReservation;
use crate::models::user::{CreateUser, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Storage backend for users, reservations, photos, purchases and ledger entries
#[async_trait]
pub trait Store: Send + Sync {
    /// Creates a user row
    async fn create_user(&self, data: CreateUser) -> CoreResult<User>;

    async fn find_user(&self, id: Uuid) -> CoreResult<Option<User>>;

    /// Consumes one free enhancement if fewer than `limit` are used
    async fn consume_free_slot(&self, user_id: Uuid, limit: i32) -> CoreResult<Option<User>>;

    /// Returns one consumed free enhancement; `None` if none are consumed
    async fn restore_free_slot(&self, user_id: Uuid) -> CoreResult<Option<User>>;

    /// Charges `bytes` against the storage quota if it fits
    async fn reserve_storage(&self, user_id: Uuid, bytes: i64) -> CoreResult<Option<User>>;

    /// Charges `bytes` against storage usage without a quota check
    async fn add_storage(&self, user_id: Uuid, bytes: i64) -> CoreResult<Option<User>>;

    /// Releases `bytes` of storage usage, flooring at zero
    async fn release_storage(&self, user_id: Uuid, bytes: i64) -> CoreResult<Option<User>>;

    /// Deducts one credit and records a HELD reservation
    async fn reserve_credit(&self, user_id: Uuid) -> CoreResult<Option<CreditReservation>>;

    async fn find_reservation(&self, id: Uuid) -> CoreResult<Option<CreditReservation>>;

    /// HELD → COMMITTED
    async fn commit_reservation(&self, id: Uuid) -> CoreResult<Option<CreditReservation>>;

    /// HELD → REFUNDED, returning the credit
    async fn refund_reservation(&self, id: Uuid) -> CoreResult<Option<CreditReservation>>;

    /// HELD reservations older than `before` that no PROCESSING photo holds
    async fn list_orphaned_reservations(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<CreditReservation>>;

    /// Applies a grant or clawback once per idempotency key
    ///
    /// Returns the entry and whether this call applied it; `None` if the user
    /// does not exist. An adjustment that would overflow the balance is a
    /// `Validation` error and writes nothing.
    async fn apply_ledger_entry(
        &self,
        entry: NewLedgerEntry,
    ) -> CoreResult<Option<(LedgerEntry, bool)>>;

    async fn insert_photo(&self, data: NewPhoto) -> CoreResult<Photo>;

    async fn find_photo(&self, id: Uuid) -> CoreResult<Option<Photo>>;

    /// Compare-and-set `from` → PROCESSING, recording the authorization
    async fn begin_processing(
        &self,
        id: Uuid,
        from: PhotoStatus,
        reservation_id: Option<Uuid>,
        used_free_slot: bool,
    ) -> CoreResult<Option<Photo>>;

    /// Compare-and-set PROCESSING → COMPLETED for attempt `attempt`
    /// (the photo's `retry_count`)
    async fn complete_photo(
        &self,
        id: Uuid,
        attempt: i32,
        enhanced_asset_ref: &str,
        enhanced_size_bytes: i64,
    ) -> CoreResult<Option<Photo>>;

    /// Compare-and-set PROCESSING → FAILED for attempt `attempt`
    async fn fail_photo(
        &self,
        id: Uuid,
        attempt: i32,
        reason: &str,
        retryable: bool,
    ) -> CoreResult<Option<Photo>>;

    /// PROCESSING photos started before `started_before`
    async fn list_stuck_photos(
        &self,
        started_before: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Photo>>;

    /// Deletes expired photos that are not PROCESSING and returns them
    async fn delete_expired_photos(&self, now: DateTime<Utc>, limit: i64)
        -> CoreResult<Vec<Photo>>;

    async fn find_purchase(&self, provider_event_id: &str) -> CoreResult<Option<Purchase>>;

    /// Records a purchase once per event id; returns it and whether it was new
    async fn record_purchase(&self, data: NewPurchase) -> CoreResult<(Purchase, bool)>;

    /// Verifies the backend is reachable
    async fn health_check(&self) -> CoreResult<()>;
}

/// Error for an adjustment that would leave the balance range
pub(crate) fn balance_overflow(user_id: Uuid, balance: i32, amount: i32) -> CoreError {
    CoreError::Validation(format!(
        "adjusting user {} by {} credits would overflow balance {}",
        user_id, amount, balance
    ))
}
