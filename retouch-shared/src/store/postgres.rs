/// Postgres store
///
/// Thin adapter from the `Store` trait to the model-level SQL. All guards
/// live in the SQL statements themselves.
use super::{balance_overflow, Store};
use crate::db::pool::health_check;
use crate::error::CoreResult;
use crate::models::ledger_entry::{ApplyOutcome, LedgerEntry, NewLedgerEntry};
use crate::models::photo::{NewPhoto, Photo, PhotoStatus};
use crate::models::purchase::{NewPurchase, Purchase};
use crate::models::reservation::CreditReservation;
use crate::models::user::{CreateUser, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// `Store` backed by a Postgres pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, data: CreateUser) -> CoreResult<User> {
        Ok(User::create(&self.pool, data).await?)
    }

    async fn find_user(&self, id: Uuid) -> CoreResult<Option<User>> {
        Ok(User::find_by_id(&self.pool, id).await?)
    }

    async fn consume_free_slot(&self, user_id: Uuid, limit: i32) -> CoreResult<Option<User>> {
        Ok(User::consume_free_slot(&self.pool, user_id, limit).await?)
    }

    async fn restore_free_slot(&self, user_id: Uuid) -> CoreResult<Option<User>> {
        Ok(User::restore_free_slot(&self.pool, user_id).await?)
    }

    async fn reserve_storage(&self, user_id: Uuid, bytes: i64) -> CoreResult<Option<User>> {
        Ok(User::reserve_storage(&self.pool, user_id, bytes).await?)
    }

    async fn add_storage(&self, user_id: Uuid, bytes: i64) -> CoreResult<Option<User>> {
        Ok(User::add_storage(&self.pool, user_id, bytes).await?)
    }

    async fn release_storage(&self, user_id: Uuid, bytes: i64) -> CoreResult<Option<User>> {
        Ok(User::release_storage(&self.pool, user_id, bytes).await?)
    }

    async fn reserve_credit(&self, user_id: Uuid) -> CoreResult<Option<CreditReservation>> {
        Ok(CreditReservation::reserve(&self.pool, user_id).await?)
    }

    async fn find_reservation(&self, id: Uuid) -> CoreResult<Option<CreditReservation>> {
        Ok(CreditReservation::find_by_id(&self.pool, id).await?)
    }

    async fn commit_reservation(&self, id: Uuid) -> CoreResult<Option<CreditReservation>> {
        Ok(CreditReservation::commit(&self.pool, id).await?)
    }

    async fn refund_reservation(&self, id: Uuid) -> CoreResult<Option<CreditReservation>> {
        Ok(CreditReservation::refund(&self.pool, id).await?)
    }

    async fn list_orphaned_reservations(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<CreditReservation>> {
        Ok(CreditReservation::list_orphaned(&self.pool, before, limit).await?)
    }

    async fn apply_ledger_entry(
        &self,
        entry: NewLedgerEntry,
    ) -> CoreResult<Option<(LedgerEntry, bool)>> {
        let user_id = entry.user_id;
        let amount = entry.amount;
        match LedgerEntry::apply(&self.pool, entry).await? {
            ApplyOutcome::Applied(entry) => Ok(Some((entry, true))),
            ApplyOutcome::Replayed(entry) => Ok(Some((entry, false))),
            ApplyOutcome::UnknownUser => Ok(None),
            ApplyOutcome::Overflow { balance } => Err(balance_overflow(user_id, balance, amount)),
        }
    }

    async fn insert_photo(&self, data: NewPhoto) -> CoreResult<Photo> {
        Ok(Photo::create(&self.pool, data).await?)
    }

    async fn find_photo(&self, id: Uuid) -> CoreResult<Option<Photo>> {
        Ok(Photo::find_by_id(&self.pool, id).await?)
    }

    async fn begin_processing(
        &self,
        id: Uuid,
        from: PhotoStatus,
        reservation_id: Option<Uuid>,
        used_free_slot: bool,
    ) -> CoreResult<Option<Photo>> {
        Ok(Photo::begin_processing(&self.pool, id, from, reservation_id, used_free_slot).await?)
    }

    async fn complete_photo(
        &self,
        id: Uuid,
        attempt: i32,
        enhanced_asset_ref: &str,
        enhanced_size_bytes: i64,
    ) -> CoreResult<Option<Photo>> {
        Ok(Photo::complete(&self.pool, id, attempt, enhanced_asset_ref, enhanced_size_bytes).await?)
    }

    async fn fail_photo(
        &self,
        id: Uuid,
        attempt: i32,
        reason: &str,
        retryable: bool,
    ) -> CoreResult<Option<Photo>> {
        Ok(Photo::fail(&self.pool, id, attempt, reason, retryable).await?)
    }

    async fn list_stuck_photos(
        &self,
        started_before: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Photo>> {
        Ok(Photo::list_stuck(&self.pool, started_before, limit).await?)
    }

    async fn delete_expired_photos(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Photo>> {
        Ok(Photo::delete_expired(&self.pool, now, limit).await?)
    }

    async fn find_purchase(&self, provider_event_id: &str) -> CoreResult<Option<Purchase>> {
        Ok(Purchase::find_by_event_id(&self.pool, provider_event_id).await?)
    }

    async fn record_purchase(&self, data: NewPurchase) -> CoreResult<(Purchase, bool)> {
        Ok(Purchase::record(&self.pool, data).await?)
    }

    async fn health_check(&self) -> CoreResult<()> {
        Ok(health_check(&self.pool).await?)
    }
}
