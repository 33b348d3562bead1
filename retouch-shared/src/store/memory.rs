/// In-memory store
///
/// Mirrors the Postgres semantics for tests and single-process development.
///
/// ## Locking
/// - Users live behind one `Mutex` each; every balance, free-slot, storage,
///   reservation and ledger mutation for a user runs under that user's mutex.
/// - The user index, photos, reservations, purchases and ledger entries sit
///   behind their own `RwLock`s, held only for the map operation itself.
/// - Operations on different users never wait on each other's mutex.
use super::{balance_overflow, Store};
use crate::error::CoreResult;
use crate::models::ledger_entry::{adjusted_balance, effective_delta, LedgerEntry, NewLedgerEntry};
use crate::models::photo::{NewPhoto, Photo, PhotoStatus};
use crate::models::purchase::{NewPurchase, Purchase};
use crate::models::reservation::{CreditReservation, ReservationState, RESERVATION_AMOUNT};
use crate::models::user::{CreateUser, User, UNLIMITED_CREDITS};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// `Store` backed by process-local maps
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, Arc<Mutex<User>>>>,
    reservations: RwLock<HashMap<Uuid, CreditReservation>>,
    photos: RwLock<HashMap<Uuid, Photo>>,
    purchases: RwLock<HashMap<String, Purchase>>,
    ledger: RwLock<HashMap<String, LedgerEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn user_entry(&self, id: Uuid) -> Option<Arc<Mutex<User>>> {
        self.users.read().await.get(&id).cloned()
    }

    /// Runs `f` on the user under its lock, returning the updated row if `f`
    /// accepted the change
    async fn update_user<F>(&self, id: Uuid, f: F) -> Option<User>
    where
        F: FnOnce(&mut User) -> bool + Send,
    {
        let entry = self.user_entry(id).await?;
        let mut user = entry.lock().await;
        if !f(&mut user) {
            return None;
        }
        user.updated_at = Utc::now();
        Some(user.clone())
    }

    async fn update_photo<F>(
        &self,
        id: Uuid,
        expected: PhotoStatus,
        attempt: Option<i32>,
        f: F,
    ) -> Option<Photo>
    where
        F: FnOnce(&mut Photo) + Send,
    {
        let mut photos = self.photos.write().await;
        let photo = photos.get_mut(&id)?;
        if photo.status != expected || attempt.is_some_and(|a| a != photo.retry_count) {
            return None;
        }
        f(photo);
        Some(photo.clone())
    }

    /// Resolves a HELD reservation under its owner's lock
    async fn resolve_reservation(
        &self,
        id: Uuid,
        target: ReservationState,
    ) -> Option<CreditReservation> {
        let user_id = self.reservations.read().await.get(&id)?.user_id;
        let entry = self.user_entry(user_id).await?;
        let mut user = entry.lock().await;

        let resolved = {
            let mut reservations = self.reservations.write().await;
            let reservation = reservations.get_mut(&id)?;
            if reservation.state != ReservationState::Held {
                return None;
            }
            reservation.state = target;
            reservation.resolved_at = Some(Utc::now());
            reservation.clone()
        };

        if target == ReservationState::Refunded && !user.is_unlimited() {
            user.credits += resolved.amount;
            user.updated_at = Utc::now();
        }

        Some(resolved)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, data: CreateUser) -> CoreResult<User> {
        let now = Utc::now();
        let user = User {
            id: data.id.unwrap_or_else(Uuid::new_v4),
            credits: data.credits,
            free_enhancements_used: 0,
            storage_used_bytes: 0,
            storage_limit_bytes: data.storage_limit_bytes,
            created_at: now,
            updated_at: now,
        };

        let mut users = self.users.write().await;
        if users.contains_key(&user.id) {
            return Err(crate::error::CoreError::Conflict(format!(
                "user {} already exists",
                user.id
            )));
        }
        users.insert(user.id, Arc::new(Mutex::new(user.clone())));

        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> CoreResult<Option<User>> {
        let Some(entry) = self.user_entry(id).await else {
            return Ok(None);
        };
        let user = entry.lock().await.clone();
        Ok(Some(user))
    }

    async fn consume_free_slot(&self, user_id: Uuid, limit: i32) -> CoreResult<Option<User>> {
        Ok(self
            .update_user(user_id, |user| {
                if user.free_enhancements_used >= limit {
                    return false;
                }
                user.free_enhancements_used += 1;
                true
            })
            .await)
    }

    async fn restore_free_slot(&self, user_id: Uuid) -> CoreResult<Option<User>> {
        Ok(self
            .update_user(user_id, |user| {
                if user.free_enhancements_used <= 0 {
                    return false;
                }
                user.free_enhancements_used -= 1;
                true
            })
            .await)
    }

    async fn reserve_storage(&self, user_id: Uuid, bytes: i64) -> CoreResult<Option<User>> {
        Ok(self
            .update_user(user_id, |user| {
                if user.storage_used_bytes + bytes > user.storage_limit_bytes {
                    return false;
                }
                user.storage_used_bytes += bytes;
                true
            })
            .await)
    }

    async fn add_storage(&self, user_id: Uuid, bytes: i64) -> CoreResult<Option<User>> {
        Ok(self
            .update_user(user_id, |user| {
                user.storage_used_bytes += bytes;
                true
            })
            .await)
    }

    async fn release_storage(&self, user_id: Uuid, bytes: i64) -> CoreResult<Option<User>> {
        Ok(self
            .update_user(user_id, |user| {
                user.storage_used_bytes = (user.storage_used_bytes - bytes).max(0);
                true
            })
            .await)
    }

    async fn reserve_credit(&self, user_id: Uuid) -> CoreResult<Option<CreditReservation>> {
        let Some(entry) = self.user_entry(user_id).await else {
            return Ok(None);
        };
        let mut user = entry.lock().await;

        if !user.is_unlimited() {
            if user.credits < RESERVATION_AMOUNT {
                return Ok(None);
            }
            user.credits -= RESERVATION_AMOUNT;
        }
        user.updated_at = Utc::now();

        let reservation = CreditReservation {
            id: Uuid::new_v4(),
            user_id,
            amount: RESERVATION_AMOUNT,
            state: ReservationState::Held,
            created_at: Utc::now(),
            resolved_at: None,
        };
        self.reservations
            .write()
            .await
            .insert(reservation.id, reservation.clone());

        Ok(Some(reservation))
    }

    async fn find_reservation(&self, id: Uuid) -> CoreResult<Option<CreditReservation>> {
        Ok(self.reservations.read().await.get(&id).cloned())
    }

    async fn commit_reservation(&self, id: Uuid) -> CoreResult<Option<CreditReservation>> {
        Ok(self.resolve_reservation(id, ReservationState::Committed).await)
    }

    async fn refund_reservation(&self, id: Uuid) -> CoreResult<Option<CreditReservation>> {
        Ok(self.resolve_reservation(id, ReservationState::Refunded).await)
    }

    async fn list_orphaned_reservations(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<CreditReservation>> {
        let held_by_photo: Vec<Uuid> = self
            .photos
            .read()
            .await
            .values()
            .filter(|p| p.status == PhotoStatus::Processing)
            .filter_map(|p| p.credit_reservation_id)
            .collect();

        let mut orphaned: Vec<CreditReservation> = self
            .reservations
            .read()
            .await
            .values()
            .filter(|r| r.state == ReservationState::Held && r.created_at < before)
            .filter(|r| !held_by_photo.contains(&r.id))
            .cloned()
            .collect();

        orphaned.sort_by_key(|r| r.created_at);
        orphaned.truncate(limit.max(0) as usize);
        Ok(orphaned)
    }

    async fn apply_ledger_entry(
        &self,
        entry: NewLedgerEntry,
    ) -> CoreResult<Option<(LedgerEntry, bool)>> {
        let Some(user_entry) = self.user_entry(entry.user_id).await else {
            return Ok(None);
        };
        let mut user = user_entry.lock().await;

        let mut ledger = self.ledger.write().await;
        if let Some(existing) = ledger.get(&entry.idempotency_key) {
            return Ok(Some((existing.clone(), false)));
        }

        let delta = effective_delta(entry.kind, entry.amount, user.credits);
        let Some(balance_after) = adjusted_balance(user.credits, delta) else {
            return Err(balance_overflow(entry.user_id, user.credits, entry.amount));
        };
        if user.credits != UNLIMITED_CREDITS {
            user.credits = balance_after;
            user.updated_at = Utc::now();
        }

        let applied = LedgerEntry {
            idempotency_key: entry.idempotency_key.clone(),
            user_id: entry.user_id,
            kind: entry.kind,
            amount: delta,
            balance_after: user.credits,
            created_at: Utc::now(),
        };
        ledger.insert(entry.idempotency_key, applied.clone());

        Ok(Some((applied, true)))
    }

    async fn insert_photo(&self, data: NewPhoto) -> CoreResult<Photo> {
        let photo = Photo {
            id: Uuid::new_v4(),
            owner_id: data.owner_id,
            original_asset_ref: data.original_asset_ref,
            enhanced_asset_ref: None,
            status: PhotoStatus::Pending,
            enhancement_mode: data.enhancement_mode,
            content_type: data.content_type,
            credit_reservation_id: None,
            used_free_slot: false,
            processing_started_at: None,
            processing_completed_at: None,
            error_reason: None,
            retryable: false,
            retry_count: 0,
            original_size_bytes: data.original_size_bytes,
            enhanced_size_bytes: None,
            created_at: Utc::now(),
            expires_at: data.expires_at,
        };

        self.photos.write().await.insert(photo.id, photo.clone());
        Ok(photo)
    }

    async fn find_photo(&self, id: Uuid) -> CoreResult<Option<Photo>> {
        Ok(self.photos.read().await.get(&id).cloned())
    }

    async fn begin_processing(
        &self,
        id: Uuid,
        from: PhotoStatus,
        reservation_id: Option<Uuid>,
        used_free_slot: bool,
    ) -> CoreResult<Option<Photo>> {
        Ok(self
            .update_photo(id, from, None, |photo| {
                photo.status = PhotoStatus::Processing;
                photo.credit_reservation_id = reservation_id;
                photo.used_free_slot = used_free_slot;
                photo.processing_started_at = Some(Utc::now());
                photo.processing_completed_at = None;
                photo.error_reason = None;
                photo.retryable = false;
                if from == PhotoStatus::Failed {
                    photo.retry_count += 1;
                }
            })
            .await)
    }

    async fn complete_photo(
        &self,
        id: Uuid,
        attempt: i32,
        enhanced_asset_ref: &str,
        enhanced_size_bytes: i64,
    ) -> CoreResult<Option<Photo>> {
        let enhanced_asset_ref = enhanced_asset_ref.to_string();
        Ok(self
            .update_photo(id, PhotoStatus::Processing, Some(attempt), |photo| {
                photo.status = PhotoStatus::Completed;
                photo.enhanced_asset_ref = Some(enhanced_asset_ref);
                photo.enhanced_size_bytes = Some(enhanced_size_bytes);
                photo.credit_reservation_id = None;
                photo.used_free_slot = false;
                photo.processing_completed_at = Some(Utc::now());
            })
            .await)
    }

    async fn fail_photo(
        &self,
        id: Uuid,
        attempt: i32,
        reason: &str,
        retryable: bool,
    ) -> CoreResult<Option<Photo>> {
        let reason = reason.to_string();
        Ok(self
            .update_photo(id, PhotoStatus::Processing, Some(attempt), |photo| {
                photo.status = PhotoStatus::Failed;
                photo.error_reason = Some(reason);
                photo.retryable = retryable;
                photo.credit_reservation_id = None;
                photo.used_free_slot = false;
                photo.processing_completed_at = Some(Utc::now());
            })
            .await)
    }

    async fn list_stuck_photos(
        &self,
        started_before: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Photo>> {
        let mut stuck: Vec<Photo> = self
            .photos
            .read()
            .await
            .values()
            .filter(|p| p.status == PhotoStatus::Processing)
            .filter(|p| p.processing_started_at.is_some_and(|at| at < started_before))
            .cloned()
            .collect();

        stuck.sort_by_key(|p| p.processing_started_at);
        stuck.truncate(limit.max(0) as usize);
        Ok(stuck)
    }

    async fn delete_expired_photos(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Photo>> {
        let mut photos = self.photos.write().await;

        let mut expired: Vec<(DateTime<Utc>, Uuid)> = photos
            .values()
            .filter(|p| p.expires_at <= now && p.status != PhotoStatus::Processing)
            .map(|p| (p.expires_at, p.id))
            .collect();
        expired.sort();
        expired.truncate(limit.max(0) as usize);

        Ok(expired
            .into_iter()
            .filter_map(|(_, id)| photos.remove(&id))
            .collect())
    }

    async fn find_purchase(&self, provider_event_id: &str) -> CoreResult<Option<Purchase>> {
        Ok(self.purchases.read().await.get(provider_event_id).cloned())
    }

    async fn record_purchase(&self, data: NewPurchase) -> CoreResult<(Purchase, bool)> {
        let mut purchases = self.purchases.write().await;
        if let Some(existing) = purchases.get(&data.provider_event_id) {
            return Ok((existing.clone(), false));
        }

        let purchase = Purchase {
            id: Uuid::new_v4(),
            user_id: data.user_id,
            provider_event_id: data.provider_event_id.clone(),
            credits_granted: data.credits_granted,
            amount_paid: data.amount_paid,
            status: data.status,
            processed_at: Utc::now(),
        };
        purchases.insert(data.provider_event_id, purchase.clone());

        Ok((purchase, true))
    }

    async fn health_check(&self) -> CoreResult<()> {
        Ok(())
    }
}
