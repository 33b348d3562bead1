/// Credit ledger
///
/// Owns every change to a user's credit balance. Enhancements pay through a
/// reservation that is deducted up front and later committed or refunded;
/// payments arrive as idempotent grants keyed by the provider's event id.
///
/// # Invariants
///
/// - `credits >= 0` unless the account is unlimited (`credits = -1`), and
///   unlimited accounts are never debited or credited
/// - a reservation is resolved exactly once; resolving it again is an
///   integrity violation, logged at `error` and returned as
///   `CoreError::InvalidReservationState`
/// - a grant or clawback key moves the balance at most once
///
/// # Example
///
/// ```
/// use retouch_shared::ledger::CreditLedger;
/// use retouch_shared::models::user::CreateUser;
/// use retouch_shared::store::{MemoryStore, Store};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(MemoryStore::new());
/// let user = store.create_user(CreateUser { id: None, credits: 1, storage_limit_bytes: 1024 }).await?;
/// let ledger = CreditLedger::new(store);
///
/// let reservation = ledger.reserve(user.id).await?;
/// ledger.refund(reservation.id).await?;
/// assert_eq!(ledger.balance(user.id).await?.credits, 1);
/// # Ok(())
/// # }
/// ```

use crate::error::{CoreError, CoreResult};
use crate::models::ledger_entry::{LedgerEntry, LedgerEntryKind, NewLedgerEntry};
use crate::models::reservation::CreditReservation;
use crate::models::user::User;
use crate::store::Store;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Result of a grant or clawback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantOutcome {
    /// Whether this call moved the balance (false on replay)
    pub applied: bool,

    /// The stored entry for the idempotency key
    pub entry: LedgerEntry,
}

/// Atomic credit operations over a `Store`
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn Store>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Deducts one credit and returns the HELD reservation
    ///
    /// # Errors
    ///
    /// - `InsufficientCredits` if the balance is zero and not unlimited
    /// - `NotFound` if the user does not exist
    pub async fn reserve(&self, user_id: Uuid) -> CoreResult<CreditReservation> {
        if let Some(reservation) = self.store.reserve_credit(user_id).await? {
            debug!(
                user_id = %user_id,
                reservation_id = %reservation.id,
                "Reserved credit"
            );
            return Ok(reservation);
        }

        match self.store.find_user(user_id).await? {
            Some(_) => Err(CoreError::InsufficientCredits { user_id }),
            None => Err(CoreError::not_found("user", user_id)),
        }
    }

    /// HELD → COMMITTED; the deducted credit stays spent
    pub async fn commit(&self, reservation_id: Uuid) -> CoreResult<CreditReservation> {
        match self.store.commit_reservation(reservation_id).await? {
            Some(reservation) => {
                debug!(reservation_id = %reservation_id, "Committed reservation");
                Ok(reservation)
            }
            None => Err(self.unresolvable(reservation_id).await),
        }
    }

    /// HELD → REFUNDED; the credit returns to the balance
    pub async fn refund(&self, reservation_id: Uuid) -> CoreResult<CreditReservation> {
        match self.store.refund_reservation(reservation_id).await? {
            Some(reservation) => {
                info!(
                    reservation_id = %reservation_id,
                    user_id = %reservation.user_id,
                    amount = reservation.amount,
                    "Refunded reservation"
                );
                Ok(reservation)
            }
            None => Err(self.unresolvable(reservation_id).await),
        }
    }

    /// Adds `amount` credits once per `idempotency_key`
    ///
    /// Replaying a key is a no-op that returns the first entry.
    pub async fn grant(
        &self,
        user_id: Uuid,
        amount: i32,
        idempotency_key: &str,
    ) -> CoreResult<GrantOutcome> {
        let outcome = self
            .apply(user_id, LedgerEntryKind::Grant, amount, idempotency_key)
            .await?;

        if outcome.applied {
            info!(
                user_id = %user_id,
                amount = outcome.entry.amount,
                balance_after = outcome.entry.balance_after,
                key = %idempotency_key,
                "Granted credits"
            );
        } else {
            debug!(user_id = %user_id, key = %idempotency_key, "Grant already applied");
        }

        Ok(outcome)
    }

    /// Removes up to `amount` credits once per `idempotency_key`
    ///
    /// Never drives the balance below zero; unlimited accounts are untouched.
    pub async fn claw_back(
        &self,
        user_id: Uuid,
        amount: i32,
        idempotency_key: &str,
    ) -> CoreResult<GrantOutcome> {
        let outcome = self
            .apply(user_id, LedgerEntryKind::Clawback, amount, idempotency_key)
            .await?;

        if outcome.applied {
            info!(
                user_id = %user_id,
                requested = amount,
                applied = outcome.entry.amount,
                balance_after = outcome.entry.balance_after,
                key = %idempotency_key,
                "Clawed back credits"
            );
        }

        Ok(outcome)
    }

    /// Current balance and counters
    pub async fn balance(&self, user_id: Uuid) -> CoreResult<User> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or_else(|| CoreError::not_found("user", user_id))
    }

    async fn apply(
        &self,
        user_id: Uuid,
        kind: LedgerEntryKind,
        amount: i32,
        idempotency_key: &str,
    ) -> CoreResult<GrantOutcome> {
        if amount <= 0 {
            return Err(CoreError::Validation(format!(
                "ledger amount must be positive, got {}",
                amount
            )));
        }
        if idempotency_key.trim().is_empty() {
            return Err(CoreError::Validation(
                "idempotency key must not be empty".to_string(),
            ));
        }

        let (entry, applied) = self
            .store
            .apply_ledger_entry(NewLedgerEntry {
                idempotency_key: idempotency_key.to_string(),
                user_id,
                kind,
                amount,
            })
            .await?
            .ok_or_else(|| CoreError::not_found("user", user_id))?;

        Ok(GrantOutcome { applied, entry })
    }

    /// Builds the error for a reservation that could not be resolved
    async fn unresolvable(&self, reservation_id: Uuid) -> CoreError {
        match self.store.find_reservation(reservation_id).await {
            Ok(Some(reservation)) => {
                error!(
                    reservation_id = %reservation_id,
                    user_id = %reservation.user_id,
                    state = reservation.state.as_str(),
                    "Ledger integrity violation: reservation already resolved"
                );
                CoreError::InvalidReservationState {
                    reservation_id,
                    state: reservation.state,
                }
            }
            Ok(None) => CoreError::not_found("reservation", reservation_id),
            Err(e) => e,
        }
    }
}
