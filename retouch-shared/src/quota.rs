/// Enhancement quota enforcement
///
/// Every enhancement attempt must be authorized before any work starts. The
/// free tier is tried first, then a paid credit.
///
/// # Authorization Order
///
/// 1. Free tier: `free_enhancements_used += 1` if below the limit
/// 2. Paid: reserve one credit through the ledger
/// 3. Neither: `CoreError::InsufficientCredits`
///
/// Each path is a single atomic conditional update, and exactly one of them
/// applies per call.
///
/// # Release
///
/// | authorization | outcome | effect |
/// |---|---|---|
/// | free slot | success | none |
/// | free slot | failure | `free_enhancements_used -= 1` |
/// | reservation | success | commit |
/// | reservation | failure | refund |
///
/// # Example
///
/// ```
/// use retouch_shared::ledger::CreditLedger;
/// use retouch_shared::models::user::CreateUser;
/// use retouch_shared::quota::{Outcome, QuotaEnforcer};
/// use retouch_shared::store::{MemoryStore, Store};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(MemoryStore::new());
/// let user = store.create_user(CreateUser { id: None, credits: 0, storage_limit_bytes: 1024 }).await?;
/// let enforcer = QuotaEnforcer::new(store.clone(), CreditLedger::new(store), 2);
///
/// let auth = enforcer.authorize(user.id).await?;
/// assert!(auth.used_free_slot);
/// enforcer.release(user.id, &auth, Outcome::Failure).await?;
/// # Ok(())
/// # }
/// ```

use crate::error::{CoreError, CoreResult};
use crate::ledger::CreditLedger;
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Default number of free enhancements per user
pub const FREE_TIER_LIMIT: i32 = 2;

/// How one enhancement attempt is paid for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// A free-tier slot was consumed
    pub used_free_slot: bool,

    /// Credit reservation, when paid
    pub reservation_id: Option<Uuid>,
}

impl Authorization {
    pub fn free_slot() -> Self {
        Self {
            used_free_slot: true,
            reservation_id: None,
        }
    }

    pub fn reserved(reservation_id: Uuid) -> Self {
        Self {
            used_free_slot: false,
            reservation_id: Some(reservation_id),
        }
    }
}

/// Result of the work an authorization paid for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Gatekeeper for enhancement attempts
#[derive(Clone)]
pub struct QuotaEnforcer {
    store: Arc<dyn Store>,
    ledger: CreditLedger,
    free_tier_limit: i32,
}

impl QuotaEnforcer {
    pub fn new(store: Arc<dyn Store>, ledger: CreditLedger, free_tier_limit: i32) -> Self {
        Self {
            store,
            ledger,
            free_tier_limit,
        }
    }

    /// Free enhancements granted to each user
    pub fn free_tier_limit(&self) -> i32 {
        self.free_tier_limit
    }

    /// Authorizes one enhancement attempt
    ///
    /// # Errors
    ///
    /// - `InsufficientCredits` when the free tier is exhausted and no credit
    ///   is available
    /// - `NotFound` for an unknown user
    pub async fn authorize(&self, user_id: Uuid) -> CoreResult<Authorization> {
        if let Some(user) = self
            .store
            .consume_free_slot(user_id, self.free_tier_limit)
            .await?
        {
            debug!(
                user_id = %user_id,
                free_used = user.free_enhancements_used,
                "Authorized on free tier"
            );
            return Ok(Authorization::free_slot());
        }

        let reservation = self.ledger.reserve(user_id).await?;
        debug!(
            user_id = %user_id,
            reservation_id = %reservation.id,
            "Authorized on paid credit"
        );
        Ok(Authorization::reserved(reservation.id))
    }

    /// Settles an authorization once its attempt has finished
    pub async fn release(
        &self,
        user_id: Uuid,
        authorization: &Authorization,
        outcome: Outcome,
    ) -> CoreResult<()> {
        if let Some(reservation_id) = authorization.reservation_id {
            match outcome {
                Outcome::Success => self.ledger.commit(reservation_id).await?,
                Outcome::Failure => self.ledger.refund(reservation_id).await?,
            };
            return Ok(());
        }

        if !authorization.used_free_slot || outcome == Outcome::Success {
            return Ok(());
        }

        match self.store.restore_free_slot(user_id).await? {
            Some(user) => {
                debug!(
                    user_id = %user_id,
                    free_used = user.free_enhancements_used,
                    "Restored free enhancement"
                );
                Ok(())
            }
            None => {
                error!(
                    user_id = %user_id,
                    "Ledger integrity violation: no consumed free enhancement to restore"
                );
                Err(CoreError::FreeSlotUnderflow { user_id })
            }
        }
    }
}
