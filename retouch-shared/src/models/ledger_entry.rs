/// Ledger entry model and database operations
///
/// Ledger entries record balance adjustments that arrive from outside the
/// enhancement flow (payment grants and clawbacks). The idempotency key is
/// the primary key, so applying the same key twice returns the first entry
/// instead of moving the balance again.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE ledger_entry_kind AS ENUM ('grant', 'clawback');
///
/// CREATE TABLE ledger_entries (
///     idempotency_key VARCHAR(255) PRIMARY KEY,
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     kind ledger_entry_kind NOT NULL,
///     amount INTEGER NOT NULL,
///     balance_after INTEGER NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use crate::models::user::UNLIMITED_CREDITS;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

const ENTRY_COLUMNS: &str = "idempotency_key, user_id, kind, amount, balance_after, created_at";

/// Kind of balance adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ledger_entry_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LedgerEntryKind {
    /// Credits added (purchase completed)
    Grant,

    /// Credits removed (purchase refunded)
    Clawback,
}

/// Applied balance adjustment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub idempotency_key: String,
    pub user_id: Uuid,
    pub kind: LedgerEntryKind,

    /// Signed delta actually applied (zero for unlimited accounts)
    pub amount: i32,

    /// Balance after the adjustment
    pub balance_after: i32,

    pub created_at: DateTime<Utc>,
}

/// Requested balance adjustment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub idempotency_key: String,
    pub user_id: Uuid,
    pub kind: LedgerEntryKind,

    /// Requested magnitude (always positive)
    pub amount: i32,
}

/// Computes the signed delta to apply to `balance`
///
/// Grants add the full amount; clawbacks remove at most the current balance.
/// Unlimited accounts are never adjusted.
pub fn effective_delta(kind: LedgerEntryKind, amount: i32, balance: i32) -> i32 {
    if balance == UNLIMITED_CREDITS {
        return 0;
    }

    match kind {
        LedgerEntryKind::Grant => amount,
        LedgerEntryKind::Clawback => -amount.min(balance.max(0)),
    }
}

/// Balance after adding `delta`, or `None` if it leaves the `i32` range
pub fn adjusted_balance(balance: i32, delta: i32) -> Option<i32> {
    if balance == UNLIMITED_CREDITS {
        return Some(balance);
    }
    balance.checked_add(delta)
}

/// Result of applying an adjustment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// This call moved the balance
    Applied(LedgerEntry),

    /// The key was applied before; the first entry is returned
    Replayed(LedgerEntry),

    /// No such user
    UnknownUser,

    /// The adjustment would overflow the balance; nothing was written
    Overflow { balance: i32 },
}

impl LedgerEntry {
    /// Finds an entry by idempotency key
    pub async fn find_by_key<'e, E>(executor: E, key: &str) -> Result<Option<Self>, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let entry = sqlx::query_as::<_, LedgerEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(executor)
        .await?;

        Ok(entry)
    }

    /// Applies an adjustment once per idempotency key
    ///
    /// The user row is locked for the duration of the transaction, the key is
    /// claimed with `ON CONFLICT DO NOTHING`, and the balance only moves if
    /// the claim succeeded. A replayed key wins over an overflow check, so
    /// redelivery of an applied grant is always a no-op.
    pub async fn apply(pool: &PgPool, data: NewLedgerEntry) -> Result<ApplyOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let balance: Option<(i32,)> =
            sqlx::query_as("SELECT credits FROM users WHERE id = $1 FOR UPDATE")
                .bind(data.user_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((balance,)) = balance else {
            tx.rollback().await?;
            return Ok(ApplyOutcome::UnknownUser);
        };

        if let Some(existing) = Self::find_by_key(&mut *tx, &data.idempotency_key).await? {
            tx.rollback().await?;
            return Ok(ApplyOutcome::Replayed(existing));
        }

        let delta = effective_delta(data.kind, data.amount, balance);
        let Some(balance_after) = adjusted_balance(balance, delta) else {
            tx.rollback().await?;
            return Ok(ApplyOutcome::Overflow { balance });
        };

        let inserted = sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            INSERT INTO ledger_entries (idempotency_key, user_id, kind, amount, balance_after)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(&data.idempotency_key)
        .bind(data.user_id)
        .bind(data.kind)
        .bind(delta)
        .bind(balance_after)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(entry) = inserted else {
            tx.rollback().await?;
            let existing = Self::find_by_key(pool, &data.idempotency_key)
                .await?
                .ok_or(sqlx::Error::RowNotFound)?;
            return Ok(ApplyOutcome::Replayed(existing));
        };

        if delta != 0 {
            sqlx::query("UPDATE users SET credits = $2, updated_at = NOW() WHERE id = $1")
                .bind(data.user_id)
                .bind(balance_after)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(ApplyOutcome::Applied(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_delta() {
        assert_eq!(effective_delta(LedgerEntryKind::Grant, 10, 0), 10);
        assert_eq!(effective_delta(LedgerEntryKind::Grant, 10, UNLIMITED_CREDITS), 0);
    }

    #[test]
    fn test_adjusted_balance_rejects_overflow() {
        assert_eq!(adjusted_balance(5, 10), Some(15));
        assert_eq!(adjusted_balance(i32::MAX - 1, 1), Some(i32::MAX));
        assert_eq!(adjusted_balance(i32::MAX, 1), None);
        assert_eq!(adjusted_balance(1, i32::MAX), None);
        assert_eq!(adjusted_balance(UNLIMITED_CREDITS, 0), Some(UNLIMITED_CREDITS));
    }

    #[test]
    fn test_clawback_delta_is_capped() {
        assert_eq!(effective_delta(LedgerEntryKind::Clawback, 3, 10), -3);
        assert_eq!(effective_delta(LedgerEntryKind::Clawback, 10, 4), -4);
        assert_eq!(effective_delta(LedgerEntryKind::Clawback, 10, 0), 0);
        assert_eq!(effective_delta(LedgerEntryKind::Clawback, 10, UNLIMITED_CREDITS), 0);
    }
}
