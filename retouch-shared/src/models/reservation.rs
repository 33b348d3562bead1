/// Credit reservation model and database operations
///
/// A reservation is the ledger record of a credit deducted in advance of an
/// enhancement completing. It is created HELD and resolved exactly once, to
/// COMMITTED (charge stands) or REFUNDED (credit returned).
///
/// # State Machine
///
/// ```text
/// held → committed
///      → refunded
/// ```
///
/// # Schema
///
/// ```sql
/// CREATE TYPE reservation_state AS ENUM ('held', 'committed', 'refunded');
///
/// CREATE TABLE credit_reservations (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     amount INTEGER NOT NULL DEFAULT 1 CHECK (amount > 0),
///     state reservation_state NOT NULL DEFAULT 'held',
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     resolved_at TIMESTAMPTZ
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Credits held by one reservation
pub const RESERVATION_AMOUNT: i32 = 1;

const RESERVATION_COLUMNS: &str = "id, user_id, amount, state, created_at, resolved_at";

/// Reservation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reservation_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReservationState {
    /// Credit deducted, work in flight
    Held,

    /// Work succeeded, charge stands
    Committed,

    /// Work failed, credit returned
    Refunded,
}

impl ReservationState {
    /// Converts state to string
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationState::Held => "held",
            ReservationState::Committed => "committed",
            ReservationState::Refunded => "refunded",
        }
    }

    /// Checks if the reservation has been resolved
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ReservationState::Held)
    }
}

/// A credit held for one enhancement attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CreditReservation {
    /// Reservation id
    pub id: Uuid,

    /// Owner of the reserved credit
    pub user_id: Uuid,

    /// Credits held (always `RESERVATION_AMOUNT`)
    pub amount: i32,

    /// Current state
    pub state: ReservationState,

    /// When the credit was deducted
    pub created_at: DateTime<Utc>,

    /// When the reservation was committed or refunded
    pub resolved_at: Option<DateTime<Utc>>,
}

impl CreditReservation {
    /// Atomically deducts one credit and records a HELD reservation
    ///
    /// The balance guard and the decrement are one conditional `UPDATE`, run in
    /// the same transaction as the reservation insert. Returns `None` when the
    /// user has no spendable credit (or does not exist).
    pub async fn reserve(pool: &PgPool, user_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let debited: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE users
            SET credits = CASE WHEN credits = -1 THEN -1 ELSE credits - $2 END,
                updated_at = NOW()
            WHERE id = $1 AND (credits = -1 OR credits >= $2)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(RESERVATION_AMOUNT)
        .fetch_optional(&mut *tx)
        .await?;

        if debited.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let reservation = sqlx::query_as::<_, CreditReservation>(&format!(
            r#"
            INSERT INTO credit_reservations (user_id, amount, state)
            VALUES ($1, $2, 'held')
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(RESERVATION_AMOUNT)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(reservation))
    }

    /// Finds a reservation by id
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let reservation = sqlx::query_as::<_, CreditReservation>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM credit_reservations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(reservation)
    }

    /// Transitions HELD → COMMITTED
    ///
    /// Returns `None` if the reservation is not HELD (or does not exist).
    pub async fn commit(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let reservation = sqlx::query_as::<_, CreditReservation>(&format!(
            r#"
            UPDATE credit_reservations
            SET state = 'committed',
                resolved_at = NOW()
            WHERE id = $1 AND state = 'held'
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(reservation)
    }

    /// Transitions HELD → REFUNDED and returns the credit to the balance
    ///
    /// Both writes run in one transaction. Unlimited accounts keep their
    /// sentinel. Returns `None` if the reservation is not HELD.
    pub async fn refund(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let reservation = sqlx::query_as::<_, CreditReservation>(&format!(
            r#"
            UPDATE credit_reservations
            SET state = 'refunded',
                resolved_at = NOW()
            WHERE id = $1 AND state = 'held'
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(reservation) = reservation else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE users
            SET credits = CASE WHEN credits = -1 THEN -1 ELSE credits + $2 END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(reservation.user_id)
        .bind(reservation.amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(reservation))
    }

    /// Lists HELD reservations created before `before` that no PROCESSING
    /// photo references
    ///
    /// These are left behind when a process dies between reserve and
    /// commit/refund, or when a release fails after the photo reached a
    /// terminal state.
    pub async fn list_orphaned(
        pool: &PgPool,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let reservations = sqlx::query_as::<_, CreditReservation>(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS}
            FROM credit_reservations r
            WHERE r.state = 'held'
              AND r.created_at < $1
              AND NOT EXISTS (
                  SELECT 1 FROM photos p
                  WHERE p.credit_reservation_id = r.id AND p.status = 'processing'
              )
            ORDER BY r.created_at ASC
            LIMIT $2
            "#
        ))
        .bind(before)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(reservations)
    }
}
