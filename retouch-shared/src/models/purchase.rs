/// Purchase model and database operations
///
/// Purchases are the append-only record of payment-provider events. The
/// provider's event id is unique, which is what makes redelivered webhooks
/// detectable. Rows are never updated after insert.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE purchase_status AS ENUM ('pending', 'completed', 'failed', 'refunded');
///
/// CREATE TABLE purchases (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     provider_event_id VARCHAR(255) NOT NULL UNIQUE,
///     credits_granted INTEGER NOT NULL CHECK (credits_granted >= 0),
///     amount_paid BIGINT NOT NULL CHECK (amount_paid >= 0),
///     status purchase_status NOT NULL,
///     processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

const PURCHASE_COLUMNS: &str =
    "id, user_id, provider_event_id, credits_granted, amount_paid, status, processed_at";

/// Payment status reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "purchase_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PurchaseStatus {
    /// Converts status to string
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Completed => "completed",
            PurchaseStatus::Failed => "failed",
            PurchaseStatus::Refunded => "refunded",
        }
    }
}

/// Recorded payment event
///
/// One row per provider event, not per payment. `status` is the status that
/// event reported and never changes: a later refund or failure of the same
/// payment arrives as a new event with its own row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Purchase {
    pub id: Uuid,
    pub user_id: Uuid,

    /// Provider event id (idempotency key)
    pub provider_event_id: String,

    /// Credits the event grants when completed
    pub credits_granted: i32,

    /// Amount paid in minor currency units
    pub amount_paid: i64,

    pub status: PurchaseStatus,
    pub processed_at: DateTime<Utc>,
}

/// Input for recording a purchase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPurchase {
    pub user_id: Uuid,
    pub provider_event_id: String,
    pub credits_granted: i32,
    pub amount_paid: i64,
    pub status: PurchaseStatus,
}

impl Purchase {
    /// Finds a purchase by provider event id
    pub async fn find_by_event_id(
        pool: &PgPool,
        provider_event_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let purchase = sqlx::query_as::<_, Purchase>(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE provider_event_id = $1"
        ))
        .bind(provider_event_id)
        .fetch_optional(pool)
        .await?;

        Ok(purchase)
    }

    /// Records a purchase unless its event id is already present
    ///
    /// Returns the stored row and whether this call inserted it. A concurrent
    /// duplicate loses on the unique constraint and gets the winner's row back.
    pub async fn record(pool: &PgPool, data: NewPurchase) -> Result<(Self, bool), sqlx::Error> {
        let inserted = sqlx::query_as::<_, Purchase>(&format!(
            r#"
            INSERT INTO purchases (user_id, provider_event_id, credits_granted, amount_paid, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (provider_event_id) DO NOTHING
            RETURNING {PURCHASE_COLUMNS}
            "#
        ))
        .bind(data.user_id)
        .bind(&data.provider_event_id)
        .bind(data.credits_granted)
        .bind(data.amount_paid)
        .bind(data.status)
        .fetch_optional(pool)
        .await?;

        if let Some(purchase) = inserted {
            return Ok((purchase, true));
        }

        let existing = Self::find_by_event_id(pool, &data.provider_event_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;

        Ok((existing, false))
    }
}
