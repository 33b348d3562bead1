/// User account model and database operations
///
/// A user row carries the spendable credit balance, the free-tier counter and
/// the storage quota. Only the ledger and the quota enforcer mutate these
/// fields, and every mutation is a conditional `UPDATE ... RETURNING` so the
/// check and the write happen as one statement.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     credits INTEGER NOT NULL DEFAULT 0 CHECK (credits >= -1),
///     free_enhancements_used INTEGER NOT NULL DEFAULT 0 CHECK (free_enhancements_used >= 0),
///     storage_used_bytes BIGINT NOT NULL DEFAULT 0 CHECK (storage_used_bytes >= 0),
///     storage_limit_bytes BIGINT NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// `credits = -1` is the "unlimited" sentinel used for admin accounts.
///
/// # Example
///
/// ```no_run
/// use retouch_shared::models::user::{User, CreateUser};
/// use retouch_shared::db::pool::{create_pool, DatabaseConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
///
/// let user = User::create(&pool, CreateUser {
///     id: None,
///     credits: 0,
///     storage_limit_bytes: 500 * 1024 * 1024,
/// }).await?;
///
/// // Claim one of two free enhancements
/// let claimed = User::consume_free_slot(&pool, user.id, 2).await?;
/// assert!(claimed.is_some());
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Sentinel credit value for accounts that are never charged
pub const UNLIMITED_CREDITS: i32 = -1;

const USER_COLUMNS: &str = "id, credits, free_enhancements_used, storage_used_bytes, \
                            storage_limit_bytes, created_at, updated_at";

/// User account with balance and quota counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// Opaque authenticated user id
    pub id: Uuid,

    /// Spendable credits, or `UNLIMITED_CREDITS`
    pub credits: i32,

    /// Free-tier enhancements consumed
    pub free_enhancements_used: i32,

    /// Bytes of original + enhanced assets currently stored
    pub storage_used_bytes: i64,

    /// Maximum bytes this user may store
    pub storage_limit_bytes: i64,

    /// When the account was created
    pub created_at: DateTime<Utc>,

    /// When the account was last updated
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a user row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    /// Explicit id (the identity subsystem's id); generated when `None`
    pub id: Option<Uuid>,

    /// Opening balance (`UNLIMITED_CREDITS` for admin accounts)
    pub credits: i32,

    /// Storage quota in bytes
    pub storage_limit_bytes: i64,
}

impl User {
    /// Whether the account bypasses credit accounting
    pub fn is_unlimited(&self) -> bool {
        self.credits == UNLIMITED_CREDITS
    }

    /// Whether a reservation could currently succeed
    pub fn can_spend(&self) -> bool {
        self.is_unlimited() || self.credits > 0
    }

    /// Free enhancements left under `limit`
    pub fn free_remaining(&self, limit: i32) -> i32 {
        (limit - self.free_enhancements_used).max(0)
    }

    /// Bytes that may still be stored
    pub fn storage_remaining(&self) -> i64 {
        (self.storage_limit_bytes - self.storage_used_bytes).max(0)
    }

    /// Creates a user row
    pub async fn create(pool: &PgPool, data: CreateUser) -> Result<Self, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, credits, storage_limit_bytes)
            VALUES (COALESCE($1, gen_random_uuid()), $2, $3)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(data.id)
        .bind(data.credits)
        .bind(data.storage_limit_bytes)
        .fetch_one(pool)
        .await?;

        Ok(user)
    }

    /// Finds a user by id
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    /// Atomically consumes one free enhancement if any remain under `limit`
    ///
    /// Returns `None` when the allowance is exhausted or the user is unknown.
    pub async fn consume_free_slot(
        pool: &PgPool,
        id: Uuid,
        limit: i32,
    ) -> Result<Option<Self>, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET free_enhancements_used = free_enhancements_used + 1,
                updated_at = NOW()
            WHERE id = $1 AND free_enhancements_used < $2
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(limit)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    /// Atomically gives back one consumed free enhancement
    ///
    /// Returns `None` when the counter is already zero or the user is unknown.
    pub async fn restore_free_slot(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET free_enhancements_used = free_enhancements_used - 1,
                updated_at = NOW()
            WHERE id = $1 AND free_enhancements_used > 0
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    /// Atomically charges `bytes` against the storage quota
    ///
    /// Returns `None` when the quota would be exceeded or the user is unknown.
    pub async fn reserve_storage(
        pool: &PgPool,
        id: Uuid,
        bytes: i64,
    ) -> Result<Option<Self>, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET storage_used_bytes = storage_used_bytes + $2,
                updated_at = NOW()
            WHERE id = $1 AND storage_used_bytes + $2 <= storage_limit_bytes
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(bytes)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    /// Charges `bytes` against storage usage without a quota check
    ///
    /// Used for enhanced assets: the enhancement was paid for, so its output is
    /// always kept even if it pushes usage past the limit.
    pub async fn add_storage(pool: &PgPool, id: Uuid, bytes: i64) -> Result<Option<Self>, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET storage_used_bytes = storage_used_bytes + $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(bytes)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    /// Releases `bytes` of storage usage (never below zero)
    pub async fn release_storage(
        pool: &PgPool,
        id: Uuid,
        bytes: i64,
    ) -> Result<Option<Self>, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET storage_used_bytes = GREATEST(storage_used_bytes - $2, 0),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(bytes)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }
}
