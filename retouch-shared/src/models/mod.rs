/// Database models for Retouch
///
/// Each model is a typed record plus the SQL operations the Postgres store
/// delegates to.
///
/// # Models
///
/// - `user`: Accounts with credit balance, free-tier counter and storage quota
/// - `reservation`: Credits held for an in-flight enhancement
/// - `photo`: Uploaded photos and their enhancement state machine
/// - `purchase`: Append-only payment events
/// - `ledger_entry`: Idempotent grants and clawbacks
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
///     credits: 5,
///     storage_limit_bytes: 100 * 1024 * 1024,
/// }).await?;
/// # Ok(())
/// # }
/// ```

pub mod ledger_entry;
pub mod photo;
pub mod purchase;
pub mod reservation;
pub mod user;
