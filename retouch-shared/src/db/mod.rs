/// Postgres plumbing for the `PgStore` backend
///
/// # Modules
///
/// - `pool`: connection pool creation, health check and shutdown
/// - `migrations`: schema migrations embedded from `migrations/`
///
/// # Example
///
/// ```no_run
/// use retouch_shared::db::migrations::run_migrations;
/// use retouch_shared::db::pool::{create_pool, DatabaseConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = create_pool(DatabaseConfig {
///         url: std::env::var("DATABASE_URL")?,
///         ..Default::default()
///     })
///     .await?;
///
///     run_migrations(&pool).await?;
///     Ok(())
/// }
/// ```

pub mod migrations;
pub mod pool;
