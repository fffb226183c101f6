use anyhow::Result;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, PoolError};
use diesel_async::AsyncPgConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness};
use tracing::info;

pub type DbPool = Pool<AsyncPgConnection>;

pub type PoolRunError = bb8::RunError<PoolError>;

pub async fn connect_pool(database_url: &str) -> Result<DbPool> {
    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder().build(config).await?;
    Ok(pool)
}

/// Applies embedded migrations over a short-lived synchronous connection.
pub fn run_migrations(database_url: &str, migrations: EmbeddedMigrations) -> Result<()> {
    info!("Running database migrations...");
    let mut conn = PgConnection::establish(database_url)?;
    conn.run_pending_migrations(migrations)
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    info!("Migrations completed successfully");
    Ok(())
}

/// True when the store rejected a write because the key already exists.
///
/// Postgres reports this as SQLSTATE 23505, which diesel surfaces as
/// `UniqueViolation`. Callers treat it as "already recorded", not as a failure.
pub fn is_duplicate(err: &DieselError) -> bool {
    matches!(
        err,
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
    )
}
