//! Connection pool over SQLite or PostgreSQL.

use sqlx::any::AnyPoolOptions;
use sqlx::migrate::Migrator;
use sqlx::AnyPool;
use tracing::info;

use crate::config::{DatabaseConfig, Dialect};
use crate::DbError;

/// Type alias for the pool shared by every `SqlConnection`.
pub type DbPool = AnyPool;

static SQLITE_MIGRATIONS: Migrator = sqlx::migrate!("../../migrations/sqlite");
static POSTGRES_MIGRATIONS: Migrator = sqlx::migrate!("../../migrations/postgres");

/// Create a pool for `config`.
///
/// In-memory SQLite is pinned to a single, never-recycled connection so the
/// database outlives individual statements.
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool, DbError> {
    sqlx::any::install_default_drivers();
    let dialect = config.dialect()?;

    let mut options = AnyPoolOptions::new().max_connections(config.max_connections);
    if config.is_sqlite_memory() {
        options = options.max_connections(1).idle_timeout(None).max_lifetime(None);
    }

    info!(
        dialect = ?dialect,
        identity = %config.identity(),
        max_connections = config.max_connections,
        "Connecting to database"
    );
    let pool = options.connect(&config.url).await?;
    Ok(pool)
}

/// Run the embedded migrations for `dialect` (`./migrations/<dialect>` at the
/// workspace root).
pub async fn run_migrations(pool: &DbPool, dialect: Dialect) -> Result<(), DbError> {
    info!(dialect = ?dialect, "Running database migrations");
    let migrator = match dialect {
        Dialect::Sqlite => &SQLITE_MIGRATIONS,
        Dialect::Postgres => &POSTGRES_MIGRATIONS,
    };
    migrator.run(pool).await?;
    Ok(())
}
