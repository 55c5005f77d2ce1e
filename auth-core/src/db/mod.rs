//! PostgreSQL pool construction and migrations.

use crate::config::DatabaseConfig;
use crate::services::CoreError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_LIFETIME: Duration = Duration::from_secs(3600);

/// Build the connection pool. Acquire is bounded so a saturated pool
/// surfaces as an error instead of queueing logins indefinitely.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, CoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(IDLE_TIMEOUT)
        .max_lifetime(MAX_LIFETIME)
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "database pool ready"
    );
    Ok(pool)
}

/// Apply pending migrations from `./migrations`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), CoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;
    tracing::info!("database migrations applied");
    Ok(())
}

/// Liveness probe: one round trip to the database.
pub async fn health_check(pool: &PgPool) -> Result<(), CoreError> {
    sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await?;
    Ok(())
}
