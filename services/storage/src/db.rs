use crate::config::DatabaseConfig;
use crate::error::StoreError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Create the PostgreSQL connection pool shared by the metadata and analytics stores
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
    let url = config.url.as_deref().ok_or_else(|| {
        StoreError::Configuration("STORAGE__DATABASE__URL is not set".to_string())
    })?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
        .connect(url)
        .await?;

    info!("Connected to PostgreSQL database");

    Ok(pool)
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    info!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await?;

    info!("Database migrations completed");
    Ok(())
}
