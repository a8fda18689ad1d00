//! PostgreSQL adapters for the share pack provisioning ports.
//!
//! Each adapter is a newtype over `PgPool`. The schema ships as sqlx
//! migrations under `migrations/`.

pub mod locks;
pub mod queue;
pub mod store;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

pub use queue::PgWorkQueue;
pub use store::PgTemporalStore;

/// Schema holding every table this crate touches.
pub const SCHEMA: &str = "sharepack";

/// Open a pool against `database_url`.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;
    info!(max_connections, "database pool ready");
    Ok(pool)
}

/// Apply pending migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run share pack migrations")?;
    Ok(())
}
