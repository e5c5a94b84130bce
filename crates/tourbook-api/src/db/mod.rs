//! # Document Persistence
//!
//! Optional Postgres write-through for the in-memory stores.
//!
//! With `DATABASE_URL` set, users, tours, reviews and bookings are stored
//! as JSON documents in one `documents` table and loaded back at startup.
//! Without it the service keeps everything in memory.

pub mod documents;

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Open a pool for `database_url` and apply the embedded migrations.
///
/// `Ok(None)` when no URL is configured; an error when one is configured
/// but unreachable or the migrations fail.
pub async fn init_pool(database_url: Option<&str>) -> Result<Option<PgPool>, sqlx::Error> {
    let Some(url) = database_url else {
        tracing::warn!("DATABASE_URL not set; records live in memory and are lost on restart");
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await?;
    tracing::info!("database pool ready");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("document migrations applied");

    Ok(Some(pool))
}
