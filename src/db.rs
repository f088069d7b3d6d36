//! SQLite connection setup.
//!
//! Each store owns its schema and creates it in `initialize()`; this module
//! only opens the pool.

use crate::error::Result;
use anyhow::Context as _;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;

/// Open (or create) the SQLite database at the given path.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open SQLite database at {}", path.display()))?;

    Ok(pool)
}

/// In-memory pool for tests. Single connection so every query sees the
/// same database.
pub async fn in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .context("in-memory sqlite should connect")?;

    Ok(pool)
}
