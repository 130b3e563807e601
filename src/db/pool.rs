use super::migrations::run_migrations;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::path::Path;

/// Type alias for the SQLite connection pool.
/// Used throughout the application for database access.
pub type DbPool = SqlitePool;

/// Creates and initializes the database connection pool.
///
/// This is the main entry point for store initialization. It:
/// 1. Ensures the database directory exists
/// 2. Configures SQLite connection options
/// 3. Creates the connection pool (1-5 connections)
/// 4. Runs schema bootstrap and additive migrations
///
/// # Database Configuration
/// - **WAL Mode**: Write-Ahead Logging for concurrent readers
/// - **Foreign Keys**: Enabled for referential integrity
/// - **Synchronous**: Normal mode (balanced safety/performance)
/// - **Busy Timeout**: 60 seconds to handle lock contention
/// - **Cache**: ~64 MiB page cache
/// - **mmap**: ~256 MiB memory-mapped I/O
/// - **Auto-create**: Database file created if missing
///
/// # Returns
/// - `Ok(DbPool)` on success
/// - `Err(sqlx::Error)` if initialization or migration fails
pub async fn create_pool(db_path: &str) -> Result<DbPool, sqlx::Error> {
    ensure_parent_directory(db_path)?;

    let connect_options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(60))
        .pragma("cache_size", "-64000")
        .pragma("mmap_size", "268435456")
        .pragma("temp_store", "MEMORY")
        .pragma("page_size", "4096");

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .min_connections(1)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(connect_options)
        .await?;

    run_migrations(&pool).await?;

    tracing::info!(path = %db_path, "Database pool created successfully");
    Ok(pool)
}

fn ensure_parent_directory(db_path: &str) -> Result<(), sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if parent != Path::new("") && parent != Path::new(".") {
            if let Err(err) = std::fs::create_dir_all(parent) {
                tracing::error!(error = %err, path = ?parent, "Failed to create database directory");
                return Err(sqlx::Error::Io(err));
            }
        }
    }

    Ok(())
}
