use super::pool::DbPool;
use sqlx::{Sqlite, Transaction};

/// Runs schema bootstrap and additive migrations.
///
/// This function is automatically called during database pool creation and
/// is idempotent: the core schema is `CREATE TABLE IF NOT EXISTS`, and the
/// column migrations probe before altering.
///
/// # Migration Steps
/// 1. **Core Schema**: accounts, sessions, login_history, rate_limits with
///    their indices
/// 2. **Lockout Columns**: add failed-attempt tracking columns to databases
///    created before they existed
/// 3. **Email Column**: add the optional unique email column to older
///    databases
///
/// # Returns
/// - `Ok(())` if all migrations succeed
/// - `Err(sqlx::Error)` if schema creation fails (the transaction is rolled
///   back)
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    if let Err(err) = apply_core_schema(&mut tx).await {
        tx.rollback().await?;
        return Err(err);
    }

    tx.commit().await?;

    // Additive column migrations for databases created by older builds.
    // "duplicate column name" from a re-run is harmless, so these only log.
    if column_missing(pool, "SELECT failed_login_attempts FROM accounts LIMIT 1").await {
        for sql in [
            "ALTER TABLE accounts ADD COLUMN failed_login_attempts INTEGER NOT NULL DEFAULT 0",
            "ALTER TABLE accounts ADD COLUMN locked_until INTEGER NOT NULL DEFAULT 0",
            "ALTER TABLE accounts ADD COLUMN last_failed_attempt INTEGER NOT NULL DEFAULT 0",
        ] {
            if let Err(err) = sqlx::query(sql).execute(pool).await {
                tracing::error!(error = %err, "Failed to apply lockout column migration");
            }
        }
    }

    if column_missing(pool, "SELECT email FROM accounts LIMIT 1").await {
        if let Err(err) = sqlx::query("ALTER TABLE accounts ADD COLUMN email TEXT UNIQUE")
            .execute(pool)
            .await
        {
            tracing::error!(error = %err, "Failed to apply email column migration");
        }
    }

    Ok(())
}

async fn apply_core_schema(tx: &mut Transaction<'_, Sqlite>) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            account_id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            email TEXT UNIQUE,
            created_at INTEGER NOT NULL,
            last_login INTEGER,
            is_banned INTEGER NOT NULL DEFAULT 0,
            ban_reason TEXT,
            ban_until INTEGER NOT NULL DEFAULT 0,
            failed_login_attempts INTEGER NOT NULL DEFAULT 0,
            locked_until INTEGER NOT NULL DEFAULT 0,
            last_failed_attempt INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_accounts_username ON accounts(username)")
        .execute(&mut **tx)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_accounts_email ON accounts(email)")
        .execute(&mut **tx)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            session_token TEXT PRIMARY KEY,
            account_id INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            ip_address TEXT,
            last_used INTEGER,
            FOREIGN KEY(account_id) REFERENCES accounts(account_id)
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_account ON sessions(account_id)")
        .execute(&mut **tx)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at)")
        .execute(&mut **tx)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS login_history (
            history_id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL,
            ip_address TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            success INTEGER NOT NULL,
            failure_reason TEXT
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_login_history_account \
         ON login_history(account_id, timestamp DESC)",
    )
    .execute(&mut **tx)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_login_history_ip \
         ON login_history(ip_address, timestamp DESC)",
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rate_limits (
            limit_key TEXT PRIMARY KEY,
            attempt_count INTEGER NOT NULL,
            window_start INTEGER NOT NULL,
            last_attempt INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rate_limits_window ON rate_limits(window_start)")
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Probes for a column by selecting it; an error means it is missing.
async fn column_missing(pool: &DbPool, probe_sql: &str) -> bool {
    sqlx::query(probe_sql).fetch_optional(pool).await.is_err()
}
