use crate::db::DbPool;
use crate::models::LoginHistoryEntry;

/// Appends one audit row. `account_id` is 0 when the username was unknown.
pub async fn log_login_attempt(
    pool: &DbPool,
    account_id: i64,
    ip_address: &str,
    success: bool,
    timestamp: i64,
    failure_reason: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO login_history (account_id, ip_address, timestamp, success, failure_reason) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(account_id)
    .bind(ip_address)
    .bind(timestamp)
    .bind(success)
    .bind(failure_reason)
    .execute(pool)
    .await?;
    Ok(())
}

/// Most recent attempts for an account, newest first.
pub async fn get_login_history(
    pool: &DbPool,
    account_id: i64,
    limit: i64,
) -> Result<Vec<LoginHistoryEntry>, sqlx::Error> {
    sqlx::query_as::<_, LoginHistoryEntry>(
        "SELECT * FROM login_history WHERE account_id = ? ORDER BY timestamp DESC LIMIT ?",
    )
    .bind(account_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Janitor: prunes audit rows older than the retention period.
pub async fn cleanup_old_login_history(
    pool: &DbPool,
    now: i64,
    older_than_days: i64,
) -> Result<u64, sqlx::Error> {
    let cutoff = now - older_than_days * 24 * 60 * 60;

    let done = sqlx::query("DELETE FROM login_history WHERE timestamp < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;

    let deleted = done.rows_affected();
    if deleted > 0 {
        tracing::info!(deleted, "Cleaned up old login history entries");
    }
    Ok(deleted)
}
