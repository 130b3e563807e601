use crate::db::DbPool;
use crate::models::RateLimitRow;

/// Rows whose last attempt is older than this are garbage.
const STALE_AFTER_SECS: i64 = 3600;

/// Upserts the persisted window for `limit_key`.
///
/// Mirrors the in-memory policy semantics: a row whose window has elapsed
/// restarts at count 1, otherwise the count increments. Uses SQLite's UPSERT
/// so concurrent writers stay consistent.
pub async fn record_attempt(
    pool: &DbPool,
    limit_key: &str,
    now: i64,
    window_seconds: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO rate_limits (limit_key, attempt_count, window_start, last_attempt) \
         VALUES (?, 1, ?, ?) \
         ON CONFLICT(limit_key) DO UPDATE SET \
             attempt_count = CASE \
                 WHEN excluded.last_attempt - rate_limits.window_start > ? THEN 1 \
                 ELSE rate_limits.attempt_count + 1 \
             END, \
             window_start = CASE \
                 WHEN excluded.last_attempt - rate_limits.window_start > ? THEN excluded.window_start \
                 ELSE rate_limits.window_start \
             END, \
             last_attempt = excluded.last_attempt",
    )
    .bind(limit_key)
    .bind(now)
    .bind(now)
    .bind(window_seconds)
    .bind(window_seconds)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_rate_limit(
    pool: &DbPool,
    limit_key: &str,
) -> Result<Option<RateLimitRow>, sqlx::Error> {
    sqlx::query_as::<_, RateLimitRow>("SELECT * FROM rate_limits WHERE limit_key = ?")
        .bind(limit_key)
        .fetch_optional(pool)
        .await
}

/// Whether the persisted window has `max_attempts` or more attempts inside
/// `window_seconds`. An elapsed window is reset in place.
pub async fn is_rate_limited(
    pool: &DbPool,
    limit_key: &str,
    now: i64,
    max_attempts: i64,
    window_seconds: i64,
) -> Result<bool, sqlx::Error> {
    let Some(row) = get_rate_limit(pool, limit_key).await? else {
        return Ok(false);
    };

    if now - row.window_start > window_seconds {
        sqlx::query("UPDATE rate_limits SET attempt_count = 0, window_start = ? WHERE limit_key = ?")
            .bind(now)
            .bind(limit_key)
            .execute(pool)
            .await?;
        return Ok(false);
    }

    Ok(row.attempt_count >= max_attempts)
}

/// Janitor: drops rows idle for more than an hour.
pub async fn cleanup_expired_rate_limits(pool: &DbPool, now: i64) -> Result<u64, sqlx::Error> {
    let done = sqlx::query("DELETE FROM rate_limits WHERE last_attempt < ?")
        .bind(now - STALE_AFTER_SECS)
        .execute(pool)
        .await?;

    let deleted = done.rows_affected();
    if deleted > 0 {
        tracing::info!(deleted, "Cleaned up expired rate limit entries");
    }
    Ok(deleted)
}
