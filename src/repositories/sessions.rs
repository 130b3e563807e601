use crate::db::DbPool;
use crate::models::Session;
use sqlx::{Sqlite, Transaction};

pub async fn create_session(
    pool: &DbPool,
    account_id: i64,
    token: &str,
    expires_at: i64,
    ip_address: &str,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO sessions (session_token, account_id, created_at, expires_at, ip_address, last_used) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(token)
    .bind(account_id)
    .bind(now)
    .bind(expires_at)
    .bind(ip_address)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_session(pool: &DbPool, token: &str) -> Result<Option<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE session_token = ?")
        .bind(token)
        .fetch_optional(pool)
        .await
}

/// Slides the session forward: stamps the new expiration and marks the token
/// as just used.
pub async fn update_session_expiration(
    pool: &DbPool,
    token: &str,
    new_expires_at: i64,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sessions SET expires_at = ?, last_used = ? WHERE session_token = ?")
        .bind(new_expires_at)
        .bind(now)
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

/// Deletes a session; returns whether a row was actually removed.
pub async fn delete_session(pool: &DbPool, token: &str) -> Result<bool, sqlx::Error> {
    let done = sqlx::query("DELETE FROM sessions WHERE session_token = ?")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(done.rows_affected() > 0)
}

/// Deletes every session owned by the account, optionally sparing one token
/// (the caller's own). Returns the number of sessions removed.
pub async fn delete_all_sessions_for_account(
    pool: &DbPool,
    account_id: i64,
    except_token: Option<&str>,
) -> Result<u64, sqlx::Error> {
    let done = match except_token {
        Some(token) => {
            sqlx::query("DELETE FROM sessions WHERE account_id = ? AND session_token != ?")
                .bind(account_id)
                .bind(token)
                .execute(pool)
                .await?
        }
        None => {
            sqlx::query("DELETE FROM sessions WHERE account_id = ?")
                .bind(account_id)
                .execute(pool)
                .await?
        }
    };

    Ok(done.rows_affected())
}

/// Transactional variant of [`delete_all_sessions_for_account`], used by the
/// password-change path to revoke sessions atomically with the credential
/// update.
pub async fn delete_all_sessions_for_account_tx(
    tx: &mut Transaction<'_, Sqlite>,
    account_id: i64,
    except_token: Option<&str>,
) -> Result<u64, sqlx::Error> {
    let done = match except_token {
        Some(token) => {
            sqlx::query("DELETE FROM sessions WHERE account_id = ? AND session_token != ?")
                .bind(account_id)
                .bind(token)
                .execute(&mut **tx)
                .await?
        }
        None => {
            sqlx::query("DELETE FROM sessions WHERE account_id = ?")
                .bind(account_id)
                .execute(&mut **tx)
                .await?
        }
    };

    Ok(done.rows_affected())
}

/// Janitor: drops every session whose expiration has passed.
pub async fn cleanup_expired_sessions(pool: &DbPool, now: i64) -> Result<u64, sqlx::Error> {
    let done = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    let deleted = done.rows_affected();
    if deleted > 0 {
        tracing::info!(deleted, "Cleaned up expired sessions");
    }
    Ok(deleted)
}
