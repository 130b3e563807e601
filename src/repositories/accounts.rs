use crate::db::DbPool;
use crate::models::Account;
use sqlx::{Sqlite, Transaction};

/// Failed-attempt counters reset once the previous failure is this old.
const FAILED_ATTEMPT_WINDOW_SECS: i64 = 5 * 60;

/// Outcome of an account creation attempt.
#[derive(Debug)]
pub enum CreateAccountOutcome {
    /// The new account's ID.
    Created(i64),
    /// The username is already in use.
    UsernameTaken,
}

/// Inserts a new account and returns its server-assigned ID.
///
/// A unique-constraint violation on the username maps to
/// `CreateAccountOutcome::UsernameTaken` so the handler can answer with the
/// proper result code even when two registrations race.
pub async fn create_account(
    pool: &DbPool,
    username: &str,
    password_hash: &str,
    email: Option<&str>,
    now: i64,
) -> Result<CreateAccountOutcome, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO accounts (username, password_hash, email, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(username)
    .bind(password_hash)
    .bind(email)
    .bind(now)
    .execute(pool)
    .await;

    match result {
        Ok(done) => Ok(CreateAccountOutcome::Created(done.last_insert_rowid())),
        Err(sqlx::Error::Database(db_err))
            if db_err.is_unique_violation() && db_err.message().contains("username") =>
        {
            Ok(CreateAccountOutcome::UsernameTaken)
        }
        Err(err) => Err(err),
    }
}

/// Retrieves a full account record by username, including the stored
/// credential.
pub async fn get_account_by_username(
    pool: &DbPool,
    username: &str,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await
}

pub async fn get_account_by_id(
    pool: &DbPool,
    account_id: i64,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE account_id = ?")
        .bind(account_id)
        .fetch_optional(pool)
        .await
}

pub async fn update_last_login(
    pool: &DbPool,
    account_id: i64,
    timestamp: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE accounts SET last_login = ? WHERE account_id = ?")
        .bind(timestamp)
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Replaces the stored credential inside an open transaction, so the caller
/// can revoke sessions in the same logical step.
pub async fn update_password_tx(
    tx: &mut Transaction<'_, Sqlite>,
    account_id: i64,
    password_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE accounts SET password_hash = ? WHERE account_id = ?")
        .bind(password_hash)
        .bind(account_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn update_password(
    pool: &DbPool,
    account_id: i64,
    password_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE accounts SET password_hash = ? WHERE account_id = ?")
        .bind(password_hash)
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Bans an account. `ban_until == 0` means permanent.
pub async fn ban_account(
    pool: &DbPool,
    account_id: i64,
    reason: &str,
    ban_until: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE accounts SET is_banned = 1, ban_reason = ?, ban_until = ? WHERE account_id = ?")
        .bind(reason)
        .bind(ban_until)
        .bind(account_id)
        .execute(pool)
        .await?;

    tracing::info!(account_id, reason = %reason, ban_until, "Account banned");
    Ok(())
}

pub async fn unban_account(pool: &DbPool, account_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE accounts SET is_banned = 0, ban_reason = NULL, ban_until = 0 WHERE account_id = ?",
    )
    .bind(account_id)
    .execute(pool)
    .await?;

    tracing::info!(account_id, "Account unbanned");
    Ok(())
}

pub async fn lock_account(
    pool: &DbPool,
    account_id: i64,
    lock_until: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE accounts SET locked_until = ? WHERE account_id = ?")
        .bind(lock_until)
        .bind(account_id)
        .execute(pool)
        .await?;

    tracing::info!(account_id, lock_until, "Account locked");
    Ok(())
}

pub async fn unlock_account(pool: &DbPool, account_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE accounts SET locked_until = 0, failed_login_attempts = 0 WHERE account_id = ?",
    )
    .bind(account_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Whether the account is locked at `now`. An expired lock is cleared as a
/// side effect, so callers never observe a stale lock.
pub async fn is_account_locked(
    pool: &DbPool,
    account_id: i64,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT locked_until FROM accounts WHERE account_id = ?")
            .bind(account_id)
            .fetch_optional(pool)
            .await?;

    let Some((locked_until,)) = row else {
        return Ok(false);
    };

    if locked_until == 0 {
        return Ok(false);
    }

    if now >= locked_until {
        unlock_account(pool, account_id).await?;
        return Ok(false);
    }

    Ok(true)
}

/// Bumps the failed-login counter with a 5-minute sliding reset: a failure
/// more than 300 seconds after the previous one restarts the count at 1.
/// Returns the new count.
pub async fn increment_failed_login_attempts(
    pool: &DbPool,
    account_id: i64,
    now: i64,
) -> Result<i64, sqlx::Error> {
    let row: Option<(i64, i64)> = sqlx::query_as(
        "SELECT failed_login_attempts, last_failed_attempt FROM accounts WHERE account_id = ?",
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await?;

    let (mut current, last_attempt) = row.unwrap_or((0, 0));

    if last_attempt > 0 && now - last_attempt > FAILED_ATTEMPT_WINDOW_SECS {
        current = 0;
    }

    let new_count = current + 1;

    sqlx::query(
        "UPDATE accounts SET failed_login_attempts = ?, last_failed_attempt = ? WHERE account_id = ?",
    )
    .bind(new_count)
    .bind(now)
    .bind(account_id)
    .execute(pool)
    .await?;

    Ok(new_count)
}

pub async fn reset_failed_login_attempts(
    pool: &DbPool,
    account_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE accounts SET failed_login_attempts = 0, last_failed_attempt = 0 WHERE account_id = ?",
    )
    .bind(account_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_failed_login_attempts(
    pool: &DbPool,
    account_id: i64,
) -> Result<Option<(i64, i64)>, sqlx::Error> {
    sqlx::query_as(
        "SELECT failed_login_attempts, last_failed_attempt FROM accounts WHERE account_id = ?",
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await
}
