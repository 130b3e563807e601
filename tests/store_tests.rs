//! Store-level tests against an in-memory SQLite database: schema bootstrap,
//! account and session lifecycles, parameter binding, and the janitor
//! operations.

use auth_server::db::{run_migrations, DbPool};
use auth_server::repositories::accounts::{self, CreateAccountOutcome};
use auth_server::repositories::{login_history, rate_limits, sessions};
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;

/// One connection only: every pooled connection to `sqlite::memory:` would
/// otherwise get its own empty database.
async fn setup_test_db() -> DbPool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

async fn create_test_account(pool: &DbPool, username: &str) -> i64 {
    match accounts::create_account(pool, username, "$2b$04$fakehash", None, Utc::now().timestamp())
        .await
        .unwrap()
    {
        CreateAccountOutcome::Created(id) => id,
        CreateAccountOutcome::UsernameTaken => panic!("test account already exists"),
    }
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let pool = setup_test_db().await;
    run_migrations(&pool)
        .await
        .expect("Second migration run failed");
}

#[tokio::test]
async fn test_username_uniqueness() {
    let pool = setup_test_db().await;
    let now = Utc::now().timestamp();

    let first = accounts::create_account(&pool, "alice", "$2b$04$h1", None, now)
        .await
        .unwrap();
    let CreateAccountOutcome::Created(first_id) = first else {
        panic!("first creation failed");
    };
    assert!(first_id > 0);

    let second = accounts::create_account(&pool, "alice", "$2b$04$h2", None, now)
        .await
        .unwrap();
    assert!(matches!(second, CreateAccountOutcome::UsernameTaken));

    // The first account is unaffected
    let account = accounts::get_account_by_username(&pool, "alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.account_id, first_id);
    assert_eq!(account.password_hash, "$2b$04$h1");
}

#[tokio::test]
async fn test_email_uniqueness() {
    let pool = setup_test_db().await;
    let now = Utc::now().timestamp();

    accounts::create_account(&pool, "alice", "$2b$04$h1", Some("a@example.com"), now)
        .await
        .unwrap();

    // Same email on a different username is a store error, not UsernameTaken
    let result =
        accounts::create_account(&pool, "bob", "$2b$04$h2", Some("a@example.com"), now).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_parameter_binding_treats_input_as_literal() {
    let pool = setup_test_db().await;
    let now = Utc::now().timestamp();

    for hostile in ["admin'; DROP TABLE accounts; --", "' OR '1'='1"] {
        let outcome = accounts::create_account(&pool, hostile, "$2b$04$h", None, now)
            .await
            .unwrap();
        assert!(matches!(outcome, CreateAccountOutcome::Created(_)));

        // Lookup returns only the exact literal match
        let found = accounts::get_account_by_username(&pool, hostile)
            .await
            .unwrap();
        assert_eq!(found.unwrap().username, hostile);
    }

    // The accounts table survived and other lookups still work
    assert!(accounts::get_account_by_username(&pool, "admin")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_session_integrity() {
    let pool = setup_test_db().await;
    let now = Utc::now().timestamp();
    let account_id = create_test_account(&pool, "alice").await;

    let token = "a".repeat(64);
    sessions::create_session(&pool, account_id, &token, now + 600, "127.0.0.1", now)
        .await
        .unwrap();

    let session = sessions::get_session(&pool, &token).await.unwrap().unwrap();
    assert_eq!(session.account_id, account_id);
    assert_eq!(session.expires_at, now + 600);
    assert_eq!(session.ip_address.as_deref(), Some("127.0.0.1"));
}

#[tokio::test]
async fn test_sliding_renewal_updates_expiration() {
    let pool = setup_test_db().await;
    let now = Utc::now().timestamp();
    let account_id = create_test_account(&pool, "alice").await;

    let token = "b".repeat(64);
    sessions::create_session(&pool, account_id, &token, now + 600, "127.0.0.1", now)
        .await
        .unwrap();

    let renewed = now + 7 * 24 * 60 * 60;
    sessions::update_session_expiration(&pool, &token, renewed, now)
        .await
        .unwrap();

    let session = sessions::get_session(&pool, &token).await.unwrap().unwrap();
    assert_eq!(session.expires_at, renewed);
    assert_eq!(session.last_used, Some(now));
}

#[tokio::test]
async fn test_logout_invalidates_session() {
    let pool = setup_test_db().await;
    let now = Utc::now().timestamp();
    let account_id = create_test_account(&pool, "alice").await;

    let token = "c".repeat(64);
    sessions::create_session(&pool, account_id, &token, now + 600, "127.0.0.1", now)
        .await
        .unwrap();

    assert!(sessions::delete_session(&pool, &token).await.unwrap());
    assert!(sessions::get_session(&pool, &token).await.unwrap().is_none());

    // Deleting again reports no row
    assert!(!sessions::delete_session(&pool, &token).await.unwrap());
}

#[tokio::test]
async fn test_revoke_all_but_one() {
    let pool = setup_test_db().await;
    let now = Utc::now().timestamp();
    let account_id = create_test_account(&pool, "alice").await;
    let other_id = create_test_account(&pool, "bob").await;

    let keep = "keep".repeat(16);
    let tokens: Vec<String> = (0..4).map(|i| format!("{i}").repeat(64)).collect();

    sessions::create_session(&pool, account_id, &keep, now + 600, "127.0.0.1", now)
        .await
        .unwrap();
    for token in &tokens {
        sessions::create_session(&pool, account_id, token, now + 600, "127.0.0.1", now)
            .await
            .unwrap();
    }
    // Another account's session must survive
    let foreign = "f".repeat(64);
    sessions::create_session(&pool, other_id, &foreign, now + 600, "10.0.0.1", now)
        .await
        .unwrap();

    let deleted = sessions::delete_all_sessions_for_account(&pool, account_id, Some(&keep))
        .await
        .unwrap();
    assert_eq!(deleted, 4);

    assert!(sessions::get_session(&pool, &keep).await.unwrap().is_some());
    for token in &tokens {
        assert!(sessions::get_session(&pool, token).await.unwrap().is_none());
    }
    assert!(sessions::get_session(&pool, &foreign)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_cleanup_expired_sessions() {
    let pool = setup_test_db().await;
    let now = Utc::now().timestamp();
    let account_id = create_test_account(&pool, "alice").await;

    sessions::create_session(&pool, account_id, "live", now + 600, "127.0.0.1", now)
        .await
        .unwrap();
    sessions::create_session(&pool, account_id, "dead", now - 1, "127.0.0.1", now - 700)
        .await
        .unwrap();

    let deleted = sessions::cleanup_expired_sessions(&pool, now).await.unwrap();
    assert_eq!(deleted, 1);
    assert!(sessions::get_session(&pool, "live").await.unwrap().is_some());
    assert!(sessions::get_session(&pool, "dead").await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_login_attempts_sliding_reset() {
    let pool = setup_test_db().await;
    let now = Utc::now().timestamp();
    let account_id = create_test_account(&pool, "alice").await;

    assert_eq!(
        accounts::increment_failed_login_attempts(&pool, account_id, now)
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        accounts::increment_failed_login_attempts(&pool, account_id, now + 10)
            .await
            .unwrap(),
        2
    );

    // A failure more than 300 seconds after the previous one restarts at 1
    assert_eq!(
        accounts::increment_failed_login_attempts(&pool, account_id, now + 10 + 301)
            .await
            .unwrap(),
        1
    );

    accounts::reset_failed_login_attempts(&pool, account_id)
        .await
        .unwrap();
    let (count, last) = accounts::get_failed_login_attempts(&pool, account_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((count, last), (0, 0));
}

#[tokio::test]
async fn test_account_lock_auto_unlocks() {
    let pool = setup_test_db().await;
    let now = Utc::now().timestamp();
    let account_id = create_test_account(&pool, "alice").await;

    accounts::lock_account(&pool, account_id, now + 900).await.unwrap();
    assert!(accounts::is_account_locked(&pool, account_id, now)
        .await
        .unwrap());

    // Past the lock: the query clears the lock and the failure counter
    assert!(!accounts::is_account_locked(&pool, account_id, now + 901)
        .await
        .unwrap());
    let account = accounts::get_account_by_id(&pool, account_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.locked_until, 0);
    assert_eq!(account.failed_login_attempts, 0);
}

#[tokio::test]
async fn test_ban_and_unban() {
    let pool = setup_test_db().await;
    let now = Utc::now().timestamp();
    let account_id = create_test_account(&pool, "alice").await;

    accounts::ban_account(&pool, account_id, "cheating", 0).await.unwrap();
    let account = accounts::get_account_by_id(&pool, account_id)
        .await
        .unwrap()
        .unwrap();
    assert!(account.is_banned);
    assert!(account.ban_active(now));
    assert_eq!(account.ban_reason.as_deref(), Some("cheating"));

    // Timed ban in the past is no longer active
    accounts::ban_account(&pool, account_id, "temp", now - 10).await.unwrap();
    let account = accounts::get_account_by_id(&pool, account_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!account.ban_active(now));

    accounts::unban_account(&pool, account_id).await.unwrap();
    let account = accounts::get_account_by_id(&pool, account_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!account.is_banned);
    assert!(account.ban_reason.is_none());
}

#[tokio::test]
async fn test_login_history_order_and_cleanup() {
    let pool = setup_test_db().await;
    let now = Utc::now().timestamp();
    let account_id = create_test_account(&pool, "alice").await;

    for (offset, success) in [(-200, false), (-100, true), (0, true)] {
        login_history::log_login_attempt(
            &pool,
            account_id,
            "127.0.0.1",
            success,
            now + offset,
            if success { None } else { Some("wrong password") },
        )
        .await
        .unwrap();
    }
    // An attempt for an unknown username is recorded against account 0
    login_history::log_login_attempt(&pool, 0, "10.0.0.9", false, now, Some("unknown username"))
        .await
        .unwrap();

    let history = login_history::get_login_history(&pool, account_id, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    assert!(history[0].success);
    assert_eq!(history[2].failure_reason.as_deref(), Some("wrong password"));

    let limited = login_history::get_login_history(&pool, account_id, 2)
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);

    // Entries older than the retention window are pruned; the cutoff lands
    // between the two old failures and the two fresh rows
    let deleted = login_history::cleanup_old_login_history(&pool, now + 90 * 24 * 60 * 60 - 50, 90)
        .await
        .unwrap();
    assert_eq!(deleted, 2);
}

#[tokio::test]
async fn test_rate_limit_row_upsert_and_query() {
    let pool = setup_test_db().await;
    let now = Utc::now().timestamp();
    let key = "127.0.0.1:0";

    for i in 0..5 {
        rate_limits::record_attempt(&pool, key, now + i, 60).await.unwrap();
    }

    let row = rate_limits::get_rate_limit(&pool, key).await.unwrap().unwrap();
    assert_eq!(row.attempt_count, 5);
    assert_eq!(row.window_start, now);
    assert_eq!(row.last_attempt, now + 4);

    assert!(rate_limits::is_rate_limited(&pool, key, now + 4, 5, 60)
        .await
        .unwrap());

    // Window elapsed: not limited, row reset in place
    assert!(!rate_limits::is_rate_limited(&pool, key, now + 100, 5, 60)
        .await
        .unwrap());

    // A record after the window restarts the count
    rate_limits::record_attempt(&pool, key, now + 200, 60).await.unwrap();
    let row = rate_limits::get_rate_limit(&pool, key).await.unwrap().unwrap();
    assert_eq!(row.attempt_count, 1);
}

#[tokio::test]
async fn test_cleanup_expired_rate_limits() {
    let pool = setup_test_db().await;
    let now = Utc::now().timestamp();

    rate_limits::record_attempt(&pool, "10.0.0.1:0", now - 4000, 60)
        .await
        .unwrap();
    rate_limits::record_attempt(&pool, "10.0.0.2:0", now - 10, 60)
        .await
        .unwrap();

    let deleted = rate_limits::cleanup_expired_rate_limits(&pool, now).await.unwrap();
    assert_eq!(deleted, 1);
    assert!(rate_limits::get_rate_limit(&pool, "10.0.0.1:0")
        .await
        .unwrap()
        .is_none());
    assert!(rate_limits::get_rate_limit(&pool, "10.0.0.2:0")
        .await
        .unwrap()
        .is_some());
}
