//! End-to-end handler tests: every protocol operation driven against an
//! in-memory store, including the rate-limit, lockout, ban, and session
//! revocation paths.

use auth_server::db::run_migrations;
use auth_server::handlers::{self, auth, AppState};
use auth_server::protocol::codec::Header;
use auth_server::protocol::message::*;
use auth_server::repositories::{accounts, sessions};
use auth_server::security::crypto;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;

const DAY: i64 = 24 * 60 * 60;

/// One connection only: every pooled connection to `sqlite::memory:` would
/// otherwise get its own empty database.
async fn setup_state() -> AppState {
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
    AppState::new(pool)
}

fn digest(password: &str) -> String {
    crypto::sha256_hex(password.as_bytes())
}

async fn register(state: &AppState, ip: &str, username: &str, password: &str) -> Response {
    auth::register(
        state,
        ip,
        &RegisterRequest {
            username: username.to_string(),
            password_hash: digest(password),
            email: String::new(),
        },
    )
    .await
}

async fn login(state: &AppState, ip: &str, username: &str, password: &str) -> Response {
    auth::login(
        state,
        ip,
        &LoginRequest {
            username: username.to_string(),
            password_hash: digest(password),
        },
    )
    .await
}

async fn validate(state: &AppState, ip: &str, token: &str) -> ValidateTokenResponse {
    let response = auth::validate_token(
        state,
        ip,
        &ValidateTokenRequest {
            session_token: token.to_string(),
            ip_address: ip.to_string(),
        },
    )
    .await;

    match response {
        Response::ValidateToken(r) => r,
        other => panic!("expected ValidateTokenResponse, got {:?}", other),
    }
}

fn expect_error(response: Response) -> ErrorResponse {
    match response {
        Response::Error(e) => e,
        other => panic!("expected Error response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_register_login_validate_flow() {
    let state = setup_state().await;

    // Register mints an account and a first session
    let Response::Register(reg) = register(&state, "127.0.0.1", "alice", "hunter2").await else {
        panic!("registration failed");
    };
    assert_eq!(reg.result, AuthResult::Success);
    assert!(reg.account_id > 0);
    assert_eq!(reg.session_token.len(), 64);

    // Login mints a fresh token
    let Response::Login(log) = login(&state, "127.0.0.1", "alice", "hunter2").await else {
        panic!("login failed");
    };
    assert_eq!(log.result, AuthResult::Success);
    assert_eq!(log.account_id, reg.account_id);
    assert!(!log.requires_2fa);
    assert_ne!(log.session_token, reg.session_token);

    // Validation slides the expiration a full week out
    let t0 = Utc::now().timestamp();
    let val = validate(&state, "127.0.0.1", &log.session_token).await;
    assert_eq!(val.result, AuthResult::Success);
    assert_eq!(val.account_id, reg.account_id);
    assert!(!val.is_banned);
    let expires = val.expires_at as i64;
    assert!(expires >= t0 + 7 * DAY && expires <= t0 + 7 * DAY + 5);

    // Last login stamp landed
    let account = accounts::get_account_by_id(&state.pool, reg.account_id as i64)
        .await
        .unwrap()
        .unwrap();
    assert!(account.last_login.is_some());
}

#[tokio::test]
async fn test_wrong_password_then_rate_limited() {
    let state = setup_state().await;
    register(&state, "127.0.0.1", "alice", "hunter2").await;

    // Five failures inside the window, identical answers
    for _ in 0..5 {
        let err = expect_error(login(&state, "198.51.100.2", "alice", "wrong").await);
        assert_eq!(err.error_code, AuthResult::InvalidCredentials);
        assert_eq!(err.message, "Invalid username or password");
    }

    // The sixth attempt from the same IP is throttled
    let err = expect_error(login(&state, "198.51.100.2", "alice", "wrong").await);
    assert_eq!(err.error_code, AuthResult::RateLimited);

    // A different IP is not throttled
    let err = expect_error(login(&state, "198.51.100.3", "alice", "wrong").await);
    assert_eq!(err.error_code, AuthResult::InvalidCredentials);
}

#[tokio::test]
async fn test_unknown_user_is_indistinguishable() {
    let state = setup_state().await;
    register(&state, "127.0.0.1", "alice", "hunter2").await;

    let wrong_password = expect_error(login(&state, "203.0.113.5", "alice", "nope").await);
    let unknown_user = expect_error(login(&state, "203.0.113.6", "bob", "anything").await);

    assert_eq!(wrong_password.error_code, unknown_user.error_code);
    assert_eq!(wrong_password.message, unknown_user.message);
}

#[tokio::test]
async fn test_successful_login_resets_rate_window() {
    let state = setup_state().await;
    register(&state, "127.0.0.1", "alice", "hunter2").await;

    for _ in 0..4 {
        login(&state, "203.0.113.7", "alice", "wrong").await;
    }
    let Response::Login(ok) = login(&state, "203.0.113.7", "alice", "hunter2").await else {
        panic!("correct password rejected");
    };
    assert_eq!(ok.result, AuthResult::Success);

    // The window was reset; more failures start from zero again
    for _ in 0..4 {
        let err = expect_error(login(&state, "203.0.113.7", "alice", "wrong").await);
        assert_eq!(err.error_code, AuthResult::InvalidCredentials);
    }
}

#[tokio::test]
async fn test_token_expiry_then_invalid() {
    let state = setup_state().await;

    let Response::Register(reg) = register(&state, "127.0.0.1", "eve", "hunter2").await else {
        panic!("registration failed");
    };
    let now = Utc::now().timestamp();

    // Force the session into the past
    sessions::update_session_expiration(&state.pool, &reg.session_token, now - 10, now)
        .await
        .unwrap();

    let val = validate(&state, "127.0.0.1", &reg.session_token).await;
    assert_eq!(val.result, AuthResult::TokenExpired);
    assert_eq!(val.account_id, reg.account_id);

    // The expired row was deleted; a retry no longer finds it
    let val = validate(&state, "127.0.0.1", &reg.session_token).await;
    assert_eq!(val.result, AuthResult::TokenInvalid);
    assert_eq!(val.account_id, 0);
}

#[tokio::test]
async fn test_change_password_invalidates_other_sessions() {
    let state = setup_state().await;

    let Response::Register(reg) = register(&state, "127.0.0.1", "alice", "hunter2").await else {
        panic!("registration failed");
    };
    // Drop the registration session so exactly two login sessions remain
    auth::logout(
        &state,
        "127.0.0.1",
        &LogoutRequest {
            session_token: reg.session_token.clone(),
            logout_all_sessions: false,
        },
    )
    .await;

    let Response::Login(first) = login(&state, "127.0.0.1", "alice", "hunter2").await else {
        panic!("login failed");
    };
    let Response::Login(second) = login(&state, "10.0.0.2", "alice", "hunter2").await else {
        panic!("login failed");
    };

    let response = auth::change_password(
        &state,
        "127.0.0.1",
        &ChangePasswordRequest {
            session_token: first.session_token.clone(),
            old_password_hash: digest("hunter2"),
            new_password_hash: digest("correcthorse"),
        },
    )
    .await;

    let Response::ChangePassword(changed) = response else {
        panic!("password change failed: {:?}", response);
    };
    assert_eq!(changed.result, AuthResult::Success);
    assert_eq!(changed.sessions_invalidated, 1);

    // Only the calling token survives
    let val = validate(&state, "127.0.0.1", &first.session_token).await;
    assert_eq!(val.result, AuthResult::Success);
    let val = validate(&state, "10.0.0.2", &second.session_token).await;
    assert_eq!(val.result, AuthResult::TokenInvalid);

    // Old credential is dead, new one works
    let err = expect_error(login(&state, "10.0.0.3", "alice", "hunter2").await);
    assert_eq!(err.error_code, AuthResult::InvalidCredentials);
    let Response::Login(ok) = login(&state, "10.0.0.4", "alice", "correcthorse").await else {
        panic!("new password rejected");
    };
    assert_eq!(ok.result, AuthResult::Success);
}

#[tokio::test]
async fn test_change_password_rejects_bad_old_password() {
    let state = setup_state().await;

    let Response::Register(reg) = register(&state, "127.0.0.1", "alice", "hunter2").await else {
        panic!("registration failed");
    };

    let err = expect_error(
        auth::change_password(
            &state,
            "127.0.0.1",
            &ChangePasswordRequest {
                session_token: reg.session_token.clone(),
                old_password_hash: digest("not-it"),
                new_password_hash: digest("correcthorse"),
            },
        )
        .await,
    );
    assert_eq!(err.error_code, AuthResult::InvalidCredentials);

    // Short replacement digests are rejected
    let err = expect_error(
        auth::change_password(
            &state,
            "127.0.0.1",
            &ChangePasswordRequest {
                session_token: reg.session_token,
                old_password_hash: digest("hunter2"),
                new_password_hash: "short".to_string(),
            },
        )
        .await,
    );
    assert_eq!(err.error_code, AuthResult::PasswordTooShort);
}

#[tokio::test]
async fn test_logout_is_idempotent() {
    let state = setup_state().await;

    // Unknown token still answers success
    let Response::Logout(out) = auth::logout(
        &state,
        "127.0.0.1",
        &LogoutRequest {
            session_token: "z".repeat(64),
            logout_all_sessions: false,
        },
    )
    .await
    else {
        panic!("logout failed");
    };
    assert_eq!(out.result, AuthResult::Success);
    assert_eq!(out.sessions_invalidated, 0);
}

#[tokio::test]
async fn test_logout_all_sessions() {
    let state = setup_state().await;

    let Response::Register(reg) = register(&state, "127.0.0.1", "alice", "hunter2").await else {
        panic!("registration failed");
    };
    let Response::Login(extra) = login(&state, "10.0.0.2", "alice", "hunter2").await else {
        panic!("login failed");
    };

    let Response::Logout(out) = auth::logout(
        &state,
        "127.0.0.1",
        &LogoutRequest {
            session_token: reg.session_token.clone(),
            logout_all_sessions: true,
        },
    )
    .await
    else {
        panic!("logout failed");
    };
    assert_eq!(out.sessions_invalidated, 2);

    assert!(sessions::get_session(&state.pool, &reg.session_token)
        .await
        .unwrap()
        .is_none());
    assert!(sessions::get_session(&state.pool, &extra.session_token)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_register_validation() {
    let state = setup_state().await;

    let err = expect_error(register(&state, "10.1.0.1", "ab", "hunter2").await);
    assert_eq!(err.error_code, AuthResult::InvalidUsername);

    let err = expect_error(register(&state, "10.1.0.2", "bad name!", "hunter2").await);
    assert_eq!(err.error_code, AuthResult::InvalidUsername);

    let err = expect_error(
        auth::register(
            &state,
            "10.1.0.3",
            &RegisterRequest {
                username: "charlie".to_string(),
                password_hash: "short".to_string(),
                email: String::new(),
            },
        )
        .await,
    );
    assert_eq!(err.error_code, AuthResult::PasswordTooShort);

    // An email beyond the wire bound is rejected, not silently truncated
    let err = expect_error(
        auth::register(
            &state,
            "10.1.0.4",
            &RegisterRequest {
                username: "dora".to_string(),
                password_hash: digest("hunter2"),
                email: format!("{}@example.com", "a".repeat(128)),
            },
        )
        .await,
    );
    assert_eq!(err.error_code, AuthResult::InvalidUsername);
    assert_eq!(err.message, "Email must be at most 128 characters");

    register(&state, "10.1.0.5", "alice", "hunter2").await;
    let err = expect_error(register(&state, "10.1.0.6", "alice", "other-pass").await);
    assert_eq!(err.error_code, AuthResult::UsernameTaken);
}

#[tokio::test]
async fn test_register_rate_limit() {
    let state = setup_state().await;

    for i in 0..3 {
        register(&state, "10.2.0.1", &format!("user_{i}"), "hunter2").await;
    }

    let err = expect_error(register(&state, "10.2.0.1", "user_3", "hunter2").await);
    assert_eq!(err.error_code, AuthResult::RateLimited);
}

#[tokio::test]
async fn test_register_stores_email() {
    let state = setup_state().await;

    let response = auth::register(
        &state,
        "10.3.0.1",
        &RegisterRequest {
            username: "alice".to_string(),
            password_hash: digest("hunter2"),
            email: "alice@example.com".to_string(),
        },
    )
    .await;
    let Response::Register(reg) = response else {
        panic!("registration failed");
    };

    let account = accounts::get_account_by_id(&state.pool, reg.account_id as i64)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.email.as_deref(), Some("alice@example.com"));
}

#[tokio::test]
async fn test_account_locks_after_repeated_failures() {
    let state = setup_state().await;

    let Response::Register(reg) = register(&state, "127.0.0.1", "carol", "hunter2").await else {
        panic!("registration failed");
    };
    let account_id = reg.account_id as i64;

    // Five wrong passwords inside the window lock the account
    for _ in 0..5 {
        login(&state, "10.4.0.1", "carol", "wrong").await;
    }
    let now = Utc::now().timestamp();
    assert!(accounts::is_account_locked(&state.pool, account_id, now)
        .await
        .unwrap());

    // Even the correct password answers like a bad one while locked; a
    // fresh IP sidesteps the rate limiter so the lock itself is exercised
    let err = expect_error(login(&state, "10.4.0.2", "carol", "hunter2").await);
    assert_eq!(err.error_code, AuthResult::InvalidCredentials);
    assert_eq!(err.message, "Invalid username or password");

    // Once the lock is cleared the credential works again
    accounts::unlock_account(&state.pool, account_id).await.unwrap();
    let Response::Login(ok) = login(&state, "10.4.0.3", "carol", "hunter2").await else {
        panic!("login failed after unlock");
    };
    assert_eq!(ok.result, AuthResult::Success);
}

#[tokio::test]
async fn test_banned_account_cannot_login() {
    let state = setup_state().await;

    let Response::Register(reg) = register(&state, "127.0.0.1", "dave", "hunter2").await else {
        panic!("registration failed");
    };
    accounts::ban_account(&state.pool, reg.account_id as i64, "cheating", 0)
        .await
        .unwrap();

    let err = expect_error(login(&state, "10.5.0.1", "dave", "hunter2").await);
    assert_eq!(err.error_code, AuthResult::AccountBanned);
    assert_eq!(err.message, "cheating");

    // Existing sessions still validate but carry the ban flag
    let val = validate(&state, "127.0.0.1", &reg.session_token).await;
    assert_eq!(val.result, AuthResult::Success);
    assert!(val.is_banned);
}

#[tokio::test]
async fn test_dispatch_drops_blacklisted_ip() {
    let state = setup_state().await;
    let now = Utc::now().timestamp();
    state.policy.add_to_blacklist("203.0.113.66", 0, now);

    let header = Header {
        msg_type: MessageType::LoginRequest as u16,
        request_id: 9,
        account_id: 0,
        payload_size: 0,
    };

    let response = handlers::dispatch(&state, "203.0.113.66", &header, &[]).await;
    assert!(response.is_none());

    // Dropped requests are not counted
    assert_eq!(state.stats().total_requests, 0);
}

#[tokio::test]
async fn test_dispatch_answers_unknown_type_with_error() {
    let state = setup_state().await;

    let header = Header {
        msg_type: 4242,
        request_id: 77,
        account_id: 0,
        payload_size: 0,
    };

    let response = handlers::dispatch(&state, "127.0.0.1", &header, &[])
        .await
        .expect("unknown type must still be answered");
    let err = expect_error(response);
    assert_eq!(err.error_code, AuthResult::ServerError);
    assert_eq!(state.stats().total_requests, 1);
}

#[tokio::test]
async fn test_stats_counters() {
    let state = setup_state().await;

    register(&state, "127.0.0.1", "alice", "hunter2").await;
    let Response::Login(log) = login(&state, "127.0.0.1", "alice", "hunter2").await else {
        panic!("login failed");
    };
    login(&state, "10.6.0.1", "alice", "wrong").await;
    validate(&state, "127.0.0.1", &log.session_token).await;

    let stats = state.stats();
    assert_eq!(stats.registrations, 1);
    assert_eq!(stats.successful_logins, 1);
    assert_eq!(stats.failed_logins, 1);
    assert_eq!(stats.token_validations, 1);
}
