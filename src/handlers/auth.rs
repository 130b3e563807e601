//! Authentication Request Handlers
//!
//! Business logic for the five protocol operations: register, login, token
//! validation, logout, and password change. Every handler returns exactly
//! one response; the transport layer owns sending it.
//!
//! # Security Features
//! - Per-IP rate limiting checked before any store mutation
//! - Identical wording for "no such user" and "wrong password"
//! - Account lockout after repeated failures inside the sliding window
//! - Sliding session renewal on successful validation
//! - Session revocation on password change
//!
//! # Rate Limiting
//! Login and Register failures are mirrored into the persisted
//! `rate_limits` table so the abuse signal survives a restart; the
//! in-memory policy stays authoritative while the process lives.

use crate::handlers::AppState;
use crate::protocol::message::*;
use crate::protocol::EMAIL_MAX;
use crate::repositories::{self, accounts::CreateAccountOutcome};
use crate::security::{crypto, policy::RateLimitKind};
use chrono::Utc;

/// Session lifetime: 7 days, restarted on every successful validation.
pub const SESSION_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// KDF cost used for newly stored credentials.
const HASH_COST: u32 = 12;

/// Failed attempts inside the 5-minute window before the account locks.
const LOCK_THRESHOLD: i64 = 5;

/// How long an automatic lock lasts.
const LOCK_DURATION_SECS: i64 = 15 * 60;

/// Wording shared by every credential failure on the login path. Unknown
/// usernames and wrong passwords must be indistinguishable on the wire.
const INVALID_CREDENTIALS_MSG: &str = "Invalid username or password";

/// Validates a username: 3-20 characters from `[A-Za-z0-9_]`.
fn validate_username(username: &str) -> Result<(), &'static str> {
    if username.len() < 3 || username.len() > 20 {
        return Err("Username must be 3-20 characters");
    }

    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err("Username must be alphanumeric");
    }

    Ok(())
}

/// Validates an optional registration email: absent is fine, present must
/// fit the wire bound.
fn validate_email(email: &str) -> Result<(), &'static str> {
    if email.len() > EMAIL_MAX {
        return Err("Email must be at most 128 characters");
    }

    Ok(())
}

/// Records a Login/Register attempt in both the in-memory policy and the
/// persisted rate-limit row.
async fn record_attempt(state: &AppState, ip: &str, kind: RateLimitKind, now: i64) {
    state.policy.record_attempt(ip, kind, now);

    let (_, window) = kind.config();
    if let Err(err) =
        repositories::rate_limits::record_attempt(&state.pool, &kind.storage_key(ip), now, window)
            .await
    {
        tracing::error!(error = %err, ip = %ip, "Failed to persist rate limit attempt");
    }
}

/// Handles account registration.
///
/// Rate-limited per IP. Validates the username format and the client digest
/// length, stores the new account with a cost-12 credential, and mints an
/// initial session. A session-creation failure after the account exists is
/// still reported as success without a token; the client recovers by
/// logging in.
pub async fn register(state: &AppState, client_ip: &str, request: &RegisterRequest) -> Response {
    let now = Utc::now().timestamp();

    if state
        .policy
        .check_rate_limit(client_ip, RateLimitKind::Register, now)
    {
        tracing::warn!(ip = %client_ip, "Registration rate limited");
        return Response::error(
            AuthResult::RateLimited,
            "Too many registration attempts. Please try again later.",
        );
    }
    record_attempt(state, client_ip, RateLimitKind::Register, now).await;

    tracing::info!(username = %request.username, "Registration request");

    if let Err(msg) = validate_username(&request.username) {
        return Response::error(AuthResult::InvalidUsername, msg);
    }

    // The client sends a SHA-256 hex digest, never the raw password
    if request.password_hash.len() < 8 {
        return Response::error(
            AuthResult::PasswordTooShort,
            "Password must be at least 8 characters",
        );
    }

    // The protocol has no dedicated email result code; validation failures
    // reuse the identity-validation code with a clear message
    if let Err(msg) = validate_email(&request.email) {
        return Response::error(AuthResult::InvalidUsername, msg);
    }

    match repositories::accounts::get_account_by_username(&state.pool, &request.username).await {
        Ok(Some(_)) => {
            return Response::error(AuthResult::UsernameTaken, "Username already exists");
        }
        Ok(None) => {}
        Err(err) => {
            tracing::error!(error = %err, "Account lookup failed during registration");
            return Response::error(AuthResult::ServerError, "Failed to create account");
        }
    }

    let credential = match crypto::hash_password(request.password_hash.as_bytes(), HASH_COST) {
        Ok(credential) => credential,
        Err(err) => {
            tracing::error!(error = %err, "Password hashing failed");
            return Response::error(AuthResult::ServerError, "Failed to hash password");
        }
    };

    let email = if request.email.is_empty() {
        None
    } else {
        Some(request.email.as_str())
    };

    let account_id = match repositories::accounts::create_account(
        &state.pool,
        &request.username,
        &credential,
        email,
        now,
    )
    .await
    {
        Ok(CreateAccountOutcome::Created(id)) => id,
        Ok(CreateAccountOutcome::UsernameTaken) => {
            return Response::error(AuthResult::UsernameTaken, "Username already exists");
        }
        Err(err) => {
            tracing::error!(error = %err, "Failed to create account");
            return Response::error(AuthResult::ServerError, "Failed to create account");
        }
    };

    let session_token = match mint_session(state, account_id, client_ip, now).await {
        Some(token) => token,
        None => {
            // Account exists but the session could not be stored; the client
            // recovers by logging in.
            tracing::error!(account_id, "Failed to create session after registration");
            String::new()
        }
    };

    {
        let mut stats = state.stats.lock().unwrap();
        stats.registrations += 1;
    }

    tracing::info!(username = %request.username, account_id, "Account created");

    Response::Register(RegisterResponse {
        result: AuthResult::Success,
        account_id: account_id as u64,
        session_token,
    })
}

/// Handles login.
///
/// The rate-limit check runs before anything else; attempts are recorded
/// only on failure and the window resets on success so legitimate users who
/// mistyped are not penalised. Unknown usernames and wrong passwords answer
/// with the same code and wording.
pub async fn login(state: &AppState, client_ip: &str, request: &LoginRequest) -> Response {
    let now = Utc::now().timestamp();

    if state
        .policy
        .check_rate_limit(client_ip, RateLimitKind::Login, now)
    {
        tracing::warn!(ip = %client_ip, "Login rate limited");
        return Response::error(
            AuthResult::RateLimited,
            "Too many login attempts. Please try again later.",
        );
    }

    tracing::info!(username = %request.username, "Login request");

    let account =
        match repositories::accounts::get_account_by_username(&state.pool, &request.username).await
        {
            Ok(account) => account,
            Err(err) => {
                tracing::error!(error = %err, "Account lookup failed during login");
                return Response::error(AuthResult::ServerError, "Internal error");
            }
        };

    let Some(account) = account else {
        return login_failure(state, client_ip, 0, "unknown username", now).await;
    };

    if account.ban_active(now) {
        let reason = account
            .ban_reason
            .clone()
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| "Account is banned".to_string());
        return Response::error(AuthResult::AccountBanned, reason);
    }

    // Locked accounts answer exactly like a bad password so the lock state
    // is not observable from outside.
    match repositories::accounts::is_account_locked(&state.pool, account.account_id, now).await {
        Ok(true) => {
            tracing::warn!(account_id = account.account_id, "Login attempt on locked account");
            return login_failure(state, client_ip, account.account_id, "account locked", now)
                .await;
        }
        Ok(false) => {}
        Err(err) => {
            tracing::error!(error = %err, "Lock check failed during login");
            return Response::error(AuthResult::ServerError, "Internal error");
        }
    }

    if !crypto::verify_password(request.password_hash.as_bytes(), &account.password_hash) {
        match repositories::accounts::increment_failed_login_attempts(
            &state.pool,
            account.account_id,
            now,
        )
        .await
        {
            Ok(count) if count >= LOCK_THRESHOLD => {
                if let Err(err) = repositories::accounts::lock_account(
                    &state.pool,
                    account.account_id,
                    now + LOCK_DURATION_SECS,
                )
                .await
                {
                    tracing::error!(error = %err, "Failed to lock account");
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!(error = %err, "Failed to count login failure");
            }
        }

        return login_failure(state, client_ip, account.account_id, "wrong password", now).await;
    }

    if state.policy.is_suspicious(account.account_id, client_ip) {
        // Log only for now; reserved as a 2FA trigger
        tracing::warn!(
            account_id = account.account_id,
            ip = %client_ip,
            "Suspicious login activity: too many distinct IPs"
        );
    }

    let Some(session_token) = mint_session(state, account.account_id, client_ip, now).await else {
        return Response::error(AuthResult::ServerError, "Failed to create session");
    };

    if let Err(err) =
        repositories::accounts::update_last_login(&state.pool, account.account_id, now).await
    {
        tracing::error!(error = %err, "Failed to update last login");
    }
    if let Err(err) = repositories::accounts::reset_failed_login_attempts(
        &state.pool,
        account.account_id,
    )
    .await
    {
        tracing::error!(error = %err, "Failed to reset login failure counter");
    }
    if let Err(err) = repositories::login_history::log_login_attempt(
        &state.pool,
        account.account_id,
        client_ip,
        true,
        now,
        None,
    )
    .await
    {
        tracing::error!(error = %err, "Failed to log login attempt");
    }

    state.policy.record_login(account.account_id, client_ip);
    state.policy.reset_rate_limit(client_ip, RateLimitKind::Login);

    {
        let mut stats = state.stats.lock().unwrap();
        stats.successful_logins += 1;
    }

    tracing::info!(username = %request.username, account_id = account.account_id, "Login successful");

    Response::Login(LoginResponse {
        result: AuthResult::Success,
        requires_2fa: false,
        account_id: account.account_id as u64,
        session_token,
    })
}

/// Shared failure path for login: records the attempt in the policy and the
/// store, appends the audit row, and answers with the uniform credentials
/// error.
async fn login_failure(
    state: &AppState,
    client_ip: &str,
    account_id: i64,
    reason: &str,
    now: i64,
) -> Response {
    record_attempt(state, client_ip, RateLimitKind::Login, now).await;

    if let Err(err) = repositories::login_history::log_login_attempt(
        &state.pool,
        account_id,
        client_ip,
        false,
        now,
        Some(reason),
    )
    .await
    {
        tracing::error!(error = %err, "Failed to log login attempt");
    }

    {
        let mut stats = state.stats.lock().unwrap();
        stats.failed_logins += 1;
    }

    Response::error(AuthResult::InvalidCredentials, INVALID_CREDENTIALS_MSG)
}

/// Handles token validation for the game/matchmaking service.
///
/// A live session slides forward to `now + 7 days`. An expired session is
/// deleted so a retry answers `TokenInvalid` rather than `TokenExpired`.
/// Bans surface as `is_banned` on a success result; the consumer must treat
/// that as denied.
pub async fn validate_token(
    state: &AppState,
    client_ip: &str,
    request: &ValidateTokenRequest,
) -> Response {
    let now = Utc::now().timestamp();

    if state
        .policy
        .check_rate_limit(client_ip, RateLimitKind::TokenValidation, now)
    {
        tracing::warn!(ip = %client_ip, "Token validation rate limited");
        return Response::error(AuthResult::RateLimited, "Too many validation requests");
    }
    state
        .policy
        .record_attempt(client_ip, RateLimitKind::TokenValidation, now);

    let session = match repositories::sessions::get_session(&state.pool, &request.session_token)
        .await
    {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(error = %err, "Session lookup failed");
            return Response::error(AuthResult::ServerError, "Internal error");
        }
    };

    let Some(session) = session else {
        return Response::ValidateToken(ValidateTokenResponse {
            result: AuthResult::TokenInvalid,
            is_banned: false,
            account_id: 0,
            expires_at: 0,
            error_message: "Invalid token".to_string(),
        });
    };

    if now >= session.expires_at {
        if let Err(err) =
            repositories::sessions::delete_session(&state.pool, &request.session_token).await
        {
            tracing::error!(error = %err, "Failed to delete expired session");
        }

        return Response::ValidateToken(ValidateTokenResponse {
            result: AuthResult::TokenExpired,
            is_banned: false,
            account_id: session.account_id as u64,
            expires_at: 0,
            error_message: "Token expired".to_string(),
        });
    }

    let is_banned = match repositories::accounts::get_account_by_id(&state.pool, session.account_id)
        .await
    {
        Ok(Some(account)) => account.ban_active(now),
        Ok(None) => false,
        Err(err) => {
            tracing::error!(error = %err, "Account lookup failed during validation");
            false
        }
    };

    let new_expires_at = now + SESSION_TTL_SECS;
    if let Err(err) = repositories::sessions::update_session_expiration(
        &state.pool,
        &request.session_token,
        new_expires_at,
        now,
    )
    .await
    {
        tracing::error!(error = %err, "Failed to extend session");
    }

    {
        let mut stats = state.stats.lock().unwrap();
        stats.token_validations += 1;
    }

    tracing::debug!(account_id = session.account_id, "Token validated");

    Response::ValidateToken(ValidateTokenResponse {
        result: AuthResult::Success,
        is_banned,
        account_id: session.account_id as u64,
        expires_at: new_expires_at as u64,
        error_message: String::new(),
    })
}

/// Handles logout. Idempotent: an unknown token still answers success with
/// zero invalidated sessions. With `logout_all_sessions` set, every other
/// session of the account dies too and the count includes them.
pub async fn logout(state: &AppState, _client_ip: &str, request: &LogoutRequest) -> Response {
    let session = match repositories::sessions::get_session(&state.pool, &request.session_token)
        .await
    {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(error = %err, "Session lookup failed during logout");
            return Response::error(AuthResult::ServerError, "Internal error");
        }
    };

    let Some(session) = session else {
        return Response::Logout(LogoutResponse {
            result: AuthResult::Success,
            sessions_invalidated: 0,
        });
    };

    let mut sessions_invalidated: u32 = 1;

    if request.logout_all_sessions {
        match repositories::sessions::delete_all_sessions_for_account(
            &state.pool,
            session.account_id,
            Some(&request.session_token),
        )
        .await
        {
            Ok(others) => sessions_invalidated += others as u32,
            Err(err) => {
                tracing::error!(error = %err, "Failed to delete other sessions");
            }
        }
    }

    if let Err(err) =
        repositories::sessions::delete_session(&state.pool, &request.session_token).await
    {
        tracing::error!(error = %err, "Failed to delete session");
    }

    tracing::info!(
        account_id = session.account_id,
        sessions_invalidated,
        "Logout"
    );

    Response::Logout(LogoutResponse {
        result: AuthResult::Success,
        sessions_invalidated,
    })
}

/// Handles a password change for an authenticated session.
///
/// Verifies the old credential, stores the new one, and revokes every other
/// session of the account in the same transaction; only the calling token
/// survives.
pub async fn change_password(
    state: &AppState,
    _client_ip: &str,
    request: &ChangePasswordRequest,
) -> Response {
    let now = Utc::now().timestamp();

    let session = match repositories::sessions::get_session(&state.pool, &request.session_token)
        .await
    {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(error = %err, "Session lookup failed during password change");
            return Response::error(AuthResult::ServerError, "Internal error");
        }
    };

    let Some(session) = session else {
        return Response::error(AuthResult::TokenInvalid, "Invalid session");
    };

    if now >= session.expires_at {
        return Response::error(AuthResult::TokenExpired, "Session expired");
    }

    let account = match repositories::accounts::get_account_by_id(&state.pool, session.account_id)
        .await
    {
        Ok(Some(account)) => account,
        Ok(None) => {
            return Response::error(AuthResult::ServerError, "Account not found");
        }
        Err(err) => {
            tracing::error!(error = %err, "Account lookup failed during password change");
            return Response::error(AuthResult::ServerError, "Internal error");
        }
    };

    if !crypto::verify_password(request.old_password_hash.as_bytes(), &account.password_hash) {
        return Response::error(AuthResult::InvalidCredentials, "Current password is incorrect");
    }

    if request.new_password_hash.len() < 8 {
        return Response::error(
            AuthResult::PasswordTooShort,
            "New password must be at least 8 characters",
        );
    }

    let credential = match crypto::hash_password(request.new_password_hash.as_bytes(), HASH_COST) {
        Ok(credential) => credential,
        Err(err) => {
            tracing::error!(error = %err, "Password hashing failed");
            return Response::error(AuthResult::ServerError, "Failed to hash password");
        }
    };

    // Credential update and session revocation are one logical step
    let sessions_invalidated = match update_password_and_revoke(
        state,
        account.account_id,
        &credential,
        &request.session_token,
    )
    .await
    {
        Ok(count) => count,
        Err(err) => {
            tracing::error!(error = %err, "Failed to update password");
            return Response::error(AuthResult::ServerError, "Failed to update password");
        }
    };

    tracing::info!(
        account_id = account.account_id,
        sessions_invalidated,
        "Password changed"
    );

    Response::ChangePassword(ChangePasswordResponse {
        result: AuthResult::Success,
        sessions_invalidated: sessions_invalidated as u32,
    })
}

async fn update_password_and_revoke(
    state: &AppState,
    account_id: i64,
    credential: &str,
    keep_token: &str,
) -> Result<u64, sqlx::Error> {
    let mut tx = state.pool.begin().await?;

    repositories::accounts::update_password_tx(&mut tx, account_id, credential).await?;
    let deleted = repositories::sessions::delete_all_sessions_for_account_tx(
        &mut tx,
        account_id,
        Some(keep_token),
    )
    .await?;

    tx.commit().await?;
    Ok(deleted)
}

/// Mints a fresh 32-byte session token and persists the session. Returns
/// `None` when either step fails.
async fn mint_session(
    state: &AppState,
    account_id: i64,
    client_ip: &str,
    now: i64,
) -> Option<String> {
    let token = match crypto::secure_token(32) {
        Ok(token) => token,
        Err(err) => {
            tracing::error!(error = %err, "Token generation failed");
            return None;
        }
    };

    match repositories::sessions::create_session(
        &state.pool,
        account_id,
        &token,
        now + SESSION_TTL_SECS,
        client_ip,
        now,
    )
    .await
    {
        Ok(()) => Some(token),
        Err(err) => {
            tracing::error!(error = %err, account_id, "Failed to create session");
            None
        }
    }
}
