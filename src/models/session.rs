use sqlx::FromRow;

/// A live login session, keyed by its opaque bearer token.
///
/// Maps to the `sessions` table. Tokens are 64 lowercase hex characters
/// (32 CSPRNG bytes); sessions reference their owning account one-way.
#[derive(Debug, FromRow, Clone)]
pub struct Session {
    /// The opaque session token (primary key).
    pub session_token: String,
    /// Owning account.
    pub account_id: i64,
    /// Unix timestamp of session creation.
    pub created_at: i64,
    /// Unix timestamp after which the session is dead. Extended to
    /// `now + 7 days` on every successful validation (sliding renewal).
    pub expires_at: i64,
    /// Client IP at session creation.
    pub ip_address: Option<String>,
    /// Unix timestamp of the last successful validation.
    pub last_used: Option<i64>,
}

/// One append-only login audit row.
///
/// `account_id` is 0 when the attempted username did not resolve to an
/// account.
#[derive(Debug, FromRow, Clone)]
pub struct LoginHistoryEntry {
    pub history_id: i64,
    pub account_id: i64,
    pub ip_address: String,
    pub timestamp: i64,
    pub success: bool,
    pub failure_reason: Option<String>,
}

/// Persisted sliding-window counter, keyed by `<ip>:<operation>`.
///
/// The in-memory policy table is authoritative while the process lives;
/// these rows keep the abuse signal visible across restarts.
#[derive(Debug, FromRow, Clone)]
pub struct RateLimitRow {
    pub limit_key: String,
    pub attempt_count: i64,
    pub window_start: i64,
    pub last_attempt: i64,
}
