use sqlx::FromRow;

/// Represents a registered player account.
///
/// This struct maps directly to the `accounts` database table. Account IDs
/// are server-assigned, monotonically increasing, and never reused.
#[derive(Debug, FromRow, Clone)]
pub struct Account {
    /// Unique database identifier, always positive.
    pub account_id: i64,
    /// Unique case-sensitive username (3-20 chars, `[A-Za-z0-9_]`).
    pub username: String,
    /// The stored credential string (`$2b$<cost>$<salt><hash>`).
    ///
    /// Self-describing: cost and salt are embedded, so there is no separate
    /// salt column and the cost can be raised without a migration.
    pub password_hash: String,
    /// Optional contact email, unique when present.
    pub email: Option<String>,
    /// Unix timestamp of account creation.
    pub created_at: i64,
    /// Unix timestamp of the last successful login, if any.
    pub last_login: Option<i64>,
    /// Ban flag; the ban is active while `ban_until` is 0 (permanent) or in
    /// the future.
    pub is_banned: bool,
    /// Operator-supplied ban reason, echoed to the client on login.
    pub ban_reason: Option<String>,
    /// Unix timestamp the ban lifts; 0 means permanent while `is_banned`.
    pub ban_until: i64,
    /// Consecutive failed login attempts inside the 5-minute window.
    pub failed_login_attempts: i64,
    /// Unix timestamp the lock lifts; 0 means not locked.
    pub locked_until: i64,
    /// Unix timestamp of the most recent failed login attempt.
    pub last_failed_attempt: i64,
}

impl Account {
    /// Whether a ban is in force at `now`.
    pub fn ban_active(&self, now: i64) -> bool {
        self.is_banned && (self.ban_until == 0 || now < self.ban_until)
    }
}
