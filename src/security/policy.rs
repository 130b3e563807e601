//! In-Memory Abuse Prevention
//!
//! Process-local security state consulted before any store mutation:
//! per-IP/per-operation rate limiting with sliding windows, an IP blacklist
//! with optional expiry, and a per-account IP roaming memory used to flag
//! suspicious logins.
//!
//! Each table sits behind its own mutex; callers must never hold two policy
//! locks at once. The state is intentionally process-local; a restart resets
//! it, which is acceptable because the windows are short and failed logins
//! are still recorded in the store.
//!
//! All time-dependent entry points take `now` (Unix seconds) from the caller,
//! which keeps the sliding windows deterministic under test.

use std::collections::HashMap;
use std::sync::Mutex;

/// Operations subject to per-IP rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitKind {
    Login,
    Register,
    TokenValidation,
    PasswordReset,
}

impl RateLimitKind {
    /// `(max_attempts, window_seconds)` for this operation.
    pub fn config(self) -> (u32, i64) {
        match self {
            RateLimitKind::Login => (5, 60),
            RateLimitKind::Register => (3, 300),
            RateLimitKind::TokenValidation => (100, 60),
            RateLimitKind::PasswordReset => (3, 3600),
        }
    }

    /// Key used for the persisted `rate_limits` row mirroring this window.
    pub fn storage_key(self, ip: &str) -> String {
        format!("{}:{}", ip, self as u8)
    }
}

/// Sliding-window counter for one `(ip, operation)` pair.
#[derive(Debug, Clone)]
struct RateLimitState {
    attempt_count: u32,
    window_start: i64,
    last_attempt: i64,
}

/// Process-wide security policy state.
///
/// One value is created at server startup and threaded through the handlers;
/// there are no global singletons.
pub struct SecurityPolicy {
    /// `(ip, operation)` -> sliding window counter.
    rate_limits: Mutex<HashMap<(String, RateLimitKind), RateLimitState>>,

    /// IP -> blacklist expiry (Unix seconds; `0` = permanent).
    blacklist: Mutex<HashMap<String, i64>>,

    /// Account -> most-recent distinct IPs, oldest first, capped at 10.
    account_ips: Mutex<HashMap<i64, Vec<String>>>,
}

/// An account seen from this many distinct IPs is eligible for the roaming
/// heuristic.
const ROAMING_THRESHOLD: usize = 5;

/// Number of distinct IPs remembered per account.
const ROAMING_MEMORY: usize = 10;

impl SecurityPolicy {
    pub fn new() -> Self {
        Self {
            rate_limits: Mutex::new(HashMap::new()),
            blacklist: Mutex::new(HashMap::new()),
            account_ips: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` when `ip` has exhausted its attempts for `kind`.
    ///
    /// A window that has elapsed is lazily erased and reports not-limited.
    /// Absence of a row also reports not-limited.
    pub fn check_rate_limit(&self, ip: &str, kind: RateLimitKind, now: i64) -> bool {
        let mut limits = self.rate_limits.lock().unwrap();

        let key = (ip.to_string(), kind);
        let Some(state) = limits.get(&key) else {
            return false;
        };

        let (max_attempts, window) = kind.config();

        if now - state.window_start > window {
            limits.remove(&key);
            return false;
        }

        state.attempt_count >= max_attempts
    }

    /// Records an attempt for `(ip, kind)`.
    ///
    /// Starts a fresh window when none exists or the previous one has
    /// elapsed; otherwise increments the current count.
    pub fn record_attempt(&self, ip: &str, kind: RateLimitKind, now: i64) {
        let mut limits = self.rate_limits.lock().unwrap();
        let (_, window) = kind.config();

        limits
            .entry((ip.to_string(), kind))
            .and_modify(|state| {
                if now - state.window_start > window {
                    state.attempt_count = 1;
                    state.window_start = now;
                } else {
                    state.attempt_count += 1;
                }
                state.last_attempt = now;
            })
            .or_insert(RateLimitState {
                attempt_count: 1,
                window_start: now,
                last_attempt: now,
            });
    }

    /// Erases the window for `(ip, kind)` unconditionally.
    ///
    /// Called after a successful login so a user who mistyped a few times is
    /// not penalised on their next attempt.
    pub fn reset_rate_limit(&self, ip: &str, kind: RateLimitKind) {
        let mut limits = self.rate_limits.lock().unwrap();
        limits.remove(&(ip.to_string(), kind));
    }

    /// Returns `true` when `ip` is blacklisted at `now`.
    /// Expired temporary entries are lazily removed.
    pub fn is_blacklisted(&self, ip: &str, now: i64) -> bool {
        let mut blacklist = self.blacklist.lock().unwrap();

        match blacklist.get(ip) {
            None => false,
            Some(&expires_at) => {
                if expires_at > 0 && now >= expires_at {
                    blacklist.remove(ip);
                    return false;
                }
                true
            }
        }
    }

    /// Blacklists `ip` for `duration_seconds` (`0` = permanent).
    pub fn add_to_blacklist(&self, ip: &str, duration_seconds: i64, now: i64) {
        let expires_at = if duration_seconds > 0 {
            now + duration_seconds
        } else {
            0
        };

        let mut blacklist = self.blacklist.lock().unwrap();
        blacklist.insert(ip.to_string(), expires_at);
        tracing::info!(ip = %ip, duration = duration_seconds, "IP added to blacklist");
    }

    pub fn remove_from_blacklist(&self, ip: &str) {
        let mut blacklist = self.blacklist.lock().unwrap();
        if blacklist.remove(ip).is_some() {
            tracing::info!(ip = %ip, "IP removed from blacklist");
        }
    }

    /// Sweeps expired temporary blacklist entries; returns how many were
    /// removed. Run by the janitor.
    pub fn cleanup_expired_blacklist(&self, now: i64) -> usize {
        let mut blacklist = self.blacklist.lock().unwrap();
        let before = blacklist.len();
        blacklist.retain(|_, &mut expires_at| expires_at == 0 || now < expires_at);
        before - blacklist.len()
    }

    /// Roaming heuristic: `true` when `ip` is new for the account and the
    /// account has already been seen from at least five distinct IPs.
    ///
    /// Currently consumed for logging only; reserved as a future 2FA trigger.
    pub fn is_suspicious(&self, account_id: i64, ip: &str) -> bool {
        let history = self.account_ips.lock().unwrap();

        let Some(ips) = history.get(&account_id) else {
            return false;
        };

        let is_new = !ips.iter().any(|known| known == ip);
        is_new && ips.len() >= ROAMING_THRESHOLD
    }

    /// Remembers `ip` as a recent login source for the account, evicting the
    /// oldest entry beyond ten distinct IPs.
    pub fn record_login(&self, account_id: i64, ip: &str) {
        let mut history = self.account_ips.lock().unwrap();
        let ips = history.entry(account_id).or_default();

        if !ips.iter().any(|known| known == ip) {
            ips.push(ip.to_string());
            if ips.len() > ROAMING_MEMORY {
                ips.remove(0);
            }
        }
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::new()
    }
}
