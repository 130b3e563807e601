// Data structures mapping to the store's tables.
pub mod account;
pub mod session;

pub use account::Account;
pub use session::{LoginHistoryEntry, RateLimitRow, Session};
