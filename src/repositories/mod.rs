// Typed store operations. All text parameters are bound; SQL is never
// assembled from request data.
pub mod accounts;
pub mod login_history;
pub mod rate_limits;
pub mod sessions;
