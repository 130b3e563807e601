// Module declarations for organizing the auth service codebase
pub mod db; // Database connection, schema bootstrap, migrations
pub mod handlers; // Request handlers and shared server state
pub mod models; // Data structures mapping to store tables
pub mod protocol; // Binary wire protocol: header, payloads, codec
pub mod repositories; // Typed store operations
pub mod security; // Credential pipeline and abuse-prevention policy
pub mod server; // UDP transport loop and janitor
pub mod tools; // Operator tooling: test-account seeding
