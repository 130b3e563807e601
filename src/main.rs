use anyhow::Context;
use auth_server::{db, server};
use dotenv::dotenv;
use std::env;
use tokio::signal;

/// Main application entry point.
///
/// Usage: `auth_server [port] [dbPath]`. Defaults: port 27016, `auth.db`.
/// Exits 0 on clean shutdown, 1 on initialization failure.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    dotenv().ok();

    // Initialize structured logging
    tracing_subscriber::fmt::init();

    let mut args = env::args().skip(1);

    let port: u16 = match args.next() {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid port number: {raw}"))?,
        None => env_or("AUTH_PORT", 27016)?,
    };

    let db_path = args
        .next()
        .or_else(|| env::var("AUTH_DB_PATH").ok())
        .unwrap_or_else(|| "auth.db".to_string());

    let config = server::ServerConfig {
        port,
        history_retention_days: env_or("HISTORY_RETENTION_DAYS", 90)?,
        janitor_interval_secs: env_or("JANITOR_INTERVAL_SECS", 3600)?,
        ..server::ServerConfig::default()
    };

    tracing::info!(port, db = %db_path, "Starting authentication server");

    let pool = db::create_pool(&db_path)
        .await
        .context("failed to initialize database")?;

    let server = server::AuthServer::bind(config, pool)
        .await
        .context("failed to initialize auth server")?;

    tracing::info!("Auth server initialized successfully, press Ctrl+C to stop");

    let state = server.state();
    server.run(shutdown_signal()).await;

    let stats = state.stats();
    tracing::info!(
        total_requests = stats.total_requests,
        successful_logins = stats.successful_logins,
        failed_logins = stats.failed_logins,
        registrations = stats.registrations,
        token_validations = stats.token_validations,
        "Auth server shutdown complete"
    );
    Ok(())
}

/// Parses an environment variable, falling back to `default` when unset.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {key}")),
        Err(_) => Ok(default),
    }
}

/// Waits for a shutdown signal: Ctrl+C everywhere, SIGTERM on Unix (used by
/// Docker, systemd, etc.).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
