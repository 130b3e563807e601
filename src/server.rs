//! UDP transport loop.
//!
//! A single task owns the socket and drains up to a fixed number of packets
//! per tick, sleeping briefly between ticks to yield CPU. Sends are
//! fire-and-forget; the request ID echoed in each response header is the
//! only correlation mechanism clients get. A janitor tick periodically
//! prunes expired sessions, old login history, stale rate-limit rows, and
//! expired blacklist entries.

use crate::db::DbPool;
use crate::handlers::{self, AppState, ServerStats};
use crate::protocol::{self, Response};
use crate::repositories;
use chrono::Utc;
use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Server configuration, resolved from CLI arguments and environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// UDP port to listen on.
    pub port: u16,
    /// Packets drained per loop tick.
    pub max_packets_per_tick: usize,
    /// Login history rows older than this many days are pruned.
    pub history_retention_days: i64,
    /// Seconds between janitor runs.
    pub janitor_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 27016,
            max_packets_per_tick: 100,
            history_retention_days: 90,
            janitor_interval_secs: 3600,
        }
    }
}

/// The authentication server: socket, shared handler state, and config.
pub struct AuthServer {
    socket: UdpSocket,
    state: Arc<AppState>,
    config: ServerConfig,
}

impl AuthServer {
    /// Binds the UDP socket and assembles the server around an initialized
    /// store pool. The socket is released when the server is dropped, on
    /// every exit path.
    pub async fn bind(config: ServerConfig, pool: DbPool) -> anyhow::Result<Self> {
        let addr = format!("0.0.0.0:{}", config.port);
        let socket = UdpSocket::bind(&addr).await.map_err(|err| {
            if err.kind() == ErrorKind::AddrInUse {
                anyhow::anyhow!("failed to bind {addr}: port {} is already in use", config.port)
            } else {
                anyhow::anyhow!("failed to bind {addr}: {err}")
            }
        })?;

        tracing::info!(port = config.port, "Auth server listening");

        Ok(Self {
            socket,
            state: Arc::new(AppState::new(pool)),
            config,
        })
    }

    /// Shared handler state, for tooling and tests.
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Snapshot of the statistics counters.
    pub fn stats(&self) -> ServerStats {
        self.state.stats()
    }

    /// Runs the receive loop until `shutdown` resolves.
    ///
    /// Each iteration drains up to `max_packets_per_tick` datagrams without
    /// blocking, then yields for about a millisecond. Requests from one
    /// address are answered in arrival order; ordering across addresses is
    /// arbitrary.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        let mut janitor =
            tokio::time::interval(Duration::from_secs(self.config.janitor_interval_secs));
        let mut buf = [0u8; protocol::MAX_DATAGRAM_LEN];

        loop {
            self.drain_packets(&mut buf).await;

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received, draining");
                    // One final drain so already-arrived requests get answers
                    self.drain_packets(&mut buf).await;
                    break;
                }
                _ = janitor.tick() => {
                    self.run_janitor().await;
                }
                _ = tokio::time::sleep(Duration::from_millis(1)) => {}
            }
        }

        tracing::info!("Auth server stopped");
    }

    /// Drains up to `max_packets_per_tick` pending datagrams.
    async fn drain_packets(&self, buf: &mut [u8]) {
        for _ in 0..self.config.max_packets_per_tick {
            match self.socket.try_recv_from(buf) {
                Ok((len, sender)) => {
                    self.handle_datagram(sender, &buf[..len]).await;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => {
                    tracing::warn!(error = %err, "Socket receive error");
                    break;
                }
            }
        }
    }

    async fn handle_datagram(&self, sender: SocketAddr, data: &[u8]) {
        // Unparseable datagrams are dropped without a response
        let (header, payload) = match protocol::parse_packet(data) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(error = %err, sender = %sender, "Invalid packet");
                return;
            }
        };

        let client_ip = sender.ip().to_string();

        let Some(response) = handlers::dispatch(&self.state, &client_ip, &header, payload).await
        else {
            return;
        };

        self.send_response(sender, &response, header.request_id).await;
    }

    /// Fire-and-forget send; delivery is never confirmed.
    async fn send_response(&self, dest: SocketAddr, response: &Response, request_id: u32) {
        let packet = protocol::build_packet(response, request_id, response_account_id(response));

        if let Err(err) = self.socket.send_to(&packet, dest).await {
            tracing::warn!(error = %err, dest = %dest, "Failed to send response");
            return;
        }

        if let Response::Error(err) = response {
            tracing::debug!(
                code = err.error_code.name(),
                message = %err.message,
                dest = %dest,
                request_id,
                "Sent error"
            );
        } else {
            tracing::debug!(
                msg_type = response.message_type().name(),
                dest = %dest,
                request_id,
                "Sent response"
            );
        }
    }

    /// Periodic cleanup of expired or stale rows and blacklist entries.
    async fn run_janitor(&self) {
        let now = Utc::now().timestamp();

        if let Err(err) = repositories::sessions::cleanup_expired_sessions(&self.state.pool, now).await
        {
            tracing::error!(error = %err, "Janitor: session cleanup failed");
        }

        if let Err(err) = repositories::login_history::cleanup_old_login_history(
            &self.state.pool,
            now,
            self.config.history_retention_days,
        )
        .await
        {
            tracing::error!(error = %err, "Janitor: login history cleanup failed");
        }

        if let Err(err) =
            repositories::rate_limits::cleanup_expired_rate_limits(&self.state.pool, now).await
        {
            tracing::error!(error = %err, "Janitor: rate limit cleanup failed");
        }

        let expired = self.state.policy.cleanup_expired_blacklist(now);
        if expired > 0 {
            tracing::info!(expired, "Janitor: removed expired blacklist entries");
        }
    }
}

/// Account ID echoed in the response header; 0 when the response carries
/// none.
fn response_account_id(response: &Response) -> u64 {
    match response {
        Response::Register(r) => r.account_id,
        Response::Login(r) => r.account_id,
        Response::ValidateToken(r) => r.account_id,
        Response::Logout(_) | Response::ChangePassword(_) | Response::Error(_) => 0,
    }
}
