//! Request handlers organized by feature, plus the shared per-process state
//! they operate on.

pub mod auth;

use crate::db::DbPool;
use crate::protocol::{self, Header, MessageType, Request, Response};
use crate::security::policy::SecurityPolicy;
use chrono::Utc;
use std::sync::Mutex;

/// Server statistics, updated by the handlers.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServerStats {
    pub total_requests: u64,
    pub successful_logins: u64,
    pub failed_logins: u64,
    pub registrations: u64,
    pub token_validations: u64,
}

/// Shared state threaded through every handler: the store pool, the
/// in-memory security policy, and the statistics counters.
pub struct AppState {
    pub pool: DbPool,
    pub policy: SecurityPolicy,
    pub stats: Mutex<ServerStats>,
}

impl AppState {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            policy: SecurityPolicy::new(),
            stats: Mutex::new(ServerStats::default()),
        }
    }

    /// Snapshot of the statistics counters.
    pub fn stats(&self) -> ServerStats {
        *self.stats.lock().unwrap()
    }
}

/// Routes a parsed packet to its handler.
///
/// Common prelude for every request: if the sender IP is blacklisted the
/// datagram is dropped silently (`None`); otherwise the request counter is
/// bumped and the type is logged. Unknown message types are answered with a
/// generic error; undecodable payloads are dropped like malformed
/// datagrams. Everything else produces exactly one response.
pub async fn dispatch(
    state: &AppState,
    client_ip: &str,
    header: &Header,
    payload: &[u8],
) -> Option<Response> {
    let now = Utc::now().timestamp();

    if state.policy.is_blacklisted(client_ip, now) {
        tracing::debug!(ip = %client_ip, "Dropped request from blacklisted IP");
        return None;
    }

    {
        let mut stats = state.stats.lock().unwrap();
        stats.total_requests += 1;
    }

    let Some(msg_type) = MessageType::from_u16(header.msg_type) else {
        tracing::warn!(msg_type = header.msg_type, ip = %client_ip, "Unknown message type");
        return Some(Response::error(
            protocol::AuthResult::ServerError,
            "Unknown message type",
        ));
    };

    tracing::debug!(
        msg_type = msg_type.name(),
        ip = %client_ip,
        request_id = header.request_id,
        "Received request"
    );

    // A payload too small for its declared type is unparseable; like a
    // malformed datagram it gets no response
    let request = match protocol::codec::decode_request(msg_type, payload) {
        Ok(request) => request,
        Err(err) => {
            tracing::warn!(error = %err, ip = %client_ip, "Undecodable payload");
            return None;
        }
    };

    let response = match request {
        Request::Register(request) => auth::register(state, client_ip, &request).await,
        Request::Login(request) => auth::login(state, client_ip, &request).await,
        Request::ValidateToken(request) => auth::validate_token(state, client_ip, &request).await,
        Request::Logout(request) => auth::logout(state, client_ip, &request).await,
        Request::ChangePassword(request) => {
            auth::change_password(state, client_ip, &request).await
        }
    };

    Some(response)
}
