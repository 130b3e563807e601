//! Packet framing: fixed-layout header parsing and payload
//! encoding/decoding.
//!
//! The codec validates sizes only; payload semantics (username format,
//! digest length, and so on) belong to the handlers.

use super::message::*;
use super::{
    EMAIL_MAX, ERROR_MESSAGE_MAX, HEADER_LEN, IP_ADDRESS_MAX, MAGIC, PASSWORD_HASH_MAX,
    PROTOCOL_VERSION, SESSION_TOKEN_MAX, USERNAME_MAX,
};

// Fixed payload sizes per message type.
const REGISTER_REQUEST_LEN: usize = USERNAME_MAX + PASSWORD_HASH_MAX + EMAIL_MAX;
const LOGIN_REQUEST_LEN: usize = USERNAME_MAX + PASSWORD_HASH_MAX;
const VALIDATE_TOKEN_REQUEST_LEN: usize = SESSION_TOKEN_MAX + IP_ADDRESS_MAX;
const LOGOUT_REQUEST_LEN: usize = SESSION_TOKEN_MAX + 1;
const CHANGE_PASSWORD_REQUEST_LEN: usize = SESSION_TOKEN_MAX + 2 * PASSWORD_HASH_MAX;

const REGISTER_RESPONSE_LEN: usize = 1 + 8 + SESSION_TOKEN_MAX;
const LOGIN_RESPONSE_LEN: usize = 1 + 1 + 8 + SESSION_TOKEN_MAX;
const VALIDATE_TOKEN_RESPONSE_LEN: usize = 1 + 1 + 8 + 8 + ERROR_MESSAGE_MAX;
const LOGOUT_RESPONSE_LEN: usize = 1 + 4;
const CHANGE_PASSWORD_RESPONSE_LEN: usize = 1 + 4;
const ERROR_RESPONSE_LEN: usize = 1 + ERROR_MESSAGE_MAX;

/// Parsed packet header. The message type is kept raw so an unknown type can
/// still be answered with an error referencing the request ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub msg_type: u16,
    pub request_id: u32,
    pub account_id: u64,
    pub payload_size: u32,
}

/// Framing errors. Datagrams failing these checks are dropped without a
/// response.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("datagram shorter than header ({0} bytes)")]
    TooShort(usize),
    #[error("bad packet magic")]
    BadMagic,
    #[error("unsupported protocol version {0}")]
    BadVersion(u16),
    #[error("declared payload size {declared} disagrees with datagram tail {actual}")]
    SizeMismatch { declared: u32, actual: usize },
    #[error("payload too small for {0}")]
    PayloadTooSmall(&'static str),
    #[error("message type {0:?} is not a request")]
    NotARequest(MessageType),
}

/// Splits a datagram into its validated header and payload slice.
///
/// Rejects datagrams shorter than the header, with foreign magic or version,
/// or whose declared payload size disagrees with the datagram tail.
pub fn parse_packet(data: &[u8]) -> Result<(Header, &[u8]), CodecError> {
    if data.len() < HEADER_LEN {
        return Err(CodecError::TooShort(data.len()));
    }

    let magic = u32::from_le_bytes(data[0..4].try_into().unwrap());
    if magic != MAGIC {
        return Err(CodecError::BadMagic);
    }

    let version = u16::from_le_bytes(data[4..6].try_into().unwrap());
    if version != PROTOCOL_VERSION {
        return Err(CodecError::BadVersion(version));
    }

    let header = Header {
        msg_type: u16::from_le_bytes(data[6..8].try_into().unwrap()),
        request_id: u32::from_le_bytes(data[8..12].try_into().unwrap()),
        account_id: u64::from_le_bytes(data[12..20].try_into().unwrap()),
        payload_size: u32::from_le_bytes(data[20..24].try_into().unwrap()),
    };

    let payload = &data[HEADER_LEN..];
    if header.payload_size as usize != payload.len() {
        return Err(CodecError::SizeMismatch {
            declared: header.payload_size,
            actual: payload.len(),
        });
    }

    Ok((header, payload))
}

/// Decodes a request payload for a known message type.
pub fn decode_request(msg_type: MessageType, payload: &[u8]) -> Result<Request, CodecError> {
    match msg_type {
        MessageType::RegisterRequest => {
            if payload.len() < REGISTER_REQUEST_LEN {
                return Err(CodecError::PayloadTooSmall("RegisterRequest"));
            }
            Ok(Request::Register(RegisterRequest {
                username: read_str(&payload[0..USERNAME_MAX]),
                password_hash: read_str(&payload[USERNAME_MAX..USERNAME_MAX + PASSWORD_HASH_MAX]),
                email: read_str(
                    &payload[USERNAME_MAX + PASSWORD_HASH_MAX..REGISTER_REQUEST_LEN],
                ),
            }))
        }
        MessageType::LoginRequest => {
            if payload.len() < LOGIN_REQUEST_LEN {
                return Err(CodecError::PayloadTooSmall("LoginRequest"));
            }
            Ok(Request::Login(LoginRequest {
                username: read_str(&payload[0..USERNAME_MAX]),
                password_hash: read_str(&payload[USERNAME_MAX..LOGIN_REQUEST_LEN]),
            }))
        }
        MessageType::ValidateTokenRequest => {
            if payload.len() < VALIDATE_TOKEN_REQUEST_LEN {
                return Err(CodecError::PayloadTooSmall("ValidateTokenRequest"));
            }
            Ok(Request::ValidateToken(ValidateTokenRequest {
                session_token: read_str(&payload[0..SESSION_TOKEN_MAX]),
                ip_address: read_str(&payload[SESSION_TOKEN_MAX..VALIDATE_TOKEN_REQUEST_LEN]),
            }))
        }
        MessageType::LogoutRequest => {
            if payload.len() < LOGOUT_REQUEST_LEN {
                return Err(CodecError::PayloadTooSmall("LogoutRequest"));
            }
            Ok(Request::Logout(LogoutRequest {
                session_token: read_str(&payload[0..SESSION_TOKEN_MAX]),
                logout_all_sessions: payload[SESSION_TOKEN_MAX] != 0,
            }))
        }
        MessageType::ChangePasswordRequest => {
            if payload.len() < CHANGE_PASSWORD_REQUEST_LEN {
                return Err(CodecError::PayloadTooSmall("ChangePasswordRequest"));
            }
            Ok(Request::ChangePassword(ChangePasswordRequest {
                session_token: read_str(&payload[0..SESSION_TOKEN_MAX]),
                old_password_hash: read_str(
                    &payload[SESSION_TOKEN_MAX..SESSION_TOKEN_MAX + PASSWORD_HASH_MAX],
                ),
                new_password_hash: read_str(
                    &payload[SESSION_TOKEN_MAX + PASSWORD_HASH_MAX..CHANGE_PASSWORD_REQUEST_LEN],
                ),
            }))
        }
        other => Err(CodecError::NotARequest(other)),
    }
}

/// Builds a complete response packet: header plus encoded payload.
pub fn build_packet(response: &Response, request_id: u32, account_id: u64) -> Vec<u8> {
    let payload = encode_response(response);
    let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());

    packet.extend_from_slice(&MAGIC.to_le_bytes());
    packet.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    packet.extend_from_slice(&(response.message_type() as u16).to_le_bytes());
    packet.extend_from_slice(&request_id.to_le_bytes());
    packet.extend_from_slice(&account_id.to_le_bytes());
    packet.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    packet.extend_from_slice(&payload);

    packet
}

/// Builds a complete request packet. Used by client-side tooling and the
/// test suite; the server only parses these.
pub fn build_request_packet(request: &Request, request_id: u32, account_id: u64) -> Vec<u8> {
    let (msg_type, payload) = encode_request(request);
    let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());

    packet.extend_from_slice(&MAGIC.to_le_bytes());
    packet.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    packet.extend_from_slice(&(msg_type as u16).to_le_bytes());
    packet.extend_from_slice(&request_id.to_le_bytes());
    packet.extend_from_slice(&account_id.to_le_bytes());
    packet.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    packet.extend_from_slice(&payload);

    packet
}

fn encode_response(response: &Response) -> Vec<u8> {
    match response {
        Response::Register(r) => {
            let mut buf = Vec::with_capacity(REGISTER_RESPONSE_LEN);
            buf.push(r.result as u8);
            buf.extend_from_slice(&r.account_id.to_le_bytes());
            write_str(&mut buf, &r.session_token, SESSION_TOKEN_MAX);
            buf
        }
        Response::Login(r) => {
            let mut buf = Vec::with_capacity(LOGIN_RESPONSE_LEN);
            buf.push(r.result as u8);
            buf.push(r.requires_2fa as u8);
            buf.extend_from_slice(&r.account_id.to_le_bytes());
            write_str(&mut buf, &r.session_token, SESSION_TOKEN_MAX);
            buf
        }
        Response::ValidateToken(r) => {
            let mut buf = Vec::with_capacity(VALIDATE_TOKEN_RESPONSE_LEN);
            buf.push(r.result as u8);
            buf.push(r.is_banned as u8);
            buf.extend_from_slice(&r.account_id.to_le_bytes());
            buf.extend_from_slice(&r.expires_at.to_le_bytes());
            write_str(&mut buf, &r.error_message, ERROR_MESSAGE_MAX);
            buf
        }
        Response::Logout(r) => {
            let mut buf = Vec::with_capacity(LOGOUT_RESPONSE_LEN);
            buf.push(r.result as u8);
            buf.extend_from_slice(&r.sessions_invalidated.to_le_bytes());
            buf
        }
        Response::ChangePassword(r) => {
            let mut buf = Vec::with_capacity(CHANGE_PASSWORD_RESPONSE_LEN);
            buf.push(r.result as u8);
            buf.extend_from_slice(&r.sessions_invalidated.to_le_bytes());
            buf
        }
        Response::Error(r) => {
            let mut buf = Vec::with_capacity(ERROR_RESPONSE_LEN);
            buf.push(r.error_code as u8);
            write_str(&mut buf, &r.message, ERROR_MESSAGE_MAX);
            buf
        }
    }
}

fn encode_request(request: &Request) -> (MessageType, Vec<u8>) {
    match request {
        Request::Register(r) => {
            let mut buf = Vec::with_capacity(REGISTER_REQUEST_LEN);
            write_str(&mut buf, &r.username, USERNAME_MAX);
            write_str(&mut buf, &r.password_hash, PASSWORD_HASH_MAX);
            write_str(&mut buf, &r.email, EMAIL_MAX);
            (MessageType::RegisterRequest, buf)
        }
        Request::Login(r) => {
            let mut buf = Vec::with_capacity(LOGIN_REQUEST_LEN);
            write_str(&mut buf, &r.username, USERNAME_MAX);
            write_str(&mut buf, &r.password_hash, PASSWORD_HASH_MAX);
            (MessageType::LoginRequest, buf)
        }
        Request::ValidateToken(r) => {
            let mut buf = Vec::with_capacity(VALIDATE_TOKEN_REQUEST_LEN);
            write_str(&mut buf, &r.session_token, SESSION_TOKEN_MAX);
            write_str(&mut buf, &r.ip_address, IP_ADDRESS_MAX);
            (MessageType::ValidateTokenRequest, buf)
        }
        Request::Logout(r) => {
            let mut buf = Vec::with_capacity(LOGOUT_REQUEST_LEN);
            write_str(&mut buf, &r.session_token, SESSION_TOKEN_MAX);
            buf.push(r.logout_all_sessions as u8);
            (MessageType::LogoutRequest, buf)
        }
        Request::ChangePassword(r) => {
            let mut buf = Vec::with_capacity(CHANGE_PASSWORD_REQUEST_LEN);
            write_str(&mut buf, &r.session_token, SESSION_TOKEN_MAX);
            write_str(&mut buf, &r.old_password_hash, PASSWORD_HASH_MAX);
            write_str(&mut buf, &r.new_password_hash, PASSWORD_HASH_MAX);
            (MessageType::ChangePasswordRequest, buf)
        }
    }
}

/// Reads a NUL-terminated string from a bounded field. A field filled to the
/// bound carries no terminator; everything up to the bound is the value.
fn read_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Appends a bounded string field: the value truncated to `max` bytes,
/// zero-padded to exactly `max`.
fn write_str(buf: &mut Vec<u8>, value: &str, max: usize) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(max);
    buf.extend_from_slice(&bytes[..len]);
    buf.resize(buf.len() + (max - len), 0);
}
