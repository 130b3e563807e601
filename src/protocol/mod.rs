//! Wire protocol for the authentication service.
//!
//! A packet is `header || payload`, little-endian throughout. The 24-byte
//! header carries magic, protocol version, message type, a client-chosen
//! request ID (echoed in the response and the only correlation mechanism),
//! the account ID when known, and the payload size. Payloads are fixed-size
//! records per message type with NUL-terminated, length-bounded strings.

pub mod codec;
pub mod message;

pub use codec::{build_packet, parse_packet, CodecError, Header};
pub use message::{AuthResult, MessageType, Request, Response};

/// Packet magic: the bytes `AUTH` read as a little-endian u32.
pub const MAGIC: u32 = 0x4854_5541;

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 24;

/// Largest datagram the service will send or accept.
pub const MAX_DATAGRAM_LEN: usize = 1400;

// Upper bounds for the bounded string fields. Senders truncate; receivers
// read at most the bound.
pub const USERNAME_MAX: usize = 20;
pub const SESSION_TOKEN_MAX: usize = 64;
pub const EMAIL_MAX: usize = 128;
pub const ERROR_MESSAGE_MAX: usize = 256;
pub const IP_ADDRESS_MAX: usize = 45;
pub const PASSWORD_HASH_MAX: usize = 128;
