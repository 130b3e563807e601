//! Password Hashing and Token Generation
//!
//! This module implements the credential pipeline for the authentication
//! service: a salted, cost-tunable key derivation for stored credentials, the
//! SHA-256 digest clients apply before a password ever leaves their machine,
//! and CSPRNG-backed session token generation.
//!
//! # Credential format
//! Stored credentials are self-describing 60-character strings:
//! `$2b$<cost>$<22-char salt><31-char hash>` using the bcrypt base-64
//! alphabet. The cost is a power-of-two iteration count, so it can be raised
//! later without any schema change. The derivation itself is an iterated
//! SHA-256 chain; the `$2b$` label is kept for format stability only and the
//! string must be treated as opaque by other tools.
//!
//! # Security Features
//! - 16-byte CSPRNG salt per credential
//! - 2^cost SHA-256 iterations (cost clamped to 4..=31)
//! - Constant-time comparison during verification
//! - Passwords reach the server only as client-side SHA-256 digests

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Salt length in raw bytes (22 encoded characters).
const SALT_LEN: usize = 16;

/// Derived key length in raw bytes (31 encoded characters).
const KEY_LEN: usize = 24;

/// Total length of an encoded credential string.
const CREDENTIAL_LEN: usize = 60;

/// Cost bounds for the key derivation. Values outside are clamped, not
/// rejected, so a misconfigured caller degrades to a safe default instead of
/// failing registration.
const MIN_COST: u32 = 4;
const MAX_COST: u32 = 31;

/// The bcrypt base-64 alphabet (6 bits per character, no padding).
const BCRYPT_ALPHABET: &[u8; 64] =
    b"./ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Errors produced by the credential pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The input to hash was empty. An empty client digest can never be a
    /// real credential, so it is rejected outright.
    #[error("cannot hash empty input")]
    EmptyInput,

    /// The system CSPRNG failed to produce salt or token bytes.
    #[error("system random number generator failure: {0}")]
    Rng(#[from] rand::Error),
}

/// Hashes a password (in practice, the client-supplied SHA-256 hex digest)
/// into a stored credential string.
///
/// Draws a fresh 16-byte salt from the system CSPRNG and derives a 24-byte
/// key by iterating SHA-256 `2^cost` times over `input || salt`.
///
/// # Arguments
/// * `input` - Non-empty byte string to hash
/// * `cost` - Iteration exponent; clamped into `4..=31`
///
/// # Returns
/// - `Ok(String)` - The 60-character credential string
/// - `Err(CryptoError::EmptyInput)` - If `input` is empty
/// - `Err(CryptoError::Rng)` - If the CSPRNG fails
///
/// # Security
/// Two invocations with identical inputs produce distinct credentials
/// (fresh salt per call); both verify against the same input.
pub fn hash_password(input: &[u8], cost: u32) -> Result<String, CryptoError> {
    if input.is_empty() {
        return Err(CryptoError::EmptyInput);
    }

    let cost = cost.clamp(MIN_COST, MAX_COST);

    // Fresh salt from the system CSPRNG
    let mut salt = [0u8; SALT_LEN];
    OsRng.try_fill_bytes(&mut salt)?;

    let key = derive_key(input, &salt, cost);

    Ok(format_credential(cost, &salt, &key))
}

/// Verifies an input against a stored credential string.
///
/// Parses the `$2b$<cost>$<salt><hash>` format, re-derives the key with the
/// embedded salt and cost, and compares the encoded result to the stored
/// tail in constant time. Any malformed credential verifies as `false`.
pub fn verify_password(input: &[u8], credential: &str) -> bool {
    if input.is_empty() {
        return false;
    }

    let Some((cost, salt)) = parse_credential(credential) else {
        return false;
    };

    let key = derive_key(input, &salt, cost);
    let mut encoded = encode_bcrypt64(&key);
    encoded.truncate(31);

    // Byte-for-byte constant-time comparison against the stored tail
    let stored = &credential.as_bytes()[29..];
    encoded.as_bytes().ct_eq(stored).into()
}

/// Computes the lowercase hex SHA-256 digest of `data`.
///
/// Empty input returns an empty string by contract, so a missing client
/// digest can never be mistaken for a real one.
pub fn sha256_hex(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }

    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Generates `n_bytes` of CSPRNG output, lowercase hex-encoded
/// (`2 * n_bytes` characters). Session tokens use `secure_token(32)`.
pub fn secure_token(n_bytes: usize) -> Result<String, CryptoError> {
    let mut buf = vec![0u8; n_bytes];
    OsRng.try_fill_bytes(&mut buf)?;
    Ok(hex::encode(buf))
}

/// Iterated SHA-256 key derivation.
///
/// Initial block = `SHA-256(input || salt)`; each subsequent block is the
/// SHA-256 of the previous one, for a total of `2^cost` hash invocations.
/// The first 24 bytes of the final block form the key.
fn derive_key(input: &[u8], salt: &[u8; SALT_LEN], cost: u32) -> [u8; KEY_LEN] {
    let iterations: u64 = 1u64 << cost;

    let mut hasher = Sha256::new();
    hasher.update(input);
    hasher.update(salt);
    let mut block = hasher.finalize();

    for _ in 1..iterations {
        block = Sha256::digest(block);
    }

    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&block[..KEY_LEN]);
    key
}

/// Assembles the credential string from its parts.
fn format_credential(cost: u32, salt: &[u8; SALT_LEN], key: &[u8; KEY_LEN]) -> String {
    let mut salt_enc = encode_bcrypt64(salt);
    salt_enc.truncate(22);
    let mut key_enc = encode_bcrypt64(key);
    key_enc.truncate(31);

    format!("$2b${:02}${}{}", cost, salt_enc, key_enc)
}

/// Splits a credential string into its cost and decoded salt.
/// Returns `None` for anything that is not a well-formed credential.
fn parse_credential(credential: &str) -> Option<(u32, [u8; SALT_LEN])> {
    let bytes = credential.as_bytes();
    if bytes.len() != CREDENTIAL_LEN || !credential.starts_with("$2b$") || bytes[6] != b'$' {
        return None;
    }

    let cost: u32 = credential.get(4..6)?.parse().ok()?;
    if !(MIN_COST..=MAX_COST).contains(&cost) {
        return None;
    }

    let salt_bytes = decode_bcrypt64(credential.get(7..29)?)?;
    if salt_bytes.len() < SALT_LEN {
        return None;
    }

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&salt_bytes[..SALT_LEN]);
    Some((cost, salt))
}

/// Encodes bytes with the bcrypt alphabet, 6 bits per character, no padding.
fn encode_bcrypt64(src: &[u8]) -> String {
    let mut out = String::with_capacity(src.len().div_ceil(3) * 4);

    for chunk in src.chunks(3) {
        let c1 = chunk[0] as u32;
        let c2 = chunk.get(1).copied().unwrap_or(0) as u32;
        let c3 = chunk.get(2).copied().unwrap_or(0) as u32;

        out.push(BCRYPT_ALPHABET[(c1 >> 2) as usize] as char);
        out.push(BCRYPT_ALPHABET[(((c1 & 0x03) << 4) | (c2 >> 4)) as usize] as char);
        out.push(BCRYPT_ALPHABET[(((c2 & 0x0f) << 2) | (c3 >> 6)) as usize] as char);
        out.push(BCRYPT_ALPHABET[(c3 & 0x3f) as usize] as char);
    }

    out
}

/// Decodes a bcrypt-alphabet string back into bytes. Partial trailing groups
/// (as produced by the truncated salt encoding) are handled. Returns `None`
/// on any character outside the alphabet.
fn decode_bcrypt64(src: &str) -> Option<Vec<u8>> {
    let mut table = [0xFFu8; 256];
    for (i, &c) in BCRYPT_ALPHABET.iter().enumerate() {
        table[c as usize] = i as u8;
    }

    let mut vals = Vec::with_capacity(src.len());
    for &c in src.as_bytes() {
        let v = table[c as usize];
        if v == 0xFF {
            return None;
        }
        vals.push(v);
    }

    let mut out = Vec::with_capacity(src.len() * 3 / 4 + 2);
    for group in vals.chunks(4) {
        match group.len() {
            4 => {
                out.push((group[0] << 2) | (group[1] >> 4));
                out.push((group[1] << 4) | (group[2] >> 2));
                out.push((group[2] << 6) | group[3]);
            }
            3 => {
                out.push((group[0] << 2) | (group[1] >> 4));
                out.push((group[1] << 4) | (group[2] >> 2));
            }
            2 => {
                out.push((group[0] << 2) | (group[1] >> 4));
            }
            _ => return None,
        }
    }

    Some(out)
}
