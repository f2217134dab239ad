//! Access tokens and credential hashes
//!
//! Tokens are 32 bytes of random data, hex-encoded (64 chars). Credential
//! hashes are stored as `sha256$<salt>$<digest>` where the digest is
//! SHA-256 over the salt followed by the password.
//!
//! A single salted SHA-256 round is fast to brute force; the format is kept
//! for compatibility with existing account records.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Length of an access token in bytes (before hex encoding)
const TOKEN_BYTES: usize = 32;

/// Length of a credential salt in bytes (before hex encoding)
const SALT_BYTES: usize = 16;

/// Scheme prefix for credential hashes
const SCHEME: &str = "sha256";

/// Generate a new random access token
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Hash a password with a fresh random salt
pub fn hash_credential(password: &str) -> String {
    let mut salt = [0u8; SALT_BYTES];
    rand::thread_rng().fill(&mut salt);
    hash_with_salt(&salt, password)
}

/// Check a password against a stored credential hash
///
/// Malformed hashes never verify.
pub fn verify_credential(stored: &str, password: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(scheme), Some(salt), Some(_)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    if scheme != SCHEME {
        return false;
    }
    let Ok(salt) = hex::decode(salt) else {
        return false;
    };

    constant_time_eq(hash_with_salt(&salt, password).as_bytes(), stored.as_bytes())
}

fn hash_with_salt(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    format!(
        "{}${}${}",
        SCHEME,
        hex::encode(salt),
        hex::encode(hasher.finalize())
    )
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
