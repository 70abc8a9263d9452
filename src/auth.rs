//! Credential material: salts, password hashes and bearer tokens.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// 32 random bytes, hex encoded.
pub fn generate_token() -> String {
    random_hex(32)
}

pub fn generate_salt() -> String {
    random_hex(16)
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// HMAC-SHA256 of the password keyed by the salt, hex encoded.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(salt.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(password.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Checks `password` against a stored hash. Accounts without a password
/// (silent trial signups) never verify.
pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    if expected_hash.is_empty() {
        return false;
    }
    constant_time_eq(&hash_password(password, salt), expected_hash)
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic_per_salt() {
        let a = hash_password("hunter2", "salt-a");
        assert_eq!(a, hash_password("hunter2", "salt-a"));
        assert_ne!(a, hash_password("hunter2", "salt-b"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_verify_password() {
        let salt = generate_salt();
        let hash = hash_password("correct horse", &salt);
        assert!(verify_password("correct horse", &salt, &hash));
        assert!(!verify_password("battery staple", &salt, &hash));
        assert!(!verify_password("", &salt, ""));
    }

    #[test]
    fn test_tokens_are_unique_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
