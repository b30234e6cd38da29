//! PIN challenge derivation.
//!
//! The verification service never stores a PIN. It stores
//! `hashed_pin = hex(sha256(salt ‖ pin))` and, per challenge, a random
//! `challenge_secret`. The response the ledger accepts is
//!
//! ```text
//! response = hex(sha256(hashed_pin ‖ "_" ‖ challenge_secret))
//! ```
//!
//! so a leaked response is useless for any other challenge, and a leaked
//! hashed PIN is useless without a live challenge secret.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length of freshly generated salts and challenge secrets, in bytes.
pub const CHALLENGE_SECRET_BYTES: usize = 16;

/// Salted PIN hash, hex-encoded.
pub fn hash_pin(salt: &str, pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(pin.as_bytes());
    hex::encode(hasher.finalize())
}

/// Challenge response for an already-hashed PIN.
pub fn pin_response(hashed_pin: &str, challenge_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(hashed_pin.as_bytes());
    hasher.update(b"_");
    hasher.update(challenge_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// A random hex string suitable as a salt or challenge secret.
pub fn random_secret() -> String {
    let mut bytes = [0u8; CHALLENGE_SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_hash_is_deterministic_and_salted() {
        let a = hash_pin("salt-a", "123456");
        assert_eq!(a, hash_pin("salt-a", "123456"));
        assert_ne!(a, hash_pin("salt-b", "123456"));
        assert_ne!(a, hash_pin("salt-a", "654321"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn response_depends_on_challenge_secret() {
        let hashed = hash_pin("salt", "123456");
        let r1 = pin_response(&hashed, "challenge-1");
        let r2 = pin_response(&hashed, "challenge-2");
        assert_ne!(r1, r2);
        assert_eq!(r1, pin_response(&hashed, "challenge-1"));
    }

    #[test]
    fn response_is_not_the_hashed_pin() {
        // The separator matters: the response must never collapse into
        // something derivable from the stored hash alone.
        let hashed = hash_pin("salt", "123456");
        assert_ne!(pin_response(&hashed, ""), hashed);
    }

    #[test]
    fn random_secrets_differ() {
        let a = random_secret();
        let b = random_secret();
        assert_ne!(a, b);
        assert_eq!(a.len(), CHALLENGE_SECRET_BYTES * 2);
    }
}
