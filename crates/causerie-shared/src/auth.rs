//! Integrity tokens for state-mutating calls.
//!
//! Every mutating frame carries a token computed over a canonical
//! `:`-joined concatenation of its semantically significant arguments,
//! e.g. `"4:9:hello"` for a send from user 4 to user 9.  The server
//! recomputes the same concatenation under a shared secret and rejects on
//! mismatch before any side effect.
//!
//! The token is the lowercase hex of a BLAKE3 keyed hash; the key is
//! derived from the configured secret with domain separation so the same
//! secret can safely back other schemes later.

use subtle::ConstantTimeEq;

use crate::constants::KDF_CONTEXT_INTEGRITY;

/// Shared-secret key for computing and verifying integrity tokens.
///
/// Stateless: both operations are pure functions of (key, payload parts).
pub struct IntegrityKey {
    key: [u8; 32],
}

impl IntegrityKey {
    /// Derive the token key from a configured secret string.
    pub fn derive(secret: &str) -> Self {
        Self {
            key: blake3::derive_key(KDF_CONTEXT_INTEGRITY, secret.as_bytes()),
        }
    }

    /// Compute the token for the canonical `:`-joined payload parts.
    pub fn sign(&self, parts: &[&str]) -> String {
        let payload = parts.join(":");
        hex::encode(blake3::keyed_hash(&self.key, payload.as_bytes()).as_bytes())
    }

    /// Verify a caller-supplied token against the canonical payload.
    ///
    /// Constant-time on the digest comparison; malformed or wrong-length
    /// tokens fail closed.
    pub fn verify(&self, parts: &[&str], token: &str) -> bool {
        let claimed = match hex::decode(token) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        if claimed.len() != 32 {
            return false;
        }
        let payload = parts.join(":");
        let expected = blake3::keyed_hash(&self.key, payload.as_bytes());
        expected.as_bytes().ct_eq(claimed.as_slice()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let key = IntegrityKey::derive("test-secret");
        let token = key.sign(&["4", "9", "hello"]);
        assert!(key.verify(&["4", "9", "hello"], &token));
    }

    #[test]
    fn tampered_payload_fails() {
        let key = IntegrityKey::derive("test-secret");
        let token = key.sign(&["4", "9", "hello"]);
        assert!(!key.verify(&["4", "9", "hello!"], &token));
        assert!(!key.verify(&["9", "4", "hello"], &token));
    }

    #[test]
    fn wrong_secret_fails() {
        let token = IntegrityKey::derive("secret-a").sign(&["connect", "7"]);
        assert!(!IntegrityKey::derive("secret-b").verify(&["connect", "7"], &token));
    }

    #[test]
    fn malformed_token_fails_closed() {
        let key = IntegrityKey::derive("test-secret");
        assert!(!key.verify(&["connect", "7"], "not-hex"));
        assert!(!key.verify(&["connect", "7"], "abcd"));
        assert!(!key.verify(&["connect", "7"], ""));
    }

    #[test]
    fn distinct_operations_produce_distinct_tokens() {
        let key = IntegrityKey::derive("test-secret");
        assert_ne!(key.sign(&["read", "4", "abc"]), key.sign(&["chat", "4", "abc"]));
    }
}
