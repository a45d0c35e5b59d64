//! # Key Management
//!
//! secp256k1 signing keys for wallet inputs and contract signature
//! arguments.
//!
//! Keys come from outside (seed derivation and WIF parsing are not this
//! crate's job) as 32 raw bytes or 64 hex characters. Public keys are always
//! used in 33-byte compressed form, which is what the contracts hash and
//! compare against.
//!
//! ## Security considerations
//!
//! - `Debug` prints the public-key hash, never the secret.
//! - Signing is deterministic (RFC 6979). The same key and digest always
//!   give the same DER bytes, which keeps assembled transactions
//!   reproducible.

use std::fmt;

use secp256k1::{ecdsa::Signature, Message, PublicKey, SecretKey, SECP256K1};
use thiserror::Error;

use super::hash::hash160;

/// Errors that can occur during key operations.
///
/// Deliberately terse: error messages must not echo key material.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key: expected 32 bytes encoding a scalar in range")]
    InvalidSecretKey,

    #[error("invalid secret key hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// A secp256k1 signing key with its cached compressed public key.
#[derive(Clone)]
pub struct SigningKey {
    secret: SecretKey,
    public: PublicKey,
}

impl SigningKey {
    /// Builds a key from 32 raw secret bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let secret = SecretKey::from_slice(bytes).map_err(|_| KeyError::InvalidSecretKey)?;
        let public = PublicKey::from_secret_key(SECP256K1, &secret);
        Ok(Self { secret, public })
    }

    /// Builds a key from 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim())?;
        Self::from_bytes(&bytes)
    }

    /// The 33-byte compressed public key.
    pub fn public_key(&self) -> [u8; 33] {
        self.public.serialize()
    }

    /// `HASH160` of the compressed public key. This is what P2PKH locking
    /// bytecode and the contracts' party fields commit to.
    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.public_key())
    }

    /// Signs a 32-byte digest and returns the DER-encoded signature without
    /// a sighash byte. Callers append the hash type themselves.
    ///
    /// Nonces are ground until `r` has no high bit, so signatures are at
    /// most 70 bytes and re-signing a draft does not grow it.
    pub fn sign_digest(&self, digest: [u8; 32]) -> Vec<u8> {
        let message = Message::from_digest(digest);
        SECP256K1
            .sign_ecdsa_low_r(&message, &self.secret)
            .serialize_der()
            .to_vec()
    }
}

impl PartialEq for SigningKey {
    fn eq(&self, other: &Self) -> bool {
        self.public == other.public
    }
}

impl Eq for SigningKey {}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("pubkey_hash", &hex::encode(self.pubkey_hash()))
            .finish_non_exhaustive()
    }
}

/// Checks a DER signature (no sighash byte) over `digest` against a
/// compressed or uncompressed public key. Returns `false` on any parse
/// failure.
pub fn verify_signature(public_key: &[u8], digest: [u8; 32], der: &[u8]) -> bool {
    let Ok(public) = PublicKey::from_slice(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_der(der) else {
        return false;
    };
    let message = Message::from_digest(digest);
    SECP256K1.verify_ecdsa(&message, &signature, &public).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> SigningKey {
        SigningKey::from_bytes(&[byte; 32]).unwrap()
    }

    #[test]
    fn generator_key_has_known_pubkey() {
        let mut secret = [0u8; 32];
        secret[31] = 1;
        let key = SigningKey::from_bytes(&secret).unwrap();
        assert_eq!(
            hex::encode(key.public_key()),
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
        assert_eq!(
            hex::encode(key.pubkey_hash()),
            "751e76e8199196d454941c45d1b3a323f1433bd6"
        );
    }

    #[test]
    fn zero_key_is_rejected() {
        assert!(matches!(
            SigningKey::from_bytes(&[0u8; 32]),
            Err(KeyError::InvalidSecretKey)
        ));
    }

    #[test]
    fn short_key_is_rejected() {
        assert!(SigningKey::from_bytes(&[1u8; 31]).is_err());
    }

    #[test]
    fn from_hex_matches_from_bytes() {
        let from_hex = SigningKey::from_hex(&hex::encode([7u8; 32])).unwrap();
        assert_eq!(from_hex, key(7));
        assert!(matches!(
            SigningKey::from_hex("zz"),
            Err(KeyError::InvalidHex(_))
        ));
    }

    #[test]
    fn signing_is_deterministic_and_verifies() {
        let key = key(3);
        let digest = crate::crypto::sha256(b"spend");
        let first = key.sign_digest(digest);
        let second = key.sign_digest(digest);
        assert_eq!(first, second);
        assert!(verify_signature(&key.public_key(), digest, &first));

        let other = crate::crypto::sha256(b"other");
        assert!(!verify_signature(&key.public_key(), other, &first));
    }

    #[test]
    fn signatures_never_exceed_seventy_bytes() {
        let key = key(5);
        for n in 0u32..200 {
            let digest = crate::crypto::sha256(&n.to_le_bytes());
            let sig = key.sign_digest(digest);
            assert!(sig.len() <= 70, "digest {n}: {} bytes", sig.len());
            assert!(verify_signature(&key.public_key(), digest, &sig));
        }
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let rendered = format!("{:?}", key(9));
        assert!(!rendered.contains(&hex::encode([9u8; 32])));
        assert!(rendered.contains("pubkey_hash"));
    }
}
