//! # Hashing Utilities
//!
//! The three digests the transaction format needs:
//!
//! - **SHA-256**: building block for everything else.
//! - **double SHA-256**: transaction ids and signature hashes.
//! - **HASH160**: `RIPEMD-160(SHA-256(x))`, used for public-key hashes in
//!   P2PKH locking bytecode and redeem-script hashes in P2SH20.
//!
//! All functions return fixed-size arrays; callers that need a `Vec` can
//! call `.to_vec()` themselves.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 digest of `data`.
///
/// # Example
///
/// ```
/// use escrow_protocol::crypto::sha256;
///
/// let hash = sha256(b"escrow");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute `SHA-256(SHA-256(data))`.
///
/// Transaction ids are this digest of the serialized transaction, displayed
/// byte-reversed.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// Compute `RIPEMD-160(SHA-256(data))`.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let mut hasher = Ripemd160::new();
    hasher.update(sha256(data));
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // NIST test vector for "abc".
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn double_sha256_differs_from_single() {
        let data = b"escrow";
        assert_ne!(sha256(data), double_sha256(data));
        assert_eq!(double_sha256(data), sha256(&sha256(data)));
    }

    #[test]
    fn test_hash160_generator_pubkey() {
        // Compressed public key of secret key 1 (the curve generator).
        let pubkey =
            hex::decode("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798")
                .unwrap();
        assert_eq!(
            hex::encode(hash160(&pubkey)),
            "751e76e8199196d454941c45d1b3a323f1433bd6"
        );
    }

    #[test]
    fn test_hash160_empty_input() {
        assert_eq!(
            hex::encode(hash160(b"")),
            "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"
        );
    }
}
