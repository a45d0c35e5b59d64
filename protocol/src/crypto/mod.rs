//! # Cryptographic Primitives
//!
//! The chain speaks SHA-256, RIPEMD-160 and secp256k1, so that is what
//! lives here. Nothing clever: thin wrappers over the `sha2`, `ripemd` and
//! `secp256k1` crates, typed so that a 20-byte hash cannot be confused with
//! a 32-byte one.
//!
//! Signatures are ECDSA, DER-encoded, with RFC 6979 deterministic nonces.
//! The chain also accepts its own 64-byte Schnorr variant, but that scheme
//! is not BIP-340 and `secp256k1` does not implement it; ECDSA is valid
//! everywhere a signature is checked.

pub mod hash;
pub mod keys;

pub use hash::{double_sha256, hash160, sha256};
pub use keys::{verify_signature, KeyError, SigningKey};
