// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Escrow Protocol: Transaction Core
//!
//! The off-chain half of a CashTokens escrow and fee-pool system. The
//! contracts themselves live on chain as compiled bytecode; this crate is
//! everything needed to build transactions that satisfy them and to read
//! back the ones other people built.
//!
//! ## Architecture
//!
//! - **config**: Dust limits, fee rate, contract size limits and the TOML
//!   loader that overrides them.
//! - **crypto**: SHA-256, HASH160 and secp256k1 signing keys.
//! - **script**: Minimal pushes, script numbers, standard locking bytecode
//!   and payment destinations.
//! - **commitment**: Fixed-width little-endian integers packed into NFT
//!   commitments (sequence ids, locked values).
//! - **transaction**: UTXO records, the wire codec with token prefixes,
//!   signature hashing, draft assembly, fee estimation and the funder.
//!
//! ## Design Philosophy
//!
//! 1. Amounts are `u64` satoshis. Fee arithmetic is integer-only; the fee
//!    rate is an exact fraction, not a float.
//! 2. UTXO records are immutable snapshots. Anything needed to spend one
//!    (keys, contract arguments) travels beside it, never on it.
//! 3. Identical inputs produce byte-identical transactions. Signatures use
//!    RFC 6979 nonces and nothing reads the clock.
//! 4. Every failure is a typed error returned to the caller.

pub mod commitment;
pub mod config;
pub mod crypto;
pub mod script;
pub mod transaction;
