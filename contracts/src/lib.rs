//! # Escrow and Fee-Pool Contracts
//!
//! Off-chain drivers for two CashScript-style contracts. The contracts
//! themselves are compiled elsewhere; this crate takes the compiled form,
//! checks it against the VM limits and builds every transaction the
//! contracts take part in:
//!
//! - **Escrow**: a four-party escrow (buyer, seller, servicer, arbiter) with
//!   a funding leg and a release or refund settlement leg, plus validators
//!   that check a transaction pays the right parties in the right order.
//! - **Fee Pool**: an NFT sequencer. A singleton minting NFT holds the last
//!   issued id; each mint hands out a key NFT for the next id, and the key
//!   later claims the lock NFT carrying the same id.
//! - **Assembler**: one request type per operation, validated on
//!   construction, turned into a funded and signed transaction.
//!
//! ## Design Principles
//!
//! 1. Satoshi arithmetic is checked. Overflow is an error, not a wrap.
//! 2. UTXO snapshots are never mutated. How to spend a coin travels next to
//!    it in a `FundingUtxo`.
//! 3. Every privileged call checks the signing key against the public-key
//!    hash the contract was created with before anything is signed.
//! 4. Parameters and compiled-contract reports are serde types so the CLI
//!    can read them from JSON files.

pub mod assembler;
pub mod contract;
pub mod escrow;
pub mod fee_pool;
