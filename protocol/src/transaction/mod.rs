//! # Transaction Module
//!
//! Everything between "here are some UTXOs" and "here is a signed
//! transaction to broadcast".
//!
//! ## Architecture
//!
//! ```text
//! types.rs    UTXO records, outpoints, token data, outputs
//! encoding.rs Wire codec with token prefixes; Transaction, txid
//! sighash.rs  SIGHASH_ALL|FORKID digest with token-aware preimage
//! builder.rs  DraftTransaction, unlocking templates, DraftBuilder
//! fee.rs      Exact fee rate and size-based fee estimation
//! funding.rs  Greedy funder with change-or-burn decision
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Draft**: the assembler lays out the outputs and any inputs the
//!    operation requires.
//! 2. **Fund**: [`fund_transaction`] attaches wallet coins until the fee is
//!    covered and decides on change.
//! 3. **Finalize**: [`DraftTransaction::finalize`] signs every input and
//!    yields a [`Transaction`] ready to serialize.
//!
//! Fee estimation finalizes the draft to measure it, so signing happens
//! several times per assembly. Signatures are deterministic, so the final
//! pass reproduces exactly the bytes that were priced.

pub mod builder;
pub mod encoding;
pub mod fee;
pub mod funding;
pub mod sighash;
pub mod types;

pub use builder::{DraftBuilder, DraftInput, DraftTransaction, ScriptArg, UnlockingTemplate};
pub use encoding::{EncodingError, Transaction, TxInput};
pub use fee::{estimate_fee, FeeRate, FeeRateError};
pub use funding::{change_output_value, fund_transaction, FundingError, FundingSummary, FundingUtxo};
pub use sighash::{signature_hash, signature_preimage};
pub use types::{Nft, NftCapability, Outpoint, TokenData, TxOutput, Utxo};
