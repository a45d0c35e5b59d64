//! # Escrow Contract
//!
//! A four-party escrow. The buyer funds the contract with `fundingSats`;
//! settlement either releases the funds to the seller or refunds them to
//! the buyer, and pays the servicer and arbiter their fees in both cases.
//!
//! ## Output layout
//!
//! ```text
//! funding  : [.., escrow(fundingSats), ..]
//! release  : seller(amount) | servicer(serviceFee) | arbiter(arbitrationFee)
//!            [| fee pool(deliveryFee, lock NFT)]
//! refund   : buyer(amount + deliveryFee) | servicer(serviceFee) | arbiter(arbitrationFee)
//! ```
//!
//! The contract checks these outputs by position, so the validators here
//! do too: a refund with the servicer and arbiter swapped is rejected even
//! though it pays the same set of parties.
//!
//! ## Delivery lock
//!
//! When a delivery fee applies, release mints a capability-`none` NFT into
//! the fee pool. Its category is the txid of the escrow UTXO (a genesis
//! spend, so the escrow UTXO must sit at output index 0) and its commitment
//! is `lockNftId ‖ deliveryFee`, two 20-byte fields.

use escrow_protocol::commitment::RecordCommitment;
use escrow_protocol::config::{Config, FeeConfig};
use escrow_protocol::crypto::SigningKey;
use escrow_protocol::script::Destination;
use escrow_protocol::transaction::{
    EncodingError, NftCapability, ScriptArg, TokenData, Transaction, TxOutput, UnlockingTemplate,
    Utxo,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::contract::{int_arg, ContractCompiler, ContractError, ContractInstance};

/// ABI function releasing funds to the seller.
pub const FN_RELEASE: &str = "release";
/// ABI function refunding the buyer.
pub const FN_REFUND: &str = "refund";
/// ABI function with no checks beyond the script itself, used to sweep.
pub const FN_DO_NOTHING: &str = "doNothing";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while setting up or spending an escrow.
#[derive(Debug, Error)]
pub enum EscrowError {
    /// The signing key is not one of the parties allowed to call this
    /// function.
    #[error("key {pubkey_hash} may not {action} this escrow")]
    Unauthorized {
        action: &'static str,
        pubkey_hash: String,
    },

    /// A delivery fee applies but there is no fee pool to pay it into.
    #[error("delivery fee of {delivery_fee} satoshis requires a fee pool")]
    MissingFeePool { delivery_fee: u64 },

    /// The funding total does not fit in 64 bits.
    #[error("escrow amounts overflow")]
    AmountOverflow,

    /// No UTXO holds exactly the funding amount.
    #[error("no escrow UTXO holds {funding_sats} satoshis")]
    FundingUtxoNotFound { funding_sats: u64 },

    #[error(transparent)]
    Contract(#[from] ContractError),
}

/// One output that does not match the expected settlement layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMismatch {
    /// The transaction has fewer outputs than expected.
    Missing { index: usize },
    /// Pays the wrong locking bytecode.
    Destination {
        index: usize,
        expected: Vec<u8>,
        actual: Vec<u8>,
    },
    /// Pays the wrong amount.
    Value {
        index: usize,
        expected: u64,
        actual: u64,
    },
    /// Carries the wrong token, or a token where none belongs.
    Token { index: usize },
}

impl OutputMismatch {
    pub fn index(&self) -> usize {
        match self {
            OutputMismatch::Missing { index }
            | OutputMismatch::Destination { index, .. }
            | OutputMismatch::Value { index, .. }
            | OutputMismatch::Token { index } => *index,
        }
    }
}

impl std::fmt::Display for OutputMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputMismatch::Missing { index } => write!(f, "output {index} is missing"),
            OutputMismatch::Destination {
                index,
                expected,
                actual,
            } => write!(
                f,
                "output {index} must pay {}, pays {}",
                hex::encode(expected),
                hex::encode(actual)
            ),
            OutputMismatch::Value {
                index,
                expected,
                actual,
            } => write!(f, "output {index} must have {expected} sats, has {actual}"),
            OutputMismatch::Token { index } => write!(f, "output {index} carries the wrong token"),
        }
    }
}

fn describe(mismatches: &[OutputMismatch]) -> String {
    if mismatches.is_empty() {
        return "no per-output differences".into();
    }
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A transaction does not have the shape the escrow expects.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Funding must create exactly one escrow output.
    #[error("found {found} outputs paying the escrow contract, expected 1")]
    ContractOutputCount { found: usize },

    #[error("escrow output {index} holds {actual} satoshis, expected {expected}")]
    FundingValue {
        index: usize,
        expected: u64,
        actual: u64,
    },

    #[error(
        "expected {expected_count} settlement outputs, found {actual_count}: {}",
        describe(.mismatches)
    )]
    Settlement {
        expected_count: usize,
        actual_count: usize,
        mismatches: Vec<OutputMismatch>,
    },

    /// A release must spend the escrow UTXO; there is no input to take the
    /// delivery lock category from.
    #[error("settlement transaction has no inputs")]
    NoInputs,

    /// The transaction bytes did not decode.
    #[error("malformed transaction: {0}")]
    Malformed(#[from] EncodingError),
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Which escrow artifact to compile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractVersion {
    V1,
    #[default]
    V2,
}

impl ContractVersion {
    pub fn artifact(self) -> &'static str {
        match self {
            ContractVersion::V1 => "escrow",
            ContractVersion::V2 => "escrow-v2",
        }
    }
}

/// Terms the four parties agreed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowParameters {
    #[serde(with = "hex::serde")]
    pub buyer_pk_hash: [u8; 20],
    #[serde(with = "hex::serde")]
    pub seller_pk_hash: [u8; 20],
    #[serde(with = "hex::serde")]
    pub servicer_pk_hash: [u8; 20],
    #[serde(with = "hex::serde")]
    pub arbiter_pk_hash: [u8; 20],
    /// Where the delivery lock NFT goes on release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_pool: Option<Destination>,
    pub amount: u64,
    pub service_fee: u64,
    pub arbitration_fee: u64,
    #[serde(default)]
    pub delivery_fee: u64,
    #[serde(default)]
    pub lock_nft_id: u64,
    pub timestamp: u64,
}

/// The amounts the contract is actually created with.
///
/// Plain payouts are raised to the dust floor. A delivery fee too small to
/// ride on a token output is dropped rather than paid in part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingAmounts {
    pub amount: u64,
    pub service_fee: u64,
    pub arbitration_fee: u64,
    pub delivery_fee: u64,
    pub tx_fee: u64,
}

impl FundingAmounts {
    pub fn new(params: &EscrowParameters, fees: &FeeConfig) -> Self {
        let delivery_fee = if params.delivery_fee < fees.token_dust_threshold {
            0
        } else {
            params.delivery_fee
        };
        Self {
            amount: params.amount.max(fees.dust_threshold),
            service_fee: params.service_fee.max(fees.dust_threshold),
            arbitration_fee: params.arbitration_fee.max(fees.dust_threshold),
            delivery_fee,
            tx_fee: fees.settlement_fee,
        }
    }

    /// Everything the funding output must hold.
    pub fn funding_sats(&self) -> Option<u64> {
        self.amount
            .checked_add(self.service_fee)?
            .checked_add(self.arbitration_fee)?
            .checked_add(self.delivery_fee)?
            .checked_add(self.tx_fee)
    }
}

// ---------------------------------------------------------------------------
// Escrow
// ---------------------------------------------------------------------------

/// An escrow bound to its compiled contract.
#[derive(Debug, Clone)]
pub struct Escrow {
    params: EscrowParameters,
    version: ContractVersion,
    amounts: FundingAmounts,
    funding_sats: u64,
    contract: ContractInstance,
}

impl Escrow {
    /// Derives the funding amounts, compiles the contract and runs the size
    /// guard.
    pub fn new(
        params: EscrowParameters,
        version: ContractVersion,
        compiler: &dyn ContractCompiler,
        config: &Config,
    ) -> Result<Self, EscrowError> {
        let amounts = FundingAmounts::new(&params, &config.fees);
        let funding_sats = amounts.funding_sats().ok_or(EscrowError::AmountOverflow)?;
        if amounts.delivery_fee > 0 && params.fee_pool.is_none() {
            return Err(EscrowError::MissingFeePool {
                delivery_fee: amounts.delivery_fee,
            });
        }

        let args = creation_args(&params, &amounts)?;
        let contract =
            ContractInstance::compile(compiler, version.artifact(), &args, &config.limits)?;
        Ok(Self {
            params,
            version,
            amounts,
            funding_sats,
            contract,
        })
    }

    pub fn params(&self) -> &EscrowParameters {
        &self.params
    }

    pub fn version(&self) -> ContractVersion {
        self.version
    }

    pub fn amounts(&self) -> &FundingAmounts {
        &self.amounts
    }

    pub fn funding_sats(&self) -> u64 {
        self.funding_sats
    }

    pub fn contract(&self) -> &ContractInstance {
        &self.contract
    }

    /// The P2SH20 destination funding pays into.
    pub fn destination(&self) -> &Destination {
        self.contract.destination()
    }

    // -- settlement layouts ------------------------------------------------

    /// The delivery lock NFT minted on release, if a delivery fee applies.
    pub fn delivery_lock(&self, escrow_txid: [u8; 32]) -> Option<TokenData> {
        (self.amounts.delivery_fee > 0).then(|| {
            TokenData::nft(
                escrow_txid,
                NftCapability::None,
                RecordCommitment::new(self.params.lock_nft_id, self.amounts.delivery_fee)
                    .to_bytes(),
            )
        })
    }

    /// Release outputs when spending an escrow UTXO from `escrow_txid`.
    pub fn release_outputs(&self, escrow_txid: [u8; 32]) -> Vec<TxOutput> {
        let p = &self.params;
        let a = &self.amounts;
        let mut outputs = vec![
            pay(p.seller_pk_hash, a.amount),
            pay(p.servicer_pk_hash, a.service_fee),
            pay(p.arbiter_pk_hash, a.arbitration_fee),
        ];
        if let (Some(lock), Some(pool)) = (self.delivery_lock(escrow_txid), &p.fee_pool) {
            outputs.push(TxOutput::new(pool.locking_bytecode(), a.delivery_fee).with_token(lock));
        }
        outputs
    }

    /// Refund outputs. The buyer gets the delivery fee back.
    pub fn refund_outputs(&self) -> Vec<TxOutput> {
        let p = &self.params;
        let a = &self.amounts;
        vec![
            pay(p.buyer_pk_hash, a.amount + a.delivery_fee),
            pay(p.servicer_pk_hash, a.service_fee),
            pay(p.arbiter_pk_hash, a.arbitration_fee),
        ]
    }

    // -- validators --------------------------------------------------------

    /// Checks that `tx` creates exactly one escrow output holding
    /// `fundingSats`. Returns that output's index.
    pub fn validate_funding(&self, tx: &Transaction) -> Result<usize, ValidationError> {
        let locking = self.contract.locking_bytecode();
        let matches: Vec<(usize, &TxOutput)> = tx
            .outputs
            .iter()
            .enumerate()
            .filter(|(_, output)| output.locking_bytecode == locking)
            .collect();

        let result = match matches.as_slice() {
            [(index, output)] if output.value_satoshis == self.funding_sats => Ok(*index),
            [(index, output)] => Err(ValidationError::FundingValue {
                index: *index,
                expected: self.funding_sats,
                actual: output.value_satoshis,
            }),
            other => Err(ValidationError::ContractOutputCount { found: other.len() }),
        };
        if let Err(err) = &result {
            warn!(txid = %tx.txid_hex(), %err, "funding transaction rejected");
        }
        result
    }

    /// Checks the refund layout, position by position.
    pub fn validate_refund(&self, tx: &Transaction) -> Result<(), ValidationError> {
        let result = compare_outputs(&self.refund_outputs(), &tx.outputs);
        if let Err(err) = &result {
            warn!(txid = %tx.txid_hex(), %err, "refund transaction rejected");
        }
        result
    }

    /// Checks the release layout, delivery lock included. The lock category
    /// is taken from the first input, which must be the escrow UTXO.
    pub fn validate_release(&self, tx: &Transaction) -> Result<(), ValidationError> {
        let escrow_txid = tx
            .inputs
            .first()
            .map(|input| input.outpoint.txid)
            .ok_or(ValidationError::NoInputs)?;
        let result = compare_outputs(&self.release_outputs(escrow_txid), &tx.outputs);
        if let Err(err) = &result {
            warn!(txid = %tx.txid_hex(), %err, "release transaction rejected");
        }
        result
    }

    pub fn validate_funding_hex(&self, tx_hex: &str) -> Result<usize, ValidationError> {
        self.validate_funding(&Transaction::from_hex(tx_hex)?)
    }

    pub fn validate_refund_hex(&self, tx_hex: &str) -> Result<(), ValidationError> {
        self.validate_refund(&Transaction::from_hex(tx_hex)?)
    }

    pub fn validate_release_hex(&self, tx_hex: &str) -> Result<(), ValidationError> {
        self.validate_release(&Transaction::from_hex(tx_hex)?)
    }

    // -- spending ----------------------------------------------------------

    /// The first UTXO holding exactly `fundingSats`.
    pub fn find_funding_utxo<'a>(&self, utxos: &'a [Utxo]) -> Result<&'a Utxo, EscrowError> {
        utxos
            .iter()
            .find(|utxo| utxo.value_satoshis == self.funding_sats && !utxo.has_token())
            .ok_or(EscrowError::FundingUtxoNotFound {
                funding_sats: self.funding_sats,
            })
    }

    /// Release may be called by the buyer or the arbiter.
    pub fn authorize_release(&self, key: &SigningKey) -> Result<(), EscrowError> {
        let pkh = key.pubkey_hash();
        if pkh == self.params.arbiter_pk_hash || pkh == self.params.buyer_pk_hash {
            Ok(())
        } else {
            Err(EscrowError::Unauthorized {
                action: FN_RELEASE,
                pubkey_hash: hex::encode(pkh),
            })
        }
    }

    /// Refund may only be called by the arbiter.
    pub fn authorize_refund(&self, key: &SigningKey) -> Result<(), EscrowError> {
        let pkh = key.pubkey_hash();
        if pkh == self.params.arbiter_pk_hash {
            Ok(())
        } else {
            Err(EscrowError::Unauthorized {
                action: FN_REFUND,
                pubkey_hash: hex::encode(pkh),
            })
        }
    }

    /// `release(pubkey, sig, timestamp)` after checking the key.
    pub fn release_call(&self, key: &SigningKey) -> Result<UnlockingTemplate, EscrowError> {
        self.authorize_release(key)?;
        self.settlement_call(FN_RELEASE, key)
    }

    /// `refund(pubkey, sig, timestamp)` after checking the key.
    pub fn refund_call(&self, key: &SigningKey) -> Result<UnlockingTemplate, EscrowError> {
        self.authorize_refund(key)?;
        self.settlement_call(FN_REFUND, key)
    }

    /// `doNothing()`.
    pub fn sweep_call(&self) -> Result<UnlockingTemplate, EscrowError> {
        Ok(self.contract.function_call(FN_DO_NOTHING, Vec::new())?)
    }

    fn settlement_call(
        &self,
        function: &str,
        key: &SigningKey,
    ) -> Result<UnlockingTemplate, EscrowError> {
        let args = vec![
            ScriptArg::Bytes(key.public_key().to_vec()),
            ScriptArg::Signature(key.clone()),
            int_arg("timestamp", self.params.timestamp)?,
        ];
        Ok(self.contract.function_call(function, args)?)
    }
}

fn pay(pubkey_hash: [u8; 20], value: u64) -> TxOutput {
    TxOutput::new(Destination::PubkeyHash(pubkey_hash).locking_bytecode(), value)
}

/// Constructor arguments in contract order.
///
/// The fee-pool bytecode and lock id are only bound when a delivery fee
/// applies; otherwise they are empty and zero.
pub fn creation_args(
    params: &EscrowParameters,
    amounts: &FundingAmounts,
) -> Result<Vec<ScriptArg>, ContractError> {
    let (fee_pool_bytecode, lock_nft_id) = match &params.fee_pool {
        Some(pool) if amounts.delivery_fee > 0 => (pool.locking_bytecode(), params.lock_nft_id),
        _ => (Vec::new(), 0),
    };
    Ok(vec![
        ScriptArg::Bytes(params.buyer_pk_hash.to_vec()),
        ScriptArg::Bytes(params.seller_pk_hash.to_vec()),
        ScriptArg::Bytes(params.servicer_pk_hash.to_vec()),
        ScriptArg::Bytes(params.arbiter_pk_hash.to_vec()),
        ScriptArg::Bytes(fee_pool_bytecode),
        int_arg("amount", amounts.amount)?,
        int_arg("serviceFee", amounts.service_fee)?,
        int_arg("arbitrationFee", amounts.arbitration_fee)?,
        int_arg("deliveryFee", amounts.delivery_fee)?,
        int_arg("lockNftId", lock_nft_id)?,
        int_arg("timestamp", params.timestamp)?,
    ])
}

/// Position-by-position comparison. Every differing index is reported.
fn compare_outputs(expected: &[TxOutput], actual: &[TxOutput]) -> Result<(), ValidationError> {
    let mut mismatches = Vec::new();
    for (index, want) in expected.iter().enumerate() {
        let Some(got) = actual.get(index) else {
            mismatches.push(OutputMismatch::Missing { index });
            continue;
        };
        if got.locking_bytecode != want.locking_bytecode {
            mismatches.push(OutputMismatch::Destination {
                index,
                expected: want.locking_bytecode.clone(),
                actual: got.locking_bytecode.clone(),
            });
        }
        if got.value_satoshis != want.value_satoshis {
            mismatches.push(OutputMismatch::Value {
                index,
                expected: want.value_satoshis,
                actual: got.value_satoshis,
            });
        }
        if got.token != want.token {
            mismatches.push(OutputMismatch::Token { index });
        }
    }

    if mismatches.is_empty() && actual.len() == expected.len() {
        Ok(())
    } else {
        Err(ValidationError::Settlement {
            expected_count: expected.len(),
            actual_count: actual.len(),
            mismatches,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn params(delivery_fee: u64) -> EscrowParameters {
        EscrowParameters {
            buyer_pk_hash: [1; 20],
            seller_pk_hash: [2; 20],
            servicer_pk_hash: [3; 20],
            arbiter_pk_hash: [4; 20],
            fee_pool: Some(Destination::ScriptHash([9; 20])),
            amount: 100_000,
            service_fee: 2_000,
            arbitration_fee: 300,
            delivery_fee,
            lock_nft_id: 7,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn amounts_apply_dust_floors() {
        let amounts = FundingAmounts::new(&params(0), &FeeConfig::default());
        assert_eq!(amounts.arbitration_fee, 546);
        assert_eq!(amounts.delivery_fee, 0);
        assert_eq!(amounts.funding_sats(), Some(100_000 + 2_000 + 546 + 1_000));
    }

    #[test]
    fn small_delivery_fee_dropped() {
        let fees = FeeConfig::default();
        assert_eq!(FundingAmounts::new(&params(999), &fees).delivery_fee, 0);
        assert_eq!(FundingAmounts::new(&params(1_000), &fees).delivery_fee, 1_000);
    }

    #[test]
    fn creation_args_bind_fee_pool_only_with_delivery_fee() {
        let fees = FeeConfig::default();
        let without = params(0);
        let args = creation_args(&without, &FundingAmounts::new(&without, &fees)).unwrap();
        assert_eq!(args.len(), 11);
        assert_eq!(args[4], ScriptArg::Bytes(Vec::new()));
        assert_eq!(args[9], ScriptArg::Int(0));

        let with = params(1_500);
        let args = creation_args(&with, &FundingAmounts::new(&with, &fees)).unwrap();
        assert_eq!(
            args[4],
            ScriptArg::Bytes(Destination::ScriptHash([9; 20]).locking_bytecode())
        );
        assert_eq!(args[8], ScriptArg::Int(1_500));
        assert_eq!(args[9], ScriptArg::Int(7));
    }

    #[test]
    fn mismatch_messages_name_the_index() {
        let err = compare_outputs(&[pay([1; 20], 10)], &[pay([1; 20], 11)]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "expected 1 settlement outputs, found 1: output 0 must have 10 sats, has 11"
        );
    }

    #[test]
    fn extra_outputs_rejected() {
        let err = compare_outputs(&[pay([1; 20], 10)], &[pay([1; 20], 10), pay([2; 20], 5)])
            .unwrap_err();
        match err {
            ValidationError::Settlement {
                expected_count,
                actual_count,
                mismatches,
            } => {
                assert_eq!((expected_count, actual_count), (1, 2));
                assert!(mismatches.is_empty());
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn parameters_json() {
        let json = r#"{
            "buyerPkHash": "0101010101010101010101010101010101010101",
            "sellerPkHash": "0202020202020202020202020202020202020202",
            "servicerPkHash": "0303030303030303030303030303030303030303",
            "arbiterPkHash": "0404040404040404040404040404040404040404",
            "amount": 100000,
            "serviceFee": 2000,
            "arbitrationFee": 300,
            "timestamp": 1700000000
        }"#;
        let parsed: EscrowParameters = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.fee_pool, None);
        assert_eq!(parsed.delivery_fee, 0);
        assert_eq!(parsed.seller_pk_hash, [2; 20]);
    }

    proptest::proptest! {
        #[test]
        fn amounts_respect_floors_and_sum(
            amount in 0u64..10_000_000,
            service_fee in 0u64..100_000,
            arbitration_fee in 0u64..100_000,
            delivery_fee in 0u64..100_000,
        ) {
            let fees = FeeConfig::default();
            let p = EscrowParameters {
                amount,
                service_fee,
                arbitration_fee,
                ..params(delivery_fee)
            };
            let a = FundingAmounts::new(&p, &fees);
            proptest::prop_assert!(a.amount >= fees.dust_threshold);
            proptest::prop_assert!(a.service_fee >= fees.dust_threshold);
            proptest::prop_assert!(a.arbitration_fee >= fees.dust_threshold);
            proptest::prop_assert!(a.delivery_fee == 0 || a.delivery_fee >= fees.token_dust_threshold);
            proptest::prop_assert_eq!(
                a.funding_sats().unwrap(),
                a.amount + a.service_fee + a.arbitration_fee + a.delivery_fee + fees.settlement_fee
            );
        }
    }
}
