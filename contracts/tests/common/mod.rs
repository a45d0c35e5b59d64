//! Shared fixtures for the contract integration tests.
//!
//! [`StubCompiler`] stands in for the external contract compiler: it packs
//! the constructor arguments into a script so different parameters give
//! different contract addresses, and reports whatever opcount it was told.

#![allow(dead_code)]

use escrow_contracts::contract::{CompiledContract, ContractCompiler, ContractError};
use escrow_contracts::escrow::{ContractVersion, Escrow, EscrowParameters};
use escrow_contracts::fee_pool::{FeePool, FeePoolParameters};
use escrow_protocol::config::Config;
use escrow_protocol::crypto::SigningKey;
use escrow_protocol::script::opcodes::OP_1;
use escrow_protocol::script::{push_data, push_int, Destination};
use escrow_protocol::transaction::{FundingUtxo, ScriptArg, Utxo};

pub struct StubCompiler {
    pub opcount: usize,
}

impl Default for StubCompiler {
    fn default() -> Self {
        Self { opcount: 150 }
    }
}

impl ContractCompiler for StubCompiler {
    fn compile(&self, artifact: &str, args: &[ScriptArg]) -> Result<CompiledContract, ContractError> {
        let functions: &[&str] = match artifact {
            "escrow" | "escrow-v2" => &["release", "refund", "doNothing"],
            "fee-pool" => &["mintKeyNft", "claim", "owner"],
            other => return Err(ContractError::Compiler(format!("unknown artifact {other}"))),
        };
        let mut script = Vec::new();
        for arg in args.iter().rev() {
            match arg {
                ScriptArg::Bytes(bytes) => push_data(&mut script, bytes),
                ScriptArg::Int(n) => push_int(&mut script, *n),
                ScriptArg::Signature(_) => {
                    return Err(ContractError::Compiler("signature in constructor".into()))
                }
            }
        }
        script.push(OP_1);
        Ok(CompiledContract {
            name: artifact.to_string(),
            bytesize: script.len(),
            redeem_script: script,
            opcount: self.opcount,
            functions: functions.iter().map(|f| f.to_string()).collect(),
        })
    }
}

pub fn key(byte: u8) -> SigningKey {
    SigningKey::from_bytes(&[byte; 32]).unwrap()
}

pub fn buyer() -> SigningKey {
    key(0x11)
}

pub fn seller() -> SigningKey {
    key(0x12)
}

pub fn servicer() -> SigningKey {
    key(0x13)
}

pub fn arbiter() -> SigningKey {
    key(0x14)
}

pub fn pool_owner() -> SigningKey {
    key(0x15)
}

pub fn wallet() -> SigningKey {
    key(0x16)
}

pub const KEY_CATEGORY: [u8; 32] = [0xc4; 32];

pub fn escrow_params(delivery_fee: u64) -> EscrowParameters {
    EscrowParameters {
        buyer_pk_hash: buyer().pubkey_hash(),
        seller_pk_hash: seller().pubkey_hash(),
        servicer_pk_hash: servicer().pubkey_hash(),
        arbiter_pk_hash: arbiter().pubkey_hash(),
        fee_pool: Some(fee_pool().destination().clone()),
        amount: 50_000,
        service_fee: 1_500,
        arbitration_fee: 800,
        delivery_fee,
        lock_nft_id: 42,
        timestamp: 1_735_689_600,
    }
}

pub fn escrow(delivery_fee: u64) -> Escrow {
    Escrow::new(
        escrow_params(delivery_fee),
        ContractVersion::V2,
        &StubCompiler::default(),
        &Config::default(),
    )
    .unwrap()
}

pub fn fee_pool_params() -> FeePoolParameters {
    FeePoolParameters {
        owner_pk_hash: pool_owner().pubkey_hash(),
        key_nft_category: KEY_CATEGORY,
    }
}

pub fn fee_pool() -> FeePool {
    FeePool::new(fee_pool_params(), &StubCompiler::default(), &Config::default()).unwrap()
}

/// Wallet coins with distinct txids, each at output 0.
pub fn coins(values: &[u64]) -> Vec<FundingUtxo> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| FundingUtxo::p2pkh(Utxo::new([0xa0 + i as u8; 32], 0, *v), &wallet()))
        .collect()
}

pub fn change() -> Destination {
    Destination::for_key(&wallet())
}
