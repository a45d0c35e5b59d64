//! # Input Files
//!
//! JSON documents the CLI reads: an escrow or fee pool description (terms
//! plus the compiler's report for the contract) and UTXO lists.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use escrow_contracts::contract::{CompiledContract, PrecompiledContract};
use escrow_contracts::escrow::{ContractVersion, Escrow, EscrowParameters};
use escrow_contracts::fee_pool::{FeePool, FeePoolParameters};
use escrow_protocol::config::Config;
use escrow_protocol::transaction::Utxo;

/// An escrow as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowFile {
    pub params: EscrowParameters,
    #[serde(default)]
    pub version: ContractVersion,
    pub contract: CompiledContract,
}

impl EscrowFile {
    pub fn into_escrow(self, config: &Config) -> Result<Escrow> {
        let compiler = PrecompiledContract::new(self.contract);
        Escrow::new(self.params, self.version, &compiler, config).context("invalid escrow")
    }
}

/// A fee pool as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolFile {
    pub params: FeePoolParameters,
    pub contract: CompiledContract,
}

impl PoolFile {
    pub fn into_pool(self, config: &Config) -> Result<FeePool> {
        let compiler = PrecompiledContract::new(self.contract);
        FeePool::new(self.params, &compiler, config).context("invalid fee pool")
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn read_utxos(path: &Path) -> Result<Vec<Utxo>> {
    read_json(path)
}

/// Loads the engine configuration, falling back to the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

/// Parses a 20-byte public key hash from hex.
pub fn parse_pkh(hex_str: &str) -> Result<[u8; 20]> {
    let bytes = hex::decode(hex_str.trim()).context("public key hash is not valid hex")?;
    <[u8; 20]>::try_from(bytes.as_slice())
        .map_err(|_| anyhow!("public key hash must be 20 bytes, got {}", bytes.len()))
}

/// Parses a 32-byte token category from hex.
pub fn parse_category(hex_str: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_str.trim()).context("category is not valid hex")?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| anyhow!("category must be 32 bytes, got {}", bytes.len()))
}
