//! # Fee Pool
//!
//! An NFT sequencer. The pool contract holds a single minting NFT of the
//! key category whose commitment is the last id handed out. Minting spends
//! it and produces:
//!
//! - a replacement minting NFT carrying `lastId + 1`, back to the pool;
//! - a capability-`none` key NFT carrying `nextId ‖ amount` to the recipient.
//!
//! Lock NFTs carrying `id ‖ value` collect in the pool. Whoever holds the
//! key NFT for an id can claim the lock NFT with the same leading id field,
//! taking its satoshis. The owner can take the minting NFT and any plain
//! pool coins back.
//!
//! Sequence ids are stored least-significant byte first. The minting width
//! is configurable; decoding accepts any width so pools created with a
//! different setting keep working.

use escrow_protocol::commitment::{
    decode_fixed_width, decode_sequence_id, encode_sequence_id, CommitmentError, RecordCommitment,
};
use escrow_protocol::config::{Config, COMMITMENT_FIELD_WIDTH};
use escrow_protocol::crypto::SigningKey;
use escrow_protocol::script::Destination;
use escrow_protocol::transaction::{
    NftCapability, ScriptArg, TokenData, TxOutput, UnlockingTemplate, Utxo,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::contract::{ContractCompiler, ContractError, ContractInstance};

pub const FEE_POOL_ARTIFACT: &str = "fee-pool";

pub const FN_MINT_KEY_NFT: &str = "mintKeyNft";
pub const FN_CLAIM: &str = "claim";
pub const FN_OWNER: &str = "owner";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FeePoolError {
    /// A token is not of the pool's key category.
    #[error("token category mismatch: expected {expected}, got {actual}")]
    CategoryMismatch { expected: String, actual: String },

    /// A token has the right category but the wrong capability.
    #[error("expected a {expected} NFT, got {actual}")]
    CapabilityMismatch {
        expected: NftCapability,
        actual: String,
    },

    /// No lock NFT in the pool carries this id.
    #[error("no lock NFT with id {id} in the fee pool")]
    NotFound { id: u64 },

    #[error("no minting NFT of category {category} among the pool UTXOs")]
    MintingUtxoNotFound { category: String },

    #[error("mint amount must be greater than zero")]
    InvalidAmount,

    /// The key does not belong to the pool owner.
    #[error("key {pubkey_hash} is not the fee pool owner")]
    Unauthorized { pubkey_hash: String },

    /// The key NFT is locked to someone other than the signing key.
    #[error("key NFT {outpoint} is not held by key {pubkey_hash}")]
    NotKeyHolder { outpoint: String, pubkey_hash: String },

    #[error(transparent)]
    Commitment(#[from] CommitmentError),

    #[error(transparent)]
    Contract(#[from] ContractError),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeePoolParameters {
    #[serde(with = "hex::serde")]
    pub owner_pk_hash: [u8; 20],
    /// Category of the minting, key and lock NFTs, display order.
    #[serde(rename = "keyNftCategoryId", with = "hex::serde")]
    pub key_nft_category: [u8; 32],
}

/// The two outputs a mint produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintPlan {
    /// Id held by the consumed minting NFT.
    pub last_id: u64,
    /// Id issued by this mint.
    pub next_id: u64,
    /// Replacement minting NFT, paid back to the pool.
    pub minting_output: TxOutput,
    /// Key NFT, paid to the recipient.
    pub key_output: TxOutput,
}

// ---------------------------------------------------------------------------
// FeePool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FeePool {
    params: FeePoolParameters,
    contract: ContractInstance,
    minting_id_width: usize,
    token_output_value: u64,
}

impl FeePool {
    pub fn new(
        params: FeePoolParameters,
        compiler: &dyn ContractCompiler,
        config: &Config,
    ) -> Result<Self, FeePoolError> {
        let contract = ContractInstance::compile(
            compiler,
            FEE_POOL_ARTIFACT,
            &creation_args(&params),
            &config.limits,
        )?;
        Ok(Self {
            params,
            contract,
            minting_id_width: config.commitments.minting_id_width,
            token_output_value: config.fees.token_output_value,
        })
    }

    pub fn params(&self) -> &FeePoolParameters {
        &self.params
    }

    pub fn contract(&self) -> &ContractInstance {
        &self.contract
    }

    pub fn destination(&self) -> &Destination {
        self.contract.destination()
    }

    fn check_token(&self, utxo: &Utxo, capability: NftCapability) -> Result<(), FeePoolError> {
        let category = utxo.token.as_ref().map(|t| t.category);
        if category != Some(self.params.key_nft_category) {
            return Err(FeePoolError::CategoryMismatch {
                expected: hex::encode(self.params.key_nft_category),
                actual: category.map_or_else(|| "no token".into(), hex::encode),
            });
        }
        let actual = utxo.nft_capability();
        if actual != Some(capability) {
            return Err(FeePoolError::CapabilityMismatch {
                expected: capability,
                actual: actual.map_or_else(|| "fungible-only token".into(), |c| c.to_string()),
            });
        }
        Ok(())
    }

    fn key_token(&self, capability: NftCapability, commitment: Vec<u8>) -> TokenData {
        TokenData::nft(self.params.key_nft_category, capability, commitment)
    }

    /// The pool's minting NFT among `utxos`.
    pub fn find_minting_utxo<'a>(&self, utxos: &'a [Utxo]) -> Result<&'a Utxo, FeePoolError> {
        utxos
            .iter()
            .find(|utxo| self.check_token(utxo, NftCapability::Minting).is_ok())
            .ok_or_else(|| FeePoolError::MintingUtxoNotFound {
                category: hex::encode(self.params.key_nft_category),
            })
    }

    /// Reads the minting NFT and lays out the next mint.
    pub fn plan_mint(
        &self,
        minting_utxo: &Utxo,
        amount: u64,
        recipient: &Destination,
    ) -> Result<MintPlan, FeePoolError> {
        if amount == 0 {
            return Err(FeePoolError::InvalidAmount);
        }
        self.check_token(minting_utxo, NftCapability::Minting)?;

        let commitment = minting_utxo
            .token
            .as_ref()
            .map(TokenData::commitment)
            .unwrap_or_default();
        let last_id = decode_sequence_id(commitment)?;
        let next_id = last_id.checked_add(1).ok_or(CommitmentError::Range {
            value: u128::from(last_id) + 1,
            width: self.minting_id_width,
        })?;

        let minting_output = TxOutput::new(self.contract.locking_bytecode(), self.token_output_value)
            .with_token(self.key_token(
                NftCapability::Minting,
                encode_sequence_id(next_id, self.minting_id_width)?,
            ));
        let key_output = TxOutput::new(recipient.locking_bytecode(), self.token_output_value)
            .with_token(self.key_token(
                NftCapability::None,
                RecordCommitment::new(next_id, amount).to_bytes(),
            ));

        debug!(last_id, next_id, amount, "planned key NFT mint");
        Ok(MintPlan {
            last_id,
            next_id,
            minting_output,
            key_output,
        })
    }

    /// The id a key NFT proves ownership of.
    pub fn key_nft_id(&self, key_nft: &Utxo) -> Result<u64, FeePoolError> {
        self.check_token(key_nft, NftCapability::None)?;
        let commitment = key_nft
            .token
            .as_ref()
            .map(TokenData::commitment)
            .unwrap_or_default();
        Ok(RecordCommitment::from_bytes(commitment)?.id)
    }

    /// The pool-held lock NFT whose leading id field equals `id`.
    pub fn find_claimable<'a>(&self, pool_utxos: &'a [Utxo], id: u64) -> Result<&'a Utxo, FeePoolError> {
        pool_utxos
            .iter()
            .find(|utxo| {
                if self.check_token(utxo, NftCapability::None).is_err() {
                    return false;
                }
                let commitment = utxo.token.as_ref().map(TokenData::commitment).unwrap_or_default();
                commitment
                    .get(..COMMITMENT_FIELD_WIDTH)
                    .and_then(|field| decode_fixed_width(field, COMMITMENT_FIELD_WIDTH).ok())
                    == Some(u128::from(id))
            })
            .ok_or(FeePoolError::NotFound { id })
    }

    pub fn authorize_owner(&self, key: &SigningKey) -> Result<(), FeePoolError> {
        let pkh = key.pubkey_hash();
        if pkh != self.params.owner_pk_hash {
            return Err(FeePoolError::Unauthorized {
                pubkey_hash: hex::encode(pkh),
            });
        }
        Ok(())
    }

    /// Checks the signing key can spend the key NFT. A UTXO reported
    /// without its locking bytecode passes; the chain has the final say.
    pub fn authorize_key_holder(&self, key_nft: &Utxo, key: &SigningKey) -> Result<(), FeePoolError> {
        match &key_nft.locking_bytecode {
            Some(locking) if *locking != Destination::for_key(key).locking_bytecode() => {
                Err(FeePoolError::NotKeyHolder {
                    outpoint: key_nft.outpoint.to_string(),
                    pubkey_hash: hex::encode(key.pubkey_hash()),
                })
            }
            _ => Ok(()),
        }
    }

    /// `mintKeyNft()`.
    pub fn mint_call(&self) -> Result<UnlockingTemplate, FeePoolError> {
        Ok(self.contract.function_call(FN_MINT_KEY_NFT, Vec::new())?)
    }

    /// `claim()`.
    pub fn claim_call(&self) -> Result<UnlockingTemplate, FeePoolError> {
        Ok(self.contract.function_call(FN_CLAIM, Vec::new())?)
    }

    /// `owner(pubkey, sig)` after checking the key.
    pub fn owner_call(&self, key: &SigningKey) -> Result<UnlockingTemplate, FeePoolError> {
        self.authorize_owner(key)?;
        Ok(self.contract.function_call(
            FN_OWNER,
            vec![
                ScriptArg::Bytes(key.public_key().to_vec()),
                ScriptArg::Signature(key.clone()),
            ],
        )?)
    }
}

/// Constructor arguments: owner hash, then the key category in wire order.
pub fn creation_args(params: &FeePoolParameters) -> Vec<ScriptArg> {
    let mut category = params.key_nft_category;
    category.reverse();
    vec![
        ScriptArg::Bytes(params.owner_pk_hash.to_vec()),
        ScriptArg::Bytes(category.to_vec()),
    ]
}
