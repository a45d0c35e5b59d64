//! Value types shared by the codec, the builder and the contract layer.
//!
//! Hashes (`transactionId`, `categoryId`) are stored in display order, the
//! way explorers and indexers print them. The wire codec reverses them.

use serde::{Deserialize, Serialize};

use crate::config::MAX_COMMITMENT_LENGTH;

// ---------------------------------------------------------------------------
// Outpoint
// ---------------------------------------------------------------------------

/// Reference to a transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outpoint {
    /// Transaction id, display order.
    #[serde(rename = "transactionId", with = "hex::serde")]
    pub txid: [u8; 32],
    #[serde(rename = "outputIndex")]
    pub index: u32,
}

impl std::fmt::Display for Outpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.index)
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// What the holder of an NFT may do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NftCapability {
    /// Immutable: commitment fixed forever.
    None,
    /// May be spent to one new NFT of the same category with any commitment.
    Mutable,
    /// May create any number of NFTs of its category.
    Minting,
}

impl NftCapability {
    /// Low nibble of the token prefix bitfield.
    pub fn to_bits(self) -> u8 {
        match self {
            NftCapability::None => 0x00,
            NftCapability::Mutable => 0x01,
            NftCapability::Minting => 0x02,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x00 => Some(NftCapability::None),
            0x01 => Some(NftCapability::Mutable),
            0x02 => Some(NftCapability::Minting),
            _ => None,
        }
    }
}

impl std::fmt::Display for NftCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NftCapability::None => write!(f, "none"),
            NftCapability::Mutable => write!(f, "mutable"),
            NftCapability::Minting => write!(f, "minting"),
        }
    }
}

/// Non-fungible part of a token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nft {
    pub capability: NftCapability,
    #[serde(default, with = "hex::serde")]
    pub commitment: Vec<u8>,
}

impl Nft {
    pub fn new(capability: NftCapability, commitment: Vec<u8>) -> Self {
        Self {
            capability,
            commitment,
        }
    }
}

/// Token data attached to an output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenData {
    /// Token category, display order.
    #[serde(rename = "categoryId", with = "hex::serde")]
    pub category: [u8; 32],
    /// Fungible amount; zero when the token is NFT-only.
    #[serde(rename = "fungibleAmount", default, skip_serializing_if = "is_zero")]
    pub amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nft: Option<Nft>,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl TokenData {
    /// An NFT-only token.
    pub fn nft(category: [u8; 32], capability: NftCapability, commitment: Vec<u8>) -> Self {
        Self {
            category,
            amount: 0,
            nft: Some(Nft::new(capability, commitment)),
        }
    }

    /// Capability of the NFT, if the token carries one.
    pub fn capability(&self) -> Option<NftCapability> {
        self.nft.as_ref().map(|nft| nft.capability)
    }

    /// Commitment of the NFT; empty when absent.
    pub fn commitment(&self) -> &[u8] {
        self.nft
            .as_ref()
            .map(|nft| nft.commitment.as_slice())
            .unwrap_or(&[])
    }

    /// Consensus rules for a token prefix, checked before encoding and
    /// after decoding. Returns a description of the first violation.
    pub fn check(&self) -> Result<(), String> {
        if self.amount > i64::MAX as u64 {
            return Err(format!("fungible amount {} exceeds i64::MAX", self.amount));
        }
        match &self.nft {
            None if self.amount == 0 => Err("token carries neither an NFT nor an amount".into()),
            Some(nft) if nft.commitment.len() > MAX_COMMITMENT_LENGTH => Err(format!(
                "commitment is {} bytes, maximum is {}",
                nft.commitment.len(),
                MAX_COMMITMENT_LENGTH
            )),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// UTXOs and outputs
// ---------------------------------------------------------------------------

/// An unspent output as reported by an indexer. Immutable snapshot; how it
/// is spent travels separately.
///
/// ```json
/// { "transactionId": "…", "outputIndex": 0, "valueSatoshis": 1000,
///   "token": { "categoryId": "…", "nft": { "capability": "minting", "commitment": "" } } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    #[serde(flatten)]
    pub outpoint: Outpoint,
    pub value_satoshis: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenData>,
    /// Locking bytecode of the output, when the source reports it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "hex_opt"
    )]
    pub locking_bytecode: Option<Vec<u8>>,
}

impl Utxo {
    pub fn new(txid: [u8; 32], index: u32, value_satoshis: u64) -> Self {
        Self {
            outpoint: Outpoint { txid, index },
            value_satoshis,
            token: None,
            locking_bytecode: None,
        }
    }

    pub fn with_locking_bytecode(mut self, locking_bytecode: Vec<u8>) -> Self {
        self.locking_bytecode = Some(locking_bytecode);
        self
    }

    pub fn with_token(mut self, token: TokenData) -> Self {
        self.token = Some(token);
        self
    }

    /// `true` when the output carries token data of any kind.
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Capability of the held NFT, if any.
    pub fn nft_capability(&self) -> Option<NftCapability> {
        self.token.as_ref().and_then(TokenData::capability)
    }
}

mod hex_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => s.serialize_str(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOutput {
    pub value_satoshis: u64,
    #[serde(with = "hex::serde")]
    pub locking_bytecode: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenData>,
}

impl TxOutput {
    pub fn new(locking_bytecode: Vec<u8>, value_satoshis: u64) -> Self {
        Self {
            value_satoshis,
            locking_bytecode,
            token: None,
        }
    }

    pub fn with_token(mut self, token: TokenData) -> Self {
        self.token = Some(token);
        self
    }
}
