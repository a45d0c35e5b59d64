//! Wire codec for transactions with CashTokens token prefixes.
//!
//! ```text
//! tx      = version:u32le  count  input*  count  output*  locktime:u32le
//! input   = txid:32 (reversed)  index:u32le  len unlocking  sequence:u32le
//! output  = value:u64le  len (prefix ‖ locking)  [prefix]  locking
//! prefix  = 0xef  category:32 (reversed)  bitfield  [len commitment]  [amount]
//! ```
//!
//! `count`, `len` and `amount` are CompactSize integers. The bitfield flags
//! are `0x40` has-commitment, `0x20` has-NFT, `0x10` has-amount, with the
//! NFT capability in the low nibble. `0x80` is reserved and must be clear.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{Nft, NftCapability, Outpoint, TokenData, TxOutput};
use crate::crypto::double_sha256;

/// First byte of a token prefix inside an output's script field.
pub const TOKEN_PREFIX: u8 = 0xef;

const HAS_COMMITMENT_LENGTH: u8 = 0x40;
const HAS_NFT: u8 = 0x20;
const HAS_AMOUNT: u8 = 0x10;
const RESERVED_BIT: u8 = 0x80;
const CAPABILITY_MASK: u8 = 0x0f;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures while serializing, deserializing or signing a transaction.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// An input has no way to produce its unlocking bytecode.
    #[error("input {index} ({outpoint}) has no unlocking template")]
    MissingUnlocking {
        index: usize,
        outpoint: Outpoint,
    },

    /// A contract signature argument could not be produced.
    #[error("cannot sign input {index}: {reason}")]
    Signing { index: usize, reason: String },

    /// Token data that may not appear on chain.
    #[error("invalid token data on output {index}: {reason}")]
    InvalidToken { index: usize, reason: String },

    /// The sum of input or output values overflowed.
    #[error("total {side} value overflows u64")]
    ValueOverflow { side: &'static str },

    /// Ran out of bytes while decoding.
    #[error("truncated data: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    /// Bytes left over after a complete transaction.
    #[error("{remaining} trailing bytes after transaction")]
    TrailingBytes { remaining: usize },

    /// A CompactSize integer was not in its shortest form.
    #[error("non-canonical compact size at offset {offset}")]
    NonCanonicalCompactSize { offset: usize },

    /// A token prefix that fails the decoding rules.
    #[error("invalid token prefix at offset {offset}: {reason}")]
    InvalidTokenPrefix { offset: usize, reason: String },

    /// Input was not hex.
    #[error("invalid transaction hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A signed (or at least complete) transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInput {
    pub outpoint: Outpoint,
    #[serde(with = "hex::serde")]
    pub unlocking_bytecode: Vec<u8>,
    pub sequence: u32,
}

/// A complete transaction, ready to serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub locktime: u32,
}

impl Transaction {
    /// Serializes to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.inputs.len() * 150 + self.outputs.len() * 80);
        buf.extend_from_slice(&self.version.to_le_bytes());
        write_compact_size(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            write_outpoint(&mut buf, &input.outpoint);
            write_var_bytes(&mut buf, &input.unlocking_bytecode);
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_compact_size(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            write_output(&mut buf, output);
        }
        buf.extend_from_slice(&self.locktime.to_le_bytes());
        buf
    }

    /// Lowercase hex of [`Transaction::encode`].
    pub fn to_hex(&self) -> String {
        hex::encode(self.encode())
    }

    /// Serialized length in bytes.
    pub fn size(&self) -> usize {
        self.encode().len()
    }

    /// Transaction id in display order.
    pub fn txid(&self) -> [u8; 32] {
        let mut hash = double_sha256(&self.encode());
        hash.reverse();
        hash
    }

    pub fn txid_hex(&self) -> String {
        hex::encode(self.txid())
    }

    /// Parses wire bytes. The whole slice must be consumed.
    pub fn decode(bytes: &[u8]) -> Result<Self, EncodingError> {
        let mut reader = Reader::new(bytes);
        let version = reader.u32_le()?;

        let input_count = reader.compact_size()?;
        let mut inputs = Vec::new();
        for _ in 0..input_count {
            let outpoint = reader.outpoint()?;
            let unlocking_bytecode = reader.var_bytes()?.to_vec();
            let sequence = reader.u32_le()?;
            inputs.push(TxInput {
                outpoint,
                unlocking_bytecode,
                sequence,
            });
        }

        let output_count = reader.compact_size()?;
        let mut outputs = Vec::new();
        for _ in 0..output_count {
            outputs.push(reader.output()?);
        }

        let locktime = reader.u32_le()?;
        if reader.remaining() > 0 {
            return Err(EncodingError::TrailingBytes {
                remaining: reader.remaining(),
            });
        }

        Ok(Self {
            version,
            inputs,
            outputs,
            locktime,
        })
    }

    pub fn from_hex(s: &str) -> Result<Self, EncodingError> {
        Self::decode(&hex::decode(s.trim())?)
    }
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

/// Appends a CompactSize integer.
pub fn write_compact_size(buf: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(0xfd);
        buf.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(0xfe);
        buf.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        buf.push(0xff);
        buf.extend_from_slice(&n.to_le_bytes());
    }
}

/// Appends a CompactSize length followed by the bytes.
pub fn write_var_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    write_compact_size(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Appends an outpoint: reversed txid, then index.
pub fn write_outpoint(buf: &mut Vec<u8>, outpoint: &Outpoint) {
    buf.extend(outpoint.txid.iter().rev());
    buf.extend_from_slice(&outpoint.index.to_le_bytes());
}

/// Appends the token prefix for `token`.
pub fn write_token_prefix(buf: &mut Vec<u8>, token: &TokenData) {
    buf.push(TOKEN_PREFIX);
    buf.extend(token.category.iter().rev());

    let mut bitfield = 0u8;
    let commitment = token.commitment();
    if let Some(nft) = &token.nft {
        bitfield |= HAS_NFT | nft.capability.to_bits();
        if !commitment.is_empty() {
            bitfield |= HAS_COMMITMENT_LENGTH;
        }
    }
    if token.amount > 0 {
        bitfield |= HAS_AMOUNT;
    }
    buf.push(bitfield);

    if bitfield & HAS_COMMITMENT_LENGTH != 0 {
        write_var_bytes(buf, commitment);
    }
    if bitfield & HAS_AMOUNT != 0 {
        write_compact_size(buf, token.amount);
    }
}

/// Token prefix bytes alone, empty when there is no token.
pub fn token_prefix_bytes(token: Option<&TokenData>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(token) = token {
        write_token_prefix(&mut buf, token);
    }
    buf
}

/// Appends an output: value, then the length-prefixed token prefix and
/// locking bytecode.
pub fn write_output(buf: &mut Vec<u8>, output: &TxOutput) {
    buf.extend_from_slice(&output.value_satoshis.to_le_bytes());
    let mut script = token_prefix_bytes(output.token.as_ref());
    script.extend_from_slice(&output.locking_bytecode);
    write_var_bytes(buf, &script);
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], EncodingError> {
        if self.remaining() < n {
            return Err(EncodingError::Truncated {
                offset: self.pos,
                needed: n,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, EncodingError> {
        Ok(self.take(1)?[0])
    }

    fn u32_le(&mut self) -> Result<u32, EncodingError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64_le(&mut self) -> Result<u64, EncodingError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn reversed_hash(&mut self) -> Result<[u8; 32], EncodingError> {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(self.take(32)?);
        hash.reverse();
        Ok(hash)
    }

    fn compact_size(&mut self) -> Result<u64, EncodingError> {
        let offset = self.pos;
        let (value, min) = match self.u8()? {
            0xfd => {
                let mut buf = [0u8; 2];
                buf.copy_from_slice(self.take(2)?);
                (u64::from(u16::from_le_bytes(buf)), 0xfd)
            }
            0xfe => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(self.take(4)?);
                (u64::from(u32::from_le_bytes(buf)), 0x1_0000)
            }
            0xff => (self.u64_le()?, 0x1_0000_0000),
            n => return Ok(u64::from(n)),
        };
        if value < min {
            return Err(EncodingError::NonCanonicalCompactSize { offset });
        }
        Ok(value)
    }

    fn var_bytes(&mut self) -> Result<&'a [u8], EncodingError> {
        let offset = self.pos;
        let len = self.compact_size()?;
        let len = usize::try_from(len).map_err(|_| EncodingError::Truncated {
            offset,
            needed: usize::MAX,
        })?;
        self.take(len)
    }

    fn outpoint(&mut self) -> Result<Outpoint, EncodingError> {
        let txid = self.reversed_hash()?;
        let index = self.u32_le()?;
        Ok(Outpoint { txid, index })
    }

    fn output(&mut self) -> Result<TxOutput, EncodingError> {
        let value_satoshis = self.u64_le()?;
        let script = self.var_bytes()?;
        let script_start = self.pos - script.len();

        if script.first() != Some(&TOKEN_PREFIX) {
            return Ok(TxOutput::new(script.to_vec(), value_satoshis));
        }

        let mut inner = Reader::new(script);
        let (token, consumed) =
            read_token_prefix(&mut inner).map_err(|err| shift_offset(err, script_start))?;
        Ok(TxOutput {
            value_satoshis,
            locking_bytecode: script[consumed..].to_vec(),
            token: Some(token),
        })
    }
}

fn read_token_prefix(reader: &mut Reader<'_>) -> Result<(TokenData, usize), EncodingError> {
    let invalid = |offset: usize, reason: &str| EncodingError::InvalidTokenPrefix {
        offset,
        reason: reason.to_string(),
    };

    reader.u8()?;
    let category = reader.reversed_hash()?;
    let bitfield_offset = reader.pos;
    let bitfield = reader.u8()?;

    if bitfield & RESERVED_BIT != 0 {
        return Err(invalid(bitfield_offset, "reserved bit set"));
    }
    let has_nft = bitfield & HAS_NFT != 0;
    let has_commitment = bitfield & HAS_COMMITMENT_LENGTH != 0;
    let has_amount = bitfield & HAS_AMOUNT != 0;
    let capability = NftCapability::from_bits(bitfield & CAPABILITY_MASK)
        .ok_or_else(|| invalid(bitfield_offset, "unknown capability"))?;

    if !has_nft && (has_commitment || capability != NftCapability::None) {
        return Err(invalid(bitfield_offset, "NFT fields without the NFT flag"));
    }
    if !has_nft && !has_amount {
        return Err(invalid(bitfield_offset, "token with neither NFT nor amount"));
    }

    let commitment = if has_commitment {
        let offset = reader.pos;
        let bytes = reader.var_bytes()?;
        if bytes.is_empty() {
            return Err(invalid(offset, "zero-length commitment with length flag"));
        }
        bytes.to_vec()
    } else {
        Vec::new()
    };

    let amount = if has_amount {
        let offset = reader.pos;
        let amount = reader.compact_size()?;
        if amount == 0 || amount > i64::MAX as u64 {
            return Err(invalid(offset, "fungible amount out of range"));
        }
        amount
    } else {
        0
    };

    let token = TokenData {
        category,
        amount,
        nft: has_nft.then(|| Nft::new(capability, commitment)),
    };
    token
        .check()
        .map_err(|reason| invalid(bitfield_offset, &reason))?;
    Ok((token, reader.pos))
}

fn shift_offset(err: EncodingError, base: usize) -> EncodingError {
    match err {
        EncodingError::Truncated { offset, needed } => EncodingError::Truncated {
            offset: offset + base,
            needed,
        },
        EncodingError::NonCanonicalCompactSize { offset } => {
            EncodingError::NonCanonicalCompactSize {
                offset: offset + base,
            }
        }
        EncodingError::InvalidTokenPrefix { offset, reason } => {
            EncodingError::InvalidTokenPrefix {
                offset: offset + base,
                reason,
            }
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
