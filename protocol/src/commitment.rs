//! # NFT Commitment Codec
//!
//! NFT commitments are opaque bytes on chain. The contracts treat them as
//! one or more fixed-width unsigned integers, each stored least-significant
//! byte first (the big-endian encoding, zero-padded on the left, then
//! byte-reversed). That is the layout the script `OP_BIN2NUM` family reads,
//! minus the sign bit, which the widths used here never reach.
//!
//! Layouts in use:
//!
//! | commitment | fields |
//! |---|---|
//! | fee-pool minting NFT | `id` (configurable width, default 20) |
//! | fee-pool key / lock NFT | `id` (20) ‖ `amount` (20) |
//! | escrow delivery lock | `lockNftId` (20) ‖ `deliveryFee` (20) |
//!
//! Values are carried as `u128` by the generic codec; the record helpers
//! narrow them to `u64` and report values that do not fit.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{COMMITMENT_FIELD_WIDTH, MAX_COMMITMENT_LENGTH};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced while packing or unpacking commitments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitmentError {
    /// The value needs more bytes than the field provides.
    #[error("value {value} does not fit in {width} bytes")]
    Range {
        /// The value that was being encoded or narrowed.
        value: u128,
        /// Width of the target field in bytes.
        width: usize,
    },

    /// The byte string does not have the expected length.
    #[error("commitment is {actual} bytes, expected {expected}")]
    Format {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },

    /// A field is wider than 16 bytes and its high bytes are not zero, so
    /// the value exceeds what the codec can represent.
    #[error("{width}-byte field holds a value wider than 128 bits")]
    Overflow {
        /// Width of the offending field.
        width: usize,
    },
}

// ---------------------------------------------------------------------------
// Fixed-width fields
// ---------------------------------------------------------------------------

/// Writes `value` little-endian into exactly `width` bytes, truncating or
/// zero-padding. Callers check the range first.
fn pad_le(value: u128, width: usize) -> Vec<u8> {
    let le = value.to_le_bytes();
    let mut out = vec![0u8; width];
    let n = width.min(le.len());
    out[..n].copy_from_slice(&le[..n]);
    out
}

/// Number of bytes needed to hold `value` (zero needs none).
fn significant_bytes(value: u128) -> usize {
    16 - (value.leading_zeros() as usize / 8)
}

/// Encodes `value` as a `width`-byte little-endian field.
///
/// # Errors
///
/// [`CommitmentError::Range`] if the value needs more than `width` bytes.
///
/// # Example
///
/// ```
/// use escrow_protocol::commitment::encode_fixed_width;
///
/// assert_eq!(encode_fixed_width(0x0102, 4).unwrap(), vec![0x02, 0x01, 0x00, 0x00]);
/// ```
pub fn encode_fixed_width(value: u128, width: usize) -> Result<Vec<u8>, CommitmentError> {
    if significant_bytes(value) > width {
        return Err(CommitmentError::Range { value, width });
    }
    Ok(pad_le(value, width))
}

/// Decodes a `width`-byte little-endian field.
///
/// # Errors
///
/// [`CommitmentError::Format`] if `bytes.len() != width`,
/// [`CommitmentError::Overflow`] if the value exceeds 128 bits.
pub fn decode_fixed_width(bytes: &[u8], width: usize) -> Result<u128, CommitmentError> {
    if bytes.len() != width {
        return Err(CommitmentError::Format {
            expected: width,
            actual: bytes.len(),
        });
    }
    decode_le(bytes)
}

fn decode_le(bytes: &[u8]) -> Result<u128, CommitmentError> {
    if bytes.iter().skip(16).any(|b| *b != 0) {
        return Err(CommitmentError::Overflow { width: bytes.len() });
    }
    let mut buf = [0u8; 16];
    let n = bytes.len().min(16);
    buf[..n].copy_from_slice(&bytes[..n]);
    Ok(u128::from_le_bytes(buf))
}

/// Concatenates several fixed-width fields, in order.
pub fn encode_fields(fields: &[(u128, usize)]) -> Result<Vec<u8>, CommitmentError> {
    let mut out = Vec::with_capacity(fields.iter().map(|(_, w)| w).sum());
    for &(value, width) in fields {
        out.extend(encode_fixed_width(value, width)?);
    }
    Ok(out)
}

/// Splits `bytes` into fields of the given widths and decodes each. The
/// widths must cover the commitment exactly.
pub fn decode_fields(bytes: &[u8], widths: &[usize]) -> Result<Vec<u128>, CommitmentError> {
    let expected: usize = widths.iter().sum();
    if bytes.len() != expected {
        return Err(CommitmentError::Format {
            expected,
            actual: bytes.len(),
        });
    }
    let mut offset = 0;
    let mut values = Vec::with_capacity(widths.len());
    for &width in widths {
        values.push(decode_fixed_width(&bytes[offset..offset + width], width)?);
        offset += width;
    }
    Ok(values)
}

fn narrow(value: u128, width: usize) -> Result<u64, CommitmentError> {
    u64::try_from(value).map_err(|_| CommitmentError::Range { value, width })
}

// ---------------------------------------------------------------------------
// Sequence ids
// ---------------------------------------------------------------------------

/// Decodes the sequence id held by a minting NFT.
///
/// Accepts any commitment length up to the protocol maximum, so pools
/// created with a different id width keep working. An empty commitment
/// (a freshly created minting NFT) decodes to 0.
pub fn decode_sequence_id(bytes: &[u8]) -> Result<u64, CommitmentError> {
    if bytes.len() > MAX_COMMITMENT_LENGTH {
        return Err(CommitmentError::Format {
            expected: MAX_COMMITMENT_LENGTH,
            actual: bytes.len(),
        });
    }
    narrow(decode_le(bytes)?, bytes.len())
}

/// Encodes a sequence id into a `width`-byte minting commitment.
pub fn encode_sequence_id(id: u64, width: usize) -> Result<Vec<u8>, CommitmentError> {
    encode_fixed_width(u128::from(id), width)
}

// ---------------------------------------------------------------------------
// Two-field records
// ---------------------------------------------------------------------------

const _: () = assert!(COMMITMENT_FIELD_WIDTH >= 16);

/// An `id ‖ value` commitment, two 20-byte fields.
///
/// Used for fee-pool key and lock NFTs (`id`, locked amount) and for the
/// escrow delivery lock NFT (`lockNftId`, delivery fee).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCommitment {
    pub id: u64,
    pub value: u64,
}

impl RecordCommitment {
    /// Total encoded length.
    pub const LENGTH: usize = COMMITMENT_FIELD_WIDTH * 2;

    pub fn new(id: u64, value: u64) -> Self {
        Self { id, value }
    }

    /// Packs the record. Infallible: both fields are wider than a `u64`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = pad_le(u128::from(self.id), COMMITMENT_FIELD_WIDTH);
        out.extend(pad_le(u128::from(self.value), COMMITMENT_FIELD_WIDTH));
        out
    }

    /// Unpacks a 40-byte record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CommitmentError> {
        let fields = decode_fields(bytes, &[COMMITMENT_FIELD_WIDTH, COMMITMENT_FIELD_WIDTH])?;
        Ok(Self {
            id: narrow(fields[0], COMMITMENT_FIELD_WIDTH)?,
            value: narrow(fields[1], COMMITMENT_FIELD_WIDTH)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
