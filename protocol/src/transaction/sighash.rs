//! Signature hashing for `SIGHASH_ALL | SIGHASH_FORKID`.
//!
//! The digest follows the BIP-143 layout adopted by the chain at its fork,
//! with the CashTokens amendment: when the spent output carries a token, its
//! token prefix is inserted immediately before the covered bytecode, and
//! `hashOutputs` covers each output's token prefix as part of the output.
//!
//! ```text
//! version ‖ hashPrevouts ‖ hashSequence ‖ outpoint ‖ [token prefix]
//!   ‖ len scriptCode ‖ scriptCode ‖ value ‖ sequence ‖ hashOutputs
//!   ‖ locktime ‖ sighashType:u32le
//! ```

use super::encoding::{
    write_outpoint, write_output, write_token_prefix, write_var_bytes, EncodingError, Transaction,
};
use super::types::Utxo;
use crate::crypto::double_sha256;

/// Builds the signing preimage for `input_index`.
///
/// `spent` is the output being spent (its value and token are committed
/// to); `script_code` is the bytecode the signature check runs under: the
/// P2PKH locking bytecode for wallet inputs, the redeem script for P2SH
/// contract inputs.
pub fn signature_preimage(
    tx: &Transaction,
    input_index: usize,
    spent: &Utxo,
    script_code: &[u8],
    sighash_type: u8,
) -> Result<Vec<u8>, EncodingError> {
    let input = tx
        .inputs
        .get(input_index)
        .ok_or_else(|| EncodingError::Signing {
            index: input_index,
            reason: format!("transaction has only {} inputs", tx.inputs.len()),
        })?;

    let mut prevouts = Vec::with_capacity(tx.inputs.len() * 36);
    let mut sequences = Vec::with_capacity(tx.inputs.len() * 4);
    for i in &tx.inputs {
        write_outpoint(&mut prevouts, &i.outpoint);
        sequences.extend_from_slice(&i.sequence.to_le_bytes());
    }
    let mut outputs = Vec::new();
    for o in &tx.outputs {
        write_output(&mut outputs, o);
    }

    let mut preimage = Vec::with_capacity(256 + script_code.len());
    preimage.extend_from_slice(&tx.version.to_le_bytes());
    preimage.extend_from_slice(&double_sha256(&prevouts));
    preimage.extend_from_slice(&double_sha256(&sequences));
    write_outpoint(&mut preimage, &input.outpoint);
    if let Some(token) = &spent.token {
        write_token_prefix(&mut preimage, token);
    }
    write_var_bytes(&mut preimage, script_code);
    preimage.extend_from_slice(&spent.value_satoshis.to_le_bytes());
    preimage.extend_from_slice(&input.sequence.to_le_bytes());
    preimage.extend_from_slice(&double_sha256(&outputs));
    preimage.extend_from_slice(&tx.locktime.to_le_bytes());
    preimage.extend_from_slice(&u32::from(sighash_type).to_le_bytes());
    Ok(preimage)
}

/// Double SHA-256 of [`signature_preimage`]; the digest that gets signed.
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    spent: &Utxo,
    script_code: &[u8],
    sighash_type: u8,
) -> Result<[u8; 32], EncodingError> {
    let preimage = signature_preimage(tx, input_index, spent, script_code, sighash_type)?;
    Ok(double_sha256(&preimage))
}
