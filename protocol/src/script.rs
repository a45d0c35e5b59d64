//! # Script Helpers
//!
//! Just enough script construction to pay and spend the outputs this system
//! deals with: minimal data pushes, script-number encoding, P2PKH and P2SH20
//! locking bytecode, and the [`Destination`] type used wherever an output
//! needs a recipient.
//!
//! Contract bytecode itself is compiled elsewhere; the only contract script
//! built here is the unlocking side (see
//! [`crate::transaction::builder::UnlockingTemplate`]).

use serde::{Deserialize, Serialize};

use crate::crypto::{hash160, SigningKey};

/// Opcodes referenced by the builders.
pub mod opcodes {
    pub const OP_0: u8 = 0x00;
    pub const OP_PUSHDATA1: u8 = 0x4c;
    pub const OP_PUSHDATA2: u8 = 0x4d;
    pub const OP_PUSHDATA4: u8 = 0x4e;
    pub const OP_1NEGATE: u8 = 0x4f;
    pub const OP_1: u8 = 0x51;
    pub const OP_16: u8 = 0x60;
    pub const OP_DUP: u8 = 0x76;
    pub const OP_EQUAL: u8 = 0x87;
    pub const OP_EQUALVERIFY: u8 = 0x88;
    pub const OP_HASH160: u8 = 0xa9;
    pub const OP_CHECKSIG: u8 = 0xac;
}

use opcodes::*;

/// Appends the minimal push of `data` to `script`.
///
/// Empty data and single bytes 1..=16 and 0x81 use their dedicated opcodes;
/// everything else uses the shortest length-prefixed form.
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    match data {
        [] => script.push(OP_0),
        [n @ 1..=16] => script.push(OP_1 + n - 1),
        [0x81] => script.push(OP_1NEGATE),
        _ => {
            let len = data.len();
            if len <= 75 {
                script.push(len as u8);
            } else if len <= 0xff {
                script.push(OP_PUSHDATA1);
                script.push(len as u8);
            } else if len <= 0xffff {
                script.push(OP_PUSHDATA2);
                script.extend_from_slice(&(len as u16).to_le_bytes());
            } else {
                script.push(OP_PUSHDATA4);
                script.extend_from_slice(&(len as u32).to_le_bytes());
            }
            script.extend_from_slice(data);
        }
    }
}

/// Encodes an integer as a minimally-encoded script number: little-endian
/// magnitude with the sign in the top bit of the last byte. Zero is empty.
pub fn script_number(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut out = Vec::with_capacity(9);
    while magnitude > 0 {
        out.push((magnitude & 0xff) as u8);
        magnitude >>= 8;
    }
    // Last byte is non-empty here; the sign needs a spare top bit.
    if let Some(last) = out.last_mut() {
        if *last & 0x80 != 0 {
            out.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            *last |= 0x80;
        }
    }
    out
}

/// Appends the minimal push of a script number.
pub fn push_int(script: &mut Vec<u8>, value: i64) {
    push_data(script, &script_number(value));
}

/// `OP_DUP OP_HASH160 <pkh> OP_EQUALVERIFY OP_CHECKSIG`
pub fn p2pkh_locking_bytecode(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    push_data(&mut script, pubkey_hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

/// `OP_HASH160 <script hash> OP_EQUAL`
pub fn p2sh20_locking_bytecode(script_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(23);
    script.push(OP_HASH160);
    push_data(&mut script, script_hash);
    script.push(OP_EQUAL);
    script
}

/// Where an output pays.
///
/// Address strings are a presentation concern handled outside this crate;
/// everything here works on the hashes they encode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "hash", rename_all = "camelCase")]
pub enum Destination {
    /// P2PKH, by public-key hash.
    PubkeyHash(#[serde(with = "hex::serde")] [u8; 20]),
    /// P2SH20, by redeem-script hash.
    ScriptHash(#[serde(with = "hex::serde")] [u8; 20]),
    /// Arbitrary locking bytecode.
    Bytecode(#[serde(with = "hex::serde")] Vec<u8>),
}

impl Destination {
    /// P2PKH destination for the holder of `key`.
    pub fn for_key(key: &SigningKey) -> Self {
        Destination::PubkeyHash(key.pubkey_hash())
    }

    /// P2SH20 destination for a redeem script.
    pub fn for_redeem_script(redeem_script: &[u8]) -> Self {
        Destination::ScriptHash(hash160(redeem_script))
    }

    /// The locking bytecode an output paying this destination carries.
    pub fn locking_bytecode(&self) -> Vec<u8> {
        match self {
            Destination::PubkeyHash(hash) => p2pkh_locking_bytecode(hash),
            Destination::ScriptHash(hash) => p2sh20_locking_bytecode(hash),
            Destination::Bytecode(bytes) => bytes.clone(),
        }
    }
}
