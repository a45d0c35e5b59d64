//! Draft transactions and their finalization.
//!
//! A [`DraftTransaction`] is the mutable working copy the assembler and the
//! funder operate on: each input is a UTXO plus an [`UnlockingTemplate`]
//! describing how to spend it. [`DraftTransaction::finalize`] turns the
//! draft into a signed [`Transaction`]; it is called once per fee estimate
//! and once more at the end, and produces the same bytes every time.
//!
//! [`DraftBuilder`] is the fluent way to put a draft together:
//!
//! ```rust,no_run
//! use escrow_protocol::crypto::SigningKey;
//! use escrow_protocol::script::Destination;
//! use escrow_protocol::transaction::{DraftBuilder, UnlockingTemplate, Utxo};
//!
//! let key = SigningKey::from_bytes(&[7; 32]).unwrap();
//! let draft = DraftBuilder::new()
//!     .input(Utxo::new([1; 32], 0, 50_000), UnlockingTemplate::P2pkh { key: key.clone() })
//!     .pay(&Destination::for_key(&key), 40_000)
//!     .build();
//! let tx = draft.finalize().unwrap();
//! ```

use super::encoding::{EncodingError, Transaction, TxInput};
use super::sighash::signature_hash;
use super::types::{TokenData, TxOutput, Utxo};
use crate::config::{DEFAULT_SEQUENCE, SIGHASH_ALL_FORKID, TX_LOCKTIME, TX_VERSION};
use crate::crypto::SigningKey;
use crate::script::{p2pkh_locking_bytecode, push_data, push_int, Destination};

// ---------------------------------------------------------------------------
// Unlocking templates
// ---------------------------------------------------------------------------

/// A contract function argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptArg {
    /// Raw bytes (public keys, hashes, bytecode).
    Bytes(Vec<u8>),
    /// Script number.
    Int(i64),
    /// A signature by this key over the spending transaction, produced at
    /// finalization with the redeem script as covered bytecode.
    Signature(SigningKey),
}

/// How an input is unlocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockingTemplate {
    /// Standard P2PKH: `<sig> <pubkey>`.
    P2pkh { key: SigningKey },
    /// P2SH contract call: arguments in reverse order, the function selector
    /// when the contract has more than one function, then the redeem script.
    Contract {
        redeem_script: Vec<u8>,
        selector: Option<u32>,
        args: Vec<ScriptArg>,
    },
    /// Precomputed unlocking bytecode, used as-is.
    Bytecode(Vec<u8>),
    /// No way to unlock this input. Finalization fails.
    Missing,
}

impl UnlockingTemplate {
    /// Produces unlocking bytecode for input `index` of `tx`, which spends
    /// `spent`. `tx` must already carry its final outputs.
    pub fn unlocking_bytecode(
        &self,
        tx: &Transaction,
        index: usize,
        spent: &Utxo,
    ) -> Result<Vec<u8>, EncodingError> {
        match self {
            UnlockingTemplate::P2pkh { key } => {
                let script_code = p2pkh_locking_bytecode(&key.pubkey_hash());
                let signature = sign_input(tx, index, spent, &script_code, key)?;
                let mut script = Vec::with_capacity(signature.len() + 35);
                push_data(&mut script, &signature);
                push_data(&mut script, &key.public_key());
                Ok(script)
            }
            UnlockingTemplate::Contract {
                redeem_script,
                selector,
                args,
            } => {
                let mut script = Vec::with_capacity(redeem_script.len() + 128);
                for arg in args.iter().rev() {
                    match arg {
                        ScriptArg::Bytes(bytes) => push_data(&mut script, bytes),
                        ScriptArg::Int(n) => push_int(&mut script, *n),
                        ScriptArg::Signature(key) => {
                            let signature = sign_input(tx, index, spent, redeem_script, key)?;
                            push_data(&mut script, &signature);
                        }
                    }
                }
                if let Some(selector) = selector {
                    push_int(&mut script, i64::from(*selector));
                }
                push_data(&mut script, redeem_script);
                Ok(script)
            }
            UnlockingTemplate::Bytecode(bytes) => Ok(bytes.clone()),
            UnlockingTemplate::Missing => Err(EncodingError::MissingUnlocking {
                index,
                outpoint: spent.outpoint,
            }),
        }
    }
}

/// DER signature with the `SIGHASH_ALL | FORKID` byte appended.
fn sign_input(
    tx: &Transaction,
    index: usize,
    spent: &Utxo,
    script_code: &[u8],
    key: &SigningKey,
) -> Result<Vec<u8>, EncodingError> {
    let digest = signature_hash(tx, index, spent, script_code, SIGHASH_ALL_FORKID)?;
    let mut signature = key.sign_digest(digest);
    signature.push(SIGHASH_ALL_FORKID);
    Ok(signature)
}

// ---------------------------------------------------------------------------
// DraftTransaction
// ---------------------------------------------------------------------------

/// An input under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftInput {
    pub utxo: Utxo,
    pub unlocking: UnlockingTemplate,
    pub sequence: u32,
}

/// A transaction under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftTransaction {
    pub version: u32,
    pub locktime: u32,
    pub inputs: Vec<DraftInput>,
    pub outputs: Vec<TxOutput>,
}

impl Default for DraftTransaction {
    fn default() -> Self {
        Self::new()
    }
}

impl DraftTransaction {
    pub fn new() -> Self {
        Self {
            version: TX_VERSION,
            locktime: TX_LOCKTIME,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Appends an input with the default final sequence.
    pub fn add_input(&mut self, utxo: Utxo, unlocking: UnlockingTemplate) {
        self.inputs.push(DraftInput {
            utxo,
            unlocking,
            sequence: DEFAULT_SEQUENCE,
        });
    }

    pub fn add_output(&mut self, output: TxOutput) {
        self.outputs.push(output);
    }

    /// Appends a plain output paying `value` to `destination`.
    pub fn pay(&mut self, destination: &Destination, value: u64) {
        self.add_output(TxOutput::new(destination.locking_bytecode(), value));
    }

    /// Appends a token-carrying output.
    pub fn pay_token(&mut self, destination: &Destination, value: u64, token: TokenData) {
        self.add_output(TxOutput::new(destination.locking_bytecode(), value).with_token(token));
    }

    /// Sum of the values of the UTXOs being spent.
    pub fn total_input_value(&self) -> Result<u64, EncodingError> {
        self.inputs
            .iter()
            .try_fold(0u64, |acc, i| acc.checked_add(i.utxo.value_satoshis))
            .ok_or(EncodingError::ValueOverflow { side: "input" })
    }

    /// Sum of the declared output values.
    pub fn total_output_value(&self) -> Result<u64, EncodingError> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.value_satoshis))
            .ok_or(EncodingError::ValueOverflow { side: "output" })
    }

    /// Builds and signs the final transaction.
    ///
    /// Output token data is checked against the consensus rules first, then
    /// every input's template runs against the unsigned transaction.
    /// Signatures do not cover unlocking bytecode, so input order of
    /// signing does not matter.
    pub fn finalize(&self) -> Result<Transaction, EncodingError> {
        for (index, output) in self.outputs.iter().enumerate() {
            if let Some(token) = &output.token {
                token
                    .check()
                    .map_err(|reason| EncodingError::InvalidToken { index, reason })?;
            }
        }

        let mut tx = Transaction {
            version: self.version,
            inputs: self
                .inputs
                .iter()
                .map(|input| TxInput {
                    outpoint: input.utxo.outpoint,
                    unlocking_bytecode: Vec::new(),
                    sequence: input.sequence,
                })
                .collect(),
            outputs: self.outputs.clone(),
            locktime: self.locktime,
        };

        let unlocking = self
            .inputs
            .iter()
            .enumerate()
            .map(|(index, input)| input.unlocking.unlocking_bytecode(&tx, index, &input.utxo))
            .collect::<Result<Vec<_>, _>>()?;
        for (input, bytecode) in tx.inputs.iter_mut().zip(unlocking) {
            input.unlocking_bytecode = bytecode;
        }
        Ok(tx)
    }

    /// Length of the finalized transaction in bytes.
    pub fn serialized_size(&self) -> Result<usize, EncodingError> {
        Ok(self.finalize()?.size())
    }
}

// ---------------------------------------------------------------------------
// DraftBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`DraftTransaction`].
///
/// Defaults: version 2, lock time 0, final sequence on every input.
#[derive(Debug, Default)]
pub struct DraftBuilder {
    draft: DraftTransaction,
}

impl DraftBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: u32) -> Self {
        self.draft.version = version;
        self
    }

    pub fn locktime(mut self, locktime: u32) -> Self {
        self.draft.locktime = locktime;
        self
    }

    pub fn input(mut self, utxo: Utxo, unlocking: UnlockingTemplate) -> Self {
        self.draft.add_input(utxo, unlocking);
        self
    }

    /// Adds several inputs sharing one template.
    pub fn inputs<I>(mut self, utxos: I, unlocking: &UnlockingTemplate) -> Self
    where
        I: IntoIterator<Item = Utxo>,
    {
        for utxo in utxos {
            self.draft.add_input(utxo, unlocking.clone());
        }
        self
    }

    pub fn output(mut self, output: TxOutput) -> Self {
        self.draft.add_output(output);
        self
    }

    pub fn pay(mut self, destination: &Destination, value: u64) -> Self {
        self.draft.pay(destination, value);
        self
    }

    pub fn pay_token(mut self, destination: &Destination, value: u64, token: TokenData) -> Self {
        self.draft.pay_token(destination, value, token);
        self
    }

    pub fn build(self) -> DraftTransaction {
        self.draft
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::verify_signature;
    use crate::script::opcodes::{OP_1, OP_CHECKSIG};
    use crate::transaction::types::NftCapability;

    fn key(byte: u8) -> SigningKey {
        SigningKey::from_bytes(&[byte; 32]).unwrap()
    }

    fn funded_draft() -> DraftTransaction {
        let k = key(1);
        DraftBuilder::new()
            .input(
                Utxo::new([0xaa; 32], 0, 20_000),
                UnlockingTemplate::P2pkh { key: k.clone() },
            )
            .pay(&Destination::PubkeyHash([0x42; 20]), 15_000)
            .build()
    }

    #[test]
    fn builder_defaults() {
        let draft = DraftBuilder::new().build();
        assert_eq!(draft.version, 2);
        assert_eq!(draft.locktime, 0);
        assert!(draft.inputs.is_empty());
    }

    #[test]
    fn finalize_is_deterministic() {
        let draft = funded_draft();
        let first = draft.finalize().unwrap();
        let second = draft.finalize().unwrap();
        assert_eq!(first.encode(), second.encode());
    }

    #[test]
    fn p2pkh_signature_verifies() {
        let k = key(1);
        let draft = funded_draft();
        let tx = draft.finalize().unwrap();
        let unlocking = &tx.inputs[0].unlocking_bytecode;

        // <len> <der ‖ 0x41> <33> <pubkey>
        let sig_len = unlocking[0] as usize;
        let sig = &unlocking[1..1 + sig_len];
        assert_eq!(*sig.last().unwrap(), SIGHASH_ALL_FORKID);
        assert_eq!(unlocking[1 + sig_len], 33);
        assert_eq!(&unlocking[2 + sig_len..], &k.public_key());

        let digest = signature_hash(
            &tx,
            0,
            &draft.inputs[0].utxo,
            &p2pkh_locking_bytecode(&k.pubkey_hash()),
            SIGHASH_ALL_FORKID,
        )
        .unwrap();
        assert!(verify_signature(
            &k.public_key(),
            digest,
            &sig[..sig.len() - 1]
        ));
    }

    #[test]
    fn contract_unlocking_pushes_args_reversed_then_selector_then_redeem() {
        let redeem = vec![OP_1, OP_CHECKSIG];
        let template = UnlockingTemplate::Contract {
            redeem_script: redeem.clone(),
            selector: Some(1),
            args: vec![ScriptArg::Bytes(vec![0xaa, 0xbb]), ScriptArg::Int(1_000)],
        };
        let draft = DraftBuilder::new()
            .input(Utxo::new([3; 32], 0, 5_000), template)
            .build();
        let tx = draft.finalize().unwrap();
        assert_eq!(
            tx.inputs[0].unlocking_bytecode,
            vec![0x02, 0xe8, 0x03, 0x02, 0xaa, 0xbb, OP_1, 0x02, OP_1, OP_CHECKSIG]
        );
    }

    #[test]
    fn contract_signature_covers_redeem_script() {
        let k = key(4);
        let redeem = vec![OP_1, OP_1, OP_CHECKSIG];
        let draft = DraftBuilder::new()
            .input(
                Utxo::new([3; 32], 0, 5_000),
                UnlockingTemplate::Contract {
                    redeem_script: redeem.clone(),
                    selector: None,
                    args: vec![ScriptArg::Signature(k.clone())],
                },
            )
            .build();
        let tx = draft.finalize().unwrap();
        let unlocking = &tx.inputs[0].unlocking_bytecode;
        let sig_len = unlocking[0] as usize;
        let der = &unlocking[1..sig_len];
        let digest =
            signature_hash(&tx, 0, &draft.inputs[0].utxo, &redeem, SIGHASH_ALL_FORKID).unwrap();
        assert!(verify_signature(&k.public_key(), digest, der));
        // No selector: the redeem script push follows the signature directly.
        assert_eq!(unlocking[1 + sig_len], redeem.len() as u8);
    }

    #[test]
    fn missing_template_fails_finalize() {
        let mut draft = funded_draft();
        draft.add_input(Utxo::new([0xbb; 32], 2, 1), UnlockingTemplate::Missing);
        assert!(matches!(
            draft.finalize(),
            Err(EncodingError::MissingUnlocking { index: 1, .. })
        ));
    }

    #[test]
    fn invalid_output_token_fails_finalize() {
        let mut draft = funded_draft();
        draft.pay_token(
            &Destination::PubkeyHash([1; 20]),
            1_000,
            TokenData::nft([5; 32], NftCapability::None, vec![0; 41]),
        );
        assert!(matches!(
            draft.finalize(),
            Err(EncodingError::InvalidToken { index: 1, .. })
        ));
    }

    #[test]
    fn totals() {
        let draft = funded_draft();
        assert_eq!(draft.total_input_value().unwrap(), 20_000);
        assert_eq!(draft.total_output_value().unwrap(), 15_000);

        let mut overflowing = draft.clone();
        overflowing.pay(&Destination::PubkeyHash([0; 20]), u64::MAX);
        assert!(matches!(
            overflowing.total_output_value(),
            Err(EncodingError::ValueOverflow { side: "output" })
        ));
    }

    #[test]
    fn bytecode_template_is_verbatim() {
        let draft = DraftBuilder::new()
            .input(
                Utxo::new([3; 32], 0, 5_000),
                UnlockingTemplate::Bytecode(vec![0x51]),
            )
            .build();
        assert_eq!(draft.finalize().unwrap().inputs[0].unlocking_bytecode, vec![0x51]);
    }
}
