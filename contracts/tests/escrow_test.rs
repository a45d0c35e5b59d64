//! Integration tests for the escrow contract.
//!
//! These drive the whole lifecycle the way a caller would: assemble the
//! funding leg from wallet coins, validate it, then settle by release or
//! refund and validate the settlement.

mod common;

use common::*;
use escrow_contracts::assembler::{Assembler, FundRequest, RefundRequest, ReleaseRequest};
use escrow_contracts::contract::ContractError;
use escrow_contracts::escrow::{
    ContractVersion, Escrow, EscrowError, OutputMismatch, ValidationError,
};
use escrow_protocol::commitment::RecordCommitment;
use escrow_protocol::config::Config;
use escrow_protocol::script::Destination;
use escrow_protocol::transaction::{
    NftCapability, Transaction, TxInput, TxOutput, Utxo,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn funded(escrow: &Escrow) -> (Transaction, Utxo) {
    let assembled = Assembler::default()
        .fund_escrow(FundRequest::new(escrow, coins(&[30_000, 40_000]), change()).unwrap())
        .unwrap();
    let tx = assembled.transaction;
    let utxo = Utxo::new(tx.txid(), 0, escrow.funding_sats());
    (tx, utxo)
}

fn unsigned(outputs: Vec<TxOutput>) -> Transaction {
    Transaction {
        version: 2,
        inputs: vec![TxInput {
            outpoint: Utxo::new([0xee; 32], 0, 0).outpoint,
            unlocking_bytecode: vec![0x51],
            sequence: 0xffff_ffff,
        }],
        outputs,
        locktime: 0,
    }
}

// ---------------------------------------------------------------------------
// Funding
// ---------------------------------------------------------------------------

#[test]
fn funding_sats_includes_fixed_fee() {
    assert_eq!(escrow(0).funding_sats(), 50_000 + 1_500 + 800 + 1_000);
    assert_eq!(escrow(2_000).funding_sats(), 50_000 + 1_500 + 800 + 2_000 + 1_000);
}

#[test]
fn assembled_funding_validates() {
    let escrow = escrow(0);
    let (tx, _) = funded(&escrow);
    assert_eq!(tx.outputs[0].locking_bytecode, escrow.contract().locking_bytecode());
    assert_eq!(escrow.validate_funding(&tx).unwrap(), 0);
    assert_eq!(escrow.validate_funding_hex(&tx.to_hex()).unwrap(), 0);
}

#[test]
fn funding_with_two_contract_outputs_rejected() {
    let escrow = escrow(0);
    let locking = escrow.contract().locking_bytecode();
    let tx = unsigned(vec![
        TxOutput::new(locking.clone(), escrow.funding_sats()),
        TxOutput::new(locking, escrow.funding_sats()),
    ]);
    assert!(matches!(
        escrow.validate_funding(&tx),
        Err(ValidationError::ContractOutputCount { found: 2 })
    ));
    assert!(matches!(
        escrow.validate_funding(&unsigned(vec![])),
        Err(ValidationError::ContractOutputCount { found: 0 })
    ));
}

#[test]
fn funding_with_wrong_value_rejected() {
    let escrow = escrow(0);
    let tx = unsigned(vec![
        TxOutput::new(Destination::PubkeyHash([9; 20]).locking_bytecode(), 700),
        TxOutput::new(escrow.contract().locking_bytecode(), escrow.funding_sats() - 1),
    ]);
    match escrow.validate_funding(&tx).unwrap_err() {
        ValidationError::FundingValue {
            index,
            expected,
            actual,
        } => {
            assert_eq!(index, 1);
            assert_eq!(expected, escrow.funding_sats());
            assert_eq!(actual, expected - 1);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn malformed_hex_reported() {
    let escrow = escrow(0);
    assert!(matches!(
        escrow.validate_funding_hex("zz"),
        Err(ValidationError::Malformed(_))
    ));
    assert!(matches!(
        escrow.validate_refund_hex("0200000001"),
        Err(ValidationError::Malformed(_))
    ));
}

#[test]
fn find_funding_utxo_by_value() {
    let escrow = escrow(0);
    let utxos = vec![
        Utxo::new([1; 32], 0, 1_234),
        Utxo::new([2; 32], 3, escrow.funding_sats()),
    ];
    assert_eq!(escrow.find_funding_utxo(&utxos).unwrap().outpoint.index, 3);
    assert!(matches!(
        escrow.find_funding_utxo(&utxos[..1]),
        Err(EscrowError::FundingUtxoNotFound { .. })
    ));
}

// ---------------------------------------------------------------------------
// Refund
// ---------------------------------------------------------------------------

#[test]
fn refund_pays_buyer_servicer_arbiter_in_order() {
    let escrow = escrow(0);
    let (_, utxo) = funded(&escrow);
    let assembled = Assembler::default()
        .refund(RefundRequest::new(&escrow, utxo, arbiter()).unwrap())
        .unwrap();

    let outputs = &assembled.transaction.outputs;
    assert_eq!(outputs.len(), 3);
    assert_eq!(outputs[0].value_satoshis, 50_000);
    assert_eq!(
        outputs[0].locking_bytecode,
        Destination::for_key(&buyer()).locking_bytecode()
    );
    assert_eq!(assembled.summary.fee, 1_000);
    escrow.validate_refund(&assembled.transaction).unwrap();
}

#[test]
fn refund_returns_delivery_fee_to_buyer() {
    let escrow = escrow(1_200);
    assert_eq!(escrow.refund_outputs()[0].value_satoshis, 51_200);
}

#[test]
fn refund_with_servicer_and_arbiter_swapped_rejected_per_index() {
    let escrow = escrow(0);
    let mut outputs = escrow.refund_outputs();
    outputs.swap(1, 2);
    let err = escrow.validate_refund(&unsigned(outputs)).unwrap_err();

    match err {
        ValidationError::Settlement {
            expected_count,
            actual_count,
            mismatches,
        } => {
            assert_eq!((expected_count, actual_count), (3, 3));
            let mut indices: Vec<usize> = mismatches.iter().map(OutputMismatch::index).collect();
            indices.dedup();
            assert_eq!(indices, vec![1, 2]);
            assert!(mismatches.contains(&OutputMismatch::Value {
                index: 1,
                expected: 1_500,
                actual: 800,
            }));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn refund_missing_output_reported() {
    let escrow = escrow(0);
    let mut outputs = escrow.refund_outputs();
    outputs.pop();
    match escrow.validate_refund(&unsigned(outputs)).unwrap_err() {
        ValidationError::Settlement { mismatches, .. } => {
            assert_eq!(mismatches, vec![OutputMismatch::Missing { index: 2 }]);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn only_arbiter_may_refund() {
    let escrow = escrow(0);
    let (_, utxo) = funded(&escrow);
    for key in [buyer(), seller(), servicer()] {
        let err = RefundRequest::new(&escrow, utxo.clone(), key).unwrap_err();
        assert!(err.to_string().contains("may not refund"), "{err}");
    }
}

// ---------------------------------------------------------------------------
// Release
// ---------------------------------------------------------------------------

#[test]
fn release_by_buyer_or_arbiter() {
    let escrow = escrow(0);
    let (_, utxo) = funded(&escrow);
    for key in [buyer(), arbiter()] {
        let assembled = Assembler::default()
            .release(ReleaseRequest::new(&escrow, utxo.clone(), key).unwrap())
            .unwrap();
        assert_eq!(assembled.transaction.outputs.len(), 3);
        assert_eq!(
            assembled.transaction.outputs[0].locking_bytecode,
            Destination::for_key(&seller()).locking_bytecode()
        );
        escrow.validate_release(&assembled.transaction).unwrap();
    }
    assert!(ReleaseRequest::new(&escrow, utxo, seller()).is_err());
}

#[test]
fn release_mints_delivery_lock_into_fee_pool() {
    let escrow = escrow(2_000);
    let (funding, utxo) = funded(&escrow);
    let assembled = Assembler::default()
        .release(ReleaseRequest::new(&escrow, utxo, buyer()).unwrap())
        .unwrap();

    let tx = &assembled.transaction;
    assert_eq!(tx.outputs.len(), 4);
    let lock = &tx.outputs[3];
    assert_eq!(lock.value_satoshis, 2_000);
    assert_eq!(lock.locking_bytecode, fee_pool().contract().locking_bytecode());
    let token = lock.token.as_ref().unwrap();
    assert_eq!(token.category, funding.txid());
    assert_eq!(token.capability(), Some(NftCapability::None));
    assert_eq!(
        RecordCommitment::from_bytes(token.commitment()).unwrap(),
        RecordCommitment::new(42, 2_000)
    );
    assert_eq!(assembled.summary.fee, 1_000);
    escrow.validate_release(tx).unwrap();
}

#[test]
fn release_without_lock_rejected_when_delivery_fee_applies() {
    let escrow = escrow(2_000);
    let (funding, _) = funded(&escrow);
    let mut outputs = escrow.release_outputs(funding.txid());
    outputs[3].token = None;
    let mut tx = unsigned(outputs);
    tx.inputs[0].outpoint.txid = funding.txid();
    match escrow.validate_release(&tx).unwrap_err() {
        ValidationError::Settlement { mismatches, .. } => {
            assert_eq!(mismatches, vec![OutputMismatch::Token { index: 3 }]);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn release_from_nonzero_output_cannot_mint_lock() {
    let escrow = escrow(2_000);
    let utxo = Utxo::new([3; 32], 1, escrow.funding_sats());
    assert!(ReleaseRequest::new(&escrow, utxo, buyer()).is_err());
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

#[test]
fn opcount_over_limit_fails_before_building() {
    let err = Escrow::new(
        escrow_params(0),
        ContractVersion::V2,
        &StubCompiler { opcount: 202 },
        &Config::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        EscrowError::Contract(ContractError::OpcountExceeded {
            opcount: 202,
            limit: 201,
            ..
        })
    ));
}

#[test]
fn delivery_fee_without_pool_rejected() {
    let mut params = escrow_params(1_500);
    params.fee_pool = None;
    assert!(matches!(
        Escrow::new(params.clone(), ContractVersion::V1, &StubCompiler::default(), &Config::default()),
        Err(EscrowError::MissingFeePool { delivery_fee: 1_500 })
    ));

    // Below token dust the fee is dropped, so no pool is needed.
    params.delivery_fee = 900;
    let escrow =
        Escrow::new(params, ContractVersion::V1, &StubCompiler::default(), &Config::default())
            .unwrap();
    assert_eq!(escrow.amounts().delivery_fee, 0);
}

#[test]
fn versions_compile_different_artifacts() {
    let v1 = Escrow::new(
        escrow_params(0),
        ContractVersion::V1,
        &StubCompiler::default(),
        &Config::default(),
    )
    .unwrap();
    assert_eq!(v1.contract().name(), "escrow");
    assert_eq!(escrow(0).contract().name(), "escrow-v2");
}

#[test]
fn funding_is_deterministic() {
    let escrow = escrow(0);
    let (a, _) = funded(&escrow);
    let (b, _) = funded(&escrow);
    assert_eq!(a.encode(), b.encode());
}
