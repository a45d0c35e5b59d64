//! Assembler tests that are not specific to one contract: request
//! validation, the sweep fee policy, minting NFT genesis and transfer, and
//! the summary every assembly reports.

mod common;

use common::*;
use escrow_contracts::assembler::{
    AssemblyError, AssemblySummary, Assembler, CreateMintingRequest, FundRequest, SweepRequest,
    TransferMintingRequest,
};
use escrow_protocol::config::Config;
use escrow_protocol::script::Destination;
use escrow_protocol::transaction::{
    FeeRate, FundingError, FundingUtxo, NftCapability, TokenData, Transaction, Utxo,
};

fn summary_matches(tx: &Transaction, summary: &AssemblySummary) {
    let outputs: u64 = tx.outputs.iter().map(|o| o.value_satoshis).sum();
    assert_eq!(summary.total_output, outputs);
    assert_eq!(summary.fee, summary.total_input - summary.total_output);
}

#[test]
fn fund_request_rejects_token_coins_and_empty_lists() {
    let escrow = escrow(0);
    let mut tokened = coins(&[10_000]);
    tokened[0].utxo = tokened[0].utxo.clone().with_token(TokenData::nft(
        [1; 32],
        NftCapability::None,
        vec![],
    ));
    assert!(matches!(
        FundRequest::new(&escrow, tokened, change()),
        Err(AssemblyError::InvalidRequest(_))
    ));
    assert!(matches!(
        FundRequest::new(&escrow, Vec::new(), change()),
        Err(AssemblyError::InvalidRequest(_))
    ));
}

#[test]
fn fund_shortfall_surfaces_insufficient_funds() {
    let escrow = escrow(0);
    let err = Assembler::default()
        .fund_escrow(FundRequest::new(&escrow, coins(&[1_000, 2_000]), change()).unwrap())
        .unwrap_err();
    assert!(matches!(
        err,
        AssemblyError::Funding(FundingError::InsufficientFunds { available: 3_000, .. })
    ));
}

#[test]
fn fund_summary_is_consistent() {
    let escrow = escrow(0);
    let assembled = Assembler::default()
        .fund_escrow(FundRequest::new(&escrow, coins(&[100_000]), change()).unwrap())
        .unwrap();
    summary_matches(&assembled.transaction, &assembled.summary);
    assert_eq!(assembled.summary.total_input, 100_000);
    assert_eq!(assembled.transaction.outputs.len(), 2);
    assert_eq!(assembled.txid_hex(), assembled.transaction.txid_hex());
    assert_eq!(
        Transaction::from_hex(&assembled.hex()).unwrap(),
        assembled.transaction
    );
}

#[test]
fn higher_fee_rate_costs_more() {
    let escrow = escrow(0);
    let mut config = Config::default();
    config.fees.fee_rate = FeeRate::per_byte(3);
    let cheap = Assembler::default()
        .fund_escrow(FundRequest::new(&escrow, coins(&[100_000]), change()).unwrap())
        .unwrap();
    let dear = Assembler::new(config)
        .fund_escrow(FundRequest::new(&escrow, coins(&[100_000]), change()).unwrap())
        .unwrap();
    assert!(dear.summary.fee > cheap.summary.fee);
}

// ---------------------------------------------------------------------------
// Sweep
// ---------------------------------------------------------------------------

#[test]
fn sweep_pays_everything_but_the_measured_fee() {
    let escrow = escrow(0);
    let utxos = vec![Utxo::new([1; 32], 0, 5_000), Utxo::new([2; 32], 1, 8_000)];
    let recipient = Destination::PubkeyHash([0x33; 20]);
    let assembled = Assembler::default()
        .sweep(SweepRequest::new(&escrow, utxos, recipient.clone()).unwrap())
        .unwrap();

    let tx = &assembled.transaction;
    assert_eq!(tx.inputs.len(), 2);
    assert_eq!(tx.outputs.len(), 1);
    assert_eq!(tx.outputs[0].locking_bytecode, recipient.locking_bytecode());
    // Priced on the provisional build; re-signing may shift each DER
    // signature by a byte or two.
    let measured = FeeRate::default().fee_for_size(tx.size());
    assert!(assembled.summary.fee.abs_diff(measured) <= 5);
    assert_eq!(tx.outputs[0].value_satoshis, 13_000 - assembled.summary.fee);
}

#[test]
fn sweep_of_dust_fails() {
    let escrow = escrow(0);
    let err = Assembler::default()
        .sweep(
            SweepRequest::new(&escrow, vec![Utxo::new([1; 32], 0, 700)], Destination::PubkeyHash([1; 20]))
                .unwrap(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        AssemblyError::Funding(FundingError::InsufficientFunds { available: 700, .. })
    ));
    assert!(SweepRequest::new(&escrow, Vec::new(), Destination::PubkeyHash([1; 20])).is_err());
}

// ---------------------------------------------------------------------------
// Minting NFT genesis and transfer
// ---------------------------------------------------------------------------

#[test]
fn create_minting_nfts_take_genesis_categories() {
    let wallet_coins = coins(&[5_000, 5_000, 50_000]);
    let genesis_txids = [wallet_coins[0].utxo.outpoint.txid, wallet_coins[1].utxo.outpoint.txid];
    let recipient = Destination::PubkeyHash([0x44; 20]);
    let assembled = Assembler::default()
        .create_minting(CreateMintingRequest::new(wallet_coins, 2, recipient, change()).unwrap())
        .unwrap();

    let tx = &assembled.transaction;
    for (output, txid) in tx.outputs.iter().zip(genesis_txids) {
        let token = output.token.as_ref().unwrap();
        assert_eq!(token.category, txid);
        assert_eq!(token.capability(), Some(NftCapability::Minting));
        assert!(token.commitment().is_empty());
        assert_eq!(output.value_satoshis, 1_000);
    }
    assert_eq!(tx.inputs[0].outpoint.txid, genesis_txids[0]);
    summary_matches(tx, &assembled.summary);
}

#[test]
fn create_minting_requires_output_zero_genesis() {
    let mut wallet_coins = coins(&[5_000, 5_000]);
    wallet_coins[0].utxo.outpoint.index = 2;
    assert!(CreateMintingRequest::new(wallet_coins, 1, change(), change()).is_err());
    assert!(CreateMintingRequest::new(coins(&[5_000]), 2, change(), change()).is_err());
    assert!(CreateMintingRequest::new(coins(&[5_000]), 0, change(), change()).is_err());
}

#[test]
fn transfer_minting_moves_token_unchanged() {
    let token = TokenData::nft([0x5a; 32], NftCapability::Minting, vec![7, 0, 0]);
    let minting = FundingUtxo::p2pkh(Utxo::new([9; 32], 4, 1_000).with_token(token.clone()), &wallet());
    let recipient = Destination::PubkeyHash([0x55; 20]);
    let assembled = Assembler::default()
        .transfer_minting(
            TransferMintingRequest::new(minting, coins(&[3_000]), recipient.clone(), change())
                .unwrap(),
        )
        .unwrap();

    let out = &assembled.transaction.outputs[0];
    assert_eq!(out.token.as_ref(), Some(&token));
    assert_eq!(out.locking_bytecode, recipient.locking_bytecode());
    assert_eq!(assembled.transaction.inputs.len(), 2);
}

#[test]
fn transfer_rejects_non_minting_token() {
    let plain = FundingUtxo::p2pkh(Utxo::new([9; 32], 0, 1_000), &wallet());
    assert!(TransferMintingRequest::new(plain, Vec::new(), change(), change()).is_err());
}
