// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Escrow CLI
//!
//! Entry point for the `escrow-cli` binary. Parses CLI arguments, loads the
//! engine configuration, initializes logging and runs one subcommand:
//!
//! - `decode-tx`         decode raw transaction hex into JSON
//! - `validate-funding`  check a funding transaction against an escrow
//! - `validate-refund`   check a refund against an escrow
//! - `validate-release`  check a release against an escrow
//! - `fund-escrow`       assemble and sign an escrow funding transaction
//! - `release`           release a funded escrow to the seller
//! - `refund`            refund a funded escrow to the buyer
//! - `sweep`             move stray escrow coins to one address
//! - `mint`              mint the next fee pool key NFT
//! - `claim`             claim a lock NFT with its key NFT
//! - `return-minting`    hand the pool's minting NFT back to the owner
//! - `create-minting`    create fresh minting NFTs
//! - `transfer-minting`  move a wallet-held minting NFT
//! - `version`           print build version information
//!
//! Results go to stdout as JSON. A rejected validation exits non-zero.

mod cli;
mod input;
mod logging;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;

use escrow_contracts::assembler::{
    AssembledTransaction, AssemblySummary, Assembler, ClaimRequest, CreateMintingRequest,
    FundRequest, MintRequest, RefundRequest, ReleaseRequest, ReturnRequest, SweepRequest,
    TransferMintingRequest,
};
use escrow_protocol::config::Config;
use escrow_protocol::crypto::SigningKey;
use escrow_protocol::script::Destination;
use escrow_protocol::transaction::{FundingUtxo, NftCapability, Transaction, Utxo};

use cli::{Commands, EscrowCli};
use input::{
    load_config, parse_category, parse_pkh, read_json, read_utxos, EscrowFile, PoolFile,
};

fn main() -> Result<()> {
    let cli = EscrowCli::parse();
    logging::init_logging(logging::DEFAULT_FILTER, cli.log_format);

    let config = load_config(cli.config.as_deref())?;
    tracing::debug!(fee_rate = %config.fees.fee_rate, "configuration loaded");

    match cli.command {
        Commands::DecodeTx(args) => decode_tx(&args.tx),
        Commands::ValidateFunding(args) => validate(&config, args, Validation::Funding),
        Commands::ValidateRefund(args) => validate(&config, args, Validation::Refund),
        Commands::ValidateRelease(args) => validate(&config, args, Validation::Release),
        Commands::FundEscrow(args) => fund_escrow(config, args),
        Commands::Release(args) => settle(config, args, Settlement::Release),
        Commands::Refund(args) => settle(config, args, Settlement::Refund),
        Commands::Sweep(args) => sweep(config, args),
        Commands::Mint(args) => mint(config, args),
        Commands::Claim(args) => claim(config, args),
        Commands::ReturnMinting(args) => return_minting(config, args),
        Commands::CreateMinting(args) => create_minting(config, args),
        Commands::TransferMinting(args) => transfer_minting(config, args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{out}");
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DecodedTransaction {
    txid: String,
    size: usize,
    #[serde(flatten)]
    transaction: Transaction,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidationReport {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    contract_output: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AssemblyReport {
    txid: String,
    hex: String,
    size: usize,
    summary: AssemblySummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_nft_id: Option<u64>,
}

impl AssemblyReport {
    fn new(assembled: &AssembledTransaction) -> Self {
        Self {
            txid: assembled.txid_hex(),
            hex: assembled.hex(),
            size: assembled.transaction.size(),
            summary: assembled.summary,
            key_nft_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn decode_tx(tx_hex: &str) -> Result<()> {
    let transaction = Transaction::from_hex(tx_hex.trim()).context("failed to decode transaction")?;
    print_json(&DecodedTransaction {
        txid: transaction.txid_hex(),
        size: transaction.size(),
        transaction,
    })
}

#[derive(Debug, Clone, Copy)]
enum Validation {
    Funding,
    Refund,
    Release,
}

fn validate(config: &Config, args: cli::ValidateArgs, kind: Validation) -> Result<()> {
    let escrow = read_json::<EscrowFile>(&args.escrow)?.into_escrow(config)?;
    let tx_hex = args.tx.trim();

    let outcome = match kind {
        Validation::Funding => escrow.validate_funding_hex(tx_hex).map(Some),
        Validation::Refund => escrow.validate_refund_hex(tx_hex).map(|()| None),
        Validation::Release => escrow.validate_release_hex(tx_hex).map(|()| None),
    };

    match outcome {
        Ok(contract_output) => print_json(&ValidationReport {
            valid: true,
            contract_output,
            error: None,
        }),
        Err(err) => {
            print_json(&ValidationReport {
                valid: false,
                contract_output: None,
                error: Some(err.to_string()),
            })?;
            bail!("{kind:?} transaction rejected")
        }
    }
}

/// Wraps wallet coins for P2PKH signing, skipping any that carry tokens.
fn wallet_coins(utxos: Vec<Utxo>, key: &SigningKey) -> Vec<FundingUtxo> {
    let total = utxos.len();
    let plain: Vec<Utxo> = utxos.into_iter().filter(|u| !u.has_token()).collect();
    if plain.len() < total {
        tracing::warn!(skipped = total - plain.len(), "ignoring token-bearing wallet coins");
    }
    FundingUtxo::p2pkh_all(plain, key)
}

fn signing_key(args: &cli::SignerArgs) -> Result<SigningKey> {
    SigningKey::from_hex(args.secret_key.trim()).context("invalid secret key")
}

/// `--*-pkh` when given, otherwise the signer's own P2PKH.
fn destination_or_signer(pkh: Option<&str>, key: &SigningKey) -> Result<Destination> {
    match pkh {
        Some(pkh) => Ok(Destination::PubkeyHash(parse_pkh(pkh)?)),
        None => Ok(Destination::for_key(key)),
    }
}

fn fund_escrow(config: Config, args: cli::FundEscrowArgs) -> Result<()> {
    let escrow = read_json::<EscrowFile>(&args.escrow)?.into_escrow(&config)?;
    let key = signing_key(&args.signer)?;
    let coins = wallet_coins(read_utxos(&args.utxos)?, &key);
    let change = Destination::PubkeyHash(parse_pkh(&args.change_pkh)?);

    tracing::info!(
        funding_sats = escrow.funding_sats(),
        coins = coins.len(),
        "funding escrow"
    );
    let assembled = Assembler::new(config)
        .fund_escrow(FundRequest::new(&escrow, coins, change)?)
        .context("failed to assemble funding transaction")?;
    print_json(&AssemblyReport::new(&assembled))
}

#[derive(Debug, Clone, Copy)]
enum Settlement {
    Release,
    Refund,
}

fn settle(config: Config, args: cli::SettleArgs, kind: Settlement) -> Result<()> {
    let escrow = read_json::<EscrowFile>(&args.escrow)?.into_escrow(&config)?;
    let escrow_utxos = read_utxos(&args.escrow_utxos)?;
    let utxo = escrow.find_funding_utxo(&escrow_utxos)?.clone();
    let key = signing_key(&args.signer)?;

    let assembler = Assembler::new(config);
    let assembled = match kind {
        Settlement::Release => assembler.release(ReleaseRequest::new(&escrow, utxo, key)?),
        Settlement::Refund => assembler.refund(RefundRequest::new(&escrow, utxo, key)?),
    }
    .with_context(|| format!("failed to assemble {kind:?} transaction"))?;
    print_json(&AssemblyReport::new(&assembled))
}

fn sweep(config: Config, args: cli::SweepArgs) -> Result<()> {
    let escrow = read_json::<EscrowFile>(&args.escrow)?.into_escrow(&config)?;
    let utxos: Vec<Utxo> = read_utxos(&args.escrow_utxos)?
        .into_iter()
        .filter(|u| !u.has_token())
        .collect();
    let recipient = Destination::PubkeyHash(parse_pkh(&args.recipient_pkh)?);

    let assembled = Assembler::new(config)
        .sweep(SweepRequest::new(&escrow, utxos, recipient)?)
        .context("failed to assemble sweep transaction")?;
    print_json(&AssemblyReport::new(&assembled))
}

fn mint(config: Config, args: cli::MintArgs) -> Result<()> {
    let pool = read_json::<PoolFile>(&args.pool)?.into_pool(&config)?;
    let pool_utxos = read_utxos(&args.pool_utxos)?;
    let minting = pool.find_minting_utxo(&pool_utxos)?.clone();

    let key = signing_key(&args.signer)?;
    let coins = wallet_coins(read_utxos(&args.utxos)?, &key);
    let recipient = Destination::PubkeyHash(parse_pkh(&args.recipient_pkh)?);
    let change = destination_or_signer(args.change_pkh.as_deref(), &key)?;

    let request = MintRequest::new(&pool, minting, args.amount, &recipient, coins, change)?;
    let next_id = request.next_id();
    tracing::info!(next_id, amount = args.amount, "minting key NFT");

    let assembled = Assembler::new(config)
        .mint(request)
        .context("failed to assemble mint transaction")?;
    print_json(&AssemblyReport {
        key_nft_id: Some(next_id),
        ..AssemblyReport::new(&assembled)
    })
}

fn claim(config: Config, args: cli::ClaimArgs) -> Result<()> {
    let pool = read_json::<PoolFile>(&args.pool)?.into_pool(&config)?;
    let pool_utxos = read_utxos(&args.pool_utxos)?;
    let key = signing_key(&args.signer)?;
    let recipient = destination_or_signer(args.recipient_pkh.as_deref(), &key)?;

    let request = read_utxos(&args.utxos)?
        .into_iter()
        .filter(|utxo| pool.key_nft_id(utxo).is_ok())
        .find_map(|key_nft| {
            ClaimRequest::new(&pool, key_nft, key.clone(), &pool_utxos, recipient.clone()).ok()
        })
        .context("no wallet key NFT matches a lock NFT in the pool")?;
    let id = request.id();
    tracing::info!(id, value = request.lock_utxo().value_satoshis, "claiming lock NFT");

    let assembled = Assembler::new(config)
        .claim(request)
        .context("failed to assemble claim transaction")?;
    print_json(&AssemblyReport {
        key_nft_id: Some(id),
        ..AssemblyReport::new(&assembled)
    })
}

fn return_minting(config: Config, args: cli::ReturnMintingArgs) -> Result<()> {
    let pool = read_json::<PoolFile>(&args.pool)?.into_pool(&config)?;
    let pool_utxos = read_utxos(&args.pool_utxos)?;
    let key = signing_key(&args.signer)?;
    let coins = match &args.utxos {
        Some(path) => wallet_coins(read_utxos(path)?, &key),
        None => Vec::new(),
    };
    let recipient = destination_or_signer(args.recipient_pkh.as_deref(), &key)?;
    let change = Destination::for_key(&key);

    let request = ReturnRequest::new(&pool, &pool_utxos, key, recipient, coins, change)?;
    let assembled = Assembler::new(config)
        .return_minting(request)
        .context("failed to assemble return transaction")?;
    print_json(&AssemblyReport::new(&assembled))
}

fn create_minting(config: Config, args: cli::CreateMintingArgs) -> Result<()> {
    let key = signing_key(&args.signer)?;
    let mut coins = wallet_coins(read_utxos(&args.utxos)?, &key);
    // Genesis needs output 0; stable, so caller order is kept otherwise.
    coins.sort_by_key(|coin| coin.utxo.outpoint.index != 0);
    let recipient = destination_or_signer(args.recipient_pkh.as_deref(), &key)?;
    let change = Destination::for_key(&key);

    let request = CreateMintingRequest::new(coins, args.count, recipient, change)?;
    let assembled = Assembler::new(config)
        .create_minting(request)
        .context("failed to assemble minting NFT genesis")?;
    print_json(&AssemblyReport::new(&assembled))
}

fn transfer_minting(config: Config, args: cli::TransferMintingArgs) -> Result<()> {
    let key = signing_key(&args.signer)?;
    let category = parse_category(&args.category)?;
    let (held, others): (Vec<Utxo>, Vec<Utxo>) =
        read_utxos(&args.utxos)?.into_iter().partition(|utxo| {
            utxo.nft_capability() == Some(NftCapability::Minting)
                && utxo.token.as_ref().map(|t| t.category) == Some(category)
        });
    let minting = held
        .into_iter()
        .next()
        .with_context(|| format!("no minting NFT of category {} in the wallet", args.category))?;
    let coins = wallet_coins(others, &key);
    let recipient = Destination::PubkeyHash(parse_pkh(&args.recipient_pkh)?);
    let change = Destination::for_key(&key);

    let request =
        TransferMintingRequest::new(FundingUtxo::p2pkh(minting, &key), coins, recipient, change)?;
    let assembled = Assembler::new(config)
        .transfer_minting(request)
        .context("failed to assemble minting NFT transfer")?;
    print_json(&AssemblyReport::new(&assembled))
}

fn print_version() {
    println!("escrow-cli {}", env!("CARGO_PKG_VERSION"));
    println!("tx format  v{}", escrow_protocol::config::TX_VERSION);
    println!("rustc      {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}
