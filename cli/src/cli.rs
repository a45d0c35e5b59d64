//! # CLI Interface
//!
//! Defines the command-line argument structure for `escrow-cli` using
//! `clap` derive. Every subcommand works from local files and hex strings;
//! nothing here talks to the network.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// Off-chain transaction engine for CashTokens escrows and fee pools.
///
/// Builds, signs and checks the transactions that fund an escrow, mint fee
/// pool key NFTs and settle contracts. Broadcasting is left to the caller.
#[derive(Parser, Debug)]
#[command(
    name = "escrow-cli",
    about = "Assemble and validate escrow and fee-pool transactions",
    version,
    propagate_version = true
)]
pub struct EscrowCli {
    /// Path to the engine configuration file (TOML).
    ///
    /// When omitted the built-in defaults are used.
    #[arg(long, short = 'c', global = true, env = "ESCROW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decode a raw transaction and print it as JSON.
    DecodeTx(DecodeTxArgs),
    /// Check that a transaction funds the escrow with exactly one output.
    ValidateFunding(ValidateArgs),
    /// Check that a transaction refunds the escrow to its parties.
    ValidateRefund(ValidateArgs),
    /// Check that a transaction releases the escrow to its parties.
    ValidateRelease(ValidateArgs),
    /// Assemble and sign the transaction that funds an escrow.
    FundEscrow(FundEscrowArgs),
    /// Release a funded escrow to the seller (buyer or arbiter key).
    Release(SettleArgs),
    /// Refund a funded escrow to the buyer (arbiter key).
    Refund(SettleArgs),
    /// Move every plain coin held by an escrow contract to one address.
    Sweep(SweepArgs),
    /// Mint the next key NFT from a fee pool.
    Mint(MintArgs),
    /// Claim the lock NFT matching a wallet-held key NFT.
    Claim(ClaimArgs),
    /// Return the pool's minting NFT and plain coins to the owner.
    ReturnMinting(ReturnMintingArgs),
    /// Create fresh minting NFTs, one category per genesis coin.
    CreateMinting(CreateMintingArgs),
    /// Move a wallet-held minting NFT to another address.
    TransferMinting(TransferMintingArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for `decode-tx`.
#[derive(Args, Debug)]
pub struct DecodeTxArgs {
    /// Raw transaction hex.
    #[arg(long)]
    pub tx: String,
}

/// Arguments shared by the three validators.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Escrow description file (JSON).
    #[arg(long)]
    pub escrow: PathBuf,

    /// Raw transaction hex.
    #[arg(long)]
    pub tx: String,
}

/// Wallet key used to sign funding inputs.
#[derive(Args, Debug)]
pub struct SignerArgs {
    /// Hex-encoded secp256k1 secret key of the wallet holding the coins.
    #[arg(long, env = "ESCROW_SECRET_KEY", hide_env_values = true)]
    pub secret_key: String,
}

/// Arguments for `fund-escrow`.
#[derive(Args, Debug)]
pub struct FundEscrowArgs {
    /// Escrow description file (JSON).
    #[arg(long)]
    pub escrow: PathBuf,

    /// Wallet coins available for funding (JSON array of UTXOs).
    #[arg(long)]
    pub utxos: PathBuf,

    /// Public key hash that receives the change.
    #[arg(long)]
    pub change_pkh: String,

    #[command(flatten)]
    pub signer: SignerArgs,
}

/// Arguments for `mint`.
#[derive(Args, Debug)]
pub struct MintArgs {
    /// Fee pool description file (JSON).
    #[arg(long)]
    pub pool: PathBuf,

    /// Coins currently held by the pool contract (JSON array of UTXOs).
    #[arg(long)]
    pub pool_utxos: PathBuf,

    /// Wallet coins paying the transaction fee (JSON array of UTXOs).
    #[arg(long)]
    pub utxos: PathBuf,

    /// Public key hash that receives the key NFT.
    #[arg(long)]
    pub recipient_pkh: String,

    /// Amount recorded in the key NFT commitment, in satoshis.
    #[arg(long)]
    pub amount: u64,

    /// Public key hash that receives the change. Defaults to the signer.
    #[arg(long)]
    pub change_pkh: Option<String>,

    #[command(flatten)]
    pub signer: SignerArgs,
}

/// Arguments for `release` and `refund`.
#[derive(Args, Debug)]
pub struct SettleArgs {
    /// Escrow description file (JSON).
    #[arg(long)]
    pub escrow: PathBuf,

    /// Coins held by the escrow contract (JSON array of UTXOs). The one
    /// holding exactly the funding amount is spent.
    #[arg(long)]
    pub escrow_utxos: PathBuf,

    #[command(flatten)]
    pub signer: SignerArgs,
}

/// Arguments for `sweep`.
#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Escrow description file (JSON).
    #[arg(long)]
    pub escrow: PathBuf,

    /// Coins held by the escrow contract (JSON array of UTXOs).
    #[arg(long)]
    pub escrow_utxos: PathBuf,

    /// Public key hash that receives everything.
    #[arg(long)]
    pub recipient_pkh: String,
}

/// Arguments for `claim`.
#[derive(Args, Debug)]
pub struct ClaimArgs {
    /// Fee pool description file (JSON).
    #[arg(long)]
    pub pool: PathBuf,

    /// Coins currently held by the pool contract (JSON array of UTXOs).
    #[arg(long)]
    pub pool_utxos: PathBuf,

    /// Wallet UTXOs; the first claimable key NFT among them is spent.
    #[arg(long)]
    pub utxos: PathBuf,

    /// Public key hash that receives the lock's satoshis. Defaults to the
    /// signer.
    #[arg(long)]
    pub recipient_pkh: Option<String>,

    #[command(flatten)]
    pub signer: SignerArgs,
}

/// Arguments for `return-minting`.
#[derive(Args, Debug)]
pub struct ReturnMintingArgs {
    /// Fee pool description file (JSON).
    #[arg(long)]
    pub pool: PathBuf,

    /// Coins currently held by the pool contract (JSON array of UTXOs).
    #[arg(long)]
    pub pool_utxos: PathBuf,

    /// Wallet coins to top up the fee if the pool coins fall short.
    #[arg(long)]
    pub utxos: Option<PathBuf>,

    /// Public key hash that receives the minting NFT. Defaults to the owner.
    #[arg(long)]
    pub recipient_pkh: Option<String>,

    #[command(flatten)]
    pub signer: SignerArgs,
}

/// Arguments for `create-minting`.
#[derive(Args, Debug)]
pub struct CreateMintingArgs {
    /// Wallet coins (JSON array of UTXOs). Coins at output 0 are used as
    /// genesis inputs first.
    #[arg(long)]
    pub utxos: PathBuf,

    /// Number of minting NFTs to create.
    #[arg(long, default_value_t = 1)]
    pub count: usize,

    /// Public key hash that receives the NFTs. Defaults to the signer.
    #[arg(long)]
    pub recipient_pkh: Option<String>,

    #[command(flatten)]
    pub signer: SignerArgs,
}

/// Arguments for `transfer-minting`.
#[derive(Args, Debug)]
pub struct TransferMintingArgs {
    /// Wallet UTXOs holding the minting NFT and fee coins.
    #[arg(long)]
    pub utxos: PathBuf,

    /// Category of the minting NFT to move (hex).
    #[arg(long)]
    pub category: String,

    /// Public key hash that receives the minting NFT.
    #[arg(long)]
    pub recipient_pkh: String,

    #[command(flatten)]
    pub signer: SignerArgs,
}
