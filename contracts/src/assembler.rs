//! # Transaction Assembler
//!
//! Turns an operation request into a finalized transaction. Each request
//! type checks what it can when it is constructed (keys, capabilities,
//! amounts), so an [`Assembler`] method only has to lay out the draft,
//! balance it and sign it.
//!
//! ## Fee policies
//!
//! | operation | fee |
//! |---|---|
//! | fund, mint, return, create/transfer minting | estimated, closed by the funder |
//! | release, refund | fixed settlement fee baked into `fundingSats` |
//! | sweep | estimated from a provisional build, no funder |
//! | claim | the key NFT's satoshis |
//!
//! Nothing here broadcasts. An error leaves no partial transaction behind.

use escrow_protocol::config::Config;
use escrow_protocol::crypto::SigningKey;
use escrow_protocol::script::Destination;
use escrow_protocol::transaction::{
    estimate_fee, fund_transaction, DraftTransaction, EncodingError, FundingError, FundingUtxo,
    NftCapability, TokenData, Transaction, TxOutput, UnlockingTemplate, Utxo,
};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::escrow::{Escrow, EscrowError};
use crate::fee_pool::{FeePool, FeePoolError, MintPlan};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum AssemblyError {
    /// The request failed its construction checks.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The finished transaction pays out more than it spends.
    #[error("inputs of {total_input} satoshis cannot cover outputs of {total_output}")]
    Unbalanced { total_input: u64, total_output: u64 },

    #[error(transparent)]
    Funding(#[from] FundingError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Escrow(#[from] EscrowError),

    #[error(transparent)]
    FeePool(#[from] FeePoolError),
}

fn invalid(reason: impl Into<String>) -> AssemblyError {
    AssemblyError::InvalidRequest(reason.into())
}

fn plain_coins(coins: &[FundingUtxo]) -> Result<(), AssemblyError> {
    match coins.iter().find(|coin| coin.utxo.has_token()) {
        Some(coin) => Err(invalid(format!(
            "funding coin {} carries a token",
            coin.utxo.outpoint
        ))),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Totals of an assembled transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblySummary {
    pub total_input: u64,
    pub total_output: u64,
    pub fee: u64,
}

/// A finalized transaction with the draft it came from.
#[derive(Debug, Clone)]
pub struct AssembledTransaction {
    pub draft: DraftTransaction,
    pub transaction: Transaction,
    pub summary: AssemblySummary,
}

impl AssembledTransaction {
    pub fn hex(&self) -> String {
        self.transaction.to_hex()
    }

    pub fn txid_hex(&self) -> String {
        self.transaction.txid_hex()
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Pay `fundingSats` into an escrow from wallet coins.
#[derive(Debug, Clone)]
pub struct FundRequest<'a> {
    escrow: &'a Escrow,
    coins: Vec<FundingUtxo>,
    change: Destination,
}

impl<'a> FundRequest<'a> {
    pub fn new(
        escrow: &'a Escrow,
        coins: Vec<FundingUtxo>,
        change: Destination,
    ) -> Result<Self, AssemblyError> {
        if coins.is_empty() {
            return Err(invalid("no funding coins"));
        }
        plain_coins(&coins)?;
        Ok(Self {
            escrow,
            coins,
            change,
        })
    }
}

/// Checks shared by release and refund: the UTXO must be the untouched
/// funding output.
fn settlement_utxo(escrow: &Escrow, utxo: &Utxo) -> Result<(), AssemblyError> {
    if utxo.has_token() {
        return Err(invalid(format!("escrow UTXO {} carries a token", utxo.outpoint)));
    }
    if utxo.value_satoshis != escrow.funding_sats() {
        return Err(invalid(format!(
            "escrow UTXO {} holds {} satoshis, expected {}",
            utxo.outpoint,
            utxo.value_satoshis,
            escrow.funding_sats()
        )));
    }
    Ok(())
}

/// Release the escrow to the seller. Buyer or arbiter signs.
#[derive(Debug, Clone)]
pub struct ReleaseRequest<'a> {
    escrow: &'a Escrow,
    escrow_utxo: Utxo,
    key: SigningKey,
}

impl<'a> ReleaseRequest<'a> {
    pub fn new(escrow: &'a Escrow, escrow_utxo: Utxo, key: SigningKey) -> Result<Self, AssemblyError> {
        escrow.authorize_release(&key)?;
        settlement_utxo(escrow, &escrow_utxo)?;
        // The delivery lock is a token genesis, only possible from output 0.
        if escrow.amounts().delivery_fee > 0 && escrow_utxo.outpoint.index != 0 {
            return Err(invalid(format!(
                "escrow UTXO {} must be output 0 to mint the delivery lock",
                escrow_utxo.outpoint
            )));
        }
        Ok(Self {
            escrow,
            escrow_utxo,
            key,
        })
    }
}

/// Refund the escrow to the buyer. Arbiter signs.
#[derive(Debug, Clone)]
pub struct RefundRequest<'a> {
    escrow: &'a Escrow,
    escrow_utxo: Utxo,
    key: SigningKey,
}

impl<'a> RefundRequest<'a> {
    pub fn new(escrow: &'a Escrow, escrow_utxo: Utxo, key: SigningKey) -> Result<Self, AssemblyError> {
        escrow.authorize_refund(&key)?;
        settlement_utxo(escrow, &escrow_utxo)?;
        Ok(Self {
            escrow,
            escrow_utxo,
            key,
        })
    }
}

/// Move every coin held by the escrow contract to one recipient.
#[derive(Debug, Clone)]
pub struct SweepRequest<'a> {
    escrow: &'a Escrow,
    utxos: Vec<Utxo>,
    recipient: Destination,
}

impl<'a> SweepRequest<'a> {
    pub fn new(
        escrow: &'a Escrow,
        utxos: Vec<Utxo>,
        recipient: Destination,
    ) -> Result<Self, AssemblyError> {
        if utxos.is_empty() {
            return Err(invalid("nothing to sweep"));
        }
        if let Some(utxo) = utxos.iter().find(|u| u.has_token()) {
            return Err(invalid(format!("contract UTXO {} carries a token", utxo.outpoint)));
        }
        Ok(Self {
            escrow,
            utxos,
            recipient,
        })
    }
}

/// Mint the next key NFT from the pool's minting NFT.
#[derive(Debug, Clone)]
pub struct MintRequest<'a> {
    pool: &'a FeePool,
    minting_utxo: Utxo,
    plan: MintPlan,
    coins: Vec<FundingUtxo>,
    change: Destination,
}

impl<'a> MintRequest<'a> {
    pub fn new(
        pool: &'a FeePool,
        minting_utxo: Utxo,
        amount: u64,
        recipient: &Destination,
        coins: Vec<FundingUtxo>,
        change: Destination,
    ) -> Result<Self, AssemblyError> {
        plain_coins(&coins)?;
        let plan = pool.plan_mint(&minting_utxo, amount, recipient)?;
        Ok(Self {
            pool,
            minting_utxo,
            plan,
            coins,
            change,
        })
    }

    /// The id this mint issues.
    pub fn next_id(&self) -> u64 {
        self.plan.next_id
    }
}

/// Claim a lock NFT with the matching key NFT.
#[derive(Debug, Clone)]
pub struct ClaimRequest<'a> {
    pool: &'a FeePool,
    id: u64,
    lock_utxo: Utxo,
    key_nft: Utxo,
    key: SigningKey,
    recipient: Destination,
}

impl<'a> ClaimRequest<'a> {
    /// Finds the lock NFT among `pool_utxos` by the key NFT's id.
    pub fn new(
        pool: &'a FeePool,
        key_nft: Utxo,
        key: SigningKey,
        pool_utxos: &[Utxo],
        recipient: Destination,
    ) -> Result<Self, AssemblyError> {
        let id = pool.key_nft_id(&key_nft)?;
        pool.authorize_key_holder(&key_nft, &key)?;
        let lock_utxo = pool.find_claimable(pool_utxos, id)?.clone();
        Ok(Self {
            pool,
            id,
            lock_utxo,
            key_nft,
            key,
            recipient,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn lock_utxo(&self) -> &Utxo {
        &self.lock_utxo
    }
}

/// Hand the minting NFT and the pool's plain coins back to the owner.
#[derive(Debug, Clone)]
pub struct ReturnRequest<'a> {
    pool: &'a FeePool,
    minting_utxo: Utxo,
    pool_coins: Vec<Utxo>,
    owner: SigningKey,
    recipient: Destination,
    coins: Vec<FundingUtxo>,
    change: Destination,
}

impl<'a> ReturnRequest<'a> {
    pub fn new(
        pool: &'a FeePool,
        pool_utxos: &[Utxo],
        owner: SigningKey,
        recipient: Destination,
        coins: Vec<FundingUtxo>,
        change: Destination,
    ) -> Result<Self, AssemblyError> {
        pool.authorize_owner(&owner)?;
        plain_coins(&coins)?;
        let minting_utxo = pool.find_minting_utxo(pool_utxos)?.clone();
        let pool_coins = pool_utxos.iter().filter(|u| !u.has_token()).cloned().collect();
        Ok(Self {
            pool,
            minting_utxo,
            pool_coins,
            owner,
            recipient,
            coins,
            change,
        })
    }
}

/// Create fresh minting NFTs, one category per genesis coin.
#[derive(Debug, Clone)]
pub struct CreateMintingRequest {
    genesis: Vec<FundingUtxo>,
    coins: Vec<FundingUtxo>,
    recipient: Destination,
    change: Destination,
}

impl CreateMintingRequest {
    /// The first `count` coins become genesis inputs; each must be output 0
    /// of its transaction because the new category is that txid.
    pub fn new(
        mut coins: Vec<FundingUtxo>,
        count: usize,
        recipient: Destination,
        change: Destination,
    ) -> Result<Self, AssemblyError> {
        if count == 0 {
            return Err(invalid("count must be at least 1"));
        }
        if coins.len() < count {
            return Err(invalid(format!(
                "{count} minting NFTs need {count} genesis coins, got {}",
                coins.len()
            )));
        }
        plain_coins(&coins)?;
        let rest = coins.split_off(count);
        if let Some(coin) = coins.iter().find(|c| c.utxo.outpoint.index != 0) {
            return Err(invalid(format!(
                "genesis coin {} is not output 0",
                coin.utxo.outpoint
            )));
        }
        Ok(Self {
            genesis: coins,
            coins: rest,
            recipient,
            change,
        })
    }
}

/// Move a wallet-held minting NFT to another holder.
#[derive(Debug, Clone)]
pub struct TransferMintingRequest {
    minting: FundingUtxo,
    coins: Vec<FundingUtxo>,
    recipient: Destination,
    change: Destination,
}

impl TransferMintingRequest {
    pub fn new(
        minting: FundingUtxo,
        coins: Vec<FundingUtxo>,
        recipient: Destination,
        change: Destination,
    ) -> Result<Self, AssemblyError> {
        if minting.utxo.nft_capability() != Some(NftCapability::Minting) {
            return Err(invalid(format!(
                "{} is not a minting NFT",
                minting.utxo.outpoint
            )));
        }
        plain_coins(&coins)?;
        Ok(Self {
            minting,
            coins,
            recipient,
            change,
        })
    }
}

// ---------------------------------------------------------------------------
// Assembler
// ---------------------------------------------------------------------------

/// Builds transactions under one configuration.
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    config: Config,
}

impl Assembler {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Funding leg: escrow output first, change last.
    pub fn fund_escrow(&self, request: FundRequest<'_>) -> Result<AssembledTransaction, AssemblyError> {
        let mut draft = DraftTransaction::new();
        draft.pay(request.escrow.destination(), request.escrow.funding_sats());
        fund_transaction(&mut draft, &request.coins, &request.change, &self.config.fees)?;
        finish("fund", draft)
    }

    pub fn release(&self, request: ReleaseRequest<'_>) -> Result<AssembledTransaction, AssemblyError> {
        let escrow = request.escrow;
        let mut draft = DraftTransaction::new();
        draft.add_input(request.escrow_utxo.clone(), escrow.release_call(&request.key)?);
        for output in escrow.release_outputs(request.escrow_utxo.outpoint.txid) {
            draft.add_output(output);
        }
        finish("release", draft)
    }

    pub fn refund(&self, request: RefundRequest<'_>) -> Result<AssembledTransaction, AssemblyError> {
        let escrow = request.escrow;
        let mut draft = DraftTransaction::new();
        draft.add_input(request.escrow_utxo, escrow.refund_call(&request.key)?);
        for output in escrow.refund_outputs() {
            draft.add_output(output);
        }
        finish("refund", draft)
    }

    /// Builds once paying dust to measure the size, then pays everything
    /// but the fee.
    pub fn sweep(&self, request: SweepRequest<'_>) -> Result<AssembledTransaction, AssemblyError> {
        let fees = &self.config.fees;
        let call = request.escrow.sweep_call()?;
        let mut draft = DraftTransaction::new();
        for utxo in request.utxos {
            draft.add_input(utxo, call.clone());
        }
        let total = draft.total_input_value()?;
        draft.pay(&request.recipient, fees.dust_threshold);

        let fee = estimate_fee(&draft, fees.fee_rate)?;
        let payout = total
            .checked_sub(fee)
            .filter(|payout| *payout >= fees.dust_threshold)
            .ok_or(FundingError::InsufficientFunds {
                required: fee.saturating_add(fees.dust_threshold),
                available: total,
            })?;
        draft.outputs[0].value_satoshis = payout;
        finish("sweep", draft)
    }

    pub fn mint(&self, request: MintRequest<'_>) -> Result<AssembledTransaction, AssemblyError> {
        let mut draft = DraftTransaction::new();
        draft.add_input(request.minting_utxo, request.pool.mint_call()?);
        draft.add_output(request.plan.minting_output);
        draft.add_output(request.plan.key_output);
        fund_transaction(&mut draft, &request.coins, &request.change, &self.config.fees)?;
        finish("mint", draft)
    }

    /// Lock NFT in via `claim()`, key NFT in via its holder's signature, the
    /// lock's satoshis out. Both tokens are burned and the key NFT's value
    /// is the fee.
    pub fn claim(&self, request: ClaimRequest<'_>) -> Result<AssembledTransaction, AssemblyError> {
        let mut draft = DraftTransaction::new();
        let value = request.lock_utxo.value_satoshis;
        draft.add_input(request.lock_utxo, request.pool.claim_call()?);
        draft.add_input(request.key_nft, UnlockingTemplate::P2pkh { key: request.key });
        draft.pay(&request.recipient, value);
        finish("claim", draft)
    }

    /// Minting NFT to the recipient unchanged; pool coins and any wallet
    /// coins needed for the fee come back as change.
    pub fn return_minting(
        &self,
        request: ReturnRequest<'_>,
    ) -> Result<AssembledTransaction, AssemblyError> {
        let call = request.pool.owner_call(&request.owner)?;
        let mut draft = DraftTransaction::new();
        let minting = request.minting_utxo;
        draft.add_output(output_carrying(&request.recipient, &minting));
        draft.add_input(minting, call.clone());
        for coin in request.pool_coins {
            draft.add_input(coin, call.clone());
        }
        fund_transaction(&mut draft, &request.coins, &request.change, &self.config.fees)?;
        finish("return", draft)
    }

    pub fn create_minting(
        &self,
        request: CreateMintingRequest,
    ) -> Result<AssembledTransaction, AssemblyError> {
        let value = self.config.fees.token_output_value;
        let mut draft = DraftTransaction::new();
        for coin in request.genesis {
            draft.pay_token(
                &request.recipient,
                value,
                TokenData::nft(coin.utxo.outpoint.txid, NftCapability::Minting, Vec::new()),
            );
            draft.add_input(coin.utxo, coin.unlocking);
        }
        fund_transaction(&mut draft, &request.coins, &request.change, &self.config.fees)?;
        finish("create-minting", draft)
    }

    pub fn transfer_minting(
        &self,
        request: TransferMintingRequest,
    ) -> Result<AssembledTransaction, AssemblyError> {
        let minting = request.minting;
        let mut draft = DraftTransaction::new();
        let mut output = output_carrying(&request.recipient, &minting.utxo);
        output.value_satoshis = self.config.fees.token_output_value;
        draft.add_output(output);
        draft.add_input(minting.utxo, minting.unlocking);
        fund_transaction(&mut draft, &request.coins, &request.change, &self.config.fees)?;
        finish("transfer-minting", draft)
    }
}

/// An output paying `destination` the value and token of `utxo`.
fn output_carrying(destination: &Destination, utxo: &Utxo) -> TxOutput {
    let output = TxOutput::new(destination.locking_bytecode(), utxo.value_satoshis);
    match &utxo.token {
        Some(token) => output.with_token(token.clone()),
        None => output,
    }
}

/// Signs the draft and totals it.
fn finish(operation: &'static str, draft: DraftTransaction) -> Result<AssembledTransaction, AssemblyError> {
    let transaction = draft.finalize()?;
    let total_input = draft.total_input_value()?;
    let total_output = draft.total_output_value()?;
    let fee = total_input
        .checked_sub(total_output)
        .ok_or(AssemblyError::Unbalanced {
            total_input,
            total_output,
        })?;

    info!(
        operation,
        txid = %transaction.txid_hex(),
        inputs = transaction.inputs.len(),
        outputs = transaction.outputs.len(),
        size = transaction.size(),
        total_input,
        total_output,
        fee,
        "assembled transaction"
    );
    Ok(AssembledTransaction {
        draft,
        transaction,
        summary: AssemblySummary {
            total_input,
            total_output,
            fee,
        },
    })
}
