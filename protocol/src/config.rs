//! # Protocol Configuration & Constants
//!
//! Every magic number the transaction engine relies on lives here: dust
//! floors, the change reserve, the fixed settlement fee, contract size limits
//! and commitment widths. The constants are the defaults; [`Config`] carries
//! them at runtime so a deployment can override any of them from a TOML file
//! without touching the code.
//!
//! ```toml
//! [fees]
//! fee_rate = "1.1"
//! dust_threshold = 546
//!
//! [limits]
//! max_opcount = 201
//!
//! [commitments]
//! minting_id_width = 20
//! ```
//!
//! Missing keys fall back to the defaults below. Unknown keys are rejected,
//! since a typo in a fee setting should not be silently ignored.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transaction::fee::FeeRate;

// ---------------------------------------------------------------------------
// Transaction Format
// ---------------------------------------------------------------------------

/// Version written into every assembled transaction. Version 2 enables
/// relative lock-time semantics, which the contracts do not use, but it is
/// what every current wallet emits.
pub const TX_VERSION: u32 = 2;

/// Default lock time. Contracts here are not time-locked at the transaction
/// level; timestamps travel as contract arguments instead.
pub const TX_LOCKTIME: u32 = 0;

/// Sequence number for every input. Final, no replacement signalling.
pub const DEFAULT_SEQUENCE: u32 = 0xffff_ffff;

/// `SIGHASH_ALL | SIGHASH_FORKID`. The only signature hash type we produce.
pub const SIGHASH_ALL_FORKID: u8 = 0x41;

/// Maximum NFT commitment length accepted by the token prefix codec.
pub const MAX_COMMITMENT_LENGTH: usize = 40;

// ---------------------------------------------------------------------------
// Fee Parameters
// ---------------------------------------------------------------------------

/// Default fee rate numerator. Together with the denominator this gives
/// 1.1 satoshis per byte.
pub const DEFAULT_FEE_RATE_NUMERATOR: u64 = 11;

/// Default fee rate denominator.
pub const DEFAULT_FEE_RATE_DENOMINATOR: u64 = 10;

/// Smallest value a plain (token-free) output may carry.
pub const DUST_THRESHOLD: u64 = 546;

/// Smallest value a token-carrying output may carry. Delivery fees below
/// this are dropped entirely rather than locked into an NFT.
pub const TOKEN_DUST_THRESHOLD: u64 = 1_000;

/// Bytes-worth of satoshis reserved for the change output the funder may
/// append. An output is 34 bytes for P2PKH; 40 leaves headroom for P2SH.
pub const CHANGE_OUTPUT_OVERHEAD: u64 = 40;

/// Fixed miner fee for escrow release and refund. The contract subtracts
/// exactly this from the locked value, so it is not estimated.
pub const SETTLEMENT_FEE: u64 = 1_000;

/// Value attached to every NFT output the engine creates (minting NFTs,
/// key NFTs, genesis outputs).
pub const TOKEN_OUTPUT_VALUE: u64 = 1_000;

// ---------------------------------------------------------------------------
// Contract Limits
// ---------------------------------------------------------------------------

/// Maximum number of executed opcodes in a redeem script.
pub const MAX_CONTRACT_OPCOUNT: usize = 201;

/// Maximum redeem script size in bytes. P2SH pushes the redeem script as a
/// single element, so it is bound by the 520-byte stack element limit.
pub const MAX_CONTRACT_BYTESIZE: usize = 520;

// ---------------------------------------------------------------------------
// Commitment Layout
// ---------------------------------------------------------------------------

/// Width of each field in a multi-field commitment.
pub const COMMITMENT_FIELD_WIDTH: usize = 20;

/// Width of the sequence id stored on a fee-pool minting NFT.
pub const MINTING_ID_WIDTH: usize = 20;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed fine but makes no sense.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Fee and dust parameters used by the funder and the assembler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeeConfig {
    /// Satoshis per byte of serialized transaction.
    pub fee_rate: FeeRate,
    /// Dust floor for plain outputs.
    pub dust_threshold: u64,
    /// Dust floor for token-carrying outputs.
    pub token_dust_threshold: u64,
    /// Reserve subtracted from change before deciding whether to emit it.
    pub change_output_overhead: u64,
    /// Fixed fee paid by escrow release and refund.
    pub settlement_fee: u64,
    /// Value placed on NFT outputs.
    pub token_output_value: u64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            fee_rate: FeeRate::default(),
            dust_threshold: DUST_THRESHOLD,
            token_dust_threshold: TOKEN_DUST_THRESHOLD,
            change_output_overhead: CHANGE_OUTPUT_OVERHEAD,
            settlement_fee: SETTLEMENT_FEE,
            token_output_value: TOKEN_OUTPUT_VALUE,
        }
    }
}

/// Size limits a compiled contract must satisfy before it is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContractLimits {
    /// Maximum executed opcodes.
    pub max_opcount: usize,
    /// Maximum redeem script bytes.
    pub max_bytesize: usize,
}

impl Default for ContractLimits {
    fn default() -> Self {
        Self {
            max_opcount: MAX_CONTRACT_OPCOUNT,
            max_bytesize: MAX_CONTRACT_BYTESIZE,
        }
    }
}

/// Commitment layout knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommitmentConfig {
    /// Byte width used when writing the fee-pool minting NFT's sequence id.
    pub minting_id_width: usize,
}

impl Default for CommitmentConfig {
    fn default() -> Self {
        Self {
            minting_id_width: MINTING_ID_WIDTH,
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub fees: FeeConfig,
    pub limits: ContractLimits,
    pub commitments: CommitmentConfig,
}

impl Config {
    /// Loads and validates a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects combinations the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fees = &self.fees;
        if fees.dust_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "fees.dust_threshold",
                reason: "must be greater than zero".into(),
            });
        }
        if fees.token_dust_threshold < fees.dust_threshold {
            return Err(ConfigError::Invalid {
                field: "fees.token_dust_threshold",
                reason: format!(
                    "{} is below the plain dust threshold {}",
                    fees.token_dust_threshold, fees.dust_threshold
                ),
            });
        }
        if fees.token_output_value < fees.token_dust_threshold {
            return Err(ConfigError::Invalid {
                field: "fees.token_output_value",
                reason: format!(
                    "{} is below the token dust threshold {}",
                    fees.token_output_value, fees.token_dust_threshold
                ),
            });
        }
        if fees.settlement_fee == 0 {
            return Err(ConfigError::Invalid {
                field: "fees.settlement_fee",
                reason: "must be greater than zero".into(),
            });
        }
        if self.limits.max_opcount == 0 || self.limits.max_bytesize == 0 {
            return Err(ConfigError::Invalid {
                field: "limits",
                reason: "contract limits must be greater than zero".into(),
            });
        }
        let width = self.commitments.minting_id_width;
        if width == 0 || width > MAX_COMMITMENT_LENGTH {
            return Err(ConfigError::Invalid {
                field: "commitments.minting_id_width",
                reason: format!("{width} is outside 1..={MAX_COMMITMENT_LENGTH}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_dust_constants_sanity() {
        // Token outputs need at least plain dust, and the value we put on
        // them must clear the token floor.
        assert!(DUST_THRESHOLD < TOKEN_DUST_THRESHOLD);
        assert!(TOKEN_OUTPUT_VALUE >= TOKEN_DUST_THRESHOLD);
        assert!(CHANGE_OUTPUT_OVERHEAD < DUST_THRESHOLD);
    }

    #[test]
    fn test_commitment_widths_fit_token_prefix() {
        assert!(COMMITMENT_FIELD_WIDTH * 2 <= MAX_COMMITMENT_LENGTH);
        assert!(MINTING_ID_WIDTH <= MAX_COMMITMENT_LENGTH);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.fees.dust_threshold, 546);
        assert_eq!(config.fees.change_output_overhead, 40);
        assert_eq!(config.limits.max_opcount, 201);
        assert_eq!(config.limits.max_bytesize, 520);
        assert_eq!(config.fees.fee_rate.to_string(), "1.1");
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_toml_str(
            r#"
            [fees]
            fee_rate = "1.0"
            settlement_fee = 1500

            [commitments]
            minting_id_width = 40
            "#,
        )
        .unwrap();
        assert_eq!(config.fees.fee_rate, FeeRate::new(1, 1).unwrap());
        assert_eq!(config.fees.settlement_fee, 1500);
        assert_eq!(config.fees.dust_threshold, DUST_THRESHOLD);
        assert_eq!(config.commitments.minting_id_width, 40);
    }

    #[test]
    fn test_numeric_fee_rate_accepted() {
        let config = Config::from_toml_str("[fees]\nfee_rate = 2.5\n").unwrap();
        assert_eq!(config.fees.fee_rate, FeeRate::new(5, 2).unwrap());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Config::from_toml_str("[fees]\ndust = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_width_rejected() {
        let err = Config::from_toml_str("[commitments]\nminting_id_width = 41\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "commitments.minting_id_width",
                ..
            }
        ));
    }

    #[test]
    fn test_token_value_below_token_dust_rejected() {
        let err = Config::from_toml_str("[fees]\ntoken_output_value = 600\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[limits]\nmax_opcount = 150").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.limits.max_opcount, 150);
        assert_eq!(config.limits.max_bytesize, MAX_CONTRACT_BYTESIZE);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = Config::from_file(Path::new("/nonexistent/escrow.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/escrow.toml"));
    }
}
