//! # Compiled Contracts
//!
//! The contracts are compiled by an external toolchain. What comes back is
//! a [`CompiledContract`]: the redeem script with the constructor arguments
//! already substituted, the operation count and byte size the compiler
//! measured, and the ABI function names in declaration order.
//!
//! [`ContractInstance::new`] is the single gate every contract passes
//! through before a transaction is built: a script over the VM's operation
//! or size limit would produce transactions no node accepts, so it is
//! refused up front.
//!
//! Spending a contract UTXO is a function call. [`ContractInstance::function_call`]
//! resolves the function name to its selector and returns the
//! [`UnlockingTemplate`] the draft transaction uses at signing time.

use escrow_protocol::config::ContractLimits;
use escrow_protocol::script::Destination;
use escrow_protocol::transaction::{ScriptArg, UnlockingTemplate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while compiling or instantiating a contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    /// The compiled script executes more operations than the VM allows.
    #[error("contract {name} has opcount {opcount}, limit is {limit}")]
    OpcountExceeded {
        name: String,
        opcount: usize,
        limit: usize,
    },

    /// The compiled script is larger than a P2SH redeem script may be.
    #[error("contract {name} is {bytesize} bytes, limit is {limit}")]
    BytesizeExceeded {
        name: String,
        bytesize: usize,
        limit: usize,
    },

    /// The ABI has no function by this name.
    #[error("contract {name} has no function {function}")]
    UnknownFunction { name: String, function: String },

    /// The external compiler rejected the artifact or its arguments.
    #[error("contract compilation failed: {0}")]
    Compiler(String),

    /// A monetary or id argument does not fit in a script number.
    #[error("argument {argument} = {value} does not fit in a script number")]
    ArgumentRange { argument: &'static str, value: u64 },
}

// ---------------------------------------------------------------------------
// Compiler seam
// ---------------------------------------------------------------------------

/// Output of the external contract compiler for one set of constructor
/// arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledContract {
    /// Artifact name, e.g. `escrow-v2` or `fee-pool`.
    pub name: String,
    #[serde(with = "hex::serde")]
    pub redeem_script: Vec<u8>,
    pub opcount: usize,
    pub bytesize: usize,
    /// ABI function names in declaration order. The index is the selector.
    pub functions: Vec<String>,
}

/// Compiles a named contract artifact with constructor arguments.
///
/// Implemented by whatever wraps the external compiler. Tests use a stub
/// that fabricates scripts of a chosen size.
pub trait ContractCompiler {
    fn compile(&self, artifact: &str, args: &[ScriptArg]) -> Result<CompiledContract, ContractError>;
}

/// A compiler that hands back a contract compiled ahead of time.
///
/// The CLI reads the compiler's report from a file, so there is nothing
/// left to compile; the artifact name is still checked so an escrow file
/// cannot be fed a fee-pool script.
#[derive(Debug, Clone)]
pub struct PrecompiledContract {
    compiled: CompiledContract,
}

impl PrecompiledContract {
    pub fn new(compiled: CompiledContract) -> Self {
        Self { compiled }
    }
}

impl ContractCompiler for PrecompiledContract {
    fn compile(&self, artifact: &str, _args: &[ScriptArg]) -> Result<CompiledContract, ContractError> {
        if self.compiled.name != artifact {
            return Err(ContractError::Compiler(format!(
                "expected artifact {artifact}, found {}",
                self.compiled.name
            )));
        }
        Ok(self.compiled.clone())
    }
}

/// Converts a satoshi amount or id into a script-number argument.
pub fn int_arg(argument: &'static str, value: u64) -> Result<ScriptArg, ContractError> {
    i64::try_from(value)
        .map(ScriptArg::Int)
        .map_err(|_| ContractError::ArgumentRange { argument, value })
}

// ---------------------------------------------------------------------------
// ContractInstance
// ---------------------------------------------------------------------------

/// A compiled contract that passed the size guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractInstance {
    compiled: CompiledContract,
    destination: Destination,
}

impl ContractInstance {
    /// Checks `compiled` against `limits` and wraps it.
    pub fn new(compiled: CompiledContract, limits: &ContractLimits) -> Result<Self, ContractError> {
        if compiled.opcount > limits.max_opcount {
            return Err(ContractError::OpcountExceeded {
                name: compiled.name,
                opcount: compiled.opcount,
                limit: limits.max_opcount,
            });
        }
        if compiled.bytesize > limits.max_bytesize {
            return Err(ContractError::BytesizeExceeded {
                name: compiled.name,
                bytesize: compiled.bytesize,
                limit: limits.max_bytesize,
            });
        }

        let destination = Destination::for_redeem_script(&compiled.redeem_script);
        debug!(
            contract = %compiled.name,
            opcount = compiled.opcount,
            bytesize = compiled.bytesize,
            "contract instantiated"
        );
        Ok(Self {
            compiled,
            destination,
        })
    }

    /// Compiles `artifact` with `args` and runs the size guard.
    pub fn compile(
        compiler: &dyn ContractCompiler,
        artifact: &str,
        args: &[ScriptArg],
        limits: &ContractLimits,
    ) -> Result<Self, ContractError> {
        Self::new(compiler.compile(artifact, args)?, limits)
    }

    pub fn compiled(&self) -> &CompiledContract {
        &self.compiled
    }

    pub fn name(&self) -> &str {
        &self.compiled.name
    }

    pub fn redeem_script(&self) -> &[u8] {
        &self.compiled.redeem_script
    }

    /// The P2SH20 destination paying into this contract.
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn locking_bytecode(&self) -> Vec<u8> {
        self.destination.locking_bytecode()
    }

    /// Unlocking template calling `function` with `args` in ABI order.
    ///
    /// Single-function contracts take no selector.
    pub fn function_call(
        &self,
        function: &str,
        args: Vec<ScriptArg>,
    ) -> Result<UnlockingTemplate, ContractError> {
        let position = self
            .compiled
            .functions
            .iter()
            .position(|f| f == function)
            .ok_or_else(|| ContractError::UnknownFunction {
                name: self.compiled.name.clone(),
                function: function.to_string(),
            })?;
        let selector = if self.compiled.functions.len() > 1 {
            Some(position as u32)
        } else {
            None
        };
        Ok(UnlockingTemplate::Contract {
            redeem_script: self.compiled.redeem_script.clone(),
            selector,
            args,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(opcount: usize, bytesize: usize, functions: &[&str]) -> CompiledContract {
        CompiledContract {
            name: "escrow".into(),
            redeem_script: vec![0x51; bytesize],
            opcount,
            bytesize,
            functions: functions.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn limits_are_inclusive() {
        let limits = ContractLimits::default();
        assert!(ContractInstance::new(compiled(201, 520, &["a"]), &limits).is_ok());
        assert_eq!(
            ContractInstance::new(compiled(202, 100, &["a"]), &limits).unwrap_err(),
            ContractError::OpcountExceeded {
                name: "escrow".into(),
                opcount: 202,
                limit: 201,
            }
        );
        assert!(matches!(
            ContractInstance::new(compiled(10, 521, &["a"]), &limits),
            Err(ContractError::BytesizeExceeded { bytesize: 521, .. })
        ));
    }

    #[test]
    fn destination_is_p2sh20_of_redeem_script() {
        let instance = ContractInstance::new(compiled(5, 30, &["a"]), &ContractLimits::default())
            .unwrap();
        let locking = instance.locking_bytecode();
        assert_eq!(locking.len(), 23);
        assert_eq!(
            *instance.destination(),
            Destination::for_redeem_script(&[0x51; 30])
        );
    }

    #[test]
    fn selector_only_with_several_functions() {
        let limits = ContractLimits::default();
        let multi = ContractInstance::new(compiled(5, 10, &["release", "refund", "doNothing"]), &limits)
            .unwrap();
        match multi.function_call("doNothing", vec![]).unwrap() {
            UnlockingTemplate::Contract { selector, .. } => assert_eq!(selector, Some(2)),
            other => panic!("unexpected template {other:?}"),
        }

        let single = ContractInstance::new(compiled(5, 10, &["spend"]), &limits).unwrap();
        match single.function_call("spend", vec![]).unwrap() {
            UnlockingTemplate::Contract { selector, .. } => assert_eq!(selector, None),
            other => panic!("unexpected template {other:?}"),
        }
        assert!(matches!(
            single.function_call("steal", vec![]),
            Err(ContractError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn precompiled_checks_artifact_name() {
        let compiler = PrecompiledContract::new(compiled(5, 10, &["a"]));
        assert!(compiler.compile("escrow", &[]).is_ok());
        assert!(matches!(
            compiler.compile("fee-pool", &[]),
            Err(ContractError::Compiler(_))
        ));
    }

    #[test]
    fn int_arg_range() {
        assert_eq!(int_arg("amount", 5).unwrap(), ScriptArg::Int(5));
        assert!(matches!(
            int_arg("amount", u64::MAX),
            Err(ContractError::ArgumentRange { argument: "amount", .. })
        ));
    }

    #[test]
    fn report_json_shape() {
        let json = serde_json::to_value(compiled(3, 2, &["a", "b"])).unwrap();
        assert_eq!(json["redeemScript"], "5151");
        assert_eq!(json["functions"][1], "b");
    }
}
