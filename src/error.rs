//! Error types for the compounder

use std::fmt;
use thiserror::Error;

/// SDK codespace shared by the ante handler and the gas meter
const SDK_CODESPACE: &str = "sdk";
const SDK_CODE_OUT_OF_GAS: u32 = 11;
const SDK_CODE_INSUFFICIENT_FEE: u32 = 13;

/// Where a transaction was turned down by the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStage {
    /// CheckTx during a sync broadcast (mempool admission)
    Broadcast,
    /// DeliverTx after block inclusion
    Execution,
}

impl fmt::Display for TxStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxStage::Broadcast => f.write_str("broadcast"),
            TxStage::Execution => f.write_str("execution"),
        }
    }
}

/// Recoverable rejection reasons understood by the escalation controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    InsufficientFee,
    OutOfGas,
}

impl Rejection {
    /// Label used in logs and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::InsufficientFee => "insufficient fee",
            Rejection::OutOfGas => "out of gas",
        }
    }

    /// Metric label for an exhausted retry budget
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::InsufficientFee => "insufficient_fee",
            Rejection::OutOfGas => "out_of_gas",
        }
    }

    /// Resource raised before the next attempt
    pub fn resource(&self) -> &'static str {
        match self {
            Rejection::InsufficientFee => "fee",
            Rejection::OutOfGas => "gas",
        }
    }
}

/// Main error type for the compounder
#[derive(Error, Debug)]
pub enum CompounderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Key error: {0}")]
    Key(String),

    #[error("Cannot connect to gRPC endpoint {endpoint}: {message}")]
    Connection { endpoint: String, message: String },

    #[error("Account query failed for {address}: {message}")]
    AccountQuery { address: String, message: String },

    #[error("Invalid chain response: {0}")]
    InvalidChainResponse(String),

    #[error("Transaction build error: {0}")]
    TxBuild(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transaction {tx_hash} rejected at {stage} (code {code}): {raw_log}")]
    Rejected {
        stage: TxStage,
        code: u32,
        codespace: String,
        raw_log: String,
        tx_hash: String,
        height: i64,
    },

    #[error("Timed out after {waited_secs}s waiting for transaction {tx_hash}")]
    ConfirmationTimeout { tx_hash: String, waited_secs: u64 },

    #[error("Insufficient {denom} balance: have {have}, need more than {need}")]
    InsufficientBalance { denom: String, have: u128, need: u128 },

    #[error("Stake source error: {0}")]
    StakeSource(String),

    #[error("No valid stake assignments in {path}")]
    NoStakeAssignments { path: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CompounderError {
    /// Errors the process cannot continue from
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            CompounderError::Config(_)
                | CompounderError::Key(_)
                | CompounderError::Connection { .. }
        )
    }

    /// Classify a failure as one the escalation controller may retry
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            CompounderError::Rejected {
                code,
                codespace,
                raw_log,
                ..
            } => {
                if codespace == SDK_CODESPACE {
                    match *code {
                        SDK_CODE_INSUFFICIENT_FEE => return Some(Rejection::InsufficientFee),
                        SDK_CODE_OUT_OF_GAS => return Some(Rejection::OutOfGas),
                        _ => {}
                    }
                }
                classify_text(raw_log)
            }
            CompounderError::Transport(message) => classify_text(message),
            _ => None,
        }
    }
}

fn classify_text(text: &str) -> Option<Rejection> {
    if text.contains("insufficient fee") {
        Some(Rejection::InsufficientFee)
    } else if text.contains("out of gas") {
        Some(Rejection::OutOfGas)
    } else {
        None
    }
}

/// Result type for compounder operations
pub type CompounderResult<T> = Result<T, CompounderError>;
