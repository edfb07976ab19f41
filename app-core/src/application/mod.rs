// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod bank;
mod gas;

use alloy_primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::address::InvalidAddress;
use crate::chain_id::{ChainId, MalformedChainId};
use crate::msg::Msg;
use crate::routing::{ChainMismatch, Route};
use crate::wire::{Coin, Tx};

pub use bank::BankApp;
pub use gas::{GasMeter, OutOfGas};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("internal: {reason}")]
    Internal { reason: String },
}

/// Why a transaction was refused before inclusion. Refused transactions are neither
/// ordered nor charged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    EmptyTx,
    Decode(String),
    InvalidMessage(String),
    InvalidAddress(InvalidAddress),
    MemoTooLong { max: usize, got: usize },
    TimedOut { timeout_height: u64, height: u64 },
    MalformedChainId(MalformedChainId),
    ChainMismatch(ChainMismatch),
    InvalidFee(String),
    SignerCount { signers: usize, signer_infos: usize, signatures: usize },
    FeePayerNotSigner(Address),
    UnknownAccount(Address),
    InvalidSequence { signer: Address, expected: u64, got: u64 },
    InvalidSignature { signer: Address, reason: String },
    OutOfGas(OutOfGas),
    InsufficientFee { required: U256, available: U256 },
}

impl InvalidReason {
    /// Stable identifier used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyTx => "EMPTY_TX",
            Self::Decode(_) => "DECODE",
            Self::InvalidMessage(_) => "INVALID_MESSAGE",
            Self::InvalidAddress(_) => "INVALID_ADDRESS",
            Self::MemoTooLong { .. } => "MEMO_TOO_LONG",
            Self::TimedOut { .. } => "TX_TIMED_OUT",
            Self::MalformedChainId(_) => "MALFORMED_CHAIN_ID",
            Self::ChainMismatch(_) => "CHAIN_MISMATCH",
            Self::InvalidFee(_) => "INVALID_FEE",
            Self::SignerCount { .. } => "SIGNER_COUNT",
            Self::FeePayerNotSigner(_) => "FEE_PAYER_NOT_SIGNER",
            Self::UnknownAccount(_) => "UNKNOWN_ACCOUNT",
            Self::InvalidSequence { .. } => "INVALID_SEQUENCE",
            Self::InvalidSignature { .. } => "INVALID_SIGNATURE",
            Self::OutOfGas(_) => "OUT_OF_GAS",
            Self::InsufficientFee { .. } => "INSUFFICIENT_FEE",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyTx => write!(f, "transaction carries no messages"),
            Self::Decode(reason) => write!(f, "cannot decode message: {reason}"),
            Self::InvalidMessage(reason) => write!(f, "invalid message: {reason}"),
            Self::InvalidAddress(err) => write!(f, "{err}"),
            Self::MemoTooLong { max, got } => {
                write!(f, "memo too long: max {max} characters, got {got}")
            }
            Self::TimedOut {
                timeout_height,
                height,
            } => write!(f, "timeout height {timeout_height} passed at height {height}"),
            Self::MalformedChainId(err) => write!(f, "{err}"),
            Self::ChainMismatch(err) => write!(f, "{err}"),
            Self::InvalidFee(reason) => write!(f, "invalid fee: {reason}"),
            Self::SignerCount {
                signers,
                signer_infos,
                signatures,
            } => write!(
                f,
                "expected {signers} signers, got {signer_infos} signer infos and {signatures} signatures"
            ),
            Self::FeePayerNotSigner(payer) => write!(f, "fee payer {payer} is not a signer"),
            Self::UnknownAccount(address) => write!(f, "account {address} does not exist"),
            Self::InvalidSequence {
                signer,
                expected,
                got,
            } => write!(
                f,
                "bad sequence for {signer}: expected {expected}, got {got}"
            ),
            Self::InvalidSignature { signer, reason } => {
                write!(f, "invalid signature for {signer}: {reason}")
            }
            Self::OutOfGas(err) => write!(f, "{err}"),
            Self::InsufficientFee {
                required,
                available,
            } => write!(
                f,
                "insufficient balance for fee: required {required}, available {available}"
            ),
        }
    }
}

/// Result code of an included transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum ResultCode {
    Ok,
    InsufficientFunds,
    OutOfGas,
    InvalidMessage,
}

impl ResultCode {
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::InsufficientFunds => 5,
            Self::OutOfGas => 11,
            Self::InvalidMessage => 12,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl From<ResultCode> for u32 {
    fn from(value: ResultCode) -> Self {
        value.as_u32()
    }
}

impl TryFrom<u32> for ResultCode {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ok),
            5 => Ok(Self::InsufficientFunds),
            11 => Ok(Self::OutOfGas),
            12 => Ok(Self::InvalidMessage),
            other => Err(format!("unknown result code {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    pub code: ResultCode,
    pub log: String,
    pub gas_wanted: u64,
    pub gas_used: u64,
}

/// A transaction that passed every check and may be delivered.
#[derive(Debug, Clone)]
pub struct VerifiedTx {
    pub tx: Tx,
    pub hash: B256,
    pub msgs: Vec<Msg>,
    pub signers: Vec<Address>,
    pub payer: Address,
    pub fee: U256,
    pub declared_chain_id: ChainId,
    pub route: Route,
    pub ante_gas: u64,
}

#[derive(Debug, Clone)]
pub struct DeliveredTx {
    pub tx: Tx,
    pub hash: B256,
    pub msgs: Vec<Msg>,
    pub declared_chain_id: ChainId,
    pub route: Route,
    pub result: TxResult,
}

#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    // Included transactions are charged even when their result code is not OK.
    Included(DeliveredTx),

    Invalid(InvalidReason),
}

impl ExecutionOutcome {
    pub fn is_included(&self) -> bool {
        matches!(self, Self::Included(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub address: Address,
    pub account_number: u64,
    pub sequence: u64,
    pub public_key: Option<Bytes>,
    pub balances: Vec<Coin>,
}

pub trait Application: Send {
    /// The base chain's own (simple) identifier.
    fn chain_id(&self) -> &ChainId;

    fn account(&self, address: Address) -> Option<AccountInfo>;

    fn balance(&self, address: Address, denom: &str) -> U256;

    /// Runs every check that can refuse `tx` at `height` without touching state.
    fn check_tx(&self, tx: &Tx, height: u64) -> Result<VerifiedTx, InvalidReason>;

    fn deliver_tx(&mut self, tx: VerifiedTx) -> Result<DeliveredTx, AppError>;

    fn check_and_deliver_tx(&mut self, tx: &Tx, height: u64) -> Result<ExecutionOutcome, AppError> {
        let verified = match self.check_tx(tx, height) {
            Ok(verified) => verified,
            Err(reason) => return Ok(ExecutionOutcome::Invalid(reason)),
        };
        Ok(ExecutionOutcome::Included(self.deliver_tx(verified)?))
    }

    fn executed_tx_count(&self) -> u64 {
        0
    }
}
