// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::Address;
use app_core::address::InvalidAddress;
use app_core::chain_id::MalformedChainId;
use app_core::keys::KeyringError;
use app_core::msg::MsgError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot reach node at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("node rejected request ({status} {code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },
    #[error("timed out waiting for {0}")]
    Timeout(String),
}

impl ClientError {
    /// Stable code returned by the node, e.g. `CHAIN_MISMATCH` or `INVALID_SEQUENCE`.
    pub fn rejection_code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("signer account unavailable: {0}")]
    SignerUnavailable(#[source] ClientError),
    #[error("unknown signer: {0}")]
    UnknownSigner(#[source] KeyringError),
    #[error(transparent)]
    MalformedChainIdentifier(#[from] MalformedChainId),
    #[error(transparent)]
    InvalidAddress(#[from] InvalidAddress),
    #[error(transparent)]
    InvalidMessage(#[from] MsgError),
    #[error("account {0} does not exist on chain")]
    AccountNotFound(Address),
    #[error("messages must be signed by {expected} alone, got {got:?}")]
    SignerMismatch { expected: Address, got: Vec<Address> },
    #[error("fee payer {payer} is not among the signers {signers:?}")]
    FeePayerNotSigner { payer: Address, signers: Vec<Address> },
    #[error("routed transaction requested but no destination chain is configured")]
    NoSecondaryChainId,
    #[error("transaction carries no messages")]
    NoMessages,
    #[error("gas adjustment must be a positive finite number, got {0}")]
    InvalidGasAdjustment(f64),
    #[error("signing failed: {0}")]
    Signing(#[source] KeyringError),
}
