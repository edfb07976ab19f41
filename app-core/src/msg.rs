// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::BTreeSet;

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolValue;
use thiserror::Error;

use crate::address::{InvalidAddress, parse_address};
use crate::wire::{Any, Coin};

pub use crate::wire::{MsgSend, SequencerMsg};

pub const SEQUENCER_MSG_TYPE: &str = "SequencerMsg";
pub const MSG_SEND_TYPE: &str = "MsgSend";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MsgError {
    #[error("unknown message type {0:?}")]
    UnknownMessageType(String),
    #[error("cannot decode {type_url} message: {reason}")]
    Decode { type_url: String, reason: String },
    #[error("invalid coins: {0}")]
    InvalidCoins(String),
    #[error(transparent)]
    InvalidAddress(#[from] InvalidAddress),
}

impl SequencerMsg {
    pub fn new(chain_id: impl Into<Bytes>, data: impl Into<Bytes>, from: Address) -> Self {
        Self {
            chain_id: chain_id.into(),
            data: data.into(),
            from_address: from.to_string(),
        }
    }

    pub fn route(&self) -> &'static str {
        SEQUENCER_MSG_TYPE
    }

    // Payload and destination are opaque to the base chain.
    pub fn validate_basic(&self) -> Result<(), MsgError> {
        Ok(())
    }

    /// The sole signer is the originator; a malformed address surfaces here rather
    /// than at construction time.
    pub fn signers(&self) -> Result<Vec<Address>, InvalidAddress> {
        Ok(vec![parse_address(&self.from_address)?])
    }
}

impl MsgSend {
    pub fn new(from: Address, to: Address, amount: Vec<Coin>) -> Self {
        Self {
            from_address: from.to_string(),
            to_address: to.to_string(),
            amount,
        }
    }

    pub fn validate_basic(&self) -> Result<(), MsgError> {
        parse_address(&self.from_address)?;
        parse_address(&self.to_address)?;
        validate_coins(&self.amount)
    }

    pub fn signers(&self) -> Result<Vec<Address>, InvalidAddress> {
        Ok(vec![parse_address(&self.from_address)?])
    }
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: U256) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }
}

/// Sum of `denom` across `coins`, saturating.
pub fn amount_of(coins: &[Coin], denom: &str) -> U256 {
    coins
        .iter()
        .filter(|coin| coin.denom == denom)
        .fold(U256::ZERO, |acc, coin| acc.saturating_add(coin.amount))
}

fn validate_coins(coins: &[Coin]) -> Result<(), MsgError> {
    if coins.is_empty() {
        return Err(MsgError::InvalidCoins("empty amount".to_string()));
    }
    let mut seen = BTreeSet::new();
    for coin in coins {
        if coin.denom.is_empty() {
            return Err(MsgError::InvalidCoins("empty denomination".to_string()));
        }
        if coin.amount.is_zero() {
            return Err(MsgError::InvalidCoins(format!("zero amount of {}", coin.denom)));
        }
        if !seen.insert(coin.denom.as_str()) {
            return Err(MsgError::InvalidCoins(format!(
                "duplicate denomination {}",
                coin.denom
            )));
        }
    }
    Ok(())
}

/// Message kinds the base chain dispatches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    Send(MsgSend),
    Sequencer(SequencerMsg),
}

impl Msg {
    pub fn type_url(&self) -> &'static str {
        match self {
            Self::Send(_) => MSG_SEND_TYPE,
            Self::Sequencer(_) => SEQUENCER_MSG_TYPE,
        }
    }

    pub fn to_any(&self) -> Any {
        let value = match self {
            Self::Send(msg) => SolValue::abi_encode(msg),
            Self::Sequencer(msg) => SolValue::abi_encode(msg),
        };
        Any {
            type_url: self.type_url().to_string(),
            value: value.into(),
        }
    }

    pub fn from_any(any: &Any) -> Result<Self, MsgError> {
        let decode_error = |err: alloy_sol_types::Error| MsgError::Decode {
            type_url: any.type_url.clone(),
            reason: err.to_string(),
        };
        match any.type_url.as_str() {
            MSG_SEND_TYPE => <MsgSend as SolValue>::abi_decode(&any.value)
                .map(Self::Send)
                .map_err(decode_error),
            SEQUENCER_MSG_TYPE => <SequencerMsg as SolValue>::abi_decode(&any.value)
                .map(Self::Sequencer)
                .map_err(decode_error),
            other => Err(MsgError::UnknownMessageType(other.to_string())),
        }
    }

    pub fn validate_basic(&self) -> Result<(), MsgError> {
        match self {
            Self::Send(msg) => msg.validate_basic(),
            Self::Sequencer(msg) => msg.validate_basic(),
        }
    }

    pub fn signers(&self) -> Result<Vec<Address>, InvalidAddress> {
        match self {
            Self::Send(msg) => msg.signers(),
            Self::Sequencer(msg) => msg.signers(),
        }
    }
}

impl From<MsgSend> for Msg {
    fn from(value: MsgSend) -> Self {
        Self::Send(value)
    }
}

impl From<SequencerMsg> for Msg {
    fn from(value: SequencerMsg) -> Self {
        Self::Sequencer(value)
    }
}

/// Union of message signers in first-appearance order.
pub fn signer_set(msgs: &[Msg]) -> Result<Vec<Address>, InvalidAddress> {
    let mut signers = Vec::new();
    for msg in msgs {
        for signer in msg.signers()? {
            if !signers.contains(&signer) {
                signers.push(signer);
            }
        }
    }
    Ok(signers)
}
