// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::BTreeSet;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain_id::ChainId;
use crate::consts::{BOND_DENOM, DEFAULT_MAX_MEMO_CHARACTERS};
use crate::wire::Coin;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    pub bond_denom: String,
    pub min_fee: U256,
    pub max_memo_characters: usize,
    pub tx_size_cost_per_byte: u64,
    pub sig_verify_cost: u64,
    pub send_msg_cost: u64,
    pub sequencer_msg_cost_per_byte: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            bond_denom: BOND_DENOM.to_string(),
            min_fee: U256::from(1_u64),
            max_memo_characters: DEFAULT_MAX_MEMO_CHARACTERS,
            tx_size_cost_per_byte: 10,
            sig_verify_cost: 1_000,
            send_msg_cost: 10_000,
            sequencer_msg_cost_per_byte: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: Address,
    pub coins: Vec<Coin>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    pub chain_id: ChainId,
    #[serde(default)]
    pub params: ChainParams,
    pub accounts: Vec<GenesisAccount>,
}

#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("genesis chain id must be simple, got {0}")]
    CompositeChainId(ChainId),
    #[error("duplicate genesis account {0}")]
    DuplicateAccount(Address),
    #[error("genesis account {address} holds a zero or duplicate {denom} balance")]
    InvalidBalance { address: Address, denom: String },
    #[error("cannot decode genesis: {0}")]
    Decode(#[from] serde_json::Error),
}

impl Genesis {
    pub fn new(chain_id: ChainId, params: ChainParams) -> Self {
        Self {
            chain_id,
            params,
            accounts: Vec::new(),
        }
    }

    pub fn with_account(mut self, address: Address, coins: Vec<Coin>) -> Self {
        self.accounts.push(GenesisAccount { address, coins });
        self
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, GenesisError> {
        let genesis: Self = serde_json::from_slice(bytes)?;
        genesis.validate()?;
        Ok(genesis)
    }

    pub fn to_json(&self) -> Result<String, GenesisError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), GenesisError> {
        if self.chain_id.is_composite() {
            return Err(GenesisError::CompositeChainId(self.chain_id.clone()));
        }
        let mut seen = BTreeSet::new();
        for account in &self.accounts {
            if !seen.insert(account.address) {
                return Err(GenesisError::DuplicateAccount(account.address));
            }
            let mut denoms = BTreeSet::new();
            for coin in &account.coins {
                if coin.amount.is_zero() || !denoms.insert(coin.denom.as_str()) {
                    return Err(GenesisError::InvalidBalance {
                        address: account.address,
                        denom: coin.denom.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
