// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::U256;

use crate::wire::Coin;

/// Separates the base-chain identifier from the destination-chain identifier.
/// Never part of a legal identifier component (see [`crate::chain_id`]).
pub const CHAIN_ID_SEPARATOR: &str = "|";
pub const MAX_CHAIN_ID_COMPONENT_LEN: usize = 50;

/// Native staking token denomination.
pub const BOND_DENOM: &str = "utick";

pub const DEFAULT_MAX_MEMO_CHARACTERS: usize = 256;

pub const SIGNING_DOMAIN_NAME: &str = "Metro";
pub const SIGNING_DOMAIN_VERSION: &str = "1";

pub fn native_coin(amount: U256) -> Coin {
    Coin {
        denom: BOND_DENOM.to_string(),
        amount,
    }
}
