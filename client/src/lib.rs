// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Client side of the metro base chain: signer sessions that build and sign
//! transactions, the account-state cache they rely on and an HTTP node client.

pub mod account;
pub mod builder;
pub mod error;
pub mod rpc;

#[cfg(test)]
mod test_utils;

pub use account::AccountState;
pub use builder::{
    Signer, TxBuilder, TxBuilderOption, TxBuilderOptions, set_fee_amount, set_fee_payer,
    set_gas_adjustment, set_gas_limit, set_memo, set_timeout_height,
};
pub use error::{BuilderError, ClientError};
pub use rpc::{
    AccountQuerier, CommittedTx, NodeClient, SequencedMsg, SequencerPage, TxBroadcaster,
    TxResponse,
};
