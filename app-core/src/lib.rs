// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Protocol core of the metro shared-sequencing base chain.
//!
//! A transaction declares the chain it authenticates against. When that identifier is
//! `base|secondary`, the base chain orders and charges the transaction but never runs
//! its messages; destination chains read their payloads back from the block log.
pub mod address;
pub mod application;
pub mod chain_id;
pub mod consts;
pub mod genesis;
pub mod keys;
pub mod msg;
pub mod routing;
pub mod tx;
mod wire;

pub use wire::{Any, AuthInfo, Coin, Fee, MsgSend, SequencerMsg, SignDoc, SignerInfo, Tx, TxBody};
