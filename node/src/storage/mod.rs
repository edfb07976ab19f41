// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod db;
mod sql;

use std::time::SystemTime;

use alloy_primitives::{B256, Bytes};
use app_core::Tx;
use app_core::application::TxResult;
use app_core::chain_id::ChainId;
use app_core::genesis::GenesisError;
use serde::Serialize;
use thiserror::Error;

pub use db::Storage;

#[derive(Debug, Error)]
pub enum StorageOpenError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Migration(#[from] rusqlite_migration::Error),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored genesis is for {stored}, configured genesis is for {configured}")]
    GenesisMismatch { stored: ChainId, configured: ChainId },
    #[error("stored genesis cannot be used: {0}")]
    Genesis(#[from] GenesisError),
}

/// The open block the inclusion lane appends to.
#[derive(Debug, Clone, Copy)]
pub struct WriteHead {
    pub height: u64,
    pub block_created_at: SystemTime,
    pub block_tx_count: u64,
    // Global sequence number of the next included transaction.
    pub next_seq: u64,
}

impl WriteHead {
    pub fn increment_block_tx_count(&mut self, count: usize) {
        self.block_tx_count = self.block_tx_count.saturating_add(count as u64);
        self.next_seq = self.next_seq.saturating_add(count as u64);
    }

    pub fn move_to_next_block(&mut self, created_at: SystemTime) {
        self.height = self.height.saturating_add(1);
        self.block_created_at = created_at;
        self.block_tx_count = 0;
    }
}

/// A persisted, included transaction with its result.
#[derive(Debug, Clone, Serialize)]
pub struct StoredTx {
    pub seq: u64,
    pub height: u64,
    pub pos_in_block: u64,
    pub hash: B256,
    pub tx: Tx,
    pub declared_chain_id: String,
    pub routed_to: Option<String>,
    pub result: TxResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct Block {
    pub height: u64,
    pub created_at_ms: i64,
    pub sealed_at_ms: i64,
    pub txs: Vec<StoredTx>,
}

/// A sequencer message as observed in a sealed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequencedMsg {
    pub height: u64,
    pub tx_seq: u64,
    pub tx_hash: B256,
    pub msg_index: u64,
    pub chain_id: Bytes,
    pub data: Bytes,
    pub from_address: String,
}

/// A run of sequencer messages for one destination that always ends on a block
/// boundary. Resume with `from_height = next_height`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequencerPage {
    pub msgs: Vec<SequencedMsg>,
    // First height not fully covered by `msgs`.
    pub next_height: u64,
    pub has_more: bool,
}
