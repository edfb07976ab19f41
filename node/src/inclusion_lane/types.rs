// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::time::SystemTime;

use alloy_primitives::{Address, B256};
use app_core::Tx;
use app_core::application::{AccountInfo, DeliveredTx, InvalidReason, ResultCode};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

pub type TxResponder = oneshot::Sender<Result<TxAck, SequencerError>>;

#[derive(Debug)]
pub struct PendingTx {
    pub tx: Tx,
    pub respond_to: TxResponder,
    pub received_at: SystemTime,
}

/// A delivered transaction waiting to be persisted with the current chunk.
#[derive(Debug)]
pub struct IncludedTx {
    pub delivered: DeliveredTx,
    pub received_at: SystemTime,
    pub respond_to: Option<TxResponder>,
}

impl IncludedTx {
    pub(super) fn ack(&self, height: u64) -> TxAck {
        let result = &self.delivered.result;
        TxAck {
            hash: self.delivered.hash,
            height,
            code: result.code,
            log: result.log.clone(),
            gas_wanted: result.gas_wanted,
            gas_used: result.gas_used,
            routed_to: self.delivered.route.destination().map(str::to_string),
        }
    }
}

/// Sent once the transaction is durably part of the open block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxAck {
    pub hash: B256,
    pub height: u64,
    pub code: ResultCode,
    pub log: String,
    pub gas_wanted: u64,
    pub gas_used: u64,
    pub routed_to: Option<String>,
}

#[derive(Debug)]
pub enum InclusionLaneInput {
    Tx(PendingTx),
    QueryAccount {
        address: Address,
        respond_to: oneshot::Sender<Option<AccountInfo>>,
    },
}

#[derive(Debug, Error, Clone)]
pub enum SequencerError {
    #[error("{0}")]
    Invalid(InvalidReason),
    #[error("{0}")]
    Internal(String),
}

impl SequencerError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
