// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use app_core::application::{AppError, ResultCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InclusionLaneError {
    #[error("inclusion lane input channel closed")]
    ChannelClosed,
    #[error("inclusion lane shutdown requested")]
    ShutdownRequested,
    #[error("application catchup failed")]
    CatchUp {
        #[source]
        source: CatchUpError,
    },
    #[error("cannot load open block")]
    LoadOpenBlock {
        #[source]
        source: rusqlite::Error,
    },
    #[error("append txs failed")]
    AppendTxs {
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to seal block")]
    SealBlock {
        #[source]
        source: rusqlite::Error,
    },
}

#[derive(Debug, Error)]
pub enum CatchUpError {
    #[error("cannot load replay entries")]
    LoadReplay {
        #[source]
        source: rusqlite::Error,
    },
    #[error("replay of tx {seq} failed")]
    ReplayInternal {
        seq: u64,
        #[source]
        source: AppError,
    },
    #[error("replay of tx {seq} diverged: stored code {stored:?}, replayed {replayed}")]
    Diverged {
        seq: u64,
        stored: ResultCode,
        replayed: String,
    },
}
