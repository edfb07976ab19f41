// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod error;
mod lane;
mod types;

pub use error::{CatchUpError, InclusionLaneError};
pub use lane::{InclusionLane, InclusionLaneConfig, InclusionLaneStop};
pub use types::{IncludedTx, InclusionLaneInput, PendingTx, SequencerError, TxAck};
