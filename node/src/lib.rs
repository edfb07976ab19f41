// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Base-chain node for metro shared sequencing.
//!
//! Flow: API -> inclusion lane -> SQLite block log -> broadcaster / readers.
//! The inclusion lane is the single writer that defines transaction order; routed
//! transactions are ordered and charged there but their messages only land in the log.
pub mod api;
pub mod block_broadcaster;
pub mod inclusion_lane;
pub mod storage;
pub mod testnode;

#[cfg(test)]
mod test_utils;
