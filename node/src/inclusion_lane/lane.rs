// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use crate::storage::{Storage, WriteHead};
use alloy_primitives::Address;
use app_core::application::{AccountInfo, AppError, Application, ExecutionOutcome};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::error::CatchUpError;
use super::{IncludedTx, InclusionLaneError, InclusionLaneInput, PendingTx, SequencerError};

#[derive(Debug, Clone, Copy)]
pub struct InclusionLaneConfig {
    pub max_txs_per_chunk: usize,

    // Hard cap: chunks are sized to the block's remaining capacity.
    pub max_txs_per_block: usize,

    pub max_block_open: Duration,

    // Seal blocks on time even when nothing was included.
    pub create_empty_blocks: bool,

    pub idle_poll_interval: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct InclusionLaneStop {
    shutdown: Arc<AtomicBool>,
}

impl InclusionLaneStop {
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

type AccountQuery = (Address, oneshot::Sender<Option<AccountInfo>>);

/// The single writer: executes transactions in arrival order, persists them into the open
/// block and seals blocks. Acks go out only after the chunk is committed.
pub struct InclusionLane<A: Application + 'static> {
    rx: mpsc::Receiver<InclusionLaneInput>,
    stop: InclusionLaneStop,
    app: A,
    storage: Storage,
    config: InclusionLaneConfig,
}

impl<A: Application + 'static> InclusionLane<A> {
    pub fn new(
        rx: mpsc::Receiver<InclusionLaneInput>,
        app: A,
        storage: Storage,
        config: InclusionLaneConfig,
    ) -> Self {
        Self {
            rx,
            stop: InclusionLaneStop::default(),
            app,
            storage,
            config,
        }
    }

    pub fn spawn(self) -> (JoinHandle<InclusionLaneError>, InclusionLaneStop) {
        let stop = self.stop.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let mut lane = self;
            match lane.run_forever() {
                Err(err) => err,
                Ok(()) => unreachable!("inclusion lane run loop is expected to be non-terminating"),
            }
        });
        (handle, stop)
    }

    fn run_forever(&mut self) -> Result<(), InclusionLaneError> {
        self.run_catch_up()?;
        let mut head = self
            .storage
            .load_open_block()
            .map_err(|source| InclusionLaneError::LoadOpenBlock { source })?;
        info!(
            height = head.height,
            next_seq = head.next_seq,
            "inclusion lane started"
        );

        let mut included = Vec::with_capacity(self.config.max_txs_per_chunk.max(1));
        let mut queries = Vec::new();

        while !self.stop.is_shutdown_requested() {
            let processed = self.process_chunk(&mut head, &mut included, &mut queries)?;

            if head.should_seal_block(&self.config) {
                self.seal_block(&mut head)?;
            }

            if processed == 0 {
                thread::sleep(self.config.idle_poll_interval);
            }
        }

        Err(InclusionLaneError::ShutdownRequested)
    }

    fn run_catch_up(&mut self) -> Result<(), InclusionLaneError> {
        catch_up_application(&mut self.app, &mut self.storage)
            .map_err(|source| InclusionLaneError::CatchUp { source })
    }

    fn process_chunk(
        &mut self,
        head: &mut WriteHead,
        included: &mut Vec<IncludedTx>,
        queries: &mut Vec<AccountQuery>,
    ) -> Result<usize, InclusionLaneError> {
        let remaining = (self.config.max_txs_per_block as u64).saturating_sub(head.block_tx_count);
        let max_chunk = (self.config.max_txs_per_chunk.max(1) as u64).min(remaining.max(1));
        let processed = dequeue_and_execute_chunk(
            &mut self.rx,
            &mut self.app,
            head.height,
            max_chunk as usize,
            included,
            queries,
        )?;

        self.persist_included_txs(head, included)?;
        for item in included.drain(..) {
            let ack = item.ack(head.height);
            if let Some(respond_to) = item.respond_to {
                let _ = respond_to.send(Ok(ack));
            }
        }

        // Answered after the commit so a client never sees a sequence ahead of storage.
        for (address, respond_to) in queries.drain(..) {
            let _ = respond_to.send(self.app.account(address));
        }

        Ok(processed)
    }

    fn persist_included_txs(
        &mut self,
        head: &mut WriteHead,
        included: &mut Vec<IncludedTx>,
    ) -> Result<(), InclusionLaneError> {
        self.storage
            .append_txs_chunk(head, included.as_slice())
            .map_err(|source| {
                Self::respond_internal_to_all(included, format!("db error: {source}"));
                InclusionLaneError::AppendTxs { source }
            })
    }

    fn seal_block(&mut self, head: &mut WriteHead) -> Result<(), InclusionLaneError> {
        let height = head.height;
        let tx_count = head.block_tx_count;
        self.storage
            .seal_block(head)
            .map_err(|source| InclusionLaneError::SealBlock { source })?;
        debug!(height, tx_count, "sealed block");
        Ok(())
    }

    fn respond_internal_to_all(pending: &mut Vec<IncludedTx>, message: String) {
        for item in pending.drain(..) {
            if let Some(respond_to) = item.respond_to {
                let _ = respond_to.send(Err(SequencerError::internal(message.clone())));
            }
        }
    }
}

impl WriteHead {
    fn should_seal_block_by_time(&self, config: &InclusionLaneConfig) -> bool {
        let age = SystemTime::now()
            .duration_since(self.block_created_at)
            .unwrap_or_default();
        age >= config.max_block_open
    }

    fn should_seal_block_by_size(&self, config: &InclusionLaneConfig) -> bool {
        self.block_tx_count >= config.max_txs_per_block as u64
    }

    fn should_seal_block(&self, config: &InclusionLaneConfig) -> bool {
        let block_has_activity = self.block_tx_count > 0 || config.create_empty_blocks;
        self.should_seal_block_by_size(config)
            || (block_has_activity && self.should_seal_block_by_time(config))
    }
}

fn execute_tx(
    app: &mut impl Application,
    item: PendingTx,
    height: u64,
    included: &mut Vec<IncludedTx>,
) {
    match app.check_and_deliver_tx(&item.tx, height) {
        Ok(ExecutionOutcome::Included(delivered)) => included.push(IncludedTx {
            delivered,
            received_at: item.received_at,
            respond_to: Some(item.respond_to),
        }),
        Ok(ExecutionOutcome::Invalid(reason)) => {
            debug!(code = reason.code(), %reason, "rejected tx");
            let _ = item.respond_to.send(Err(SequencerError::Invalid(reason)));
        }
        Err(AppError::Internal { reason }) => {
            let _ = item.respond_to.send(Err(SequencerError::internal(reason)));
        }
    }
}

/// Returns how many inputs were taken off the channel.
fn dequeue_and_execute_chunk(
    rx: &mut mpsc::Receiver<InclusionLaneInput>,
    app: &mut impl Application,
    height: u64,
    max_chunk: usize,
    included: &mut Vec<IncludedTx>,
    queries: &mut Vec<AccountQuery>,
) -> Result<usize, InclusionLaneError> {
    let mut executed_txs = 0_usize;
    let mut processed = 0_usize;

    while executed_txs < max_chunk {
        match rx.try_recv() {
            Ok(InclusionLaneInput::Tx(item)) => {
                execute_tx(app, item, height, included);
                executed_txs = executed_txs.saturating_add(1);
            }
            Ok(InclusionLaneInput::QueryAccount {
                address,
                respond_to,
            }) => queries.push((address, respond_to)),
            Err(mpsc::error::TryRecvError::Empty) => return Ok(processed),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                if processed == 0 {
                    return Err(InclusionLaneError::ChannelClosed);
                }
                return Ok(processed);
            }
        }
        processed = processed.saturating_add(1);
    }
    Ok(processed)
}

/// Re-executes every stored transaction the application has not seen yet, at the height it
/// was included, and checks the replay reproduces the stored result code.
fn catch_up_application(
    app: &mut impl Application,
    storage: &mut Storage,
) -> Result<(), CatchUpError> {
    let already_executed = app.executed_tx_count();
    let replay = storage
        .load_ordered_txs_from(already_executed)
        .map_err(|source| CatchUpError::LoadReplay { source })?;
    let replay_len = replay.len();

    for stored in replay {
        let outcome = app
            .check_and_deliver_tx(&stored.tx, stored.height)
            .map_err(|source| CatchUpError::ReplayInternal {
                seq: stored.seq,
                source,
            })?;
        match outcome {
            ExecutionOutcome::Included(delivered)
                if delivered.result.code == stored.result.code => {}
            ExecutionOutcome::Included(delivered) => {
                return Err(CatchUpError::Diverged {
                    seq: stored.seq,
                    stored: stored.result.code,
                    replayed: format!("{:?}", delivered.result.code),
                });
            }
            ExecutionOutcome::Invalid(reason) => {
                return Err(CatchUpError::Diverged {
                    seq: stored.seq,
                    stored: stored.result.code,
                    replayed: format!("rejected: {reason}"),
                });
            }
        }
    }

    if replay_len > 0 {
        info!(replayed = replay_len, "application caught up with storage");
    }
    Ok(())
}
