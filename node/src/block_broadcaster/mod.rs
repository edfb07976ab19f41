// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Fans out every newly sealed block's sequencer messages to live subscribers.
//!
//! The poller follows sealed heights in storage, so subscribers see exactly what the block
//! log holds and never the open block.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::storage::{SequencedMsg, Storage};

#[derive(Debug, Clone, Copy)]
pub struct BlockBroadcasterConfig {
    pub idle_poll_interval: Duration,
    pub subscriber_buffer_capacity: usize,
}

#[derive(Clone)]
pub struct BlockBroadcaster {
    inner: Arc<BlockBroadcasterInner>,
}

pub struct LiveSubscription {
    pub receiver: mpsc::Receiver<BroadcastBlock>,
    // First height this subscription will receive live; earlier heights come from storage.
    pub live_start_height: u64,
}

#[derive(Debug, Clone)]
pub struct BroadcastBlock {
    pub height: u64,
    pub msgs: Arc<Vec<SequencedMsg>>,
}

struct BlockBroadcasterInner {
    subscriber_buffer_capacity: usize,
    // Next height to be broadcast.
    head_height: AtomicU64,
    next_subscriber_id: AtomicU64,
    stop_requested: AtomicBool,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<BroadcastBlock>>>,
}

impl BlockBroadcasterInner {
    fn new(subscriber_buffer_capacity: usize, head_height: u64) -> Self {
        Self {
            subscriber_buffer_capacity: subscriber_buffer_capacity.max(1),
            head_height: AtomicU64::new(head_height),
            next_subscriber_id: AtomicU64::new(0),
            stop_requested: AtomicBool::new(false),
            subscribers: Mutex::new(HashMap::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Published,
    Idle,
    Failed,
}

impl BlockBroadcaster {
    pub fn start(
        db_path: &str,
        config: BlockBroadcasterConfig,
    ) -> std::result::Result<Self, String> {
        let mut storage = Storage::open_read_only(db_path)
            .map_err(|err| format!("open broadcaster storage failed: {err}"))?;
        let latest = storage
            .latest_sealed_height()
            .map_err(|err| format!("load broadcaster head height failed: {err}"))?;

        let inner = Arc::new(BlockBroadcasterInner::new(
            config.subscriber_buffer_capacity,
            latest.saturating_add(1),
        ));

        let worker_inner = Arc::clone(&inner);
        tokio::task::spawn_blocking(move || {
            run_poller(worker_inner, storage, config.idle_poll_interval);
        });

        Ok(Self { inner })
    }

    pub fn request_shutdown(&self) {
        self.inner.stop_requested.store(true, Ordering::Relaxed);
    }

    pub fn subscribe(&self) -> LiveSubscription {
        let (tx, rx) = mpsc::channel(self.inner.subscriber_buffer_capacity);
        let subscriber_id = self
            .inner
            .next_subscriber_id
            .fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .expect("block broadcaster subscribers mutex poisoned");
        subscribers.insert(subscriber_id, tx);
        let live_start_height = self.inner.head_height.load(Ordering::Acquire);

        LiveSubscription {
            receiver: rx,
            live_start_height,
        }
    }
}

fn run_poller(inner: Arc<BlockBroadcasterInner>, mut storage: Storage, idle_poll_interval: Duration) {
    let mut next_height = inner.head_height.load(Ordering::Acquire);

    while !inner.stop_requested.load(Ordering::Relaxed) {
        match poll_once(&inner, &mut storage, &mut next_height) {
            PollOutcome::Published => {}
            PollOutcome::Idle | PollOutcome::Failed => std::thread::sleep(idle_poll_interval),
        }
    }
}

/// Publishes every sealed height from `next_height` up to the latest one. A failed read
/// leaves `next_height` at the failing block so the next poll retries it.
fn poll_once(
    inner: &BlockBroadcasterInner,
    storage: &mut Storage,
    next_height: &mut u64,
) -> PollOutcome {
    let latest = match storage.latest_sealed_height() {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "block broadcaster failed to read latest sealed height");
            return PollOutcome::Failed;
        }
    };
    if latest < *next_height {
        return PollOutcome::Idle;
    }

    while *next_height <= latest {
        let msgs = match storage.load_block_sequencer_msgs(*next_height) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    error = %err,
                    height = *next_height,
                    "block broadcaster failed to read sealed block"
                );
                return PollOutcome::Failed;
            }
        };
        let event = BroadcastBlock {
            height: *next_height,
            msgs: Arc::new(msgs),
        };
        *next_height = next_height.saturating_add(1);
        // Publish the new head while holding the subscriber lock so a concurrent
        // subscribe either gets this event live or replays it from storage.
        fanout_event(inner, event, *next_height);
    }
    PollOutcome::Published
}

fn fanout_event(inner: &BlockBroadcasterInner, event: BroadcastBlock, next_height: u64) {
    let mut to_remove = Vec::new();
    let mut subscribers = inner
        .subscribers
        .lock()
        .expect("block broadcaster subscribers mutex poisoned");
    inner.head_height.store(next_height, Ordering::Release);

    for (subscriber_id, sender) in subscribers.iter() {
        match sender.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => {
                to_remove.push(*subscriber_id);
                debug!(subscriber_id, "block broadcaster removed closed subscriber");
            }
            Err(TrySendError::Full(_)) => {
                to_remove.push(*subscriber_id);
                warn!(
                    subscriber_id,
                    "block broadcaster dropped slow subscriber due to full channel"
                );
            }
        }
    }

    for subscriber_id in to_remove {
        subscribers.remove(&subscriber_id);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        BlockBroadcaster, BlockBroadcasterConfig, BlockBroadcasterInner, BroadcastBlock,
        PollOutcome, poll_once,
    };
    use crate::storage::Storage;
    use crate::test_utils::fixture;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn config() -> BlockBroadcasterConfig {
        BlockBroadcasterConfig {
            idle_poll_interval: Duration::from_millis(2),
            subscriber_buffer_capacity: 16,
        }
    }

    async fn recv_block(
        receiver: &mut tokio::sync::mpsc::Receiver<BroadcastBlock>,
    ) -> BroadcastBlock {
        tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .expect("wait for block")
            .expect("broadcaster channel open")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn subscribers_receive_each_sealed_height_in_order() {
        let fx = fixture("broadcaster-order");
        let mut storage = Storage::open(&fx.path, "NORMAL").expect("open storage");
        storage.ensure_genesis(&fx.genesis).expect("store genesis");
        let mut head = storage.load_open_block().expect("open block");
        storage.seal_block(&mut head).expect("seal block 1");

        let broadcaster = BlockBroadcaster::start(&fx.path, config()).expect("start");
        let mut subscription = broadcaster.subscribe();
        assert_eq!(subscription.live_start_height, 2);

        storage.seal_block(&mut head).expect("seal block 2");
        storage.seal_block(&mut head).expect("seal block 3");

        let first = recv_block(&mut subscription.receiver).await;
        let second = recv_block(&mut subscription.receiver).await;
        broadcaster.request_shutdown();

        assert_eq!(first.height, 2);
        assert_eq!(second.height, 3);
        assert!(first.msgs.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_subscribers_are_dropped() {
        let fx = fixture("broadcaster-full");
        let mut storage = Storage::open(&fx.path, "NORMAL").expect("open storage");
        storage.ensure_genesis(&fx.genesis).expect("store genesis");
        let mut head = storage.load_open_block().expect("open block");

        let mut cfg = config();
        cfg.subscriber_buffer_capacity = 1;
        let broadcaster = BlockBroadcaster::start(&fx.path, cfg).expect("start");
        let mut slow = broadcaster.subscribe();

        for _ in 0..3 {
            storage.seal_block(&mut head).expect("seal block");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let first = recv_block(&mut slow.receiver).await;
        assert_eq!(first.height, 1);
        let closed = tokio::time::timeout(Duration::from_secs(2), slow.receiver.recv())
            .await
            .expect("wait for close");
        broadcaster.request_shutdown();
        assert!(closed.is_none(), "slow subscriber must be disconnected");
    }

    #[test]
    fn failed_block_read_is_retried_from_the_same_height() {
        let fx = fixture("broadcaster-retry");
        let mut storage = Storage::open(&fx.path, "NORMAL").expect("open storage");
        storage.ensure_genesis(&fx.genesis).expect("store genesis");
        let mut head = storage.load_open_block().expect("open block");
        storage.seal_block(&mut head).expect("seal block 1");

        let inner = BlockBroadcasterInner::new(4, 1);
        let mut reader = Storage::open_read_only(&fx.path).expect("open reader");
        let mut next_height = 1;
        assert_eq!(
            poll_once(&inner, &mut reader, &mut next_height),
            PollOutcome::Published
        );
        assert_eq!(next_height, 2);
        assert_eq!(
            poll_once(&inner, &mut reader, &mut next_height),
            PollOutcome::Idle
        );

        let admin = rusqlite::Connection::open(&fx.path).expect("open admin connection");
        admin
            .execute_batch("ALTER TABLE sequencer_msgs RENAME TO sequencer_msgs_hidden")
            .expect("hide table");
        storage.seal_block(&mut head).expect("seal block 2");
        assert_eq!(
            poll_once(&inner, &mut reader, &mut next_height),
            PollOutcome::Failed
        );
        assert_eq!(next_height, 2, "failed height is not skipped");
        assert_eq!(inner.head_height.load(Ordering::Acquire), 2);

        admin
            .execute_batch("ALTER TABLE sequencer_msgs_hidden RENAME TO sequencer_msgs")
            .expect("restore table");
        assert_eq!(
            poll_once(&inner, &mut reader, &mut next_height),
            PollOutcome::Published
        );
        assert_eq!(next_height, 3);
        assert_eq!(inner.head_height.load(Ordering::Acquire), 3);
    }
}
