// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! In-process single-validator network for integration tests.
//!
//! A [`TestNode`] owns a temporary database, a keyring with one derived key per genesis
//! account, the inclusion lane, the block broadcaster and an HTTP server on an ephemeral
//! port. Blocks are sealed every `block_time`, empty or not, so height-based waits always
//! make progress.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use app_core::Coin;
use app_core::application::BankApp;
use app_core::chain_id::{ChainId, MalformedChainId};
use app_core::genesis::{ChainParams, Genesis, GenesisError};
use app_core::keys::{Keyring, KeyringError};
use tempfile::TempDir;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::{AppState, router};
use crate::block_broadcaster::{BlockBroadcaster, BlockBroadcasterConfig};
use crate::inclusion_lane::{
    InclusionLane, InclusionLaneConfig, InclusionLaneError, InclusionLaneInput,
    InclusionLaneStop,
};
use crate::storage::{Storage, StorageError, StorageOpenError};

pub const DEFAULT_TEST_CHAIN_ID: &str = "metro-test";
pub const DEFAULT_TEST_ACCOUNTS: [&str; 3] = ["validator", "alice", "bob"];

const TEST_QUEUE_CAPACITY: usize = 256;
const TEST_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum TestNodeError {
    #[error("cannot bind test listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("cannot create test node directory: {0}")]
    TempDir(#[source] std::io::Error),
    #[error(transparent)]
    ChainId(#[from] MalformedChainId),
    #[error(transparent)]
    Keyring(#[from] KeyringError),
    #[error(transparent)]
    Genesis(#[from] GenesisError),
    #[error(transparent)]
    StorageOpen(#[from] StorageOpenError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("db error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("broadcaster: {0}")]
    Broadcaster(String),
    #[error("storage task failed: {0}")]
    Task(String),
    #[error("timed out waiting for height {height}, latest is {latest}")]
    Timeout { height: u64, latest: u64 },
}

impl TestNodeError {
    /// Sandboxed environments may forbid binding sockets; tests skip in that case.
    pub fn is_bind_permission_denied(&self) -> bool {
        matches!(self, Self::Bind(err) if err.kind() == std::io::ErrorKind::PermissionDenied)
    }
}

#[derive(Debug, Clone)]
pub struct TestNodeConfig {
    pub chain_id: String,
    // Each name gets a derived key and a genesis balance in the bond denom.
    pub accounts: Vec<(String, U256)>,
    pub params: ChainParams,
    pub block_time: Duration,
    pub max_txs_per_block: usize,
}

impl Default for TestNodeConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_TEST_CHAIN_ID.to_string(),
            accounts: DEFAULT_TEST_ACCOUNTS
                .iter()
                .map(|name| (name.to_string(), U256::from(10_u64).pow(U256::from(18_u64))))
                .collect(),
            params: ChainParams::default(),
            block_time: Duration::from_millis(100),
            max_txs_per_block: 1_000,
        }
    }
}

pub struct TestNode {
    addr: SocketAddr,
    genesis: Genesis,
    keyring: Keyring,
    db_path: String,
    broadcaster: BlockBroadcaster,
    lane_stop: InclusionLaneStop,
    lane_handle: Option<JoinHandle<InclusionLaneError>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_task: Option<JoinHandle<()>>,
    _dir: TempDir,
}

impl TestNode {
    pub async fn start(config: TestNodeConfig) -> Result<Self, TestNodeError> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(TestNodeError::Bind)?;
        let addr = listener.local_addr().map_err(TestNodeError::Bind)?;

        let chain_id = ChainId::parse(&config.chain_id)?;
        let mut keyring = Keyring::default();
        let mut genesis = Genesis::new(chain_id.clone(), config.params.clone());
        for (name, amount) in &config.accounts {
            let address = keyring.derive(name)?;
            let coins = if amount.is_zero() {
                Vec::new()
            } else {
                vec![Coin::new(config.params.bond_denom.clone(), *amount)]
            };
            genesis = genesis.with_account(address, coins);
        }
        genesis.validate()?;

        let dir = tempfile::Builder::new()
            .prefix("metro-testnode-")
            .tempdir()
            .map_err(TestNodeError::TempDir)?;
        let db_path = dir.path().join("node.sqlite").to_string_lossy().into_owned();

        let mut storage = Storage::open(&db_path, "NORMAL")?;
        storage.ensure_genesis(&genesis)?;
        let app = BankApp::from_genesis(&genesis)?;

        let (tx_sender, rx) = mpsc::channel::<InclusionLaneInput>(TEST_QUEUE_CAPACITY);
        let lane = InclusionLane::new(
            rx,
            app,
            storage,
            InclusionLaneConfig {
                max_txs_per_chunk: 64,
                max_txs_per_block: config.max_txs_per_block.max(1),
                max_block_open: config.block_time,
                create_empty_blocks: true,
                idle_poll_interval: Duration::from_millis(2),
            },
        );
        let (lane_handle, lane_stop) = lane.spawn();

        let broadcaster = BlockBroadcaster::start(
            &db_path,
            BlockBroadcasterConfig {
                idle_poll_interval: Duration::from_millis(2),
                subscriber_buffer_capacity: 256,
            },
        )
        .map_err(TestNodeError::Broadcaster)?;

        let state = Arc::new(AppState {
            tx_sender,
            chain_id,
            db_path: db_path.clone(),
            queue_timeout: Duration::from_millis(500),
            broadcaster: broadcaster.clone(),
        });
        let app = router(state, TEST_MAX_BODY_BYTES);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let server_task = tokio::spawn(async move {
            if let Err(err) = server.await {
                tracing::warn!(error = %err, "test node server failed");
            }
        });
        info!(%addr, chain_id = %genesis.chain_id, "test node started");

        Ok(Self {
            addr,
            genesis,
            keyring,
            db_path,
            broadcaster,
            lane_stop,
            lane_handle: Some(lane_handle),
            shutdown_tx: Some(shutdown_tx),
            server_task: Some(server_task),
            _dir: dir,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.genesis.chain_id
    }

    pub fn genesis(&self) -> &Genesis {
        &self.genesis
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    pub fn address(&self, name: &str) -> Result<Address, KeyringError> {
        self.keyring.address(name)
    }

    pub async fn latest_height(&self) -> Result<u64, TestNodeError> {
        let db_path = self.db_path.clone();
        let joined = tokio::task::spawn_blocking(move || -> Result<u64, TestNodeError> {
            let mut storage = Storage::open_read_only(&db_path)?;
            Ok(storage.latest_sealed_height()?)
        })
        .await;
        match joined {
            Ok(result) => result,
            Err(err) => Err(TestNodeError::Task(err.to_string())),
        }
    }

    /// Waits until `height` is sealed and returns the latest sealed height.
    pub async fn wait_for_height(
        &self,
        height: u64,
        timeout: Duration,
    ) -> Result<u64, TestNodeError> {
        let started = tokio::time::Instant::now();
        loop {
            let latest = self.latest_height().await?;
            if latest >= height {
                return Ok(latest);
            }
            if started.elapsed() >= timeout {
                return Err(TestNodeError::Timeout { height, latest });
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn wait_for_next_block(&self, timeout: Duration) -> Result<u64, TestNodeError> {
        let latest = self.latest_height().await?;
        self.wait_for_height(latest.saturating_add(1), timeout).await
    }

    pub async fn shutdown(mut self) {
        self.broadcaster.request_shutdown();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.server_task.take() {
            let _ = tokio::time::timeout(Duration::from_secs(3), task).await;
        }
        self.lane_stop.request_shutdown();
        if let Some(task) = self.lane_handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(3), task).await;
        }
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.broadcaster.request_shutdown();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.lane_stop.request_shutdown();
        if let Some(task) = self.server_task.take() {
            task.abort();
        }
        if let Some(task) = self.lane_handle.take() {
            task.abort();
        }
    }
}
