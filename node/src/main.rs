// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use app_core::application::BankApp;
use app_core::chain_id::ChainId;
use app_core::consts::native_coin;
use app_core::genesis::{ChainParams, Genesis};
use app_core::keys::Keyring;
use tracing_subscriber::EnvFilter;

use metro_node::api::AppState;
use metro_node::block_broadcaster::{BlockBroadcaster, BlockBroadcasterConfig};
use metro_node::inclusion_lane::{
    InclusionLane, InclusionLaneConfig, InclusionLaneError, InclusionLaneInput,
};
use metro_node::storage;

const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:26657";
const DEFAULT_DB_PATH: &str = "metro.db";
const DEFAULT_CHAIN_ID: &str = "metro";
const DEFAULT_DEV_ACCOUNT: &str = "validator";
const DEFAULT_DEV_BALANCE: u64 = 1_000_000_000_000;
const DEFAULT_QUEUE_CAP: usize = 1024;
const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 100;
const DEFAULT_MAX_TXS_PER_CHUNK: usize = 64;
const DEFAULT_MAX_TXS_PER_BLOCK: usize = 5_000;
const DEFAULT_BLOCK_TIME: Duration = Duration::from_secs(1);
const DEFAULT_INCLUSION_LANE_IDLE_POLL_INTERVAL: Duration = Duration::from_millis(2);
const DEFAULT_BROADCASTER_IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);
const DEFAULT_SUBSCRIBER_BUFFER_CAPACITY: usize = 256;
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
const DEFAULT_SQLITE_SYNCHRONOUS: &str = "NORMAL";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let genesis = config.load_genesis()?;

    let mut storage = storage::Storage::open(&config.db_path, &config.sqlite_synchronous)?;
    let genesis = storage.ensure_genesis(&genesis)?;
    let app = BankApp::from_genesis(&genesis)?;
    tracing::info!(
        chain_id = %genesis.chain_id,
        accounts = genesis.accounts.len(),
        "genesis loaded"
    );

    let (tx, rx) = tokio::sync::mpsc::channel::<InclusionLaneInput>(config.queue_capacity);
    let inclusion_lane = InclusionLane::new(
        rx,
        app,
        storage,
        InclusionLaneConfig {
            max_txs_per_chunk: config.max_txs_per_chunk,
            max_txs_per_block: config.max_txs_per_block,
            max_block_open: config.block_time,
            create_empty_blocks: config.create_empty_blocks,
            idle_poll_interval: config.inclusion_lane_idle_poll_interval,
        },
    );
    let (mut inclusion_lane_handle, inclusion_lane_stop) = inclusion_lane.spawn();

    let broadcaster = BlockBroadcaster::start(
        &config.db_path,
        BlockBroadcasterConfig {
            idle_poll_interval: config.broadcaster_idle_poll_interval,
            subscriber_buffer_capacity: config.subscriber_buffer_capacity,
        },
    )?;

    let state = Arc::new(AppState {
        tx_sender: tx,
        chain_id: genesis.chain_id.clone(),
        db_path: config.db_path.clone(),
        queue_timeout: Duration::from_millis(config.queue_timeout_ms),
        broadcaster: broadcaster.clone(),
    });

    let app = metro_node::api::router(state, config.max_body_bytes);
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;

    tracing::info!(address = %config.http_addr, "listening");
    tokio::select! {
        server_result = axum::serve(listener, app) => {
            broadcaster.request_shutdown();
            inclusion_lane_stop.request_shutdown();
            let lane_result = inclusion_lane_handle.await;
            match lane_result {
                Ok(InclusionLaneError::ShutdownRequested) => {}
                Ok(err) => return Err(format!("inclusion lane exited during shutdown: {err}").into()),
                Err(join_err) => {
                    return Err(format!("inclusion lane join error during shutdown: {join_err}").into())
                }
            }
            server_result?;
        }
        lane_result = &mut inclusion_lane_handle => {
            broadcaster.request_shutdown();
            match lane_result {
                Ok(err) => return Err(format!("inclusion lane exited: {err}").into()),
                Err(join_err) => {
                    return Err(format!("inclusion lane join error: {join_err}").into())
                }
            }
        }
    }

    Ok(())
}

struct Config {
    http_addr: String,
    db_path: String,
    // Genesis file; when unset a single-account development genesis is used.
    genesis_path: Option<String>,
    chain_id: String,
    queue_capacity: usize,
    queue_timeout_ms: u64,
    max_txs_per_chunk: usize,
    max_txs_per_block: usize,
    block_time: Duration,
    create_empty_blocks: bool,
    inclusion_lane_idle_poll_interval: Duration,
    broadcaster_idle_poll_interval: Duration,
    subscriber_buffer_capacity: usize,
    max_body_bytes: usize,
    sqlite_synchronous: String,
}

impl Config {
    fn from_env() -> Self {
        Self {
            http_addr: env_string("METRO_HTTP_ADDR", DEFAULT_HTTP_ADDR),
            db_path: env_string("METRO_DB_PATH", DEFAULT_DB_PATH),
            genesis_path: std::env::var("METRO_GENESIS_PATH").ok(),
            chain_id: env_string("METRO_CHAIN_ID", DEFAULT_CHAIN_ID),
            queue_capacity: env_usize("METRO_QUEUE_CAP", DEFAULT_QUEUE_CAP).max(1),
            queue_timeout_ms: env_u64("METRO_QUEUE_TIMEOUT_MS", DEFAULT_QUEUE_TIMEOUT_MS),
            max_txs_per_chunk: env_usize("METRO_MAX_TXS_PER_CHUNK", DEFAULT_MAX_TXS_PER_CHUNK)
                .max(1),
            max_txs_per_block: env_usize("METRO_MAX_TXS_PER_BLOCK", DEFAULT_MAX_TXS_PER_BLOCK)
                .max(1),
            block_time: Duration::from_millis(
                env_u64("METRO_BLOCK_TIME_MS", DEFAULT_BLOCK_TIME.as_millis() as u64).max(1),
            ),
            create_empty_blocks: env_bool("METRO_CREATE_EMPTY_BLOCKS", true),
            inclusion_lane_idle_poll_interval: Duration::from_millis(
                env_u64(
                    "METRO_INCLUSION_LANE_IDLE_POLL_INTERVAL_MS",
                    DEFAULT_INCLUSION_LANE_IDLE_POLL_INTERVAL.as_millis() as u64,
                )
                .max(1),
            ),
            broadcaster_idle_poll_interval: Duration::from_millis(
                env_u64(
                    "METRO_BROADCASTER_IDLE_POLL_INTERVAL_MS",
                    DEFAULT_BROADCASTER_IDLE_POLL_INTERVAL.as_millis() as u64,
                )
                .max(1),
            ),
            subscriber_buffer_capacity: env_usize(
                "METRO_SUBSCRIBER_BUFFER_CAPACITY",
                DEFAULT_SUBSCRIBER_BUFFER_CAPACITY,
            )
            .max(1),
            max_body_bytes: env_usize("METRO_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES),
            sqlite_synchronous: env_string("METRO_SQLITE_SYNCHRONOUS", DEFAULT_SQLITE_SYNCHRONOUS),
        }
    }

    fn load_genesis(&self) -> Result<Genesis, Box<dyn std::error::Error>> {
        if let Some(path) = self.genesis_path.as_deref() {
            let bytes = std::fs::read(path)
                .map_err(|err| format!("cannot read genesis {path}: {err}"))?;
            return Ok(Genesis::from_json(&bytes)?);
        }

        let chain_id = ChainId::parse(&self.chain_id)?;
        let mut keyring = Keyring::default();
        let validator = keyring.derive(DEFAULT_DEV_ACCOUNT)?;
        tracing::warn!(
            %validator,
            "METRO_GENESIS_PATH unset: using a development genesis with a derived key"
        );
        let genesis = Genesis::new(chain_id, ChainParams::default()).with_account(
            validator,
            vec![native_coin(U256::from(DEFAULT_DEV_BALANCE))],
        );
        genesis.validate()?;
        Ok(genesis)
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
