// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod error;
mod ws;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::Router;
use axum::extract::{DefaultBodyLimit, Json, Path, Query, State};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::info;

use alloy_primitives::B256;
use app_core::Tx;
use app_core::address::parse_address;
use app_core::application::AccountInfo;
use app_core::chain_id::ChainId;

use crate::block_broadcaster::BlockBroadcaster;
use crate::inclusion_lane::{InclusionLaneInput, PendingTx, TxAck};
use crate::storage::{Block, SequencerPage, Storage, StoredTx};

pub use error::ApiError;

const DEFAULT_SEQUENCER_PAGE_LIMIT: usize = 100;
const MAX_SEQUENCER_PAGE_LIMIT: usize = 1_000;

#[derive(Clone)]
pub struct AppState {
    pub tx_sender: mpsc::Sender<InclusionLaneInput>,
    pub chain_id: ChainId,
    pub db_path: String,
    pub queue_timeout: Duration,
    pub broadcaster: BlockBroadcaster,
}

#[derive(Debug, Deserialize)]
struct SubmitTxRequest {
    tx: Tx,
}

#[derive(Debug, Serialize)]
struct SubmitTxResponse {
    ok: bool,
    #[serde(flatten)]
    ack: TxAck,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    chain_id: ChainId,
    latest_height: u64,
}

#[derive(Debug, Deserialize)]
struct SequencerQuery {
    #[serde(default)]
    from_height: Option<u64>,
    #[serde(default)]
    to_height: Option<u64>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SequencerResponse {
    chain_id: String,
    #[serde(flatten)]
    page: SequencerPage,
}

pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/txs", post(submit_tx))
        .route("/txs/{hash}", get(get_tx))
        .route("/blocks/latest", get(get_latest_block))
        .route("/blocks/{height}", get(get_block))
        .route("/accounts/{address}", get(get_account))
        .route("/status", get(get_status))
        .route("/sequencer/{chain_id}", get(get_sequencer_msgs))
        .route("/ws/subscribe", get(ws::subscribe))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

async fn submit_tx(
    State(state): State<Arc<AppState>>,
    req: Result<Json<SubmitTxRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<SubmitTxResponse>, ApiError> {
    let Json(req) = req.map_err(|err| ApiError::bad_request(format!("invalid JSON: {err}")))?;

    let (respond_to, recv) = oneshot::channel();
    let pending = PendingTx {
        tx: req.tx,
        respond_to,
        received_at: SystemTime::now(),
    };
    enqueue(&state, InclusionLaneInput::Tx(pending)).await?;

    let commit_result = recv
        .await
        .map_err(|_| ApiError::internal_error("inclusion lane dropped response"))?;
    let ack = commit_result.map_err(ApiError::from)?;

    info!(
        tx_hash = %ack.hash,
        height = ack.height,
        code = ack.code.as_u32(),
        routed_to = ack.routed_to.as_deref().unwrap_or_default(),
        "tx included"
    );

    Ok(Json(SubmitTxResponse { ok: true, ack }))
}

async fn get_tx(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<StoredTx>, ApiError> {
    let hash: B256 = hash
        .parse()
        .map_err(|err| ApiError::bad_request(format!("invalid tx hash: {err}")))?;
    read_storage(&state, move |storage| storage.load_tx(&hash))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("tx {hash} not found in a sealed block")))
}

async fn get_latest_block(State(state): State<Arc<AppState>>) -> Result<Json<Block>, ApiError> {
    read_storage(&state, |storage| {
        let height = storage.latest_sealed_height()?;
        if height == 0 {
            return Ok(None);
        }
        storage.load_block(height)
    })
    .await?
    .map(Json)
    .ok_or_else(|| ApiError::not_found("no sealed block yet"))
}

async fn get_block(
    State(state): State<Arc<AppState>>,
    Path(height): Path<u64>,
) -> Result<Json<Block>, ApiError> {
    read_storage(&state, move |storage| storage.load_block(height))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("block {height} is not sealed")))
}

async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<AccountInfo>, ApiError> {
    let address = parse_address(&address).map_err(|err| ApiError::bad_request(err.to_string()))?;
    let (respond_to, recv) = oneshot::channel();
    enqueue(
        &state,
        InclusionLaneInput::QueryAccount {
            address,
            respond_to,
        },
    )
    .await?;
    recv.await
        .map_err(|_| ApiError::internal_error("inclusion lane dropped response"))?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("account {address} not found")))
}

async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, ApiError> {
    let latest_height = read_storage(&state, |storage| storage.latest_sealed_height()).await?;
    Ok(Json(StatusResponse {
        chain_id: state.chain_id.clone(),
        latest_height,
    }))
}

async fn get_sequencer_msgs(
    State(state): State<Arc<AppState>>,
    Path(chain_id): Path<String>,
    Query(query): Query<SequencerQuery>,
) -> Result<Json<SequencerResponse>, ApiError> {
    if chain_id.is_empty() {
        return Err(ApiError::bad_request("destination chain id must not be empty"));
    }
    let from_height = query.from_height.unwrap_or(1);
    let to_height_exclusive = query.to_height.unwrap_or(u64::MAX);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SEQUENCER_PAGE_LIMIT)
        .clamp(1, MAX_SEQUENCER_PAGE_LIMIT);

    let destination = chain_id.clone().into_bytes();
    let page = read_storage(&state, move |storage| {
        storage.load_sequencer_page(&destination, from_height, to_height_exclusive, limit)
    })
    .await?;
    Ok(Json(SequencerResponse { chain_id, page }))
}

/// Runs a read against a fresh read-only connection off the async runtime.
async fn read_storage<T, F>(state: &AppState, read: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut Storage) -> rusqlite::Result<T> + Send + 'static,
{
    let db_path = state.db_path.clone();
    tokio::task::spawn_blocking(move || {
        let mut storage = Storage::open_read_only(&db_path)
            .map_err(|err| ApiError::internal_error(format!("open storage: {err}")))?;
        read(&mut storage).map_err(|err| ApiError::internal_error(format!("db error: {err}")))
    })
    .await
    .map_err(|err| ApiError::internal_error(format!("storage task failed: {err}")))?
}

async fn enqueue(state: &AppState, input: InclusionLaneInput) -> Result<(), ApiError> {
    match state
        .tx_sender
        .send_timeout(input, state.queue_timeout)
        .await
    {
        Ok(()) => Ok(()),
        Err(SendTimeoutError::Timeout(_)) => Err(ApiError::overloaded("queue full")),
        Err(SendTimeoutError::Closed(_)) => {
            Err(ApiError::internal_error("inclusion lane unavailable"))
        }
    }
}
