// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! HTTP access to a metro node.
//!
//! The builder only needs [`AccountQuerier`]; broadcasting goes through [`TxBroadcaster`].
//! [`NodeClient`] implements both against the node's JSON API.

use std::future::Future;
use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes};
use app_core::Tx;
use app_core::application::{AccountInfo, ResultCode, TxResult};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ClientError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub trait AccountQuerier {
    /// Current account number, sequence and balances; `None` for unknown addresses.
    fn query_account(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<Option<AccountInfo>, ClientError>> + Send;
}

pub trait TxBroadcaster {
    /// Submits a signed transaction and resolves once it is part of the open block.
    fn broadcast_tx(&self, tx: &Tx) -> impl Future<Output = Result<TxResponse, ClientError>> + Send;
}

/// Inclusion receipt returned by `POST /txs`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TxResponse {
    pub hash: B256,
    pub height: u64,
    pub code: ResultCode,
    pub log: String,
    pub gas_wanted: u64,
    pub gas_used: u64,
    pub routed_to: Option<String>,
}

/// An included transaction as stored in a sealed block.
#[derive(Debug, Clone, Deserialize)]
pub struct CommittedTx {
    pub seq: u64,
    pub height: u64,
    pub hash: B256,
    pub tx: Tx,
    pub declared_chain_id: String,
    pub routed_to: Option<String>,
    pub result: TxResult,
}

/// A sequencer message read back from the block log.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SequencedMsg {
    pub height: u64,
    pub tx_seq: u64,
    pub tx_hash: B256,
    pub msg_index: u64,
    pub chain_id: Bytes,
    pub data: Bytes,
    pub from_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeStatus {
    pub chain_id: String,
    pub latest_height: u64,
}

#[derive(Serialize)]
struct SubmitTxRequest<'a> {
    tx: &'a Tx,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// One page of `/sequencer/{chain_id}`; pages end on block boundaries.
#[derive(Debug, Clone, Deserialize)]
pub struct SequencerPage {
    pub msgs: Vec<SequencedMsg>,
    pub next_height: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone)]
pub struct NodeClient {
    http: Client,
    base_url: String,
    poll_interval: Duration,
}

impl NodeClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn status(&self) -> Result<NodeStatus, ClientError> {
        let response = self.send(self.http.get(self.url("/status"))).await?;
        decode(response).await
    }

    pub async fn latest_height(&self) -> Result<u64, ClientError> {
        Ok(self.status().await?.latest_height)
    }

    /// The transaction once its block is sealed; `None` while it is pending or unknown.
    pub async fn query_tx(&self, hash: B256) -> Result<Option<CommittedTx>, ClientError> {
        let response = self
            .send(self.http.get(self.url(&format!("/txs/{hash}"))))
            .await?;
        decode_optional(response).await
    }

    pub async fn wait_for_tx(
        &self,
        hash: B256,
        timeout: Duration,
    ) -> Result<CommittedTx, ClientError> {
        let started = tokio::time::Instant::now();
        loop {
            if let Some(committed) = self.query_tx(hash).await? {
                return Ok(committed);
            }
            if started.elapsed() >= timeout {
                return Err(ClientError::Timeout(format!("tx {hash}")));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Waits for the block after the current latest one and returns its height.
    pub async fn wait_for_next_block(&self, timeout: Duration) -> Result<u64, ClientError> {
        let target = self.latest_height().await?.saturating_add(1);
        let started = tokio::time::Instant::now();
        loop {
            let latest = self.latest_height().await?;
            if latest >= target {
                return Ok(latest);
            }
            if started.elapsed() >= timeout {
                return Err(ClientError::Timeout(format!("block {target}")));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Sequencer messages for `destination` in block order, starting at `from_height`.
    /// Continue from the returned `next_height` while `has_more` is set.
    pub async fn sequencer_messages(
        &self,
        destination: &str,
        from_height: u64,
        limit: usize,
    ) -> Result<SequencerPage, ClientError> {
        let request = self
            .http
            .get(self.url(&format!("/sequencer/{destination}")))
            .query(&[
                ("from_height", from_height.to_string()),
                ("limit", limit.to_string()),
            ]);
        decode(self.send(request).await?).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, ClientError> {
        request.send().await.map_err(|err| {
            if err.is_connect() {
                ClientError::Unreachable {
                    url: self.base_url.clone(),
                    source: err,
                }
            } else {
                ClientError::Http(err)
            }
        })
    }
}

impl AccountQuerier for NodeClient {
    async fn query_account(&self, address: Address) -> Result<Option<AccountInfo>, ClientError> {
        let response = self
            .send(self.http.get(self.url(&format!("/accounts/{address}"))))
            .await?;
        decode_optional(response).await
    }
}

impl TxBroadcaster for NodeClient {
    async fn broadcast_tx(&self, tx: &Tx) -> Result<TxResponse, ClientError> {
        let request = self.http.post(self.url("/txs")).json(&SubmitTxRequest { tx });
        let response: TxResponse = decode(self.send(request).await?).await?;
        debug!(
            tx_hash = %response.hash,
            height = response.height,
            code = response.code.as_u32(),
            "tx accepted"
        );
        Ok(response)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    Err(rejection(status, response).await)
}

async fn decode_optional<T: DeserializeOwned>(response: Response) -> Result<Option<T>, ClientError> {
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    decode(response).await.map(Some)
}

async fn rejection(status: StatusCode, response: Response) -> ClientError {
    let text = match response.text().await {
        Ok(text) => text,
        Err(err) => return ClientError::Http(err),
    };
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => ClientError::Rejected {
            status: status.as_u16(),
            code: body.code,
            message: body.message,
        },
        Err(_) => ClientError::Rejected {
            status: status.as_u16(),
            code: status.canonical_reason().unwrap_or("UNKNOWN").to_string(),
            message: text,
        },
    }
}
