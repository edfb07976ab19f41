// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! `/ws/subscribe`: replays a destination chain's sequencer messages from storage, then
//! follows newly sealed blocks live without gaps or duplicates.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ApiError, AppState, read_storage};
use crate::storage::SequencedMsg;

// Heights replayed per storage read.
const REPLAY_WINDOW_HEIGHTS: u64 = 256;

#[derive(Debug, Deserialize)]
pub(super) struct SubscribeParams {
    chain_id: String,
    #[serde(default)]
    from_height: Option<u64>,
}

pub(super) async fn subscribe(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<SubscribeParams>,
) -> Result<Response, ApiError> {
    if params.chain_id.is_empty() {
        return Err(ApiError::bad_request("destination chain id must not be empty"));
    }
    Ok(ws.on_upgrade(move |socket| stream_sequencer_msgs(socket, state, params)))
}

async fn stream_sequencer_msgs(mut socket: WebSocket, state: Arc<AppState>, params: SubscribeParams) {
    // Subscribe before replaying so nothing sealed in between is missed.
    let mut subscription = state.broadcaster.subscribe();
    let live_start = subscription.live_start_height;
    let from_height = params.from_height.unwrap_or(live_start).max(1);
    let destination = params.chain_id.into_bytes();

    let mut cursor = from_height;
    while cursor < live_start {
        let window_end = cursor.saturating_add(REPLAY_WINDOW_HEIGHTS).min(live_start);
        let dest = destination.clone();
        let replay = read_storage(&state, move |storage| {
            storage.load_sequencer_msgs(&dest, cursor, window_end, usize::MAX)
        })
        .await;
        let msgs = match replay {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "ws replay failed");
                return;
            }
        };
        for msg in &msgs {
            if send_msg(&mut socket, msg).await.is_err() {
                return;
            }
        }
        cursor = window_end;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => return,
                Some(Err(err)) => {
                    debug!(error = %err, "ws receive failed");
                    return;
                }
                Some(Ok(_)) => {}
            },
            event = subscription.receiver.recv() => {
                let Some(block) = event else {
                    // Dropped by the broadcaster for falling behind.
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                };
                if block.height < from_height {
                    continue;
                }
                for msg in block.msgs.iter().filter(|msg| msg.chain_id[..] == destination[..]) {
                    if send_msg(&mut socket, msg).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

async fn send_msg(socket: &mut WebSocket, msg: &SequencedMsg) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(msg) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "cannot serialize sequencer message");
            return Ok(());
        }
    };
    socket.send(Message::Text(text.into())).await
}
