mod convert;
mod requests;

pub use convert::*;

use std::{sync::Arc, time::Duration};

use atomic_common::{
    abi::Abi,
    chain::Block,
    config::{RECONNECT_BASE_DELAY_MS, RECONNECT_MAX_DELAY_MS},
    task::spawn_task,
};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::deserializer::{DeserializerPool, PoolError};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Decode(#[from] PoolError),
    #[error("block queue receiver dropped")]
    ChannelClosed,
}

/// What the reader hands to the state receiver.
#[derive(Debug)]
pub enum ReaderEvent {
    Block(Box<Block>),
    /// The chain switched branch; all state at or above `at` must be
    /// rolled back before the next delivered block applies.
    Fork { at: u32 },
}

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub start_block: u32,
    pub stop_block: Option<u32>,
    pub blocks_per_ack: u32,
    pub deserializer_workers: usize,
    pub queue_size: usize,
}

/// Maintains the persistent state-history subscription and feeds decoded
/// blocks into a bounded queue.
///
/// The queue bound is the backpressure mechanism: a full pipeline suspends
/// the reader before it acknowledges the next batch to the socket.
pub struct ShipReader {
    url: String,
    options: ReaderOptions,
}

impl ShipReader {
    pub fn new(url: &str, options: ReaderOptions) -> Self {
        Self {
            url: url.to_string(),
            options,
        }
    }

    pub fn start(self) -> (mpsc::Receiver<ReaderEvent>, JoinHandle<Result<(), ReaderError>>) {
        let (sender, receiver) = mpsc::channel(self.options.queue_size);
        let handle = spawn_task("ship-reader", run_loop(self.url, self.options, sender));
        (receiver, handle)
    }
}

async fn run_loop(
    url: String,
    options: ReaderOptions,
    sender: mpsc::Sender<ReaderEvent>,
) -> Result<(), ReaderError> {
    let mut next_start = options.start_block;
    let mut last_delivered: Option<(u32, String)> = None;
    let mut backoff = RECONNECT_BASE_DELAY_MS;

    loop {
        let outcome = session(
            &url,
            &options,
            &mut next_start,
            &mut last_delivered,
            &mut backoff,
            &sender,
        )
        .await;

        match outcome {
            Ok(()) => {
                info!("Block reader finished at block {}", next_start.saturating_sub(1));
                return Ok(());
            }
            Err(ReaderError::ChannelClosed) => {
                debug!("Receiver is gone, stopping block reader");
                return Ok(());
            }
            Err(e) => {
                warn!(
                    "State history session failed: {}; reconnecting at block {} in {}ms",
                    e, next_start, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(RECONNECT_MAX_DELAY_MS);
            }
        }

        if sender.is_closed() {
            return Ok(());
        }
    }
}

async fn read_protocol_abi(ws: &mut WsStream) -> Result<Abi, ReaderError> {
    // the server's first frame is the protocol ABI as JSON text
    loop {
        let message = ws
            .next()
            .await
            .ok_or_else(|| ReaderError::Transport("connection closed before ABI".into()))?
            .map_err(|e| ReaderError::Transport(e.to_string()))?;

        match message {
            Message::Text(text) => {
                return Abi::from_json(&text)
                    .map_err(|e| ReaderError::Protocol(format!("invalid protocol ABI: {}", e)))
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => {
                return Err(ReaderError::Protocol(format!(
                    "expected ABI text frame, got {:?}",
                    other
                )))
            }
        }
    }
}

async fn session(
    url: &str,
    options: &ReaderOptions,
    next_start: &mut u32,
    last_delivered: &mut Option<(u32, String)>,
    backoff: &mut u64,
    sender: &mpsc::Sender<ReaderEvent>,
) -> Result<(), ReaderError> {
    info!("Connecting to state history endpoint {}", url);
    let (mut ws, _) = connect_async(url)
        .await
        .map_err(|e| ReaderError::Transport(e.to_string()))?;

    let abi = read_protocol_abi(&mut ws).await?;
    let pool = Arc::new(DeserializerPool::new(
        "ship",
        Arc::new(abi),
        options.deserializer_workers,
    ));

    ws.send(Message::Binary(requests::get_status_request()))
        .await
        .map_err(|e| ReaderError::Transport(e.to_string()))?;

    let end_block = options.stop_block.unwrap_or(u32::MAX);
    info!(
        "Requesting blocks [{}, {}) with {} per ack",
        next_start, end_block, options.blocks_per_ack
    );
    ws.send(Message::Binary(requests::get_blocks_request(
        *next_start,
        end_block,
        options.blocks_per_ack,
    )))
    .await
    .map_err(|e| ReaderError::Transport(e.to_string()))?;

    let mut unacked: u32 = 0;

    while let Some(message) = ws.next().await {
        let message = message.map_err(|e| ReaderError::Transport(e.to_string()))?;
        let data = match message {
            Message::Binary(data) => data,
            Message::Ping(_) | Message::Pong(_) | Message::Text(_) => continue,
            Message::Close(_) => {
                return Err(ReaderError::Transport("server closed the connection".into()))
            }
            Message::Frame(_) => continue,
        };

        let decoded = pool.decode("result", data).await?;
        let Some(result) = BlocksResult::from_result(&decoded)? else {
            continue;
        };

        // acknowledged only after the previous batch made it through the
        // bounded queue, so we never run more than one batch ahead
        unacked += 1;

        if let Some(this_block) = &result.this_block {
            let block_num = this_block.block_num;

            if let Some((last_num, last_id)) = last_delivered.clone() {
                if block_num <= last_num {
                    // the stream restarted below our head: branch switch
                    info!("Fork reported at block {} (head was {})", block_num, last_num);
                    sender
                        .send(ReaderEvent::Fork { at: block_num })
                        .await
                        .map_err(|_| ReaderError::ChannelClosed)?;
                } else if block_num == last_num + 1 {
                    let prev_id = result
                        .prev_block
                        .as_ref()
                        .map(|p| p.block_id.to_lowercase())
                        .unwrap_or_default();
                    if prev_id != last_id {
                        // head no longer chains; resume from this height
                        warn!(
                            "Block {} does not chain to delivered head, resuming at {}",
                            block_num, block_num
                        );
                        sender
                            .send(ReaderEvent::Fork { at: block_num })
                            .await
                            .map_err(|_| ReaderError::ChannelClosed)?;
                        *next_start = block_num;
                        return Err(ReaderError::Protocol("broken block chain".into()));
                    }
                } else {
                    *next_start = last_num + 1;
                    return Err(ReaderError::Protocol(format!(
                        "gap in block stream: got {}, expected {}",
                        block_num,
                        last_num + 1
                    )));
                }
            }

            let traces_bytes = BlocksResult::decode_hex(&result.traces)?;
            let deltas_bytes = BlocksResult::decode_hex(&result.deltas)?;
            let block_bytes = BlocksResult::decode_hex(&result.block)?;

            // the three payloads decode in parallel across the pool
            let (traces_value, delta_batches, block_value) = tokio::join!(
                async {
                    match traces_bytes {
                        Some(bytes) => pool.decode("transaction_trace[]", bytes).await.map(Some),
                        None => Ok(None),
                    }
                },
                async {
                    match deltas_bytes {
                        Some(bytes) => pool.decode_table_deltas(bytes).await,
                        None => Ok(Vec::new()),
                    }
                },
                async {
                    match block_bytes {
                        Some(bytes) => pool.decode("signed_block", bytes).await.map(Some),
                        None => Ok(None),
                    }
                },
            );

            let transactions = match traces_value? {
                Some(value) => convert_traces(&value)?,
                None => Vec::new(),
            };
            let deltas = convert_deltas(&delta_batches?)?;
            let block_value = block_value?;

            let block = build_block(&result, block_value.as_ref(), transactions, deltas)?;
            let block_id = block.block_id.clone();

            metrics::gauge!("filler_reader_block").set(block_num as f64);
            metrics::counter!("filler_reader_blocks_total").increment(1);

            sender
                .send(ReaderEvent::Block(Box::new(block)))
                .await
                .map_err(|_| ReaderError::ChannelClosed)?;

            *last_delivered = Some((block_num, block_id));
            *next_start = block_num + 1;
            *backoff = RECONNECT_BASE_DELAY_MS;

            if block_num + 1 >= end_block {
                return Ok(());
            }
        }

        if unacked >= options.blocks_per_ack {
            ws.send(Message::Binary(requests::get_blocks_ack_request(unacked)))
                .await
                .map_err(|e| ReaderError::Transport(e.to_string()))?;
            unacked = 0;
        }
    }

    Err(ReaderError::Transport("connection closed".into()))
}
