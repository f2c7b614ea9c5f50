use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use atomic_common::{
    abi::{Abi, DecodeError, TableDeltaBatch},
    task::spawn_task,
};
use log::{debug, warn};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("deserializer pool is shut down")]
    Closed,
}

/// Decoder implementation selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderBackend {
    /// Accelerated native decoder, when one is compiled in.
    Native,
    /// Pure-Rust decoder, always available.
    Portable,
}

/// Probe for the accelerated decoder. This build carries only the portable
/// backend, so the probe reports the fallback with a warning.
pub fn probe_backend() -> DecoderBackend {
    warn!("Native decoder not available, falling back to the portable decoder");
    DecoderBackend::Portable
}

enum Request {
    Value {
        type_name: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<Value, DecodeError>>,
    },
    TableDeltas {
        data: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<TableDeltaBatch>, DecodeError>>,
    },
}

/// Fixed-size pool of decode workers.
///
/// Each worker loads the tagged ABI once at spawn and then serves one-shot
/// requests over its own channel; no mutable state is shared with the main
/// flow. Requests round-robin across workers.
pub struct DeserializerPool {
    workers: Vec<mpsc::Sender<Request>>,
    next: AtomicUsize,
}

impl DeserializerPool {
    pub fn new(tag: &str, abi: Arc<Abi>, worker_count: usize) -> Self {
        let backend = probe_backend();
        debug!(
            "Starting {} deserializer workers for ABI '{}' using {:?} backend",
            worker_count, tag, backend
        );

        let workers = (0..worker_count.max(1))
            .map(|index| {
                let (sender, receiver) = mpsc::channel(64);
                let abi = Arc::clone(&abi);
                spawn_task("deserializer-worker", worker_loop(index, abi, receiver));
                sender
            })
            .collect();

        Self {
            workers,
            next: AtomicUsize::new(0),
        }
    }

    fn worker(&self) -> &mpsc::Sender<Request> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        &self.workers[index]
    }

    pub async fn decode(&self, type_name: &str, data: Vec<u8>) -> Result<Value, PoolError> {
        let (reply, response) = oneshot::channel();
        self.worker()
            .send(Request::Value {
                type_name: type_name.to_string(),
                data,
                reply,
            })
            .await
            .map_err(|_| PoolError::Closed)?;
        Ok(response.await.map_err(|_| PoolError::Closed)??)
    }

    /// Decode a "table_delta[]" blob, including each row's payload against
    /// the table type named by its delta.
    pub async fn decode_table_deltas(
        &self,
        data: Vec<u8>,
    ) -> Result<Vec<TableDeltaBatch>, PoolError> {
        let (reply, response) = oneshot::channel();
        self.worker()
            .send(Request::TableDeltas { data, reply })
            .await
            .map_err(|_| PoolError::Closed)?;
        Ok(response.await.map_err(|_| PoolError::Closed)??)
    }
}

async fn worker_loop(index: usize, abi: Arc<Abi>, mut receiver: mpsc::Receiver<Request>) {
    while let Some(request) = receiver.recv().await {
        match request {
            Request::Value {
                type_name,
                data,
                reply,
            } => {
                let _ = reply.send(abi.decode(&type_name, &data));
            }
            Request::TableDeltas { data, reply } => {
                let _ = reply.send(abi.decode_table_deltas(&data));
            }
        }
    }
    debug!("Deserializer worker {} drained", index);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ship_like_abi() -> Arc<Abi> {
        Arc::new(
            Abi::from_json(
                r#"{
                    "version": "eosio::abi/1.1",
                    "structs": [
                        {
                            "name": "pair",
                            "base": "",
                            "fields": [
                                {"name": "first", "type": "uint32"},
                                {"name": "second", "type": "uint32"}
                            ]
                        },
                        {
                            "name": "row",
                            "base": "",
                            "fields": [
                                {"name": "present", "type": "bool"},
                                {"name": "data", "type": "bytes"}
                            ]
                        },
                        {
                            "name": "table_delta_v0",
                            "base": "",
                            "fields": [
                                {"name": "name", "type": "string"},
                                {"name": "rows", "type": "row[]"}
                            ]
                        }
                    ],
                    "tables": [
                        {"name": "pairs", "type": "pair", "index_type": "", "key_names": [], "key_types": []}
                    ],
                    "variants": [
                        {"name": "table_delta", "types": ["table_delta_v0"]}
                    ]
                }"#,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_pool_decodes_values() {
        let pool = DeserializerPool::new("test", ship_like_abi(), 2);
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());

        let value = pool.decode("pair", data).await.unwrap();
        assert_eq!(value, serde_json::json!({"first": 1, "second": 2}));
    }

    #[tokio::test]
    async fn test_pool_decodes_table_deltas() {
        let pool = DeserializerPool::new("test", ship_like_abi(), 1);

        // one table_delta_v0 for table "pairs" with a single present row
        let mut row_data = Vec::new();
        row_data.extend_from_slice(&7u32.to_le_bytes());
        row_data.extend_from_slice(&8u32.to_le_bytes());

        let mut data = Vec::new();
        data.push(1); // one delta
        data.push(0); // variant index -> table_delta_v0
        data.push(5); // name length
        data.extend_from_slice(b"pairs");
        data.push(1); // one row
        data.push(1); // present
        data.push(row_data.len() as u8);
        data.extend_from_slice(&row_data);

        let batches = pool.decode_table_deltas(data).await.unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].name, "pairs");
        assert!(batches[0].rows[0].present);
        assert_eq!(
            batches[0].rows[0].data,
            serde_json::json!({"first": 7, "second": 8})
        );
    }

    #[tokio::test]
    async fn test_unknown_delta_is_fatal() {
        let pool = DeserializerPool::new("test", ship_like_abi(), 1);

        let mut data = Vec::new();
        data.push(1);
        data.push(0);
        data.push(7);
        data.extend_from_slice(b"unknown");
        data.push(0); // no rows

        let result = pool.decode_table_deltas(data).await;
        assert!(matches!(
            result,
            Err(PoolError::Decode(DecodeError::UnsupportedDelta(_)))
        ));
    }
}
