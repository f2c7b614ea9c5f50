use std::{sync::Arc, time::Duration};

use atomic_common::{
    abi::Abi,
    chain::{ActionTrace, Block, Name, TableDeltaRow},
    config::BLOCK_RETRY_LIMIT,
};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use tokio::{sync::mpsc, sync::watch, time::sleep};

use crate::{
    abi_cache::{AbiCache, ABI_TABLE},
    db::{apply_rollback, Condition, ContractDbTransaction, DbStore, DbTx as _, DbValue, ROLLBACK_TABLE},
    db_row,
    error::FillerError,
    handlers::{ActionCtx, ContractHandler, DeltaCtx},
    notification::{actions as notify, NotificationBus},
    reader::ReaderEvent,
    rpc::ChainRpc,
};

/// Table recording where each reader last committed, so a restart resumes
/// from last committed + 1.
pub const READERS_TABLE: &str = "contract_readers";

// Just enough ABI to read `eosio:setabi` payloads before any contract ABI
// is known
const BOOT_ABI: &str = r#"{
    "version": "eosio::abi/1.1",
    "structs": [
        {"name": "setabi", "base": "", "fields": [
            {"name": "account", "type": "name"},
            {"name": "abi", "type": "bytes"}
        ]}
    ],
    "actions": [{"name": "setabi", "type": "setabi", "ricardian_contract": ""}]
}"#;

/// The heart of the pipeline: orders traces and deltas, owns the fork
/// window, commits or rolls back block batches and drives the per-handler
/// priority jobs.
///
/// Everything here runs on one task; the reader and the deserializer pool
/// are the only parallel actors and talk to it through channels.
pub struct StateReceiver {
    store: Arc<dyn DbStore>,
    bus: NotificationBus,
    handlers: Vec<Box<dyn ContractHandler>>,
    abi_cache: AbiCache,
    boot_abi: Abi,
    reader_name: String,
    last_committed: Option<u32>,
}

impl StateReceiver {
    pub fn new(
        store: Arc<dyn DbStore>,
        bus: NotificationBus,
        handlers: Vec<Box<dyn ContractHandler>>,
        reader_name: &str,
    ) -> Self {
        Self {
            store,
            bus,
            handlers,
            abi_cache: AbiCache::new(),
            boot_abi: Abi::from_json(BOOT_ABI).expect("boot ABI is valid"),
            reader_name: reader_name.to_string(),
            last_committed: None,
        }
    }

    /// Startup: verify the core schema, run handler init, load persisted
    /// ABIs and the reader position. Returns the block to start from.
    pub async fn init(&mut self, rpc: &ChainRpc, start_block: Option<u32>) -> Result<u32, FillerError> {
        for table in [ROLLBACK_TABLE, READERS_TABLE, ABI_TABLE] {
            if !self.store.table_exists(table).await? {
                return Err(FillerError::MissingSchema(table.to_string()));
            }
        }

        for handler in &mut self.handlers {
            handler.init(self.store.as_ref(), rpc).await?;
        }

        self.abi_cache.load(self.store.as_ref()).await?;

        let position = self.load_position().await?;
        self.last_committed = position;

        let resume = match (start_block, position) {
            (Some(start), _) => start,
            (None, Some(committed)) => committed + 1,
            (None, None) => 1,
        };
        info!(
            "Reader '{}' starting at block {} (last committed: {:?})",
            self.reader_name, resume, position
        );
        Ok(resume)
    }

    pub fn last_committed(&self) -> Option<u32> {
        self.last_committed
    }

    /// Drop every row the configured handlers own, plus the rollback
    /// history and this reader's position. Used before a refill.
    pub async fn delete_data(&mut self) -> Result<(), FillerError> {
        warn!("Deleting all handler data for reader '{}'", self.reader_name);
        let tx = self.store.begin().await?;
        let mut db = ContractDbTransaction::new(tx, 0, "", 0);
        for handler in &mut self.handlers {
            db.set_handler(handler.name());
            handler.delete_db(&mut db).await?;
        }
        db.delete(ROLLBACK_TABLE, &Condition::new()).await?;
        db.delete(
            READERS_TABLE,
            &Condition::eq("name", self.reader_name.as_str()),
        )
        .await?;
        db.commit().await?;
        self.last_committed = None;
        Ok(())
    }

    /// Consume reader events until the channel closes or shutdown fires.
    /// A block in flight always finishes (commit or abort) before the loop
    /// exits.
    pub async fn run(
        &mut self,
        mut events: mpsc::Receiver<ReaderEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), FillerError> {
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!("Shutdown requested, draining current work");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                ReaderEvent::Fork { at } => self.handle_fork(at).await?,
                ReaderEvent::Block(block) => self.process_block_supervised(&block).await?,
            }
        }

        info!(
            "Receiver stopped, last committed block: {}",
            self.last_committed
                .map(|b| b.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        Ok(())
    }

    /// Retry policy per error class: database and decode failures get
    /// bounded retries, handler logic failures halt immediately.
    async fn process_block_supervised(&mut self, block: &Block) -> Result<(), FillerError> {
        let mut attempts = 0;
        loop {
            match self.process_block(block).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempts < BLOCK_RETRY_LIMIT => {
                    attempts += 1;
                    if matches!(e, FillerError::Decode(_) | FillerError::Pool(_)) {
                        // decode failures get one more chance against the
                        // persisted ABIs before they count as fatal drift
                        if let Err(reload) = self.abi_cache.load(self.store.as_ref()).await {
                            warn!("ABI reload before retry failed: {}", reload);
                        }
                    }
                    warn!(
                        "Block {} failed ({}), retry {}/{}",
                        block.block_num, e, attempts, BLOCK_RETRY_LIMIT
                    );
                    sleep(Duration::from_millis(500)).await;
                }
                Err(e) => {
                    error!("Halting at block {}: {}", block.block_num, e);
                    return Err(e);
                }
            }
        }
    }

    async fn process_block(&mut self, block: &Block) -> Result<(), FillerError> {
        let tx = self.store.begin().await?;
        let mut db = ContractDbTransaction::new(
            tx,
            block.block_num,
            &block.block_id,
            block.last_irreversible.block_num,
        );

        let result = self.apply_block(&mut db, block).await;
        match result {
            Ok(()) => {
                db.commit().await?;
            }
            Err(e) => {
                if let Err(abort_error) = db.abort().await {
                    warn!("Abort of block {} failed: {}", block.block_num, abort_error);
                }
                return Err(e);
            }
        }

        // past this point the block is durable; notifications go out and
        // failures there cannot undo it
        for handler in &mut self.handlers {
            handler.on_commit(&self.bus).await?;
        }

        self.last_committed = Some(block.block_num);
        metrics::gauge!("filler_committed_block").set(block.block_num as f64);
        metrics::counter!("filler_committed_blocks_total").increment(1);

        if block.block_num % 1000 == 0 {
            debug!(
                "Committed block {} ({} behind head)",
                block.block_num,
                block.head.block_num.saturating_sub(block.block_num)
            );
        }
        Ok(())
    }

    async fn apply_block(
        &mut self,
        db: &mut ContractDbTransaction,
        block: &Block,
    ) -> Result<(), FillerError> {
        for handler in &mut self.handlers {
            db.set_handler(handler.name());
            handler.on_block_start(db, block).await?;
        }

        // traces in chain execution order
        for tx_trace in &block.transactions {
            for trace in &tx_trace.traces {
                if !trace.is_original() {
                    continue;
                }

                // ABI updates must land before anything later in the same
                // block decodes against them
                if trace.name.to_string() == "setabi" {
                    self.handle_setabi(db, block, trace).await?;
                }

                let matching: Vec<(usize, bool)> = self
                    .handlers
                    .iter()
                    .enumerate()
                    .filter_map(|(index, handler)| {
                        handler
                            .scope()
                            .match_action(&trace.account, &trace.name)
                            .map(|deserialize| (index, deserialize))
                    })
                    .collect();
                if matching.is_empty() {
                    continue;
                }

                let decoded = if matching.iter().any(|(_, deserialize)| *deserialize) {
                    self.decode_action(block, trace)?
                } else {
                    None
                };

                for (index, _) in matching {
                    let handler = &mut self.handlers[index];
                    db.set_handler(handler.name());
                    handler
                        .on_action(
                            db,
                            ActionCtx {
                                block,
                                tx: tx_trace,
                                trace,
                                data: decoded.as_ref(),
                            },
                        )
                        .await?;
                }
            }
        }

        // then deltas, in on-wire order
        for delta in &block.deltas {
            let matching: Vec<(usize, bool)> = self
                .handlers
                .iter()
                .enumerate()
                .filter_map(|(index, handler)| {
                    handler
                        .scope()
                        .match_table(&delta.code, &delta.table)
                        .map(|deserialize| (index, deserialize))
                })
                .collect();
            if matching.is_empty() {
                continue;
            }

            let decoded = if delta.present && matching.iter().any(|(_, deserialize)| *deserialize) {
                self.decode_delta(block, delta)?
            } else {
                None
            };

            for (index, _) in matching {
                let handler = &mut self.handlers[index];
                db.set_handler(handler.name());
                handler
                    .on_table_change(
                        db,
                        DeltaCtx {
                            block,
                            delta,
                            data: decoded.as_ref(),
                        },
                    )
                    .await?;
            }
        }

        // each handler drains its priority queue
        for handler in &mut self.handlers {
            db.set_handler(handler.name());
            handler.on_block_complete(db, block).await?;
        }

        // bookkeeping rides in the same transaction
        db.prune_rollback(block.last_irreversible.block_num).await?;
        self.save_position(db, block.block_num, &block.block_id)
            .await?;

        Ok(())
    }

    fn decode_action(&self, block: &Block, trace: &ActionTrace) -> Result<Option<Value>, FillerError> {
        let Some(abi) = self.abi_cache.abi_for(&trace.account, block.block_num) else {
            return Ok(None);
        };
        let action = trace.name.to_string();
        let Some(type_name) = abi.action_type(&action) else {
            return Ok(None);
        };
        Ok(Some(abi.decode(type_name, &trace.data)?))
    }

    fn decode_delta(&self, block: &Block, delta: &TableDeltaRow) -> Result<Option<Value>, FillerError> {
        let Some(abi) = self.abi_cache.abi_for(&delta.code, block.block_num) else {
            return Ok(None);
        };
        let table = delta.table.to_string();
        let Some(type_name) = abi.table_type(&table) else {
            return Ok(None);
        };
        Ok(Some(abi.decode(type_name, &delta.value)?))
    }

    async fn handle_setabi(
        &mut self,
        db: &mut ContractDbTransaction,
        block: &Block,
        trace: &ActionTrace,
    ) -> Result<(), FillerError> {
        let decoded = self.boot_abi.decode("setabi", &trace.data)?;
        let Some(account) = decoded.get("account").and_then(Value::as_str) else {
            return Ok(());
        };
        let Ok(contract) = account.parse::<Name>() else {
            return Ok(());
        };

        let watched = self
            .handlers
            .iter()
            .any(|handler| handler.scope().watches_account(&contract));
        if !watched {
            return Ok(());
        }

        let abi_hex = decoded.get("abi").and_then(Value::as_str).unwrap_or("");
        let abi_bytes = hex::decode(abi_hex)
            .map_err(|_| FillerError::Config(format!("setabi for {} is not hex", account)))?;

        info!("New ABI for {} at block {}", account, block.block_num);
        self.abi_cache
            .install_persistent(db, contract, block.block_num, &abi_bytes)
            .await?;
        Ok(())
    }

    /// Restore every row touched at or above `at`, rewind the reader
    /// position, then announce the fork downstream.
    async fn handle_fork(&mut self, at: u32) -> Result<(), FillerError> {
        info!("Rolling back to block {}", at.saturating_sub(1));
        metrics::counter!("filler_forks_total").increment(1);

        let mut tx = self.store.begin().await?;
        let reverted = apply_rollback(tx.as_mut(), at).await?;

        let updated = tx
            .update(
                READERS_TABLE,
                &db_row! { "block_num" => at.saturating_sub(1), "block_id" => "" },
                &Condition::eq("name", self.reader_name.as_str()),
            )
            .await?;
        if updated == 0 {
            debug!("No reader position to rewind");
        }
        tx.commit().await?;

        self.abi_cache.rollback(at);
        self.last_committed = Some(at.saturating_sub(1));

        info!("Fork handled: {} operations reverted", reverted);
        self.bus
            .publish_chain(notify::FORK, json!({ "block_num": at }))
            .await;
        Ok(())
    }

    async fn load_position(&self) -> Result<Option<u32>, FillerError> {
        let mut tx = self.store.begin().await?;
        let rows = tx
            .select(
                READERS_TABLE,
                &Condition::eq("name", self.reader_name.as_str()),
                &[],
                Some(1),
            )
            .await?;
        tx.rollback().await?;

        Ok(rows
            .first()
            .and_then(|row| row.get("block_num"))
            .and_then(DbValue::as_i64)
            .map(|block_num| block_num as u32))
    }

    async fn save_position(
        &self,
        db: &mut ContractDbTransaction,
        block_num: u32,
        block_id: &str,
    ) -> Result<(), FillerError> {
        let condition = Condition::eq("name", self.reader_name.as_str());
        let set = db_row! { "block_num" => block_num, "block_id" => block_id };
        let updated = db.update(READERS_TABLE, &set, &condition, &["name"]).await?;
        if updated == 0 {
            let mut row = set;
            row.insert("name".to_string(), self.reader_name.as_str().into());
            db.insert(READERS_TABLE, &[row], &["name"]).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
