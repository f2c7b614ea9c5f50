pub mod atomicassets;
pub mod atomicmarket;

use async_trait::async_trait;
use atomic_common::{
    chain::{ActionTrace, Block, TableDeltaRow, TransactionTrace},
    filter::ScopeFilter,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    config::HandlerConfig,
    db::{ContractDbTransaction, DbStore},
    db_row,
    error::FillerError,
    notification::NotificationBus,
    rpc::ChainRpc,
};

/// An action trace offered to a handler, with its payload decoded when the
/// matching filter asked for it.
pub struct ActionCtx<'a> {
    pub block: &'a Block,
    pub tx: &'a TransactionTrace,
    pub trace: &'a ActionTrace,
    pub data: Option<&'a Value>,
}

impl ActionCtx<'_> {
    /// Decode the action payload into its typed form.
    pub fn payload<T: DeserializeOwned>(
        &self,
        handler: &'static str,
        origin: &'static str,
    ) -> Result<T, FillerError> {
        let data = self
            .data
            .ok_or_else(|| FillerError::handler(handler, origin, "action payload not decoded"))?;
        serde_json::from_value(data.clone())
            .map_err(|e| FillerError::handler(handler, origin, format!("bad payload: {}", e)))
    }
}

/// A table row change offered to a handler.
pub struct DeltaCtx<'a> {
    pub block: &'a Block,
    pub delta: &'a TableDeltaRow,
    pub data: Option<&'a Value>,
}

impl DeltaCtx<'_> {
    pub fn row<T: DeserializeOwned>(
        &self,
        handler: &'static str,
        origin: &'static str,
    ) -> Result<T, FillerError> {
        let data = self
            .data
            .ok_or_else(|| FillerError::handler(handler, origin, "table row not decoded"))?;
        serde_json::from_value(data.clone())
            .map_err(|e| FillerError::handler(handler, origin, format!("bad table row: {}", e)))
    }
}

/// A plug-in owning one contract's domain tables and notification channels.
///
/// Hooks take `&mut self`: all handlers live on the receiver task, which is
/// the single writer, and the transaction reference is only handed in for
/// the duration of a hook call.
#[async_trait]
pub trait ContractHandler: Send {
    fn name(&self) -> &'static str;

    fn scope(&self) -> &ScopeFilter;

    /// Runs once at startup: schema presence, persisted configuration,
    /// falling back to the chain RPC when nothing is persisted yet.
    async fn init(&mut self, store: &dyn DbStore, rpc: &ChainRpc) -> Result<(), FillerError>;

    /// Remove every row this handler owns.
    async fn delete_db(&mut self, db: &mut ContractDbTransaction) -> Result<(), FillerError>;

    async fn on_block_start(
        &mut self,
        db: &mut ContractDbTransaction,
        block: &Block,
    ) -> Result<(), FillerError>;

    async fn on_action(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: ActionCtx<'_>,
    ) -> Result<(), FillerError>;

    async fn on_table_change(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: DeltaCtx<'_>,
    ) -> Result<(), FillerError>;

    /// Drain the per-block priority job queue.
    async fn on_block_complete(
        &mut self,
        db: &mut ContractDbTransaction,
        block: &Block,
    ) -> Result<(), FillerError>;

    /// The block committed; release staged notifications.
    async fn on_commit(&mut self, bus: &NotificationBus) -> Result<(), FillerError>;
}

/// Instantiate the configured handlers in registration order.
pub fn create_handlers(
    configs: &[HandlerConfig],
) -> Result<Vec<Box<dyn ContractHandler>>, FillerError> {
    let mut handlers: Vec<Box<dyn ContractHandler>> = Vec::with_capacity(configs.len());
    for config in configs {
        match config.handler.as_str() {
            atomicassets::HANDLER_NAME => {
                let args = serde_json::from_value(config.args.clone())
                    .map_err(|e| FillerError::Config(format!("atomicassets args: {}", e)))?;
                handlers.push(Box::new(atomicassets::AtomicAssetsHandler::new(args)));
            }
            atomicmarket::HANDLER_NAME => {
                let args = serde_json::from_value(config.args.clone())
                    .map_err(|e| FillerError::Config(format!("atomicmarket args: {}", e)))?;
                handlers.push(Box::new(atomicmarket::AtomicMarketHandler::new(args)));
            }
            other => {
                return Err(FillerError::Config(format!("unknown handler '{}'", other)));
            }
        }
    }
    Ok(handlers)
}

/// Append one row to a handler's log table.
///
/// The log id is the action's global sequence, which is unique across the
/// chain and replays to the same value.
#[allow(clippy::too_many_arguments)]
pub async fn write_log(
    db: &mut ContractDbTransaction,
    table: &str,
    contract: &str,
    name: &str,
    relation_name: &str,
    relation_id: &str,
    data: Value,
    ctx: &ActionCtx<'_>,
) -> Result<(), FillerError> {
    let row = db_row! {
        "log_id" => ctx.trace.global_sequence,
        "contract" => contract,
        "name" => name,
        "relation_name" => relation_name,
        "relation_id" => relation_id,
        "data" => data,
        "txid" => hex::decode(&ctx.tx.id).unwrap_or_default(),
        "created_at_block" => ctx.block.block_num,
        "created_at_time" => ctx.block.timestamp.as_str(),
    };
    db.replace(table, &row, &["log_id", "relation_name", "relation_id"])
        .await?;
    Ok(())
}
