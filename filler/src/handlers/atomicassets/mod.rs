mod actions;
mod tables;
mod types;

pub use types::*;

use async_trait::async_trait;
use atomic_common::{
    chain::{Block, Name},
    filter::{FilterSpec, ScopeFilter},
    queue::JobQueue,
};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    db::{CmpOp, Condition, ContractDbTransaction, DbStore, DbTx as _},
    db_row,
    error::FillerError,
    handlers::{ActionCtx, ContractHandler, DeltaCtx},
    notification::{Notification, NotificationBus},
    rpc::ChainRpc,
};

pub const HANDLER_NAME: &str = "atomicassets";

pub const TABLE_COLLECTIONS: &str = "atomicassets_collections";
pub const TABLE_SCHEMAS: &str = "atomicassets_schemas";
pub const TABLE_TEMPLATES: &str = "atomicassets_templates";
pub const TABLE_ASSETS: &str = "atomicassets_assets";
pub const TABLE_BACKED_TOKENS: &str = "atomicassets_assets_backed_tokens";
pub const TABLE_OFFERS: &str = "atomicassets_offers";
pub const TABLE_OFFERS_ASSETS: &str = "atomicassets_offers_assets";
pub const TABLE_TRANSFERS: &str = "atomicassets_transfers";
pub const TABLE_TRANSFERS_ASSETS: &str = "atomicassets_transfers_assets";
pub const TABLE_BALANCES: &str = "atomicassets_balances";
pub const TABLE_CONFIG: &str = "atomicassets_config";
pub const TABLE_LOGS: &str = "atomicassets_logs";

// Offer rows disappearing from chain state are re-checked after the block's
// direct writes landed
const PRIORITY_CHECK_OFFER: i32 = 50;

fn default_account() -> String {
    "atomicassets".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct AtomicAssetsArgs {
    #[serde(default = "default_account")]
    pub atomicassets_account: String,
    #[serde(default = "default_true")]
    pub store_transfers: bool,
    #[serde(default = "default_true")]
    pub store_logs: bool,
}

enum AssetsJob {
    CheckOfferState { offer_id: u64 },
}

/// Maintains collections, schemas, templates, assets, offers, transfers and
/// their logs for one AtomicAssets contract deployment.
pub struct AtomicAssetsHandler {
    args: AtomicAssetsArgs,
    account: Name,
    scope: ScopeFilter,
    jobs: JobQueue<AssetsJob>,
    staged: Vec<Notification>,
}

impl AtomicAssetsHandler {
    pub fn new(args: AtomicAssetsArgs) -> Self {
        let account: Name = args
            .atomicassets_account
            .parse()
            .unwrap_or_else(|_| Name::default());

        let scope = ScopeFilter {
            actions: vec![FilterSpec::new(&format!("{}:*", account), true)],
            tables: vec![FilterSpec::new(&format!("{}:*", account), true)],
        };

        Self {
            args,
            account,
            scope,
            jobs: JobQueue::new(),
            staged: Vec::new(),
        }
    }

    pub fn contract(&self) -> String {
        self.account.to_string()
    }

    /// Stage a change event, gated on the reversibility of the block.
    fn push_notification(
        &mut self,
        db: &ContractDbTransaction,
        ctx: &ActionCtx<'_>,
        topic: &'static str,
        action: &'static str,
        data: Value,
    ) {
        if !db.reversible() {
            return;
        }
        self.staged.push(Notification {
            handler: HANDLER_NAME,
            contract: self.contract(),
            topic,
            action,
            data,
            block: ctx.block.position(),
            txid: Some(ctx.tx.id.clone()),
        });
    }

    async fn drain_jobs(
        &mut self,
        db: &mut ContractDbTransaction,
        block: &Block,
    ) -> Result<(), FillerError> {
        while let Some(queued) = self.jobs.pop() {
            let result = match queued.job {
                AssetsJob::CheckOfferState { offer_id } => {
                    self.check_offer_state(db, block, offer_id).await
                }
            };
            result.map_err(|e| match e {
                FillerError::Db(db_error) => FillerError::Db(db_error),
                other => FillerError::handler(HANDLER_NAME, queued.origin, other),
            })?;
        }
        Ok(())
    }

    /// A pending offer whose chain row vanished without a terminating log
    /// action ended in a way the contract does not log.
    async fn check_offer_state(
        &mut self,
        db: &mut ContractDbTransaction,
        block: &Block,
        offer_id: u64,
    ) -> Result<(), FillerError> {
        let condition = Condition::eq("contract", self.contract())
            .and("offer_id", CmpOp::Eq, offer_id);
        let rows = db.select(TABLE_OFFERS, &condition, &[], Some(1)).await?;
        let Some(row) = rows.first() else {
            return Ok(());
        };

        if row.get("state").and_then(|v| v.as_i64()) == Some(OfferState::Pending.as_i64()) {
            db.update(
                TABLE_OFFERS,
                &db_row! {
                    "state" => OfferState::Unknown.as_i64(),
                    "updated_at_block" => block.block_num,
                    "updated_at_time" => block.timestamp.as_str(),
                },
                &condition,
                &["contract", "offer_id"],
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ContractHandler for AtomicAssetsHandler {
    fn name(&self) -> &'static str {
        HANDLER_NAME
    }

    fn scope(&self) -> &ScopeFilter {
        &self.scope
    }

    async fn init(&mut self, store: &dyn DbStore, rpc: &ChainRpc) -> Result<(), FillerError> {
        for table in [
            TABLE_COLLECTIONS,
            TABLE_SCHEMAS,
            TABLE_TEMPLATES,
            TABLE_ASSETS,
            TABLE_OFFERS,
            TABLE_TRANSFERS,
            TABLE_CONFIG,
            TABLE_LOGS,
        ] {
            if !store.table_exists(table).await? {
                return Err(FillerError::MissingSchema(table.to_string()));
            }
        }

        // configuration is persisted once, read from chain when absent
        let mut tx = store.begin().await?;
        let existing = tx
            .select(
                TABLE_CONFIG,
                &Condition::eq("contract", self.contract()),
                &[],
                Some(1),
            )
            .await?;

        if existing.is_empty() {
            let account = self.contract();
            let config = rpc
                .get_singleton_row(&account, &account, "config")
                .await?
                .ok_or_else(|| {
                    FillerError::handler(HANDLER_NAME, "init", "contract has no config table row")
                })?;

            let parsed: ConfigRow = serde_json::from_value(config.clone()).map_err(|e| {
                FillerError::handler(HANDLER_NAME, "init", format!("bad chain config: {}", e))
            })?;

            tx.insert(
                TABLE_CONFIG,
                &[db_row! {
                    "contract" => account.as_str(),
                    "version" => parsed.version,
                    "collection_format" => parsed.collection_format.clone(),
                    "supported_tokens" => serde_json::to_value(
                        config.get("supported_tokens").cloned().unwrap_or_default()
                    ).unwrap_or_default(),
                }],
            )
            .await?;
            debug!("Persisted initial atomicassets config for {}", account);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_db(&mut self, db: &mut ContractDbTransaction) -> Result<(), FillerError> {
        let condition = Condition::eq("contract", self.contract());
        for table in [
            TABLE_LOGS,
            TABLE_TRANSFERS_ASSETS,
            TABLE_TRANSFERS,
            TABLE_OFFERS_ASSETS,
            TABLE_OFFERS,
            TABLE_BACKED_TOKENS,
            TABLE_ASSETS,
            TABLE_TEMPLATES,
            TABLE_SCHEMAS,
            TABLE_COLLECTIONS,
            TABLE_BALANCES,
            TABLE_CONFIG,
        ] {
            db.delete(table, &condition).await?;
        }
        Ok(())
    }

    async fn on_block_start(
        &mut self,
        _db: &mut ContractDbTransaction,
        _block: &Block,
    ) -> Result<(), FillerError> {
        // leftovers can only exist after an aborted attempt at this block
        self.jobs.clear();
        self.staged.clear();
        Ok(())
    }

    async fn on_action(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        if ctx.trace.account != self.account {
            return Ok(());
        }
        if ctx.data.is_none() {
            // no ABI known for this height yet; nothing can be interpreted
            warn!(
                "Skipping action {}::{} at block {}: payload not decoded",
                ctx.trace.account, ctx.trace.name, ctx.block.block_num
            );
            return Ok(());
        }

        match ctx.trace.name.to_string().as_str() {
            "createcol" => self.on_create_collection(db, &ctx).await,
            "setcoldata" => self.on_set_collection_data(db, &ctx).await,
            "addcolauth" => self.on_collection_auth(db, &ctx, true).await,
            "remcolauth" => self.on_collection_auth(db, &ctx, false).await,
            "addnotifyacc" => self.on_collection_notify(db, &ctx, true).await,
            "remnotifyacc" => self.on_collection_notify(db, &ctx, false).await,
            "forbidnotify" => self.on_forbid_notify(db, &ctx).await,
            "setmarketfee" => self.on_set_market_fee(db, &ctx).await,
            "createschema" => self.on_create_schema(db, &ctx).await,
            "extendschema" => self.on_extend_schema(db, &ctx).await,
            "lognewtempl" => self.on_new_template(db, &ctx).await,
            "locktemplate" => self.on_lock_template(db, &ctx).await,
            "logmint" => self.on_mint(db, &ctx).await,
            "logsetdata" => self.on_set_data(db, &ctx).await,
            "logburnasset" => self.on_burn(db, &ctx).await,
            "logbackasset" => self.on_back_asset(db, &ctx).await,
            "logtransfer" => self.on_transfer(db, &ctx).await,
            "lognewoffer" => self.on_new_offer(db, &ctx).await,
            "acceptoffer" => self.on_offer_state(db, &ctx, OfferState::Accepted).await,
            "declineoffer" => self.on_offer_state(db, &ctx, OfferState::Declined).await,
            "canceloffer" => self.on_offer_state(db, &ctx, OfferState::Canceled).await,
            _ => Ok(()),
        }
    }

    async fn on_table_change(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: DeltaCtx<'_>,
    ) -> Result<(), FillerError> {
        if ctx.delta.code != self.account {
            return Ok(());
        }
        if ctx.delta.present && ctx.data.is_none() {
            warn!(
                "Skipping {} row of {} at block {}: no ABI for this height",
                ctx.delta.table, ctx.delta.code, ctx.block.block_num
            );
            return Ok(());
        }

        match ctx.delta.table.to_string().as_str() {
            "collections" => self.on_collections_row(db, &ctx).await,
            "schemas" => self.on_schemas_row(db, &ctx).await,
            "templates" => self.on_templates_row(db, &ctx).await,
            "assets" => self.on_assets_row(db, &ctx).await,
            "offers" => self.on_offers_row(db, &ctx).await,
            "balances" => self.on_balances_row(db, &ctx).await,
            "config" => self.on_config_row(db, &ctx).await,
            _ => Ok(()),
        }
    }

    async fn on_block_complete(
        &mut self,
        db: &mut ContractDbTransaction,
        block: &Block,
    ) -> Result<(), FillerError> {
        self.drain_jobs(db, block).await
    }

    async fn on_commit(&mut self, bus: &NotificationBus) -> Result<(), FillerError> {
        bus.flush(std::mem::take(&mut self.staged)).await;
        Ok(())
    }
}

// shared with the action and table modules
impl AtomicAssetsHandler {
    fn queue_offer_check(&mut self, offer_id: u64) {
        self.jobs.push(
            AssetsJob::CheckOfferState { offer_id },
            PRIORITY_CHECK_OFFER,
            "atomicassets::offers_row",
        );
    }

    pub(crate) fn notify(
        &mut self,
        db: &ContractDbTransaction,
        ctx: &ActionCtx<'_>,
        topic: &'static str,
        action: &'static str,
        data: Value,
    ) {
        self.push_notification(db, ctx, topic, action, data);
    }

    pub(crate) fn store_logs(&self) -> bool {
        self.args.store_logs
    }

    pub(crate) fn store_transfers(&self) -> bool {
        self.args.store_transfers
    }
}
