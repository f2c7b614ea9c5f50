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
    db::{Condition, ContractDbTransaction, DbStore, DbTx as _},
    db_row,
    error::FillerError,
    handlers::{ActionCtx, ContractHandler, DeltaCtx},
    notification::{Notification, NotificationBus},
    rpc::ChainRpc,
};

pub const HANDLER_NAME: &str = "atomicmarket";

pub const TABLE_SALES: &str = "atomicmarket_sales";
pub const TABLE_AUCTIONS: &str = "atomicmarket_auctions";
pub const TABLE_AUCTIONS_ASSETS: &str = "atomicmarket_auctions_assets";
pub const TABLE_AUCTIONS_BIDS: &str = "atomicmarket_auctions_bids";
pub const TABLE_BUYOFFERS: &str = "atomicmarket_buyoffers";
pub const TABLE_BUYOFFERS_ASSETS: &str = "atomicmarket_buyoffers_assets";
pub const TABLE_MARKETPLACES: &str = "atomicmarket_marketplaces";
pub const TABLE_TOKENS: &str = "atomicmarket_tokens";
pub const TABLE_SYMBOL_PAIRS: &str = "atomicmarket_symbol_pairs";
pub const TABLE_PRICES: &str = "atomicmarket_prices";
pub const TABLE_CONFIG: &str = "atomicmarket_config";
pub const TABLE_LOGS: &str = "atomicmarket_logs";

// Within-block ordering: configuration first, then listing rows, then the
// state reconciliation that reads them
pub const PRIORITY_TABLE_CONFIG: i32 = 90;
pub const PRIORITY_TABLE_MARKETPLACES: i32 = 90;
pub const PRIORITY_TABLE_SALES: i32 = 70;
pub const PRIORITY_TABLE_AUCTIONS: i32 = 70;
pub const PRIORITY_TABLE_BUYOFFERS: i32 = 70;
pub const PRIORITY_ACTION_UPDATE_SALE: i32 = 50;
pub const PRIORITY_ACTION_UPDATE_AUCTION: i32 = 50;
pub const PRIORITY_ACTION_UPDATE_BUYOFFER: i32 = 50;

fn default_market_account() -> String {
    "atomicmarket".to_string()
}

fn default_assets_account() -> String {
    "atomicassets".to_string()
}

fn default_delphi_account() -> String {
    "delphioracle".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct AtomicMarketArgs {
    #[serde(default = "default_market_account")]
    pub atomicmarket_account: String,
    #[serde(default = "default_assets_account")]
    pub atomicassets_account: String,
    #[serde(default = "default_delphi_account")]
    pub delphioracle_account: String,
    #[serde(default = "default_true")]
    pub store_logs: bool,
}

enum MarketJob {
    ApplySaleRow(SaleTableRow),
    ApplyAuctionRow(AuctionTableRow),
    ApplyBuyofferRow(BuyofferTableRow),
    ApplyMarketplaceRow(MarketplaceRow),
    ApplyConfigRow(MarketConfigRow),
    SetSaleState {
        sale_id: u64,
        state: SaleState,
        buyer: Option<String>,
        taker: Option<String>,
    },
    UpdateSaleByOffer {
        offer_id: u64,
    },
    SetAuctionState {
        auction_id: u64,
        state: AuctionState,
    },
    SetBuyofferState {
        buyoffer_id: u64,
        state: BuyofferState,
        memo: Option<String>,
    },
}

/// Maintains sales, auctions, buy-offers, bids, marketplaces, the token and
/// symbol-pair lists and oracle prices for one AtomicMarket deployment.
pub struct AtomicMarketHandler {
    args: AtomicMarketArgs,
    account: Name,
    assets_account: Name,
    delphi_account: Name,
    scope: ScopeFilter,
    jobs: JobQueue<MarketJob>,
    staged: Vec<Notification>,
}

impl AtomicMarketHandler {
    pub fn new(args: AtomicMarketArgs) -> Self {
        let account: Name = args
            .atomicmarket_account
            .parse()
            .unwrap_or_else(|_| Name::default());
        let assets_account: Name = args
            .atomicassets_account
            .parse()
            .unwrap_or_else(|_| Name::default());
        let delphi_account: Name = args
            .delphioracle_account
            .parse()
            .unwrap_or_else(|_| Name::default());

        let scope = ScopeFilter {
            actions: vec![
                FilterSpec::new(&format!("{}:*", account), true),
                // offer terminations on the NFT contract drive sale state
                FilterSpec::new(&format!("{}:acceptoffer", assets_account), true),
                FilterSpec::new(&format!("{}:declineoffer", assets_account), true),
                FilterSpec::new(&format!("{}:canceloffer", assets_account), true),
            ],
            tables: vec![
                FilterSpec::new(&format!("{}:*", account), true),
                FilterSpec::new(&format!("{}:datapoints", delphi_account), true),
            ],
        };

        Self {
            args,
            account,
            assets_account,
            delphi_account,
            scope,
            jobs: JobQueue::new(),
            staged: Vec::new(),
        }
    }

    pub fn contract(&self) -> String {
        self.account.to_string()
    }

    fn push_notification(
        &mut self,
        db: &ContractDbTransaction,
        block: &Block,
        txid: Option<String>,
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
            block: block.position(),
            txid,
        });
    }

    fn market_condition(&self, column: &str, id: u64) -> Condition {
        Condition::eq("market_contract", self.contract()).and(
            column,
            crate::db::CmpOp::Eq,
            id,
        )
    }

    async fn drain_jobs(
        &mut self,
        db: &mut ContractDbTransaction,
        block: &Block,
    ) -> Result<(), FillerError> {
        while let Some(queued) = self.jobs.pop() {
            let result = match queued.job {
                MarketJob::ApplySaleRow(row) => self.apply_sale_row(db, block, row).await,
                MarketJob::ApplyAuctionRow(row) => self.apply_auction_row(db, block, row).await,
                MarketJob::ApplyBuyofferRow(row) => self.apply_buyoffer_row(db, block, row).await,
                MarketJob::ApplyMarketplaceRow(row) => {
                    self.apply_marketplace_row(db, block, row).await
                }
                MarketJob::ApplyConfigRow(row) => self.apply_config_row(db, block, row).await,
                MarketJob::SetSaleState {
                    sale_id,
                    state,
                    buyer,
                    taker,
                } => {
                    self.set_sale_state(db, block, sale_id, state, buyer, taker)
                        .await
                }
                MarketJob::UpdateSaleByOffer { offer_id } => {
                    self.update_sale_by_offer(db, block, offer_id).await
                }
                MarketJob::SetAuctionState { auction_id, state } => {
                    self.set_auction_state(db, block, auction_id, state).await
                }
                MarketJob::SetBuyofferState {
                    buyoffer_id,
                    state,
                    memo,
                } => {
                    self.set_buyoffer_state(db, block, buyoffer_id, state, memo)
                        .await
                }
            };
            result.map_err(|e| match e {
                FillerError::Db(db_error) => FillerError::Db(db_error),
                other => FillerError::handler(HANDLER_NAME, queued.origin, other),
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl ContractHandler for AtomicMarketHandler {
    fn name(&self) -> &'static str {
        HANDLER_NAME
    }

    fn scope(&self) -> &ScopeFilter {
        &self.scope
    }

    async fn init(&mut self, store: &dyn DbStore, rpc: &ChainRpc) -> Result<(), FillerError> {
        for table in [
            TABLE_SALES,
            TABLE_AUCTIONS,
            TABLE_BUYOFFERS,
            TABLE_MARKETPLACES,
            TABLE_TOKENS,
            TABLE_SYMBOL_PAIRS,
            TABLE_CONFIG,
            TABLE_LOGS,
        ] {
            if !store.table_exists(table).await? {
                return Err(FillerError::MissingSchema(table.to_string()));
            }
        }

        let mut tx = store.begin().await?;
        let existing = tx
            .select(
                TABLE_CONFIG,
                &Condition::eq("market_contract", self.contract()),
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

            let parsed: MarketConfigRow = serde_json::from_value(config).map_err(|e| {
                FillerError::handler(HANDLER_NAME, "init", format!("bad chain config: {}", e))
            })?;

            tx.insert(
                TABLE_CONFIG,
                &[db_row! {
                    "market_contract" => account.as_str(),
                    "version" => parsed.version,
                    "maker_market_fee" => crate::db::DbValue::Float(parsed.maker_market_fee),
                    "taker_market_fee" => crate::db::DbValue::Float(parsed.taker_market_fee),
                    "minimum_auction_duration" => parsed.minimum_auction_duration,
                    "maximum_auction_duration" => parsed.maximum_auction_duration,
                    "minimum_bid_increase" => parsed.minimum_bid_increase,
                    "auction_reset_duration" => parsed.auction_reset_duration,
                    "atomicassets_account" => self.assets_account.to_string(),
                    "delphioracle_account" => self.delphi_account.to_string(),
                }],
            )
            .await?;

            for token in &parsed.supported_tokens {
                tx.insert(
                    TABLE_TOKENS,
                    &[db_row! {
                        "market_contract" => account.as_str(),
                        "token_contract" => token.token_contract.as_str(),
                        "token_symbol" => token_symbol_code(&token.token_symbol),
                        "token_precision" => token_symbol_precision(&token.token_symbol),
                    }],
                )
                .await?;
            }

            for pair in &parsed.supported_symbol_pairs {
                tx.insert(
                    TABLE_SYMBOL_PAIRS,
                    &[db_row! {
                        "market_contract" => account.as_str(),
                        "listing_symbol" => token_symbol_code(&pair.listing_symbol),
                        "settlement_symbol" => token_symbol_code(&pair.settlement_symbol),
                        "delphi_pair_name" => pair.delphi_pair_name.as_str(),
                        "invert_delphi_pair" => pair.invert_delphi_pair,
                    }],
                )
                .await?;
            }

            debug!("Persisted initial atomicmarket config for {}", account);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_db(&mut self, db: &mut ContractDbTransaction) -> Result<(), FillerError> {
        let condition = Condition::eq("market_contract", self.contract());
        for table in [
            TABLE_LOGS,
            TABLE_AUCTIONS_BIDS,
            TABLE_AUCTIONS_ASSETS,
            TABLE_AUCTIONS,
            TABLE_BUYOFFERS_ASSETS,
            TABLE_BUYOFFERS,
            TABLE_SALES,
            TABLE_MARKETPLACES,
            TABLE_TOKENS,
            TABLE_SYMBOL_PAIRS,
            TABLE_PRICES,
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
        self.jobs.clear();
        self.staged.clear();
        Ok(())
    }

    async fn on_action(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        if ctx.data.is_none() {
            warn!(
                "Skipping action {}::{} at block {}: payload not decoded",
                ctx.trace.account, ctx.trace.name, ctx.block.block_num
            );
            return Ok(());
        }

        if ctx.trace.account == self.assets_account {
            return self.on_assets_offer_action(db, &ctx).await;
        }
        if ctx.trace.account != self.account {
            return Ok(());
        }

        match ctx.trace.name.to_string().as_str() {
            "lognewsale" => self.on_new_sale(db, &ctx).await,
            "logsalestart" => self.on_sale_start(db, &ctx).await,
            "cancelsale" => self.on_cancel_sale(db, &ctx).await,
            "purchasesale" => self.on_purchase_sale(db, &ctx).await,
            "lognewauct" => self.on_new_auction(db, &ctx).await,
            "logauctstart" => self.on_auction_start(db, &ctx).await,
            "cancelauct" => self.on_cancel_auction(db, &ctx).await,
            "auctionbid" => self.on_auction_bid(db, &ctx).await,
            "auctclaimbuy" => self.on_auction_claim(db, &ctx, true).await,
            "auctclaimsel" => self.on_auction_claim(db, &ctx, false).await,
            "lognewbuyo" => self.on_new_buyoffer(db, &ctx).await,
            "acceptbuyo" => self.on_buyoffer_state(db, &ctx, BuyofferState::Accepted).await,
            "declinebuyo" => self.on_decline_buyoffer(db, &ctx).await,
            "cancelbuyo" => self.on_buyoffer_state(db, &ctx, BuyofferState::Canceled).await,
            "regmarket" => self.on_register_marketplace(db, &ctx).await,
            _ => Ok(()),
        }
    }

    async fn on_table_change(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: DeltaCtx<'_>,
    ) -> Result<(), FillerError> {
        if ctx.delta.present && ctx.data.is_none() {
            warn!(
                "Skipping {} row of {} at block {}: no ABI for this height",
                ctx.delta.table, ctx.delta.code, ctx.block.block_num
            );
            return Ok(());
        }
        if ctx.delta.code == self.delphi_account {
            if ctx.delta.table.to_string() == "datapoints" {
                return self.on_datapoints_row(db, &ctx).await;
            }
            return Ok(());
        }
        if ctx.delta.code != self.account {
            return Ok(());
        }

        match ctx.delta.table.to_string().as_str() {
            "sales" => self.on_sales_row(&ctx),
            "auctions" => self.on_auctions_row(&ctx),
            "buyoffers" => self.on_buyoffers_row(&ctx),
            "marketplaces" => self.on_marketplaces_row(&ctx),
            "config" => self.on_config_table_row(&ctx),
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

/// "4,WAX" -> "WAX"
pub(super) fn token_symbol_code(symbol: &str) -> String {
    symbol
        .split_once(',')
        .map(|(_, code)| code.to_string())
        .unwrap_or_else(|| symbol.to_string())
}

/// "4,WAX" -> 4
pub(super) fn token_symbol_precision(symbol: &str) -> i64 {
    symbol
        .split_once(',')
        .and_then(|(precision, _)| precision.parse().ok())
        .unwrap_or(0)
}
