use serde_json::json;

use super::{
    token_symbol_code, token_symbol_precision, AtomicMarketHandler, AuctionState, AuctionTableRow,
    BuyofferState, BuyofferTableRow, DelphiDatapointRow, MarketConfigRow, MarketJob,
    MarketplaceRow, SaleState, SaleTableRow, HANDLER_NAME, PRIORITY_TABLE_AUCTIONS,
    PRIORITY_TABLE_BUYOFFERS, PRIORITY_TABLE_CONFIG, PRIORITY_TABLE_MARKETPLACES,
    PRIORITY_TABLE_SALES, TABLE_AUCTIONS, TABLE_BUYOFFERS, TABLE_CONFIG, TABLE_MARKETPLACES,
    TABLE_PRICES, TABLE_SALES, TABLE_SYMBOL_PAIRS, TABLE_TOKENS,
};
use crate::{
    db::{CmpOp, Condition, ContractDbTransaction, DbValue},
    db_row,
    error::FillerError,
    handlers::{atomicassets, DeltaCtx},
    notification::{actions as notify, topics},
};
use atomic_common::chain::{Asset, Block};

// Table deltas are queued instead of applied inline so listing rows land
// before the state reconciliation jobs of the same block.
impl AtomicMarketHandler {
    pub(super) fn on_sales_row(&mut self, ctx: &DeltaCtx<'_>) -> Result<(), FillerError> {
        if !ctx.delta.present {
            return Ok(());
        }
        let row: SaleTableRow = ctx.row(HANDLER_NAME, "sales_row")?;
        self.jobs.push(
            MarketJob::ApplySaleRow(row),
            PRIORITY_TABLE_SALES,
            "atomicmarket::sales_row",
        );
        Ok(())
    }

    pub(super) fn on_auctions_row(&mut self, ctx: &DeltaCtx<'_>) -> Result<(), FillerError> {
        if !ctx.delta.present {
            return Ok(());
        }
        let row: AuctionTableRow = ctx.row(HANDLER_NAME, "auctions_row")?;
        self.jobs.push(
            MarketJob::ApplyAuctionRow(row),
            PRIORITY_TABLE_AUCTIONS,
            "atomicmarket::auctions_row",
        );
        Ok(())
    }

    pub(super) fn on_buyoffers_row(&mut self, ctx: &DeltaCtx<'_>) -> Result<(), FillerError> {
        if !ctx.delta.present {
            return Ok(());
        }
        let row: BuyofferTableRow = ctx.row(HANDLER_NAME, "buyoffers_row")?;
        self.jobs.push(
            MarketJob::ApplyBuyofferRow(row),
            PRIORITY_TABLE_BUYOFFERS,
            "atomicmarket::buyoffers_row",
        );
        Ok(())
    }

    pub(super) fn on_marketplaces_row(&mut self, ctx: &DeltaCtx<'_>) -> Result<(), FillerError> {
        if !ctx.delta.present {
            return Ok(());
        }
        let row: MarketplaceRow = ctx.row(HANDLER_NAME, "marketplaces_row")?;
        self.jobs.push(
            MarketJob::ApplyMarketplaceRow(row),
            PRIORITY_TABLE_MARKETPLACES,
            "atomicmarket::marketplaces_row",
        );
        Ok(())
    }

    pub(super) fn on_config_table_row(&mut self, ctx: &DeltaCtx<'_>) -> Result<(), FillerError> {
        if !ctx.delta.present {
            return Ok(());
        }
        let row: MarketConfigRow = ctx.row(HANDLER_NAME, "config_row")?;
        self.jobs.push(
            MarketJob::ApplyConfigRow(row),
            PRIORITY_TABLE_CONFIG,
            "atomicmarket::config_row",
        );
        Ok(())
    }

    /// Oracle median for a symbol pair; scope is the pair name.
    pub(super) async fn on_datapoints_row(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &DeltaCtx<'_>,
    ) -> Result<(), FillerError> {
        if !ctx.delta.present {
            return Ok(());
        }
        let row: DelphiDatapointRow = ctx.row(HANDLER_NAME, "datapoints_row")?;
        let pair = ctx.delta.scope.to_string();

        db.replace(
            TABLE_PRICES,
            &db_row! {
                "market_contract" => self.contract(),
                "delphi_pair_name" => pair.as_str(),
                "median" => row.median,
                "updated_at_block" => ctx.block.block_num,
                "updated_at_time" => ctx.block.timestamp.as_str(),
            },
            &["market_contract", "delphi_pair_name"],
        )
        .await?;
        log::trace!("Oracle median for {} set by datapoint {}", pair, row.id);
        Ok(())
    }

    // ===== queued job bodies =====

    pub(super) async fn apply_sale_row(
        &mut self,
        db: &mut ContractDbTransaction,
        block: &Block,
        row: SaleTableRow,
    ) -> Result<(), FillerError> {
        let price: Asset = row.listing_price.parse().map_err(|e| {
            FillerError::handler(HANDLER_NAME, "apply_sale_row", format!("bad price: {:?}", e))
        })?;
        let offer_id = row
            .offer_id
            .as_deref()
            .and_then(|id| id.parse::<i64>().ok())
            .filter(|id| *id >= 0);

        let condition = self.market_condition("sale_id", row.sale_id);
        let set = db_row! {
            "seller" => row.seller.as_str(),
            "listing_price" => price.amount,
            "listing_symbol" => price.symbol.code.to_string(),
            "settlement_symbol" => token_symbol_code(&row.settlement_symbol),
            "offer_id" => offer_id,
            "maker_marketplace" => row.maker_marketplace.as_str(),
            "collection_name" => row.collection_name.as_str(),
            "collection_fee" => DbValue::Float(row.collection_fee),
            "updated_at_block" => block.block_num,
            "updated_at_time" => block.timestamp.as_str(),
        };

        let updated = db
            .update(TABLE_SALES, &set, &condition, &["market_contract", "sale_id"])
            .await?;
        if updated == 0 {
            let mut insert = set;
            insert.insert("market_contract".to_string(), self.contract().into());
            insert.insert("sale_id".to_string(), row.sale_id.into());
            insert.insert("buyer".to_string(), DbValue::Null);
            insert.insert("taker_marketplace".to_string(), DbValue::Null);
            insert.insert("state".to_string(), SaleState::Waiting.as_i64().into());
            insert.insert("created_at_block".to_string(), block.block_num.into());
            insert.insert(
                "created_at_time".to_string(),
                block.timestamp.as_str().into(),
            );
            db.insert(TABLE_SALES, &[insert], &["market_contract", "sale_id"])
                .await?;
        }
        Ok(())
    }

    pub(super) async fn apply_auction_row(
        &mut self,
        db: &mut ContractDbTransaction,
        block: &Block,
        row: AuctionTableRow,
    ) -> Result<(), FillerError> {
        let bid: Asset = row.current_bid.parse().map_err(|e| {
            FillerError::handler(
                HANDLER_NAME,
                "apply_auction_row",
                format!("bad bid: {:?}", e),
            )
        })?;

        let condition = self.market_condition("auction_id", row.auction_id);
        let set = db_row! {
            "seller" => row.seller.as_str(),
            "buyer" => if row.current_bidder.is_empty() {
                DbValue::Null
            } else {
                DbValue::Text(row.current_bidder.clone())
            },
            "price" => bid.amount,
            "token_symbol" => bid.symbol.code.to_string(),
            "collection_name" => row.collection_name.as_str(),
            "collection_fee" => DbValue::Float(row.collection_fee),
            "claimed_by_buyer" => row.claimed_by_buyer,
            "claimed_by_seller" => row.claimed_by_seller,
            "end_time" => row.end_time,
            "updated_at_block" => block.block_num,
            "updated_at_time" => block.timestamp.as_str(),
        };

        let updated = db
            .update(
                TABLE_AUCTIONS,
                &set,
                &condition,
                &["market_contract", "auction_id"],
            )
            .await?;
        if updated == 0 {
            let mut insert = set;
            insert.insert("market_contract".to_string(), self.contract().into());
            insert.insert("auction_id".to_string(), row.auction_id.into());
            insert.insert(
                "maker_marketplace".to_string(),
                row.maker_marketplace.as_str().into(),
            );
            insert.insert("taker_marketplace".to_string(), DbValue::Null);
            insert.insert("state".to_string(), AuctionState::Waiting.as_i64().into());
            insert.insert("created_at_block".to_string(), block.block_num.into());
            insert.insert(
                "created_at_time".to_string(),
                block.timestamp.as_str().into(),
            );
            db.insert(
                TABLE_AUCTIONS,
                &[insert],
                &["market_contract", "auction_id"],
            )
            .await?;
        }
        Ok(())
    }

    pub(super) async fn apply_buyoffer_row(
        &mut self,
        db: &mut ContractDbTransaction,
        block: &Block,
        row: BuyofferTableRow,
    ) -> Result<(), FillerError> {
        let price: Asset = row.price.parse().map_err(|e| {
            FillerError::handler(
                HANDLER_NAME,
                "apply_buyoffer_row",
                format!("bad price: {:?}", e),
            )
        })?;

        let condition = self.market_condition("buyoffer_id", row.buyoffer_id);
        let set = db_row! {
            "buyer" => row.buyer.as_str(),
            "seller" => row.recipient.as_str(),
            "price" => price.amount,
            "token_symbol" => price.symbol.code.to_string(),
            "memo" => row.memo.as_str(),
            "collection_name" => row.collection_name.as_str(),
            "collection_fee" => DbValue::Float(row.collection_fee),
            "updated_at_block" => block.block_num,
            "updated_at_time" => block.timestamp.as_str(),
        };

        let updated = db
            .update(
                TABLE_BUYOFFERS,
                &set,
                &condition,
                &["market_contract", "buyoffer_id"],
            )
            .await?;
        if updated == 0 {
            let mut insert = set;
            insert.insert("market_contract".to_string(), self.contract().into());
            insert.insert("buyoffer_id".to_string(), row.buyoffer_id.into());
            insert.insert(
                "maker_marketplace".to_string(),
                row.maker_marketplace.as_str().into(),
            );
            insert.insert("taker_marketplace".to_string(), DbValue::Null);
            insert.insert("decline_memo".to_string(), DbValue::Null);
            insert.insert("state".to_string(), BuyofferState::Pending.as_i64().into());
            insert.insert("created_at_block".to_string(), block.block_num.into());
            insert.insert(
                "created_at_time".to_string(),
                block.timestamp.as_str().into(),
            );
            db.insert(
                TABLE_BUYOFFERS,
                &[insert],
                &["market_contract", "buyoffer_id"],
            )
            .await?;
        }
        Ok(())
    }

    pub(super) async fn apply_marketplace_row(
        &mut self,
        db: &mut ContractDbTransaction,
        block: &Block,
        row: MarketplaceRow,
    ) -> Result<(), FillerError> {
        let condition = Condition::eq("market_contract", self.contract()).and(
            "marketplace_name",
            CmpOp::Eq,
            row.marketplace_name.as_str(),
        );
        let existing = db
            .select(TABLE_MARKETPLACES, &condition, &[], Some(1))
            .await?;
        if existing.is_empty() {
            db.insert(
                TABLE_MARKETPLACES,
                &[db_row! {
                    "market_contract" => self.contract(),
                    "marketplace_name" => row.marketplace_name.as_str(),
                    "creator" => row.creator.as_str(),
                    "created_at_block" => block.block_num,
                    "created_at_time" => block.timestamp.as_str(),
                }],
                &["market_contract", "marketplace_name"],
            )
            .await?;
        }
        Ok(())
    }

    pub(super) async fn apply_config_row(
        &mut self,
        db: &mut ContractDbTransaction,
        block: &Block,
        row: MarketConfigRow,
    ) -> Result<(), FillerError> {
        let condition = Condition::eq("market_contract", self.contract());
        db.update(
            TABLE_CONFIG,
            &db_row! {
                "version" => row.version,
                "maker_market_fee" => DbValue::Float(row.maker_market_fee),
                "taker_market_fee" => DbValue::Float(row.taker_market_fee),
                "minimum_auction_duration" => row.minimum_auction_duration,
                "maximum_auction_duration" => row.maximum_auction_duration,
                "minimum_bid_increase" => row.minimum_bid_increase,
                "auction_reset_duration" => row.auction_reset_duration,
            },
            &condition,
            &["market_contract"],
        )
        .await?;

        for token in &row.supported_tokens {
            db.replace(
                TABLE_TOKENS,
                &db_row! {
                    "market_contract" => self.contract(),
                    "token_contract" => token.token_contract.as_str(),
                    "token_symbol" => token_symbol_code(&token.token_symbol),
                    "token_precision" => token_symbol_precision(&token.token_symbol),
                },
                &["market_contract", "token_contract", "token_symbol"],
            )
            .await?;
        }

        for pair in &row.supported_symbol_pairs {
            db.replace(
                TABLE_SYMBOL_PAIRS,
                &db_row! {
                    "market_contract" => self.contract(),
                    "listing_symbol" => token_symbol_code(&pair.listing_symbol),
                    "settlement_symbol" => token_symbol_code(&pair.settlement_symbol),
                    "delphi_pair_name" => pair.delphi_pair_name.as_str(),
                    "invert_delphi_pair" => pair.invert_delphi_pair,
                },
                &["market_contract", "listing_symbol", "settlement_symbol"],
            )
            .await?;
        }

        log::trace!("Market config row applied at block {}", block.block_num);
        Ok(())
    }

    pub(super) async fn set_sale_state(
        &mut self,
        db: &mut ContractDbTransaction,
        block: &Block,
        sale_id: u64,
        state: SaleState,
        buyer: Option<String>,
        taker: Option<String>,
    ) -> Result<(), FillerError> {
        let condition = self.market_condition("sale_id", sale_id);
        let mut set = db_row! {
            "state" => state.as_i64(),
            "updated_at_block" => block.block_num,
            "updated_at_time" => block.timestamp.as_str(),
        };
        if let Some(buyer) = &buyer {
            set.insert("buyer".to_string(), buyer.as_str().into());
        }
        if let Some(taker) = &taker {
            set.insert("taker_marketplace".to_string(), taker.as_str().into());
        }

        let updated = db
            .update(TABLE_SALES, &set, &condition, &["market_contract", "sale_id"])
            .await?;
        if updated > 0 {
            self.push_notification(
                db,
                block,
                None,
                topics::SALES,
                notify::STATE_CHANGE,
                json!({"sale_id": sale_id.to_string(), "state": state.as_i64()}),
            );
        }
        Ok(())
    }

    /// The offer backing a sale was terminated on the NFT contract; an
    /// accepted offer means the sale went through.
    pub(super) async fn update_sale_by_offer(
        &mut self,
        db: &mut ContractDbTransaction,
        block: &Block,
        offer_id: u64,
    ) -> Result<(), FillerError> {
        let condition = Condition::eq("market_contract", self.contract()).and(
            "offer_id",
            CmpOp::Eq,
            offer_id,
        );
        let sales = db.select(TABLE_SALES, &condition, &[], Some(1)).await?;
        let Some(sale) = sales.first() else {
            return Ok(());
        };

        let sale_id = sale.get("sale_id").and_then(|v| v.as_i64()).unwrap_or(0) as u64;
        let current_state = sale.get("state").and_then(|v| v.as_i64()).unwrap_or(0);
        if current_state == SaleState::Sold.as_i64() {
            return Ok(());
        }

        let offer_condition = Condition::eq("contract", self.assets_account.to_string()).and(
            "offer_id",
            CmpOp::Eq,
            offer_id,
        );
        let offers = db
            .select(atomicassets::TABLE_OFFERS, &offer_condition, &[], Some(1))
            .await?;
        let offer_state = offers
            .first()
            .and_then(|row| row.get("state"))
            .and_then(|v| v.as_i64());

        if offer_state == Some(atomicassets::OfferState::Accepted.as_i64()) {
            self.set_sale_state(db, block, sale_id, SaleState::Sold, None, None)
                .await?;
        }
        Ok(())
    }

    pub(super) async fn set_auction_state(
        &mut self,
        db: &mut ContractDbTransaction,
        block: &Block,
        auction_id: u64,
        state: AuctionState,
    ) -> Result<(), FillerError> {
        let updated = db
            .update(
                TABLE_AUCTIONS,
                &db_row! {
                    "state" => state.as_i64(),
                    "updated_at_block" => block.block_num,
                    "updated_at_time" => block.timestamp.as_str(),
                },
                &self.market_condition("auction_id", auction_id),
                &["market_contract", "auction_id"],
            )
            .await?;
        if updated > 0 {
            self.push_notification(
                db,
                block,
                None,
                topics::AUCTIONS,
                notify::STATE_CHANGE,
                json!({"auction_id": auction_id.to_string(), "state": state.as_i64()}),
            );
        }
        Ok(())
    }

    pub(super) async fn set_buyoffer_state(
        &mut self,
        db: &mut ContractDbTransaction,
        block: &Block,
        buyoffer_id: u64,
        state: BuyofferState,
        memo: Option<String>,
    ) -> Result<(), FillerError> {
        let mut set = db_row! {
            "state" => state.as_i64(),
            "updated_at_block" => block.block_num,
            "updated_at_time" => block.timestamp.as_str(),
        };
        if let Some(memo) = &memo {
            set.insert("decline_memo".to_string(), memo.as_str().into());
        }

        let updated = db
            .update(
                TABLE_BUYOFFERS,
                &set,
                &self.market_condition("buyoffer_id", buyoffer_id),
                &["market_contract", "buyoffer_id"],
            )
            .await?;
        if updated > 0 {
            self.push_notification(
                db,
                block,
                None,
                topics::BUYOFFERS,
                notify::STATE_CHANGE,
                json!({"buyoffer_id": buyoffer_id.to_string(), "state": state.as_i64()}),
            );
        }
        Ok(())
    }
}
