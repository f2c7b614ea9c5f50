use serde_json::{json, Value};

use super::{
    AtomicMarketHandler, AuctionBid, AuctionId, AuctionState, BuyofferId, BuyofferState,
    DeclineBuyoffer, LogNewAuction, LogNewBuyoffer, LogNewSale, LogSaleStart, MarketJob,
    PurchaseSale, RegisterMarketplace, SaleId, SaleState, HANDLER_NAME,
    PRIORITY_ACTION_UPDATE_AUCTION, PRIORITY_ACTION_UPDATE_BUYOFFER, PRIORITY_ACTION_UPDATE_SALE,
    TABLE_AUCTIONS, TABLE_AUCTIONS_ASSETS, TABLE_AUCTIONS_BIDS, TABLE_BUYOFFERS,
    TABLE_BUYOFFERS_ASSETS, TABLE_LOGS, TABLE_MARKETPLACES, TABLE_SALES,
};
use crate::{
    db::{ContractDbTransaction, DbValue},
    db_row,
    error::FillerError,
    handlers::{write_log, ActionCtx},
    notification::{actions as notify, topics},
};
use atomic_common::chain::Asset;

impl AtomicMarketHandler {
    async fn log(
        &self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
        name: &str,
        relation_name: &str,
        relation_id: &str,
        data: Value,
    ) -> Result<(), FillerError> {
        if !self.args.store_logs {
            return Ok(());
        }
        write_log(
            db,
            TABLE_LOGS,
            &self.contract(),
            name,
            relation_name,
            relation_id,
            data,
            ctx,
        )
        .await
    }

    fn parse_price(&self, price: &str, origin: &'static str) -> Result<Asset, FillerError> {
        price
            .parse()
            .map_err(|e| FillerError::handler(HANDLER_NAME, origin, format!("bad price: {:?}", e)))
    }

    pub(super) async fn on_new_sale(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: LogNewSale = ctx.payload(HANDLER_NAME, "lognewsale")?;
        let price = self.parse_price(&payload.listing_price, "lognewsale")?;

        db.replace(
            TABLE_SALES,
            &db_row! {
                "market_contract" => self.contract(),
                "sale_id" => payload.sale_id,
                "seller" => payload.seller.as_str(),
                "buyer" => DbValue::Null,
                "listing_price" => price.amount,
                "listing_symbol" => price.symbol.code.to_string(),
                "settlement_symbol" => super::token_symbol_code(&payload.settlement_symbol),
                "offer_id" => DbValue::Null,
                "maker_marketplace" => payload.maker_marketplace.as_str(),
                "taker_marketplace" => DbValue::Null,
                "collection_name" => payload.collection_name.as_str(),
                "collection_fee" => DbValue::Float(payload.collection_fee),
                "state" => SaleState::Waiting.as_i64(),
                "updated_at_block" => ctx.block.block_num,
                "updated_at_time" => ctx.block.timestamp.as_str(),
                "created_at_block" => ctx.block.block_num,
                "created_at_time" => ctx.block.timestamp.as_str(),
            },
            &["market_contract", "sale_id"],
        )
        .await?;

        let sale_id = payload.sale_id.to_string();
        self.log(
            db,
            ctx,
            "lognewsale",
            "sale",
            &sale_id,
            json!({"seller": payload.seller, "asset_ids": payload.asset_ids.iter().map(u64::to_string).collect::<Vec<_>>()}),
        )
        .await?;
        self.push_notification(
            db,
            ctx.block,
            Some(ctx.tx.id.clone()),
            topics::SALES,
            notify::CREATE,
            json!({"sale_id": sale_id, "seller": payload.seller, "collection_name": payload.collection_name}),
        );
        Ok(())
    }

    pub(super) async fn on_sale_start(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: LogSaleStart = ctx.payload(HANDLER_NAME, "logsalestart")?;

        db.update(
            TABLE_SALES,
            &db_row! { "offer_id" => payload.offer_id },
            &self.market_condition("sale_id", payload.sale_id),
            &["market_contract", "sale_id"],
        )
        .await?;

        self.jobs.push(
            MarketJob::SetSaleState {
                sale_id: payload.sale_id,
                state: SaleState::Listed,
                buyer: None,
                taker: None,
            },
            PRIORITY_ACTION_UPDATE_SALE,
            "atomicmarket::logsalestart",
        );
        Ok(())
    }

    pub(super) async fn on_cancel_sale(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: SaleId = ctx.payload(HANDLER_NAME, "cancelsale")?;
        let sale_id = payload.sale_id.to_string();
        self.log(db, ctx, "cancelsale", "sale", &sale_id, json!({})).await?;

        self.jobs.push(
            MarketJob::SetSaleState {
                sale_id: payload.sale_id,
                state: SaleState::Canceled,
                buyer: None,
                taker: None,
            },
            PRIORITY_ACTION_UPDATE_SALE,
            "atomicmarket::cancelsale",
        );
        Ok(())
    }

    pub(super) async fn on_purchase_sale(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: PurchaseSale = ctx.payload(HANDLER_NAME, "purchasesale")?;
        let sale_id = payload.sale_id.to_string();
        self.log(
            db,
            ctx,
            "purchasesale",
            "sale",
            &sale_id,
            json!({"buyer": payload.buyer}),
        )
        .await?;

        self.jobs.push(
            MarketJob::SetSaleState {
                sale_id: payload.sale_id,
                state: SaleState::Sold,
                buyer: Some(payload.buyer),
                taker: Some(payload.taker_marketplace),
            },
            PRIORITY_ACTION_UPDATE_SALE,
            "atomicmarket::purchasesale",
        );
        Ok(())
    }

    /// Offer terminations on the NFT contract reconcile the sales that
    /// reference them, after this block's table writes have landed.
    pub(super) async fn on_assets_offer_action(
        &mut self,
        _db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        #[derive(serde::Deserialize)]
        struct OfferId {
            #[serde(deserialize_with = "atomic_common::chain::u64_from_any")]
            offer_id: u64,
        }

        let payload: OfferId = ctx.payload(HANDLER_NAME, "offer_action")?;
        self.jobs.push(
            MarketJob::UpdateSaleByOffer {
                offer_id: payload.offer_id,
            },
            PRIORITY_ACTION_UPDATE_SALE,
            "atomicmarket::offer_action",
        );
        Ok(())
    }

    pub(super) async fn on_new_auction(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: LogNewAuction = ctx.payload(HANDLER_NAME, "lognewauct")?;
        let bid = self.parse_price(&payload.starting_bid, "lognewauct")?;

        db.replace(
            TABLE_AUCTIONS,
            &db_row! {
                "market_contract" => self.contract(),
                "auction_id" => payload.auction_id,
                "seller" => payload.seller.as_str(),
                "buyer" => DbValue::Null,
                "price" => bid.amount,
                "token_symbol" => bid.symbol.code.to_string(),
                "maker_marketplace" => payload.maker_marketplace.as_str(),
                "taker_marketplace" => DbValue::Null,
                "collection_name" => payload.collection_name.as_str(),
                "collection_fee" => DbValue::Float(payload.collection_fee),
                "claimed_by_buyer" => false,
                "claimed_by_seller" => false,
                "state" => AuctionState::Waiting.as_i64(),
                "end_time" => payload.end_time,
                "updated_at_block" => ctx.block.block_num,
                "updated_at_time" => ctx.block.timestamp.as_str(),
                "created_at_block" => ctx.block.block_num,
                "created_at_time" => ctx.block.timestamp.as_str(),
            },
            &["market_contract", "auction_id"],
        )
        .await?;

        let asset_rows: Vec<_> = payload
            .asset_ids
            .iter()
            .enumerate()
            .map(|(index, asset_id)| {
                db_row! {
                    "market_contract" => self.contract(),
                    "auction_id" => payload.auction_id,
                    "index" => (index + 1) as i64,
                    "asset_id" => *asset_id,
                }
            })
            .collect();
        db.delete(
            TABLE_AUCTIONS_ASSETS,
            &self.market_condition("auction_id", payload.auction_id),
        )
        .await?;
        db.insert(
            TABLE_AUCTIONS_ASSETS,
            &asset_rows,
            &["market_contract", "auction_id", "asset_id"],
        )
        .await?;

        let auction_id = payload.auction_id.to_string();
        self.log(
            db,
            ctx,
            "lognewauct",
            "auction",
            &auction_id,
            json!({"seller": payload.seller}),
        )
        .await?;
        self.push_notification(
            db,
            ctx.block,
            Some(ctx.tx.id.clone()),
            topics::AUCTIONS,
            notify::CREATE,
            json!({"auction_id": auction_id, "seller": payload.seller, "collection_name": payload.collection_name}),
        );
        Ok(())
    }

    pub(super) async fn on_auction_start(
        &mut self,
        _db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: AuctionId = ctx.payload(HANDLER_NAME, "logauctstart")?;
        self.jobs.push(
            MarketJob::SetAuctionState {
                auction_id: payload.auction_id,
                state: AuctionState::Listed,
            },
            PRIORITY_ACTION_UPDATE_AUCTION,
            "atomicmarket::logauctstart",
        );
        Ok(())
    }

    pub(super) async fn on_cancel_auction(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: AuctionId = ctx.payload(HANDLER_NAME, "cancelauct")?;
        let auction_id = payload.auction_id.to_string();
        self.log(db, ctx, "cancelauct", "auction", &auction_id, json!({}))
            .await?;

        self.jobs.push(
            MarketJob::SetAuctionState {
                auction_id: payload.auction_id,
                state: AuctionState::Canceled,
            },
            PRIORITY_ACTION_UPDATE_AUCTION,
            "atomicmarket::cancelauct",
        );
        Ok(())
    }

    pub(super) async fn on_auction_bid(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: AuctionBid = ctx.payload(HANDLER_NAME, "auctionbid")?;
        let bid = self.parse_price(&payload.bid, "auctionbid")?;

        let condition = self.market_condition("auction_id", payload.auction_id);
        let bids = db
            .select(TABLE_AUCTIONS_BIDS, &condition, &[], None)
            .await?;
        let bid_number = (bids.len() + 1) as i64;

        db.insert(
            TABLE_AUCTIONS_BIDS,
            &[db_row! {
                "market_contract" => self.contract(),
                "auction_id" => payload.auction_id,
                "bid_number" => bid_number,
                "account" => payload.bidder.as_str(),
                "amount" => bid.amount,
                "txid" => hex::decode(&ctx.tx.id).unwrap_or_default(),
                "created_at_block" => ctx.block.block_num,
                "created_at_time" => ctx.block.timestamp.as_str(),
            }],
            &["market_contract", "auction_id", "bid_number"],
        )
        .await?;

        db.update(
            TABLE_AUCTIONS,
            &db_row! {
                "price" => bid.amount,
                "buyer" => payload.bidder.as_str(),
                "taker_marketplace" => payload.taker_marketplace.as_str(),
                "updated_at_block" => ctx.block.block_num,
                "updated_at_time" => ctx.block.timestamp.as_str(),
            },
            &condition,
            &["market_contract", "auction_id"],
        )
        .await?;

        self.push_notification(
            db,
            ctx.block,
            Some(ctx.tx.id.clone()),
            topics::BIDS,
            notify::CREATE,
            json!({
                "auction_id": payload.auction_id.to_string(),
                "bid_number": bid_number,
                "account": payload.bidder,
                "amount": bid.amount.to_string(),
            }),
        );
        Ok(())
    }

    pub(super) async fn on_auction_claim(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
        by_buyer: bool,
    ) -> Result<(), FillerError> {
        let payload: AuctionId = ctx.payload(HANDLER_NAME, "auction_claim")?;
        let column = if by_buyer {
            "claimed_by_buyer"
        } else {
            "claimed_by_seller"
        };

        db.update(
            TABLE_AUCTIONS,
            &db_row! {
                column => true,
                "updated_at_block" => ctx.block.block_num,
                "updated_at_time" => ctx.block.timestamp.as_str(),
            },
            &self.market_condition("auction_id", payload.auction_id),
            &["market_contract", "auction_id"],
        )
        .await?;
        Ok(())
    }

    pub(super) async fn on_new_buyoffer(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: LogNewBuyoffer = ctx.payload(HANDLER_NAME, "lognewbuyo")?;
        let price = self.parse_price(&payload.price, "lognewbuyo")?;

        db.replace(
            TABLE_BUYOFFERS,
            &db_row! {
                "market_contract" => self.contract(),
                "buyoffer_id" => payload.buyoffer_id,
                "buyer" => payload.buyer.as_str(),
                "seller" => payload.recipient.as_str(),
                "price" => price.amount,
                "token_symbol" => price.symbol.code.to_string(),
                "memo" => payload.memo.as_str(),
                "decline_memo" => DbValue::Null,
                "maker_marketplace" => payload.maker_marketplace.as_str(),
                "taker_marketplace" => DbValue::Null,
                "collection_name" => payload.collection_name.as_str(),
                "collection_fee" => DbValue::Float(payload.collection_fee),
                "state" => BuyofferState::Pending.as_i64(),
                "updated_at_block" => ctx.block.block_num,
                "updated_at_time" => ctx.block.timestamp.as_str(),
                "created_at_block" => ctx.block.block_num,
                "created_at_time" => ctx.block.timestamp.as_str(),
            },
            &["market_contract", "buyoffer_id"],
        )
        .await?;

        let asset_rows: Vec<_> = payload
            .asset_ids
            .iter()
            .map(|asset_id| {
                db_row! {
                    "market_contract" => self.contract(),
                    "buyoffer_id" => payload.buyoffer_id,
                    "asset_id" => *asset_id,
                }
            })
            .collect();
        db.delete(
            TABLE_BUYOFFERS_ASSETS,
            &self.market_condition("buyoffer_id", payload.buyoffer_id),
        )
        .await?;
        db.insert(
            TABLE_BUYOFFERS_ASSETS,
            &asset_rows,
            &["market_contract", "buyoffer_id", "asset_id"],
        )
        .await?;

        self.push_notification(
            db,
            ctx.block,
            Some(ctx.tx.id.clone()),
            topics::BUYOFFERS,
            notify::CREATE,
            json!({"buyoffer_id": payload.buyoffer_id.to_string(), "buyer": payload.buyer}),
        );
        Ok(())
    }

    pub(super) async fn on_buyoffer_state(
        &mut self,
        _db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
        state: BuyofferState,
    ) -> Result<(), FillerError> {
        let payload: BuyofferId = ctx.payload(HANDLER_NAME, "buyoffer_state")?;
        self.jobs.push(
            MarketJob::SetBuyofferState {
                buyoffer_id: payload.buyoffer_id,
                state,
                memo: None,
            },
            PRIORITY_ACTION_UPDATE_BUYOFFER,
            "atomicmarket::buyoffer_state",
        );
        Ok(())
    }

    pub(super) async fn on_decline_buyoffer(
        &mut self,
        _db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: DeclineBuyoffer = ctx.payload(HANDLER_NAME, "declinebuyo")?;
        self.jobs.push(
            MarketJob::SetBuyofferState {
                buyoffer_id: payload.buyoffer_id,
                state: BuyofferState::Declined,
                memo: Some(payload.decline_memo),
            },
            PRIORITY_ACTION_UPDATE_BUYOFFER,
            "atomicmarket::declinebuyo",
        );
        Ok(())
    }

    pub(super) async fn on_register_marketplace(
        &mut self,
        db: &mut ContractDbTransaction,
        ctx: &ActionCtx<'_>,
    ) -> Result<(), FillerError> {
        let payload: RegisterMarketplace = ctx.payload(HANDLER_NAME, "regmarket")?;
        db.replace(
            TABLE_MARKETPLACES,
            &db_row! {
                "market_contract" => self.contract(),
                "marketplace_name" => payload.marketplace_name.as_str(),
                "creator" => payload.creator.as_str(),
                "created_at_block" => ctx.block.block_num,
                "created_at_time" => ctx.block.timestamp.as_str(),
            },
            &["market_contract", "marketplace_name"],
        )
        .await?;
        Ok(())
    }
}
