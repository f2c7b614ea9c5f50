use atomic_common::chain::{u64_from_any, u64_vec_from_any};
use serde::Deserialize;
use serde_json::Value;

/// Persisted sale lifecycle. `Invalid` is derived at query time and never
/// stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum SaleState {
    Waiting = 0,
    Listed = 1,
    Canceled = 2,
    Sold = 3,
}

impl SaleState {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

/// Persisted auction lifecycle. `Sold` and `Invalid` are derived from the
/// end time, buyer and claim flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum AuctionState {
    Waiting = 0,
    Listed = 1,
    Canceled = 2,
}

impl AuctionState {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum BuyofferState {
    Pending = 0,
    Declined = 1,
    Canceled = 2,
    Accepted = 3,
}

impl BuyofferState {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

// ===== Action payloads =====

#[derive(Debug, Clone, Deserialize)]
pub struct LogNewSale {
    #[serde(deserialize_with = "u64_from_any")]
    pub sale_id: u64,
    pub seller: String,
    #[serde(deserialize_with = "u64_vec_from_any")]
    pub asset_ids: Vec<u64>,
    pub listing_price: String,
    pub settlement_symbol: String,
    pub maker_marketplace: String,
    pub collection_name: String,
    pub collection_fee: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSaleStart {
    #[serde(deserialize_with = "u64_from_any")]
    pub sale_id: u64,
    #[serde(deserialize_with = "u64_from_any")]
    pub offer_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaleId {
    #[serde(deserialize_with = "u64_from_any")]
    pub sale_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseSale {
    pub buyer: String,
    #[serde(deserialize_with = "u64_from_any")]
    pub sale_id: u64,
    #[serde(default)]
    pub taker_marketplace: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogNewAuction {
    #[serde(deserialize_with = "u64_from_any")]
    pub auction_id: u64,
    pub seller: String,
    #[serde(deserialize_with = "u64_vec_from_any")]
    pub asset_ids: Vec<u64>,
    pub starting_bid: String,
    #[serde(deserialize_with = "u64_from_any")]
    pub end_time: u64,
    pub maker_marketplace: String,
    pub collection_name: String,
    pub collection_fee: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuctionId {
    #[serde(deserialize_with = "u64_from_any")]
    pub auction_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuctionBid {
    pub bidder: String,
    #[serde(deserialize_with = "u64_from_any")]
    pub auction_id: u64,
    pub bid: String,
    #[serde(default)]
    pub taker_marketplace: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogNewBuyoffer {
    #[serde(deserialize_with = "u64_from_any")]
    pub buyoffer_id: u64,
    pub buyer: String,
    pub recipient: String,
    pub price: String,
    #[serde(deserialize_with = "u64_vec_from_any")]
    pub asset_ids: Vec<u64>,
    #[serde(default)]
    pub memo: String,
    pub maker_marketplace: String,
    pub collection_name: String,
    pub collection_fee: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuyofferId {
    #[serde(deserialize_with = "u64_from_any")]
    pub buyoffer_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeclineBuyoffer {
    #[serde(deserialize_with = "u64_from_any")]
    pub buyoffer_id: u64,
    #[serde(default)]
    pub decline_memo: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterMarketplace {
    pub creator: String,
    pub marketplace_name: String,
}

// ===== Table rows =====

#[derive(Debug, Clone, Deserialize)]
pub struct SaleTableRow {
    #[serde(deserialize_with = "u64_from_any")]
    pub sale_id: u64,
    pub seller: String,
    #[serde(deserialize_with = "u64_vec_from_any")]
    pub asset_ids: Vec<u64>,
    /// -1 until the backing trade offer exists
    pub offer_id: Option<String>,
    pub listing_price: String,
    pub settlement_symbol: String,
    pub maker_marketplace: String,
    pub collection_name: String,
    pub collection_fee: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuctionTableRow {
    #[serde(deserialize_with = "u64_from_any")]
    pub auction_id: u64,
    pub seller: String,
    #[serde(deserialize_with = "u64_vec_from_any")]
    pub asset_ids: Vec<u64>,
    #[serde(deserialize_with = "u64_from_any")]
    pub end_time: u64,
    #[serde(default)]
    pub assets_transferred: bool,
    pub current_bid: String,
    #[serde(default)]
    pub current_bidder: String,
    #[serde(default)]
    pub claimed_by_seller: bool,
    #[serde(default)]
    pub claimed_by_buyer: bool,
    pub maker_marketplace: String,
    #[serde(default)]
    pub taker_marketplace: String,
    pub collection_name: String,
    pub collection_fee: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuyofferTableRow {
    #[serde(deserialize_with = "u64_from_any")]
    pub buyoffer_id: u64,
    pub buyer: String,
    pub recipient: String,
    pub price: String,
    #[serde(deserialize_with = "u64_vec_from_any")]
    pub asset_ids: Vec<u64>,
    #[serde(default)]
    pub memo: String,
    pub maker_marketplace: String,
    pub collection_name: String,
    pub collection_fee: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketplaceRow {
    pub marketplace_name: String,
    pub creator: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenDef {
    pub token_contract: String,
    pub token_symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolPairDef {
    pub listing_symbol: String,
    pub settlement_symbol: String,
    pub delphi_pair_name: String,
    #[serde(default)]
    pub invert_delphi_pair: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfigRow {
    #[serde(deserialize_with = "u64_from_any")]
    pub version: u64,
    #[serde(default)]
    pub maker_market_fee: f64,
    #[serde(default)]
    pub taker_market_fee: f64,
    #[serde(default, deserialize_with = "u64_from_any_opt")]
    pub minimum_auction_duration: Option<u64>,
    #[serde(default, deserialize_with = "u64_from_any_opt")]
    pub maximum_auction_duration: Option<u64>,
    #[serde(default, deserialize_with = "u64_from_any_opt")]
    pub minimum_bid_increase: Option<u64>,
    #[serde(default, deserialize_with = "u64_from_any_opt")]
    pub auction_reset_duration: Option<u64>,
    #[serde(default)]
    pub supported_tokens: Vec<TokenDef>,
    #[serde(default)]
    pub supported_symbol_pairs: Vec<SymbolPairDef>,
    #[serde(default)]
    pub atomicassets_account: String,
    #[serde(default)]
    pub delphioracle_account: String,
}

fn u64_from_any_opt<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u64>, D::Error> {
    use serde::de::Error;
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| Error::custom("number is not a u64")),
        Value::String(s) => s.parse().map(Some).map_err(Error::custom),
        other => Err(Error::custom(format!("cannot read u64 from {}", other))),
    }
}

/// Datapoint row of the linked price oracle.
#[derive(Debug, Clone, Deserialize)]
pub struct DelphiDatapointRow {
    #[serde(deserialize_with = "u64_from_any")]
    pub id: u64,
    #[serde(default)]
    pub owner: String,
    #[serde(deserialize_with = "u64_from_any")]
    pub median: u64,
    #[serde(deserialize_with = "u64_from_any")]
    pub value: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sale_row_with_offer_sentinel() {
        let row: SaleTableRow = serde_json::from_value(json!({
            "sale_id": "5",
            "seller": "alice",
            "asset_ids": ["42"],
            "offer_id": "-1",
            "listing_price": "10.0000 WAX",
            "settlement_symbol": "4,WAX",
            "maker_marketplace": "",
            "collection_name": "frogs",
            "collection_fee": 0.05
        }))
        .unwrap();
        assert_eq!(row.sale_id, 5);
        assert_eq!(row.offer_id.as_deref(), Some("-1"));
    }
}
