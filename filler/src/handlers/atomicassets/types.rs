use atomic_common::chain::{u64_from_any, u64_vec_from_any};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Offer lifecycle. The chain only knows pending offers; the other states
/// are reconstructed from the log actions and row deletions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum OfferState {
    Pending = 0,
    Invalid = 1,
    Unknown = 2,
    Accepted = 3,
    Declined = 4,
    Canceled = 5,
}

impl OfferState {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

/// Flatten the on-chain attribute map
/// `[{"key": k, "value": [type, v]}, ...]` into a plain object.
pub fn attribute_map_to_object(value: &Value) -> Value {
    let mut object = Map::new();
    if let Some(items) = value.as_array() {
        for item in items {
            let Some(key) = item.get("key").and_then(Value::as_str) else {
                continue;
            };
            let Some(attribute) = item.get("value") else {
                continue;
            };
            // strip the variant tag, keep the payload
            let unwrapped = attribute
                .as_array()
                .filter(|pair| pair.len() == 2)
                .map(|pair| pair[1].clone())
                .unwrap_or_else(|| attribute.clone());
            object.insert(key.to_string(), unwrapped);
        }
    }
    Value::Object(object)
}

// ===== Action payloads =====

#[derive(Debug, Deserialize)]
pub struct CreateCollection {
    pub author: String,
    pub collection_name: String,
    pub allow_notify: bool,
    pub authorized_accounts: Vec<String>,
    pub notify_accounts: Vec<String>,
    pub market_fee: f64,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
pub struct SetCollectionData {
    pub collection_name: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
pub struct CollectionAccount {
    pub collection_name: String,
    #[serde(alias = "account_to_add", alias = "account_to_remove")]
    pub account: String,
}

#[derive(Debug, Deserialize)]
pub struct CollectionName {
    pub collection_name: String,
}

#[derive(Debug, Deserialize)]
pub struct SetMarketFee {
    pub collection_name: String,
    pub market_fee: f64,
}

#[derive(Debug, Deserialize)]
pub struct FormatDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSchema {
    pub collection_name: String,
    pub schema_name: String,
    pub schema_format: Vec<FormatDef>,
}

#[derive(Debug, Deserialize)]
pub struct ExtendSchema {
    pub collection_name: String,
    pub schema_name: String,
    pub schema_format_extension: Vec<FormatDef>,
}

#[derive(Debug, Deserialize)]
pub struct LogNewTemplate {
    #[serde(deserialize_with = "u64_from_any")]
    pub template_id: u64,
    pub collection_name: String,
    pub schema_name: String,
    pub transferable: bool,
    pub burnable: bool,
    #[serde(deserialize_with = "u64_from_any")]
    pub max_supply: u64,
    #[serde(default)]
    pub immutable_data: Value,
}

#[derive(Debug, Deserialize)]
pub struct LockTemplate {
    pub collection_name: String,
    #[serde(deserialize_with = "u64_from_any")]
    pub template_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct LogMint {
    #[serde(deserialize_with = "u64_from_any")]
    pub asset_id: u64,
    pub collection_name: String,
    pub schema_name: String,
    pub template_id: i64,
    pub new_asset_owner: String,
    #[serde(default)]
    pub immutable_data: Value,
    #[serde(default)]
    pub mutable_data: Value,
    #[serde(default)]
    pub backed_tokens: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogSetData {
    pub asset_owner: String,
    #[serde(deserialize_with = "u64_from_any")]
    pub asset_id: u64,
    #[serde(default)]
    pub new_data: Value,
}

#[derive(Debug, Deserialize)]
pub struct LogBurnAsset {
    pub asset_owner: String,
    #[serde(deserialize_with = "u64_from_any")]
    pub asset_id: u64,
    pub collection_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LogBackAsset {
    pub asset_owner: String,
    #[serde(deserialize_with = "u64_from_any")]
    pub asset_id: u64,
    pub backed_token: String,
}

#[derive(Debug, Deserialize)]
pub struct LogTransfer {
    pub collection_name: String,
    #[serde(rename = "from")]
    pub sender: String,
    #[serde(rename = "to")]
    pub recipient: String,
    #[serde(deserialize_with = "u64_vec_from_any")]
    pub asset_ids: Vec<u64>,
    #[serde(default)]
    pub memo: String,
}

#[derive(Debug, Deserialize)]
pub struct LogNewOffer {
    #[serde(deserialize_with = "u64_from_any")]
    pub offer_id: u64,
    pub sender: String,
    pub recipient: String,
    #[serde(deserialize_with = "u64_vec_from_any")]
    pub sender_asset_ids: Vec<u64>,
    #[serde(deserialize_with = "u64_vec_from_any")]
    pub recipient_asset_ids: Vec<u64>,
    #[serde(default)]
    pub memo: String,
}

#[derive(Debug, Deserialize)]
pub struct OfferId {
    #[serde(deserialize_with = "u64_from_any")]
    pub offer_id: u64,
}

// ===== Table rows =====

#[derive(Debug, Deserialize)]
pub struct CollectionRow {
    pub collection_name: String,
    pub author: String,
    pub allow_notify: bool,
    pub authorized_accounts: Vec<String>,
    pub notify_accounts: Vec<String>,
    pub market_fee: f64,
}

#[derive(Debug, Deserialize)]
pub struct SchemaRow {
    pub schema_name: String,
    #[serde(default)]
    pub format: Value,
}

#[derive(Debug, Deserialize)]
pub struct TemplateRow {
    #[serde(deserialize_with = "u64_from_any")]
    pub template_id: u64,
    pub schema_name: String,
    pub transferable: bool,
    pub burnable: bool,
    #[serde(deserialize_with = "u64_from_any")]
    pub max_supply: u64,
    #[serde(deserialize_with = "u64_from_any")]
    pub issued_supply: u64,
}

#[derive(Debug, Deserialize)]
pub struct AssetRow {
    #[serde(deserialize_with = "u64_from_any")]
    pub asset_id: u64,
    pub collection_name: String,
    pub schema_name: String,
    pub template_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct OfferRow {
    #[serde(deserialize_with = "u64_from_any")]
    pub offer_id: u64,
    pub sender: String,
    pub recipient: String,
    #[serde(default)]
    pub memo: String,
}

#[derive(Debug, Deserialize)]
pub struct BalanceRow {
    pub owner: String,
    #[serde(default)]
    pub quantities: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenDef {
    pub token_contract: String,
    pub token_symbol: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfigRow {
    #[serde(deserialize_with = "u64_from_any")]
    pub version: u64,
    #[serde(default)]
    pub supported_tokens: Vec<TokenDef>,
    #[serde(default)]
    pub collection_format: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_map_flattening() {
        let map = json!([
            {"key": "name", "value": ["string", "frog"]},
            {"key": "level", "value": ["uint32", 7]}
        ]);
        assert_eq!(
            attribute_map_to_object(&map),
            json!({"name": "frog", "level": 7})
        );
    }

    #[test]
    fn test_logmint_payload() {
        let payload: LogMint = serde_json::from_value(json!({
            "asset_id": "42",
            "authorized_minter": "minter",
            "collection_name": "frogs",
            "schema_name": "base",
            "template_id": 3,
            "new_asset_owner": "alice",
            "immutable_data": [],
            "mutable_data": [],
            "backed_tokens": []
        }))
        .unwrap();
        assert_eq!(payload.asset_id, 42);
        assert_eq!(payload.new_asset_owner, "alice");
    }
}
