use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::Name;

// Deserialize a binary payload rendered as a hexadecimal string by the
// ABI decoder
pub fn deserialize_hex_bytes<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    hex::decode(s).map_err(serde::de::Error::custom)
}

// u64 values come back from the decoder as strings, from the chain rpc as
// numbers; accept both
pub fn u64_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    use serde::de::Error;
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| Error::custom("number is not a u64")),
        serde_json::Value::String(s) => s.parse().map_err(Error::custom),
        other => Err(Error::custom(format!("cannot read u64 from {}", other))),
    }
}

pub fn u64_vec_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u64>, D::Error> {
    use serde::de::Error;
    let values = Vec::<serde_json::Value>::deserialize(deserializer)?;
    values
        .into_iter()
        .map(|value| match value {
            serde_json::Value::Number(n) => {
                n.as_u64().ok_or_else(|| Error::custom("number is not a u64"))
            }
            serde_json::Value::String(s) => s.parse().map_err(Error::custom),
            other => Err(Error::custom(format!("cannot read u64 from {}", other))),
        })
        .collect()
}

/// A block position on the chain: height plus the opaque block id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPosition {
    pub block_num: u32,
    pub block_id: String,
}

/// Authorization entry of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionLevel {
    pub actor: Name,
    pub permission: Name,
}

/// One action execution inside a transaction, flattened out of the trace
/// tree in depth-first execution order.
///
/// `data` stays binary until the receiver decides, per scope filter, whether
/// to decode it against the contract ABI active at this height.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionTrace {
    pub global_sequence: u64,
    pub action_ordinal: u32,
    pub creator_action_ordinal: u32,
    /// Account the action was delivered to; differs from `account` for
    /// notification copies
    pub receiver: Name,
    pub account: Name,
    pub name: Name,
    pub authorization: Vec<PermissionLevel>,
    #[serde(deserialize_with = "deserialize_hex_bytes", serialize_with = "serialize_hex_bytes")]
    pub data: Vec<u8>,
}

pub fn serialize_hex_bytes<S: serde::Serializer>(
    bytes: &[u8],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

impl ActionTrace {
    /// Notification copies are re-deliveries of the same action to another
    /// receiver; only the original execution is indexed.
    pub fn is_original(&self) -> bool {
        self.receiver == self.account
    }
}

/// An executed transaction with its flattened action traces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionTrace {
    /// Transaction id, lowercase hex
    pub id: String,
    pub cpu_usage_us: u32,
    pub net_usage_words: u32,
    pub traces: Vec<ActionTrace>,
}

/// A row-level change of a contract table, already demuxed out of the
/// state-history delta batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDeltaRow {
    pub code: Name,
    pub scope: Name,
    pub table: Name,
    pub primary_key: u64,
    pub payer: Name,
    /// false marks a deletion, true an insert or update
    pub present: bool,
    #[serde(deserialize_with = "deserialize_hex_bytes", serialize_with = "serialize_hex_bytes")]
    pub value: Vec<u8>,
}

/// A fully demuxed block as handed from the reader to the state receiver.
#[derive(Debug, Clone)]
pub struct Block {
    pub block_num: u32,
    pub block_id: String,
    pub prev_id: String,
    pub head: BlockPosition,
    pub last_irreversible: BlockPosition,
    /// Wall clock of the block, ISO-8601 as carried on the wire
    pub timestamp: String,
    pub producer: Name,
    pub transactions: Vec<TransactionTrace>,
    pub deltas: Vec<TableDeltaRow>,
}

impl Block {
    pub fn position(&self) -> BlockPosition {
        BlockPosition {
            block_num: self.block_num,
            block_id: self.block_id.clone(),
        }
    }

    /// Is this block past the irreversible horizon it was delivered with
    pub fn reversible(&self) -> bool {
        self.block_num > self.last_irreversible.block_num
    }
}

/// A decoded action payload attached to its trace at dispatch time.
#[derive(Debug, Clone)]
pub struct DecodedAction<'a> {
    pub trace: &'a ActionTrace,
    /// Structured payload, or None when the scope filter opted out of decode
    pub data: Option<Value>,
}

/// A decoded table row attached to its delta at dispatch time.
#[derive(Debug, Clone)]
pub struct DecodedRow<'a> {
    pub delta: &'a TableDeltaRow,
    /// Structured row value; None for deletions or when decode was skipped
    pub data: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_action_trace_from_decoded_json() {
        let value = serde_json::json!({
            "global_sequence": 100,
            "action_ordinal": 1,
            "creator_action_ordinal": 0,
            "receiver": "atomicassets",
            "account": "atomicassets",
            "name": "logmint",
            "authorization": [{"actor": "alice", "permission": "active"}],
            "data": "deadbeef"
        });

        let trace: ActionTrace = serde_json::from_value(value).unwrap();
        assert!(trace.is_original());
        assert_eq!(trace.account, Name::from_str("atomicassets").unwrap());
        assert_eq!(trace.data, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_notification_copy_detection() {
        let value = serde_json::json!({
            "global_sequence": 101,
            "action_ordinal": 2,
            "creator_action_ordinal": 1,
            "receiver": "somewatcher",
            "account": "atomicassets",
            "name": "logmint",
            "authorization": [],
            "data": ""
        });

        let trace: ActionTrace = serde_json::from_value(value).unwrap();
        assert!(!trace.is_original());
    }
}
