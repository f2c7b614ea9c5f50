use atomic_common::{
    abi::{variant_pair, TableDeltaBatch},
    chain::{ActionTrace, Block, BlockPosition, PermissionLevel, TableDeltaRow, TransactionTrace},
};
use log::trace;
use serde::Deserialize;
use serde_json::Value;

use super::ReaderError;

// Transaction status byte for an executed transaction
const STATUS_EXECUTED: u64 = 0;

/// `get_blocks_result_v0` with its payloads still binary.
#[derive(Debug, Deserialize)]
pub struct BlocksResult {
    pub head: BlockPosition,
    pub last_irreversible: BlockPosition,
    pub this_block: Option<BlockPosition>,
    pub prev_block: Option<BlockPosition>,
    pub block: Option<String>,
    pub traces: Option<String>,
    pub deltas: Option<String>,
}

impl BlocksResult {
    /// Unwrap the "result" variant produced by the protocol decode.
    pub fn from_result(value: &Value) -> Result<Option<Self>, ReaderError> {
        let (variant, body) =
            variant_pair(value).map_err(|e| ReaderError::Protocol(e.to_string()))?;
        match variant {
            "get_blocks_result_v0" => {
                let result = serde_json::from_value(body.clone())
                    .map_err(|e| ReaderError::Protocol(e.to_string()))?;
                Ok(Some(result))
            }
            // status responses and newer result revisions are not block data
            other => {
                trace!("Ignoring result variant '{}'", other);
                Ok(None)
            }
        }
    }

    pub fn decode_hex(field: &Option<String>) -> Result<Option<Vec<u8>>, ReaderError> {
        match field {
            Some(hex) => hex::decode(hex)
                .map(Some)
                .map_err(|e| ReaderError::Protocol(format!("payload is not hex: {}", e))),
            None => Ok(None),
        }
    }
}

fn get_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, ReaderError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ReaderError::Protocol(format!("missing string field '{}'", field)))
}

fn get_u64(value: &Value, field: &str) -> Result<u64, ReaderError> {
    let field_value = value
        .get(field)
        .ok_or_else(|| ReaderError::Protocol(format!("missing field '{}'", field)))?;
    match field_value {
        // 64 bit integers are decoded as strings, smaller ones as numbers
        Value::String(s) => s
            .parse()
            .map_err(|_| ReaderError::Protocol(format!("field '{}' is not a number", field))),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| ReaderError::Protocol(format!("field '{}' is not a u64", field))),
        _ => Err(ReaderError::Protocol(format!(
            "field '{}' is not a number",
            field
        ))),
    }
}

/// Convert a decoded "transaction_trace[]" value into transactions with
/// flattened action traces in execution order.
///
/// Only executed transactions are kept; notification copies stay in the
/// list (the receiver filters them) but traces without a receipt (failed
/// inlines) are dropped.
pub fn convert_traces(value: &Value) -> Result<Vec<TransactionTrace>, ReaderError> {
    let items = value
        .as_array()
        .ok_or_else(|| ReaderError::Protocol("traces payload is not an array".to_string()))?;

    let mut transactions = Vec::with_capacity(items.len());
    for item in items {
        let (variant, body) =
            variant_pair(item).map_err(|e| ReaderError::Protocol(e.to_string()))?;
        if variant != "transaction_trace_v0" {
            return Err(ReaderError::Protocol(format!(
                "unsupported transaction trace variant '{}'",
                variant
            )));
        }

        let status = get_u64(body, "status")?;
        if status != STATUS_EXECUTED {
            continue;
        }

        let action_traces = body
            .get("action_traces")
            .and_then(Value::as_array)
            .ok_or_else(|| ReaderError::Protocol("transaction without action_traces".into()))?;

        let mut traces = Vec::with_capacity(action_traces.len());
        for action in action_traces {
            let (_, at) =
                variant_pair(action).map_err(|e| ReaderError::Protocol(e.to_string()))?;

            // a missing receipt marks a failed inline action
            let Some(receipt) = at.get("receipt").filter(|r| !r.is_null()) else {
                continue;
            };
            let (_, receipt) =
                variant_pair(receipt).map_err(|e| ReaderError::Protocol(e.to_string()))?;

            let act = at
                .get("act")
                .ok_or_else(|| ReaderError::Protocol("action trace without act".into()))?;

            let authorization: Vec<PermissionLevel> = act
                .get("authorization")
                .map(|v| serde_json::from_value(v.clone()))
                .transpose()
                .map_err(|e| ReaderError::Protocol(e.to_string()))?
                .unwrap_or_default();

            traces.push(ActionTrace {
                global_sequence: get_u64(receipt, "global_sequence")?,
                action_ordinal: get_u64(at, "action_ordinal")? as u32,
                creator_action_ordinal: get_u64(at, "creator_action_ordinal")? as u32,
                receiver: get_str(at, "receiver")?
                    .parse()
                    .map_err(|e| ReaderError::Protocol(format!("bad receiver: {:?}", e)))?,
                account: get_str(act, "account")?
                    .parse()
                    .map_err(|e| ReaderError::Protocol(format!("bad account: {:?}", e)))?,
                name: get_str(act, "name")?
                    .parse()
                    .map_err(|e| ReaderError::Protocol(format!("bad action name: {:?}", e)))?,
                authorization,
                data: hex::decode(get_str(act, "data")?)
                    .map_err(|e| ReaderError::Protocol(format!("action data is not hex: {}", e)))?,
            });
        }

        // chain execution order
        traces.sort_by_key(|t| t.global_sequence);

        transactions.push(TransactionTrace {
            id: get_str(body, "id")?.to_lowercase(),
            cpu_usage_us: get_u64(body, "cpu_usage_us")? as u32,
            net_usage_words: get_u64(body, "net_usage_words")? as u32,
            traces,
        });
    }

    Ok(transactions)
}

/// Extract contract row changes out of the decoded delta batches, keeping
/// the on-wire order.
pub fn convert_deltas(batches: &[TableDeltaBatch]) -> Result<Vec<TableDeltaRow>, ReaderError> {
    let mut rows = Vec::new();
    for batch in batches {
        if batch.name != "contract_row" {
            continue;
        }

        for row in &batch.rows {
            let (_, body) =
                variant_pair(&row.data).map_err(|e| ReaderError::Protocol(e.to_string()))?;

            rows.push(TableDeltaRow {
                code: get_str(body, "code")?
                    .parse()
                    .map_err(|e| ReaderError::Protocol(format!("bad code: {:?}", e)))?,
                scope: get_str(body, "scope")?
                    .parse()
                    .map_err(|e| ReaderError::Protocol(format!("bad scope: {:?}", e)))?,
                table: get_str(body, "table")?
                    .parse()
                    .map_err(|e| ReaderError::Protocol(format!("bad table: {:?}", e)))?,
                primary_key: get_u64(body, "primary_key")?,
                payer: get_str(body, "payer")?
                    .parse()
                    .map_err(|e| ReaderError::Protocol(format!("bad payer: {:?}", e)))?,
                present: row.present,
                value: hex::decode(get_str(body, "value")?)
                    .map_err(|e| ReaderError::Protocol(format!("row value is not hex: {}", e)))?,
            });
        }
    }
    Ok(rows)
}

/// Assemble the demuxed block handed to the receiver.
pub fn build_block(
    result: &BlocksResult,
    signed_block: Option<&Value>,
    transactions: Vec<TransactionTrace>,
    deltas: Vec<TableDeltaRow>,
) -> Result<Block, ReaderError> {
    let this_block = result
        .this_block
        .as_ref()
        .ok_or_else(|| ReaderError::Protocol("result without this_block".into()))?;

    let (timestamp, producer) = match signed_block {
        Some(block) => (
            get_str(block, "timestamp")?.to_string(),
            get_str(block, "producer")?
                .parse()
                .map_err(|e| ReaderError::Protocol(format!("bad producer: {:?}", e)))?,
        ),
        None => (String::new(), Default::default()),
    };

    Ok(Block {
        block_num: this_block.block_num,
        block_id: this_block.block_id.to_lowercase(),
        prev_id: result
            .prev_block
            .as_ref()
            .map(|p| p.block_id.to_lowercase())
            .unwrap_or_default(),
        head: result.head.clone(),
        last_irreversible: result.last_irreversible.clone(),
        timestamp,
        producer,
        transactions,
        deltas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_convert_traces_orders_and_filters() {
        let value = json!([
            ["transaction_trace_v0", {
                "id": "ABCD",
                "status": 0,
                "cpu_usage_us": 100,
                "net_usage_words": 10,
                "action_traces": [
                    ["action_trace_v1", {
                        "action_ordinal": 2,
                        "creator_action_ordinal": 1,
                        "receipt": ["action_receipt_v0", {"global_sequence": "201"}],
                        "receiver": "atomicassets",
                        "act": {
                            "account": "atomicassets",
                            "name": "logtransfer",
                            "authorization": [],
                            "data": "00"
                        }
                    }],
                    ["action_trace_v1", {
                        "action_ordinal": 1,
                        "creator_action_ordinal": 0,
                        "receipt": ["action_receipt_v0", {"global_sequence": "200"}],
                        "receiver": "atomicassets",
                        "act": {
                            "account": "atomicassets",
                            "name": "logmint",
                            "authorization": [],
                            "data": "01"
                        }
                    }],
                    ["action_trace_v1", {
                        "action_ordinal": 3,
                        "creator_action_ordinal": 1,
                        "receipt": null,
                        "receiver": "failed",
                        "act": {"account": "failed", "name": "x", "authorization": [], "data": ""}
                    }]
                ]
            }],
            ["transaction_trace_v0", {
                "id": "FFFF",
                "status": 3,
                "cpu_usage_us": 0,
                "net_usage_words": 0,
                "action_traces": []
            }]
        ]);

        let transactions = convert_traces(&value).unwrap();
        // the failed transaction is dropped
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].id, "abcd");
        // traces come back in execution order
        let names: Vec<String> = transactions[0]
            .traces
            .iter()
            .map(|t| t.name.to_string())
            .collect();
        assert_eq!(names, vec!["logmint", "logtransfer"]);
    }

    #[test]
    fn test_result_variant_filtering() {
        let status = json!(["get_status_result_v0", {"head": {"block_num": 1, "block_id": "aa"}}]);
        assert!(BlocksResult::from_result(&status).unwrap().is_none());

        let blocks = json!(["get_blocks_result_v0", {
            "head": {"block_num": 10, "block_id": "aa"},
            "last_irreversible": {"block_num": 5, "block_id": "bb"},
            "this_block": {"block_num": 8, "block_id": "cc"},
            "prev_block": {"block_num": 7, "block_id": "dd"},
            "block": null,
            "traces": null,
            "deltas": null
        }]);
        let result = BlocksResult::from_result(&blocks).unwrap().unwrap();
        assert_eq!(result.this_block.unwrap().block_num, 8);
    }
}
