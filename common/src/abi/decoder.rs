use chrono::DateTime;
use serde_json::{json, Map, Value};

use super::{Abi, ByteReader, DecodeError, StructDef};
use crate::chain::{Name, Symbol, SymbolCode};

// Epoch of block timestamps: 2000-01-01T00:00:00.000 UTC, 500ms slots
const BLOCK_TIMESTAMP_EPOCH_MS: i64 = 946_684_800_000;
const BLOCK_TIMESTAMP_INTERVAL_MS: i64 = 500;

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// One decoded delta batch: the state-history table name plus its rows with
/// the row payloads already decoded against the declared table type.
#[derive(Debug, Clone)]
pub struct TableDeltaBatch {
    pub name: String,
    pub rows: Vec<RawDeltaRow>,
}

#[derive(Debug, Clone)]
pub struct RawDeltaRow {
    pub present: bool,
    pub data: Value,
}

impl Abi {
    /// Decode a full payload of the given type.
    ///
    /// Fails with `TrailingBytes` when the payload is longer than the type:
    /// a length mismatch means the ABI drifted from the writer of the bytes.
    pub fn decode(&self, type_name: &str, data: &[u8]) -> Result<Value, DecodeError> {
        let mut reader = ByteReader::new(data);
        let value = self.decode_type(type_name, &mut reader)?;
        if reader.remaining() > 0 {
            return Err(DecodeError::TrailingBytes {
                type_name: type_name.to_string(),
                consumed: reader.position(),
                total: reader.total(),
            });
        }
        Ok(value)
    }

    /// Decode the state-history "table_delta[]" blob, recursively decoding
    /// each row's `data` against the table type declared by the enclosing
    /// delta. Unknown delta variants and undeclared tables are fatal.
    pub fn decode_table_deltas(&self, data: &[u8]) -> Result<Vec<TableDeltaBatch>, DecodeError> {
        let decoded = self.decode("table_delta[]", data)?;
        let deltas = decoded
            .as_array()
            .ok_or_else(|| DecodeError::InvalidAbi("table_delta[] is not an array".into()))?;

        let mut batches = Vec::with_capacity(deltas.len());
        for delta in deltas {
            let (variant, body) = unwrap_variant(delta)?;
            if variant != "table_delta_v0" {
                return Err(DecodeError::UnsupportedDelta(variant.to_string()));
            }

            let name = body
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| DecodeError::InvalidAbi("table_delta without name".into()))?;
            let row_type = self
                .table_type(name)
                .ok_or_else(|| DecodeError::UnsupportedDelta(name.to_string()))?
                .to_string();

            let rows = body
                .get("rows")
                .and_then(Value::as_array)
                .ok_or_else(|| DecodeError::InvalidAbi("table_delta without rows".into()))?;

            let mut decoded_rows = Vec::with_capacity(rows.len());
            for row in rows {
                let present = row
                    .get("present")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| DecodeError::InvalidAbi("row without present flag".into()))?;
                let data = row
                    .get("data")
                    .and_then(Value::as_str)
                    .ok_or_else(|| DecodeError::InvalidAbi("row without data".into()))?;
                let bytes = hex::decode(data)
                    .map_err(|_| DecodeError::InvalidAbi("row data is not hex".into()))?;
                decoded_rows.push(RawDeltaRow {
                    present,
                    data: self.decode(&row_type, &bytes)?,
                });
            }

            batches.push(TableDeltaBatch {
                name: name.to_string(),
                rows: decoded_rows,
            });
        }

        Ok(batches)
    }

    fn decode_type(&self, type_name: &str, reader: &mut ByteReader) -> Result<Value, DecodeError> {
        // binary extension: absent when the payload ends before it
        if let Some(inner) = type_name.strip_suffix('$') {
            if reader.remaining() == 0 {
                return Ok(Value::Null);
            }
            return self.decode_type(inner, reader);
        }

        if let Some(inner) = type_name.strip_suffix("[]") {
            let count = reader.read_varuint32()? as usize;
            let mut items = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                items.push(self.decode_type(inner, reader)?);
            }
            return Ok(Value::Array(items));
        }

        if let Some(inner) = type_name.strip_suffix('?') {
            if reader.read_bool()? {
                return self.decode_type(inner, reader);
            }
            return Ok(Value::Null);
        }

        let resolved = self.resolve_type(type_name)?;
        if resolved != type_name {
            // typedef targets may themselves carry modifiers
            return self.decode_type(resolved, reader);
        }

        if let Some(value) = self.decode_builtin(resolved, reader)? {
            return Ok(value);
        }

        if let Some(def) = self.get_struct(resolved) {
            return self.decode_struct(def, reader);
        }

        if let Some(variant) = self.get_variant(resolved) {
            let index = reader.read_varuint32()?;
            let inner = variant.types.get(index as usize).ok_or_else(|| {
                DecodeError::UnknownVariantIndex {
                    variant: variant.name.clone(),
                    index,
                }
            })?;
            let value = self.decode_type(inner, reader)?;
            return Ok(json!([inner, value]));
        }

        Err(DecodeError::UnknownType(type_name.to_string()))
    }

    fn decode_struct(
        &self,
        def: &StructDef,
        reader: &mut ByteReader,
    ) -> Result<Value, DecodeError> {
        let mut object = Map::new();

        if !def.base.is_empty() {
            let base = self.decode_type(&def.base, reader)?;
            if let Value::Object(fields) = base {
                object.extend(fields);
            }
        }

        for field in &def.fields {
            let value = self.decode_type(&field.type_name, reader)?;
            object.insert(field.name.clone(), value);
        }

        Ok(Value::Object(object))
    }

    // 64 and 128 bit integers are rendered as strings: they exceed what a
    // JSON number can carry losslessly
    fn decode_builtin(
        &self,
        type_name: &str,
        reader: &mut ByteReader,
    ) -> Result<Option<Value>, DecodeError> {
        let value = match type_name {
            "bool" => json!(reader.read_bool()?),
            "int8" => json!(reader.read_i8()?),
            "uint8" => json!(reader.read_u8()?),
            "int16" => json!(reader.read_i16()?),
            "uint16" => json!(reader.read_u16()?),
            "int32" => json!(reader.read_i32()?),
            "uint32" => json!(reader.read_u32()?),
            "int64" => json!(reader.read_i64()?.to_string()),
            "uint64" => json!(reader.read_u64()?.to_string()),
            "int128" => json!(reader.read_i128()?.to_string()),
            "uint128" => json!(reader.read_u128()?.to_string()),
            "varuint32" => json!(reader.read_varuint32()?),
            "varint32" => json!(reader.read_varint32()?),
            "float32" => json!(reader.read_f32()?),
            "float64" => json!(reader.read_f64()?),
            "float128" => json!(hex::encode(reader.read_bytes(16, "float128")?)),
            "name" => json!(Name::from_raw(reader.read_u64()?).to_string()),
            "string" => json!(reader.read_string()?),
            "bytes" => json!(hex::encode(reader.read_sized_bytes()?)),
            "checksum160" => json!(hex::encode(reader.read_bytes(20, "checksum160")?)),
            "checksum256" => json!(hex::encode(reader.read_bytes(32, "checksum256")?)),
            "checksum512" => json!(hex::encode(reader.read_bytes(64, "checksum512")?)),
            // key material is carried opaquely: one tag byte plus payload
            "public_key" => json!(hex::encode(reader.read_bytes(34, "public_key")?)),
            "signature" => json!(hex::encode(reader.read_bytes(66, "signature")?)),
            "symbol" => json!(Symbol::from_raw(reader.read_u64()?).to_string()),
            "symbol_code" => json!(SymbolCode::from_raw(reader.read_u64()?).to_string()),
            "asset" => {
                let amount = reader.read_i64()?;
                let symbol = Symbol::from_raw(reader.read_u64()?);
                json!(crate::chain::Asset { amount, symbol }.to_string())
            }
            "time_point" => {
                let micros = reader.read_i64()?;
                json!(format_timestamp_micros(micros))
            }
            "time_point_sec" => {
                let secs = reader.read_u32()?;
                json!(format_timestamp_micros(secs as i64 * 1_000_000))
            }
            "block_timestamp_type" => {
                let slot = reader.read_u32()?;
                let millis = BLOCK_TIMESTAMP_EPOCH_MS + slot as i64 * BLOCK_TIMESTAMP_INTERVAL_MS;
                json!(format_timestamp_micros(millis * 1000))
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

fn format_timestamp_micros(micros: i64) -> String {
    match DateTime::from_timestamp_micros(micros) {
        Some(dt) => dt.format(TIME_FORMAT).to_string(),
        None => micros.to_string(),
    }
}

fn unwrap_variant(value: &Value) -> Result<(&str, &Value), DecodeError> {
    let pair = value
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| DecodeError::InvalidAbi("expected [variant, value] pair".into()))?;
    let name = pair[0]
        .as_str()
        .ok_or_else(|| DecodeError::InvalidAbi("variant tag is not a string".into()))?;
    Ok((name, &pair[1]))
}

/// Unwrap a `[variant_name, value]` pair produced by variant decode.
pub fn variant_pair(value: &Value) -> Result<(&str, &Value), DecodeError> {
    unwrap_variant(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_abi() -> Abi {
        Abi::from_json(
            r#"{
                "version": "eosio::abi/1.1",
                "types": [
                    {"new_type_name": "account_name", "type": "name"}
                ],
                "structs": [
                    {
                        "name": "transfer",
                        "base": "",
                        "fields": [
                            {"name": "from", "type": "account_name"},
                            {"name": "to", "type": "account_name"},
                            {"name": "asset_ids", "type": "uint64[]"},
                            {"name": "memo", "type": "string"}
                        ]
                    },
                    {
                        "name": "row_v0",
                        "base": "",
                        "fields": [
                            {"name": "id", "type": "uint64"}
                        ]
                    }
                ],
                "actions": [
                    {"name": "transfer", "type": "transfer", "ricardian_contract": ""}
                ],
                "tables": [],
                "variants": [
                    {"name": "row", "types": ["row_v0"]}
                ]
            }"#,
        )
        .unwrap()
    }

    fn encode_name(s: &str) -> [u8; 8] {
        use std::str::FromStr;
        Name::from_str(s).unwrap().as_u64().to_le_bytes()
    }

    #[test]
    fn test_decode_struct() {
        let mut data = Vec::new();
        data.extend_from_slice(&encode_name("alice"));
        data.extend_from_slice(&encode_name("bob"));
        data.push(2); // two asset ids
        data.extend_from_slice(&42u64.to_le_bytes());
        data.extend_from_slice(&43u64.to_le_bytes());
        data.push(2); // memo length
        data.extend_from_slice(b"hi");

        let abi = test_abi();
        let value = abi.decode("transfer", &data).unwrap();
        assert_eq!(value["from"], "alice");
        assert_eq!(value["to"], "bob");
        assert_eq!(value["asset_ids"], json!(["42", "43"]));
        assert_eq!(value["memo"], "hi");
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(&encode_name("alice"));
        data.extend_from_slice(&encode_name("bob"));
        data.push(0);
        data.push(0);
        data.push(0xff); // one byte too many

        let abi = test_abi();
        assert!(matches!(
            abi.decode("transfer", &data),
            Err(DecodeError::TrailingBytes { .. })
        ));
    }

    #[test]
    fn test_decode_variant() {
        let mut data = vec![0]; // variant index 0 -> row_v0
        data.extend_from_slice(&7u64.to_le_bytes());

        let abi = test_abi();
        let value = abi.decode("row", &data).unwrap();
        assert_eq!(value, json!(["row_v0", {"id": "7"}]));
    }

    #[test]
    fn test_unknown_variant_index() {
        let data = vec![9];
        let abi = test_abi();
        assert!(matches!(
            abi.decode("row", &data),
            Err(DecodeError::UnknownVariantIndex { .. })
        ));
    }

    #[test]
    fn test_optional_and_extension() {
        let abi = Abi::from_json(
            r#"{
                "version": "eosio::abi/1.1",
                "structs": [
                    {
                        "name": "thing",
                        "base": "",
                        "fields": [
                            {"name": "maybe", "type": "uint32?"},
                            {"name": "later", "type": "uint32$"}
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();

        // optional absent, extension absent
        let value = abi.decode("thing", &[0]).unwrap();
        assert_eq!(value, json!({"maybe": null, "later": null}));

        // optional present, extension present
        let mut data = vec![1];
        data.extend_from_slice(&5u32.to_le_bytes());
        data.extend_from_slice(&6u32.to_le_bytes());
        let value = abi.decode("thing", &data).unwrap();
        assert_eq!(value, json!({"maybe": 5, "later": 6}));
    }

    #[test]
    fn test_abi_bin_roundtrip() {
        // serialize a minimal abi_def by hand and parse it back
        let mut data = Vec::new();
        let version = b"eosio::abi/1.1";
        data.push(version.len() as u8);
        data.extend_from_slice(version);
        data.push(0); // types
        data.push(1); // structs
        data.push(3);
        data.extend_from_slice(b"foo");
        data.push(0); // base
        data.push(1); // one field
        data.push(2);
        data.extend_from_slice(b"id");
        data.push(6);
        data.extend_from_slice(b"uint64");
        data.push(0); // actions
        data.push(0); // tables
        data.push(0); // ricardian_clauses
        data.push(0); // error_messages
        data.push(0); // abi_extensions

        let abi = Abi::from_bin(&data).unwrap();
        assert_eq!(abi.def.version, "eosio::abi/1.1");
        assert_eq!(abi.def.structs.len(), 1);

        let value = abi.decode("foo", &9u64.to_le_bytes()).unwrap();
        assert_eq!(value, json!({"id": "9"}));
    }

    #[test]
    fn test_timestamp_formats() {
        let abi = Abi::new(Default::default());
        // 2020-01-01T00:00:00.000 in microseconds
        let micros = 1_577_836_800_000_000i64;
        let value = abi.decode("time_point", &micros.to_le_bytes()).unwrap();
        assert_eq!(value, "2020-01-01T00:00:00.000");
    }
}
