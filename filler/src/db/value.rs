use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A database cell value.
///
/// The tagged serde representation is what lands in the rollback table's
/// jsonb columns, so inverse operations re-bind with their original types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DbValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
}

impl DbValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DbValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DbValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DbValue::Null)
    }
}

impl fmt::Display for DbValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbValue::Null => write!(f, "null"),
            DbValue::Bool(v) => write!(f, "{}", v),
            DbValue::Int(v) => write!(f, "{}", v),
            DbValue::Float(v) => write!(f, "{}", v),
            DbValue::Text(v) => write!(f, "{}", v),
            DbValue::Bytes(v) => write!(f, "\\x{}", hex::encode(v)),
            DbValue::Json(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for DbValue {
    fn from(v: bool) -> Self {
        DbValue::Bool(v)
    }
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        DbValue::Int(v)
    }
}

impl From<u32> for DbValue {
    fn from(v: u32) -> Self {
        DbValue::Int(v as i64)
    }
}

impl From<u64> for DbValue {
    fn from(v: u64) -> Self {
        // u64 primary keys are stored in int8 columns; on-chain ids fit
        DbValue::Int(v as i64)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::Text(v.to_string())
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        DbValue::Text(v)
    }
}

impl From<Vec<u8>> for DbValue {
    fn from(v: Vec<u8>) -> Self {
        DbValue::Bytes(v)
    }
}

impl From<Value> for DbValue {
    fn from(v: Value) -> Self {
        DbValue::Json(v)
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => DbValue::Null,
        }
    }
}

/// One database row, column name to value, in declaration order.
pub type DbRow = IndexMap<String, DbValue>;

/// Build a row from (column, value) pairs.
#[macro_export]
macro_rules! db_row {
    ($($column:expr => $value:expr),* $(,)?) => {{
        let mut row = $crate::db::DbRow::new();
        $(row.insert($column.to_string(), $crate::db::DbValue::from($value));)*
        row
    }};
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// Conjunction of column comparisons, the only row-selection shape the
/// structured operations need.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Condition(pub Vec<(String, CmpOp, DbValue)>);

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(mut self, column: &str, op: CmpOp, value: impl Into<DbValue>) -> Self {
        self.0.push((column.to_string(), op, value.into()));
        self
    }

    pub fn eq(column: &str, value: impl Into<DbValue>) -> Self {
        Self::new().and(column, CmpOp::Eq, value)
    }

    /// Equality condition over the primary key columns of a row.
    pub fn from_keys(row: &DbRow, primary_keys: &[&str]) -> Self {
        let mut condition = Self::new();
        for &key in primary_keys {
            let value = row.get(key).cloned().unwrap_or(DbValue::Null);
            condition = condition.and(key, CmpOp::Eq, value);
        }
        condition
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_roundtrip() {
        let row = db_row! {
            "asset_id" => 42u64,
            "owner" => "alice",
            "burned" => false,
            "mutable_data" => serde_json::json!({"name": "frog"}),
            "txid" => vec![0xde, 0xad],
            "memo" => DbValue::Null,
        };

        let json = serde_json::to_value(&row).unwrap();
        let back: DbRow = serde_json::from_value(json).unwrap();
        assert_eq!(row, back);
    }

    #[test]
    fn test_condition_from_keys() {
        let row = db_row! { "contract" => "atomicassets", "asset_id" => 7u64, "owner" => "bob" };
        let condition = Condition::from_keys(&row, &["contract", "asset_id"]);
        assert_eq!(condition.0.len(), 2);
        assert_eq!(condition.0[0].0, "contract");
        assert_eq!(condition.0[1].2, DbValue::Int(7));
    }
}
