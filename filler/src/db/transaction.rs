use log::{debug, warn};

use super::{CmpOp, Condition, DbError, DbRow, DbTx, DbValue, Order};
use crate::db_row;

/// Table the inverse operations land in, written inside the same
/// transaction as the mutations they shadow.
pub const ROLLBACK_TABLE: &str = "reversible_queries";

/// One database transaction scoped to a single block.
///
/// While the block is above the irreversible horizon every mutation records
/// its inverse, keyed by `(block_num, global_seq)`, so a fork can restore
/// the exact prior state. A failed operation poisons the transaction:
/// all subsequent calls fail without touching the database.
pub struct ContractDbTransaction {
    tx: Box<dyn DbTx>,
    block_num: u32,
    block_id: String,
    last_irreversible: u32,
    reversible: bool,
    handler: String,
    seq: i64,
    poisoned: bool,
}

impl ContractDbTransaction {
    pub fn new(
        tx: Box<dyn DbTx>,
        block_num: u32,
        block_id: &str,
        last_irreversible: u32,
    ) -> Self {
        Self {
            tx,
            block_num,
            block_id: block_id.to_string(),
            last_irreversible,
            reversible: block_num > last_irreversible,
            handler: String::new(),
            seq: 0,
            poisoned: false,
        }
    }

    pub fn block_num(&self) -> u32 {
        self.block_num
    }

    pub fn block_id(&self) -> &str {
        &self.block_id
    }

    pub fn last_irreversible(&self) -> u32 {
        self.last_irreversible
    }

    pub fn reversible(&self) -> bool {
        self.reversible
    }

    /// Handler name stamped into rollback rows recorded from now on.
    pub fn set_handler(&mut self, handler: &str) {
        self.handler = handler.to_string();
    }

    fn guard(&self) -> Result<(), DbError> {
        if self.poisoned {
            return Err(DbError::Poisoned);
        }
        Ok(())
    }

    fn track<T>(&mut self, result: Result<T, DbError>) -> Result<T, DbError> {
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    async fn record_rollback(
        &mut self,
        operation: &str,
        table: &str,
        condition: Option<&Condition>,
        values: Option<&DbRow>,
    ) -> Result<(), DbError> {
        let seq = self.seq;
        self.seq += 1;

        let condition = match condition {
            Some(c) => DbValue::Json(
                serde_json::to_value(c).map_err(|e| DbError::Serialization(e.to_string()))?,
            ),
            None => DbValue::Null,
        };
        let values = match values {
            Some(v) => DbValue::Json(
                serde_json::to_value(v).map_err(|e| DbError::Serialization(e.to_string()))?,
            ),
            None => DbValue::Null,
        };

        let row = db_row! {
            "global_seq" => seq,
            "block_num" => self.block_num,
            "handler" => self.handler.clone(),
            "operation" => operation,
            "table_name" => table,
            "condition" => condition,
            "values" => values,
        };

        self.tx.insert(ROLLBACK_TABLE, &[row]).await
    }

    pub async fn insert(
        &mut self,
        table: &str,
        rows: &[DbRow],
        primary_keys: &[&str],
    ) -> Result<(), DbError> {
        self.guard()?;

        if self.reversible {
            for row in rows {
                let condition = Condition::from_keys(row, primary_keys);
                let result = self
                    .record_rollback("insert", table, Some(&condition), None)
                    .await;
                self.track(result)?;
            }
        }

        let result = self.tx.insert(table, rows).await;
        self.track(result)
    }

    pub async fn update(
        &mut self,
        table: &str,
        set: &DbRow,
        condition: &Condition,
        primary_keys: &[&str],
    ) -> Result<u64, DbError> {
        self.guard()?;

        if self.reversible {
            let prior = self.tx.select(table, condition, &[], None).await;
            let prior = self.track(prior)?;
            for row in &prior {
                let keys = Condition::from_keys(row, primary_keys);
                let result = self
                    .record_rollback("update", table, Some(&keys), Some(row))
                    .await;
                self.track(result)?;
            }
        }

        let result = self.tx.update(table, set, condition).await;
        self.track(result)
    }

    pub async fn delete(&mut self, table: &str, condition: &Condition) -> Result<u64, DbError> {
        self.guard()?;

        if self.reversible {
            let prior = self.tx.select(table, condition, &[], None).await;
            let prior = self.track(prior)?;
            for row in &prior {
                let result = self
                    .record_rollback("delete", table, Some(condition), Some(row))
                    .await;
                self.track(result)?;
            }
        }

        let result = self.tx.delete(table, condition).await;
        self.track(result)
    }

    /// Delete-and-insert keyed by the primary key columns of `row`.
    pub async fn replace(
        &mut self,
        table: &str,
        row: &DbRow,
        primary_keys: &[&str],
    ) -> Result<(), DbError> {
        self.guard()?;
        let keys = Condition::from_keys(row, primary_keys);
        self.delete(table, &keys).await?;
        self.insert(table, std::slice::from_ref(row), primary_keys)
            .await
    }

    /// Read-only, never captured.
    pub async fn select(
        &mut self,
        table: &str,
        condition: &Condition,
        order: &[(String, Order)],
        limit: Option<u64>,
    ) -> Result<Vec<DbRow>, DbError> {
        self.guard()?;
        let result = self.tx.select(table, condition, order, limit).await;
        self.track(result)
    }

    /// Raw passthrough for statements the structured operations cannot
    /// express. Not captured; callers must not mutate reversible tables
    /// through it.
    pub async fn query(&mut self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, DbError> {
        self.guard()?;
        let result = self.tx.query(sql, params).await;
        self.track(result)
    }

    pub async fn execute(&mut self, sql: &str, params: &[DbValue]) -> Result<u64, DbError> {
        self.guard()?;
        let result = self.tx.execute(sql, params).await;
        self.track(result)
    }

    /// Drop rollback rows at or below the irreversible horizon.
    pub async fn prune_rollback(&mut self, up_to: u32) -> Result<u64, DbError> {
        self.guard()?;
        let condition = Condition::new().and("block_num", CmpOp::Le, up_to);
        let result = self.tx.delete(ROLLBACK_TABLE, &condition).await;
        self.track(result)
    }

    pub async fn commit(self) -> Result<(), DbError> {
        if self.poisoned {
            return Err(DbError::Poisoned);
        }
        self.tx.commit().await
    }

    pub async fn abort(self) -> Result<(), DbError> {
        self.tx.rollback().await
    }
}

/// Apply every recorded inverse operation for blocks at or above
/// `from_block`, newest first, and delete the consumed rollback rows.
///
/// Returns the number of inverse operations applied.
pub async fn apply_rollback(tx: &mut dyn DbTx, from_block: u32) -> Result<u64, DbError> {
    let condition = Condition::new().and("block_num", CmpOp::Ge, from_block);
    let rows = tx
        .select(
            ROLLBACK_TABLE,
            &condition,
            &[
                ("block_num".to_string(), Order::Desc),
                ("global_seq".to_string(), Order::Desc),
            ],
            None,
        )
        .await?;

    debug!(
        "Applying {} rollback operations from block {}",
        rows.len(),
        from_block
    );

    for row in &rows {
        let operation = row
            .get("operation")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DbError::Serialization("rollback row without operation".into()))?;
        let table = row
            .get("table_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DbError::Serialization("rollback row without table".into()))?
            .to_string();

        let parse_condition = || -> Result<Condition, DbError> {
            match row.get("condition") {
                Some(DbValue::Json(value)) => serde_json::from_value(value.clone())
                    .map_err(|e| DbError::Serialization(e.to_string())),
                _ => Err(DbError::Serialization(
                    "rollback row without condition".into(),
                )),
            }
        };
        let parse_values = || -> Result<DbRow, DbError> {
            match row.get("values") {
                Some(DbValue::Json(value)) => serde_json::from_value(value.clone())
                    .map_err(|e| DbError::Serialization(e.to_string())),
                _ => Err(DbError::Serialization("rollback row without values".into())),
            }
        };

        match operation {
            // undo an insert by deleting the inserted key
            "insert" => {
                tx.delete(&table, &parse_condition()?).await?;
            }
            // undo an update by restoring the captured prior row
            "update" => {
                tx.update(&table, &parse_values()?, &parse_condition()?)
                    .await?;
            }
            // undo a delete by reinserting the captured row
            "delete" => {
                tx.insert(&table, &[parse_values()?]).await?;
            }
            other => {
                warn!("Unknown rollback operation '{}', skipping", other);
            }
        }
    }

    let condition = Condition::new().and("block_num", CmpOp::Ge, from_block);
    tx.delete(ROLLBACK_TABLE, &condition).await?;

    Ok(rows.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::db::DbStore;

    async fn open(
        store: &MemoryStore,
        block_num: u32,
        last_irreversible: u32,
    ) -> ContractDbTransaction {
        let tx = store.begin().await.unwrap();
        let mut db = ContractDbTransaction::new(tx, block_num, "00ff", last_irreversible);
        db.set_handler("test");
        db
    }

    #[tokio::test]
    async fn test_insert_records_inverse() {
        let store = MemoryStore::new();
        let mut db = open(&store, 100, 50).await;
        db.insert(
            "assets",
            &[db_row! { "asset_id" => 42u64, "owner" => "alice" }],
            &["asset_id"],
        )
        .await
        .unwrap();
        db.commit().await.unwrap();

        assert_eq!(store.dump("assets").len(), 1);
        assert_eq!(store.dump(ROLLBACK_TABLE).len(), 1);
    }

    #[tokio::test]
    async fn test_irreversible_block_records_nothing() {
        let store = MemoryStore::new();
        let mut db = open(&store, 100, 100).await;
        assert!(!db.reversible());
        db.insert("assets", &[db_row! { "asset_id" => 1u64 }], &["asset_id"])
            .await
            .unwrap();
        db.commit().await.unwrap();

        assert!(store.dump(ROLLBACK_TABLE).is_empty());
    }

    #[tokio::test]
    async fn test_rollback_is_left_inverse() {
        let store = MemoryStore::new();

        // block 100: baseline row, made irreversible
        let mut db = open(&store, 100, 100).await;
        db.insert(
            "assets",
            &[db_row! { "asset_id" => 42u64, "owner" => "alice" }],
            &["asset_id"],
        )
        .await
        .unwrap();
        db.commit().await.unwrap();
        let baseline = store.dump("assets");

        // block 101: update, insert, delete while reversible
        let mut db = open(&store, 101, 100).await;
        db.update(
            "assets",
            &db_row! { "owner" => "bob" },
            &Condition::eq("asset_id", 42u64),
            &["asset_id"],
        )
        .await
        .unwrap();
        db.insert("assets", &[db_row! { "asset_id" => 43u64, "owner" => "carol" }], &["asset_id"])
            .await
            .unwrap();
        db.delete("assets", &Condition::eq("asset_id", 42u64))
            .await
            .unwrap();
        db.commit().await.unwrap();

        assert_ne!(store.dump("assets"), baseline);

        // fork at 101: state must return to the end of block 100
        let mut tx = store.begin().await.unwrap();
        apply_rollback(tx.as_mut(), 101).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.dump("assets"), baseline);
        assert!(store.dump(ROLLBACK_TABLE).is_empty());
    }

    #[tokio::test]
    async fn test_replace_rollback() {
        let store = MemoryStore::new();

        let mut db = open(&store, 100, 100).await;
        db.insert(
            "sales",
            &[db_row! { "sale_id" => 5u64, "state" => 1i64 }],
            &["sale_id"],
        )
        .await
        .unwrap();
        db.commit().await.unwrap();
        let baseline = store.dump("sales");

        let mut db = open(&store, 101, 100).await;
        db.replace(
            "sales",
            &db_row! { "sale_id" => 5u64, "state" => 3i64 },
            &["sale_id"],
        )
        .await
        .unwrap();
        db.commit().await.unwrap();

        assert_eq!(store.dump("sales")[0].get("state"), Some(&DbValue::Int(3)));

        let mut tx = store.begin().await.unwrap();
        apply_rollback(tx.as_mut(), 101).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.dump("sales"), baseline);
    }

    #[tokio::test]
    async fn test_prune_rollback() {
        let store = MemoryStore::new();
        for block in [101u32, 102, 103] {
            let mut db = open(&store, block, 100).await;
            db.insert("t", &[db_row! { "id" => block }], &["id"])
                .await
                .unwrap();
            db.commit().await.unwrap();
        }

        let mut db = open(&store, 104, 102).await;
        db.prune_rollback(102).await.unwrap();
        db.commit().await.unwrap();

        let remaining = store.dump(ROLLBACK_TABLE);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].get("block_num"), Some(&DbValue::Int(103)));
    }

    #[tokio::test]
    async fn test_poisoned_transaction() {
        let store = MemoryStore::new();
        let mut db = open(&store, 101, 100).await;

        // raw statements are unsupported on the memory backend
        assert!(db.execute("VACUUM", &[]).await.is_err());

        // every later call must fail without touching the database
        let result = db
            .insert("assets", &[db_row! { "asset_id" => 1u64 }], &["asset_id"])
            .await;
        assert!(matches!(result, Err(DbError::Poisoned)));
        assert!(matches!(db.commit().await, Err(DbError::Poisoned)));
    }
}
