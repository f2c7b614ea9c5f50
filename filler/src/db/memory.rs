use std::{
    cmp::Ordering,
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use super::{CmpOp, Condition, DbError, DbRow, DbStore, DbTx, DbValue, Order};

/// In-memory backend implementing the structured operations.
///
/// Used by the test suite and for dry runs; transactions copy the table map
/// on begin and swap it back on commit, so abort discards everything.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<HashMap<String, Vec<DbRow>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a table, for assertions.
    pub fn dump(&self, table: &str) -> Vec<DbRow> {
        self.tables
            .lock()
            .expect("memory store lock")
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DbStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn DbTx>, DbError> {
        let snapshot = self.tables.lock().expect("memory store lock").clone();
        Ok(Box::new(MemoryTx {
            tables: Arc::clone(&self.tables),
            snapshot,
        }))
    }

    async fn table_exists(&self, _table: &str) -> Result<bool, DbError> {
        Ok(true)
    }
}

pub struct MemoryTx {
    tables: Arc<Mutex<HashMap<String, Vec<DbRow>>>>,
    snapshot: HashMap<String, Vec<DbRow>>,
}

fn compare_values(left: &DbValue, right: &DbValue) -> Option<Ordering> {
    match (left, right) {
        (DbValue::Int(a), DbValue::Int(b)) => Some(a.cmp(b)),
        (DbValue::Float(a), DbValue::Float(b)) => a.partial_cmp(b),
        (DbValue::Int(a), DbValue::Float(b)) => (*a as f64).partial_cmp(b),
        (DbValue::Float(a), DbValue::Int(b)) => a.partial_cmp(&(*b as f64)),
        (DbValue::Text(a), DbValue::Text(b)) => Some(a.cmp(b)),
        (DbValue::Bool(a), DbValue::Bool(b)) => Some(a.cmp(b)),
        (DbValue::Bytes(a), DbValue::Bytes(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn row_matches(row: &DbRow, condition: &Condition) -> bool {
    condition.0.iter().all(|(column, op, value)| {
        let cell = row.get(column).unwrap_or(&DbValue::Null);
        if value.is_null() {
            // the relational backend renders equality on null as IS NULL
            return matches!(op, CmpOp::Eq) && cell.is_null();
        }
        match compare_values(cell, value) {
            Some(ordering) => match op {
                CmpOp::Eq => ordering == Ordering::Equal,
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::Le => ordering != Ordering::Greater,
                CmpOp::Gt => ordering == Ordering::Greater,
                CmpOp::Ge => ordering != Ordering::Less,
            },
            None => false,
        }
    })
}

#[async_trait]
impl DbTx for MemoryTx {
    async fn insert(&mut self, table: &str, rows: &[DbRow]) -> Result<(), DbError> {
        self.snapshot
            .entry(table.to_string())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(())
    }

    async fn update(
        &mut self,
        table: &str,
        set: &DbRow,
        condition: &Condition,
    ) -> Result<u64, DbError> {
        let mut updated = 0;
        if let Some(rows) = self.snapshot.get_mut(table) {
            for row in rows.iter_mut() {
                if row_matches(row, condition) {
                    for (column, value) in set {
                        row.insert(column.clone(), value.clone());
                    }
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn delete(&mut self, table: &str, condition: &Condition) -> Result<u64, DbError> {
        let mut deleted = 0;
        if let Some(rows) = self.snapshot.get_mut(table) {
            let before = rows.len();
            rows.retain(|row| !row_matches(row, condition));
            deleted = (before - rows.len()) as u64;
        }
        Ok(deleted)
    }

    async fn select(
        &mut self,
        table: &str,
        condition: &Condition,
        order: &[(String, Order)],
        limit: Option<u64>,
    ) -> Result<Vec<DbRow>, DbError> {
        let mut rows: Vec<DbRow> = self
            .snapshot
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row_matches(row, condition))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if !order.is_empty() {
            rows.sort_by(|a, b| {
                for (column, direction) in order {
                    let left = a.get(column).unwrap_or(&DbValue::Null);
                    let right = b.get(column).unwrap_or(&DbValue::Null);
                    let ordering = compare_values(left, right).unwrap_or(Ordering::Equal);
                    let ordering = match direction {
                        Order::Asc => ordering,
                        Order::Desc => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        if let Some(limit) = limit {
            rows.truncate(limit as usize);
        }

        Ok(rows)
    }

    async fn query(&mut self, sql: &str, _params: &[DbValue]) -> Result<Vec<DbRow>, DbError> {
        Err(DbError::Unsupported(format!("raw query: {}", sql)))
    }

    async fn execute(&mut self, sql: &str, _params: &[DbValue]) -> Result<u64, DbError> {
        Err(DbError::Unsupported(format!("raw statement: {}", sql)))
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        *self.tables.lock().expect("memory store lock") = self.snapshot;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_row;

    #[tokio::test]
    async fn test_insert_select_commit() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert(
            "assets",
            &[db_row! { "asset_id" => 1u64, "owner" => "alice" }],
        )
        .await
        .unwrap();

        // not visible before commit
        assert!(store.dump("assets").is_empty());
        tx.commit().await.unwrap();
        assert_eq!(store.dump("assets").len(), 1);
    }

    #[tokio::test]
    async fn test_abort_discards() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert("assets", &[db_row! { "asset_id" => 1u64 }])
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        assert!(store.dump("assets").is_empty());
    }

    #[tokio::test]
    async fn test_update_and_ordering() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert(
            "rows",
            &[
                db_row! { "id" => 2u64, "v" => "b" },
                db_row! { "id" => 1u64, "v" => "a" },
                db_row! { "id" => 3u64, "v" => "c" },
            ],
        )
        .await
        .unwrap();

        let updated = tx
            .update("rows", &db_row! { "v" => "x" }, &Condition::eq("id", 1u64))
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let rows = tx
            .select(
                "rows",
                &Condition::new(),
                &[("id".to_string(), Order::Desc)],
                Some(2),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id"), Some(&DbValue::Int(3)));
        assert_eq!(rows[1].get("v"), Some(&DbValue::Text("b".to_string())));
    }

    #[tokio::test]
    async fn test_range_condition() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for block in [100u64, 101, 102, 103] {
            tx.insert("log", &[db_row! { "block_num" => block }])
                .await
                .unwrap();
        }

        let deleted = tx
            .delete(
                "log",
                &Condition::new().and("block_num", CmpOp::Le, 101u64),
            )
            .await
            .unwrap();
        assert_eq!(deleted, 2);
    }
}
