use async_trait::async_trait;
use thiserror::Error;

use super::{Condition, DbRow, DbValue, Order};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sql(String),
    #[error("transaction is poisoned by an earlier failure")]
    Poisoned,
    #[error("operation not supported by this backend: {0}")]
    Unsupported(String),
    #[error("row for table '{table}' is missing column '{column}'")]
    MissingColumn { table: String, column: String },
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for DbError {
    fn from(e: sqlx::Error) -> Self {
        DbError::Sql(e.to_string())
    }
}

/// One open database transaction, structured operations only.
///
/// The structured shape (equality/range conditions, whole-row values) is
/// what both the relational backend and the in-memory backend can honor;
/// `query`/`execute` are the raw escape hatch of the relational backend.
#[async_trait]
pub trait DbTx: Send {
    async fn insert(&mut self, table: &str, rows: &[DbRow]) -> Result<(), DbError>;

    /// Returns the number of rows updated.
    async fn update(
        &mut self,
        table: &str,
        set: &DbRow,
        condition: &Condition,
    ) -> Result<u64, DbError>;

    /// Returns the number of rows deleted.
    async fn delete(&mut self, table: &str, condition: &Condition) -> Result<u64, DbError>;

    async fn select(
        &mut self,
        table: &str,
        condition: &Condition,
        order: &[(String, Order)],
        limit: Option<u64>,
    ) -> Result<Vec<DbRow>, DbError>;

    async fn query(&mut self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, DbError>;

    async fn execute(&mut self, sql: &str, params: &[DbValue]) -> Result<u64, DbError>;

    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}

/// A database backend able to open transactions.
#[async_trait]
pub trait DbStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn DbTx>, DbError>;

    /// Schema presence check used by handler init.
    async fn table_exists(&self, table: &str) -> Result<bool, DbError>;
}
