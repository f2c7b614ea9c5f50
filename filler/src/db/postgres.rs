use async_trait::async_trait;
use log::debug;
use sqlx::{
    postgres::{PgArguments, PgPool, PgPoolOptions, PgRow},
    query::Query,
    Column, Postgres, Row, TypeInfo, ValueRef,
};

use super::{Condition, DbError, DbRow, DbStore, DbTx, DbValue, Order};

/// PostgreSQL backend over a sqlx connection pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self, DbError> {
        debug!("Connecting to database with {} max connections", max_connections);
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DbStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn DbTx>, DbError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx: Some(tx) }))
    }

    async fn table_exists(&self, table: &str) -> Result<bool, DbError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

pub struct PgTx {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PgTx {
    fn tx(&mut self) -> Result<&mut sqlx::Transaction<'static, Postgres>, DbError> {
        self.tx
            .as_mut()
            .ok_or_else(|| DbError::Sql("transaction already closed".to_string()))
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &DbValue,
) -> Result<Query<'q, Postgres, PgArguments>, DbError> {
    Ok(match value {
        // null never reaches a bind slot: the SQL renderers inline it
        DbValue::Null => {
            return Err(DbError::Unsupported(
                "null values cannot be bound as parameters".to_string(),
            ))
        }
        DbValue::Bool(v) => query.bind(*v),
        DbValue::Int(v) => query.bind(*v),
        DbValue::Float(v) => query.bind(*v),
        DbValue::Text(v) => query.bind(v.clone()),
        DbValue::Bytes(v) => query.bind(v.clone()),
        DbValue::Json(v) => query.bind(v.clone()),
    })
}

// Render a condition into a WHERE fragment, appending bind slots for the
// non-null values. An empty condition renders TRUE so callers never build
// accidental full-table statements.
fn render_condition(
    condition: &Condition,
    params: &mut Vec<DbValue>,
    offset: usize,
) -> Result<String, DbError> {
    if condition.is_empty() {
        return Ok("TRUE".to_string());
    }

    let mut parts = Vec::with_capacity(condition.0.len());
    for (column, op, value) in &condition.0 {
        if value.is_null() {
            match op {
                super::CmpOp::Eq => parts.push(format!("{} IS NULL", column)),
                _ => {
                    return Err(DbError::Unsupported(format!(
                        "null comparison {} on column {}",
                        op.as_sql(),
                        column
                    )))
                }
            }
            continue;
        }
        params.push(value.clone());
        parts.push(format!("{} {} ${}", column, op.as_sql(), offset + params.len()));
    }

    Ok(parts.join(" AND "))
}

fn row_to_db(row: &PgRow) -> Result<DbRow, DbError> {
    let mut out = DbRow::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            DbValue::Null
        } else {
            match raw.type_info().name() {
                "BOOL" => DbValue::Bool(row.try_get::<bool, _>(i)?),
                "INT2" => DbValue::Int(row.try_get::<i16, _>(i)? as i64),
                "INT4" => DbValue::Int(row.try_get::<i32, _>(i)? as i64),
                "INT8" => DbValue::Int(row.try_get::<i64, _>(i)?),
                "FLOAT4" => DbValue::Float(row.try_get::<f32, _>(i)? as f64),
                "FLOAT8" => DbValue::Float(row.try_get::<f64, _>(i)?),
                "TEXT" | "VARCHAR" | "NAME" | "BPCHAR" => {
                    DbValue::Text(row.try_get::<String, _>(i)?)
                }
                "BYTEA" => DbValue::Bytes(row.try_get::<Vec<u8>, _>(i)?),
                "JSON" | "JSONB" => DbValue::Json(row.try_get::<serde_json::Value, _>(i)?),
                other => {
                    return Err(DbError::Unsupported(format!(
                        "column type {} on {}",
                        other,
                        column.name()
                    )))
                }
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

#[async_trait]
impl DbTx for PgTx {
    async fn insert(&mut self, table: &str, rows: &[DbRow]) -> Result<(), DbError> {
        for row in rows {
            let mut columns = Vec::with_capacity(row.len());
            let mut slots = Vec::with_capacity(row.len());
            let mut params = Vec::new();
            for (column, value) in row {
                columns.push(column.as_str());
                if value.is_null() {
                    slots.push("NULL".to_string());
                } else {
                    params.push(value.clone());
                    slots.push(format!("${}", params.len()));
                }
            }

            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                slots.join(", ")
            );

            let mut query = sqlx::query(&sql);
            for value in &params {
                query = bind_value(query, value)?;
            }
            let tx = self.tx()?;
            query.execute(&mut **tx).await?;
        }
        Ok(())
    }

    async fn update(
        &mut self,
        table: &str,
        set: &DbRow,
        condition: &Condition,
    ) -> Result<u64, DbError> {
        let mut params = Vec::new();
        let mut assignments = Vec::with_capacity(set.len());
        for (column, value) in set {
            if value.is_null() {
                assignments.push(format!("{} = NULL", column));
            } else {
                params.push(value.clone());
                assignments.push(format!("{} = ${}", column, params.len()));
            }
        }

        let offset = params.len();
        let mut where_params = Vec::new();
        let where_clause = render_condition(condition, &mut where_params, offset)?;
        params.extend(where_params);

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            table,
            assignments.join(", "),
            where_clause
        );

        let mut query = sqlx::query(&sql);
        for value in &params {
            query = bind_value(query, value)?;
        }
        let tx = self.tx()?;
        Ok(query.execute(&mut **tx).await?.rows_affected())
    }

    async fn delete(&mut self, table: &str, condition: &Condition) -> Result<u64, DbError> {
        let mut params = Vec::new();
        let where_clause = render_condition(condition, &mut params, 0)?;
        let sql = format!("DELETE FROM {} WHERE {}", table, where_clause);

        let mut query = sqlx::query(&sql);
        for value in &params {
            query = bind_value(query, value)?;
        }
        let tx = self.tx()?;
        Ok(query.execute(&mut **tx).await?.rows_affected())
    }

    async fn select(
        &mut self,
        table: &str,
        condition: &Condition,
        order: &[(String, Order)],
        limit: Option<u64>,
    ) -> Result<Vec<DbRow>, DbError> {
        let mut params = Vec::new();
        let where_clause = render_condition(condition, &mut params, 0)?;
        let mut sql = format!("SELECT * FROM {} WHERE {}", table, where_clause);

        if !order.is_empty() {
            let order_clause: Vec<String> = order
                .iter()
                .map(|(column, direction)| format!("{} {}", column, direction.as_sql()))
                .collect();
            sql.push_str(&format!(" ORDER BY {}", order_clause.join(", ")));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut query = sqlx::query(&sql);
        for value in &params {
            query = bind_value(query, value)?;
        }
        let tx = self.tx()?;
        let rows = query.fetch_all(&mut **tx).await?;
        rows.iter().map(row_to_db).collect()
    }

    async fn query(&mut self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, DbError> {
        let mut query = sqlx::query(sql);
        for value in params {
            query = bind_value(query, value)?;
        }
        let tx = self.tx()?;
        let rows = query.fetch_all(&mut **tx).await?;
        rows.iter().map(row_to_db).collect()
    }

    async fn execute(&mut self, sql: &str, params: &[DbValue]) -> Result<u64, DbError> {
        let mut query = sqlx::query(sql);
        for value in params {
            query = bind_value(query, value)?;
        }
        let tx = self.tx()?;
        Ok(query.execute(&mut **tx).await?.rows_affected())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), DbError> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), DbError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}
