use log::debug;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("chain rpc error: {0}")]
    Chain(String),
}

/// Minimal chain HTTP API client.
///
/// Only what handler init needs: reading contract configuration tables once
/// when the database has no persisted copy yet.
pub struct ChainRpc {
    client: reqwest::Client,
    endpoint: String,
}

impl ChainRpc {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    pub async fn get_info(&self) -> Result<Value, RpcError> {
        let response = self
            .client
            .post(format!("{}/v1/chain/get_info", self.endpoint))
            .body("{}")
            .send()
            .await?;
        Ok(response.json().await?)
    }

    pub async fn get_table_rows(
        &self,
        code: &str,
        scope: &str,
        table: &str,
        limit: u32,
    ) -> Result<Vec<Value>, RpcError> {
        debug!("Fetching table {}/{}/{} from chain rpc", code, scope, table);
        let response = self
            .client
            .post(format!("{}/v1/chain/get_table_rows", self.endpoint))
            .json(&json!({
                "code": code,
                "scope": scope,
                "table": table,
                "limit": limit,
                "json": true,
            }))
            .send()
            .await?;

        let body: Value = response.json().await?;
        if let Some(error) = body.get("error") {
            return Err(RpcError::Chain(error.to_string()));
        }

        body.get("rows")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| RpcError::Chain("response without rows".to_string()))
    }

    /// First row of a singleton table, if any.
    pub async fn get_singleton_row(
        &self,
        code: &str,
        scope: &str,
        table: &str,
    ) -> Result<Option<Value>, RpcError> {
        let rows = self.get_table_rows(code, scope, table, 1).await?;
        Ok(rows.into_iter().next())
    }
}
