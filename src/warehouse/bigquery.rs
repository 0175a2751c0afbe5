// src/warehouse/bigquery.rs

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error};

use super::{RowSink, TableRef};
use crate::error::EtlError;
use crate::load::json::Row;

pub const TOKEN_ENV: &str = "BIGQUERY_TOKEN";
const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// BigQuery streaming insert (`tabledata.insertAll`).
#[derive(Debug, Clone)]
pub struct BigQueryStream {
    client: Client,
    project: String,
    token: String,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<Value>,
}

impl BigQueryStream {
    pub fn new(client: Client, project: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            project: project.into(),
            token: token.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Bearer token comes from `BIGQUERY_TOKEN`.
    pub fn from_env(client: Client, project: impl Into<String>) -> Result<Self> {
        let token = std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| EtlError::Config(format!("{TOKEN_ENV} is not set")))?;
        Ok(Self::new(client, project, token))
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn insert_url(&self, table: &TableRef) -> String {
        format!(
            "{}/projects/{}/datasets/{}/tables/{}/insertAll",
            self.endpoint, self.project, table.dataset, table.table
        )
    }
}

/// Stable per-row dedup id: identical rows retried in a later request
/// are dropped server-side.
fn insert_id(row: &Row) -> Result<String> {
    let bytes = serde_json::to_vec(row)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

impl RowSink for BigQueryStream {
    async fn insert_rows(&self, table: &TableRef, rows: Vec<Row>) -> Result<usize> {
        let url = self.insert_url(table);
        let n = rows.len();

        let mut payload = Vec::with_capacity(n);
        for row in rows {
            let id = insert_id(&row)?;
            payload.push(json!({ "insertId": id, "json": row }));
        }
        let body = json!({ "skipInvalidRows": false, "rows": payload });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| EtlError::write_failure(&url, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(EtlError::write_failure(&url, format!("HTTP {status}: {text}")).into());
        }

        let parsed: InsertAllResponse = resp
            .json()
            .await
            .with_context(|| format!("decoding insertAll response for {table}"))?;
        if !parsed.insert_errors.is_empty() {
            error!(table = %table, errors = parsed.insert_errors.len(), "rows rejected by warehouse");
            return Err(EtlError::write_failure(
                &url,
                format!(
                    "{} row(s) rejected: {}",
                    parsed.insert_errors.len(),
                    Value::Array(parsed.insert_errors)
                ),
            )
            .into());
        }

        debug!(table = %table, rows = n, "insertAll accepted");
        Ok(n)
    }
}
