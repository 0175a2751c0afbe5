// src/warehouse/mod.rs

use anyhow::Result;
use std::future::Future;
use tracing::{info, instrument};

use crate::config::{WarehouseBackend, WarehouseConfig};
use crate::error::EtlError;
use crate::load::json::Row;

pub mod bigquery;
pub mod jsonl;

pub use bigquery::BigQueryStream;
pub use jsonl::JsonLinesSink;

/// Destination table of a row insert.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
    pub location: String,
}

impl From<&WarehouseConfig> for TableRef {
    fn from(cfg: &WarehouseConfig) -> Self {
        Self {
            dataset: cfg.dataset.clone(),
            table: cfg.table.clone(),
            location: cfg.location.clone(),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

pub trait RowSink {
    /// Insert all rows or fail; returns how many were inserted.
    fn insert_rows(
        &self,
        table: &TableRef,
        rows: Vec<Row>,
    ) -> impl Future<Output = Result<usize>> + Send;
}

/// The configured warehouse backend.
pub enum Warehouse {
    BigQuery(BigQueryStream),
    JsonLines(JsonLinesSink),
}

impl Warehouse {
    pub fn from_config(cfg: &WarehouseConfig, client: reqwest::Client) -> Result<Self> {
        match cfg.backend {
            WarehouseBackend::Bigquery => {
                let project = cfg
                    .project
                    .clone()
                    .ok_or_else(|| EtlError::Config("warehouse.project is required for bigquery".into()))?;
                Ok(Warehouse::BigQuery(BigQueryStream::from_env(client, project)?))
            }
            WarehouseBackend::Jsonl => {
                let root = cfg
                    .root
                    .clone()
                    .ok_or_else(|| EtlError::Config("warehouse.root is required for jsonl".into()))?;
                Ok(Warehouse::JsonLines(JsonLinesSink::new(root)))
            }
        }
    }
}

impl RowSink for Warehouse {
    async fn insert_rows(&self, table: &TableRef, rows: Vec<Row>) -> Result<usize> {
        match self {
            Warehouse::BigQuery(s) => s.insert_rows(table, rows).await,
            Warehouse::JsonLines(s) => s.insert_rows(table, rows).await,
        }
    }
}

/// Warehouse step of the feed pipeline.
#[instrument(level = "info", skip(sink, rows), fields(table = %table, rows = rows.len()))]
pub async fn insert_warehouse<S: RowSink>(sink: &S, table: &TableRef, rows: Vec<Row>) -> Result<usize> {
    if rows.is_empty() {
        info!("nothing to insert");
        return Ok(0);
    }
    let n = sink.insert_rows(table, rows).await?;
    info!(inserted = n, location = %table.location, "warehouse insert done");
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cfg(backend: WarehouseBackend) -> WarehouseConfig {
        WarehouseConfig {
            backend,
            dataset: "crypto".into(),
            table: "coins".into(),
            location: "us-central1".into(),
            project: None,
            root: None,
        }
    }

    #[test]
    fn test_from_config_requires_backend_settings() {
        let client = reqwest::Client::new();
        let err = Warehouse::from_config(&cfg(WarehouseBackend::Jsonl), client.clone())
            .err()
            .unwrap();
        assert!(matches!(err.downcast_ref::<EtlError>(), Some(EtlError::Config(_))));
        assert!(Warehouse::from_config(&cfg(WarehouseBackend::Bigquery), client).is_err());
    }

    #[tokio::test]
    async fn test_empty_insert_skips_sink() -> Result<()> {
        let tmp = tempdir()?;
        let sink = JsonLinesSink::new(tmp.path());
        let table = TableRef::from(&cfg(WarehouseBackend::Jsonl));
        assert_eq!(insert_warehouse(&sink, &table, Vec::new()).await?, 0);
        assert!(!sink.table_path(&table).exists());
        Ok(())
    }
}
