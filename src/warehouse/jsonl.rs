// src/warehouse/jsonl.rs

use anyhow::Result;
use std::path::PathBuf;
use tokio::{fs, io::AsyncWriteExt};

use super::{RowSink, TableRef};
use crate::error::EtlError;
use crate::load::json::Row;

/// Appends rows as newline-delimited JSON at `<root>/<dataset>/<table>.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    root: PathBuf,
}

impl JsonLinesSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn table_path(&self, table: &TableRef) -> PathBuf {
        self.root
            .join(&table.dataset)
            .join(format!("{}.jsonl", table.table))
    }
}

impl RowSink for JsonLinesSink {
    async fn insert_rows(&self, table: &TableRef, rows: Vec<Row>) -> Result<usize> {
        let path = self.table_path(table);

        // Serialize everything up front so a bad row appends nothing.
        let mut buf = Vec::new();
        for row in &rows {
            serde_json::to_writer(&mut buf, row)?;
            buf.push(b'\n');
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| EtlError::write_failure(parent, e))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| EtlError::write_failure(&path, e))?;
        file.write_all(&buf)
            .await
            .map_err(|e| EtlError::write_failure(&path, e))?;
        file.sync_all()
            .await
            .map_err(|e| EtlError::write_failure(&path, e))?;
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn row(id: &str, ts: f64) -> Row {
        let v = json!({ "timestamp": ts, "id": id, "rank": 1 });
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_rows_are_appended_as_lines() -> Result<()> {
        let tmp = tempdir()?;
        let sink = JsonLinesSink::new(tmp.path());
        let table = TableRef {
            dataset: "crypto".into(),
            table: "coins".into(),
            location: "us-central1".into(),
        };

        assert_eq!(sink.insert_rows(&table, vec![row("bitcoin", 1690000000.5)]).await?, 1);
        assert_eq!(sink.insert_rows(&table, vec![row("dydx", 1690000060.0)]).await?, 1);

        let text = std::fs::read_to_string(tmp.path().join("crypto/coins.jsonl"))?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"timestamp":1690000000.5,"id":"bitcoin","rank":1}"#);
        assert!(lines[1].contains(r#""id":"dydx""#));
        Ok(())
    }
}
