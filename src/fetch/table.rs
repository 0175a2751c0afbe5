// src/fetch/table.rs

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{
    io::{Read, Write},
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

use super::{read_source, Source};
use crate::error::EtlError;
use crate::load::write_atomic;

/// A header row plus string cells. Empty cells are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Table {
    /// Parse comma-separated text with a header row.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);
        let headers = rdr
            .headers()
            .context("reading CSV header row")?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut rows = Vec::new();
        for (i, rec) in rdr.records().enumerate() {
            let rec = rec.with_context(|| format!("reading CSV row {}", i + 1))?;
            rows.push(
                rec.iter()
                    .map(|c| if c.is_empty() { None } else { Some(c.to_string()) })
                    .collect(),
            );
        }

        Ok(Self { headers, rows })
    }

    /// Header row, then one line per row; nulls are written as empty cells.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Load a CSV document from a URL or a local path.
pub async fn import_csv(client: &Client, source: &Source) -> Result<Table> {
    let body = read_source(client, source).await?;
    Table::from_csv_reader(body.as_slice()).map_err(|e| {
        EtlError::source_unavailable(source.to_string(), format!("invalid CSV: {:#}", e)).into()
    })
}

/// Extract step of the table pipeline; optionally keeps a copy as `<raw_dir>/<filename>`.
#[instrument(level = "info", skip(client, raw), fields(source = %source))]
pub async fn extract_table(
    client: &Client,
    source: &Source,
    raw: Option<(&Path, &str)>,
) -> Result<Table> {
    let table = import_csv(client, source).await?;
    info!(
        columns = table.headers.len(),
        rows = table.len(),
        "imported table"
    );

    if let Some((raw_dir, filename)) = raw {
        let path: PathBuf = raw_dir.join(filename);
        write_atomic(&path, |w| table.write_csv(w))?;
        info!(path = %path.display(), "saved raw table");
    }

    Ok(table)
}
