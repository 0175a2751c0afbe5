// src/pipeline/table.rs

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use super::http_client;
use crate::config::PipelineConfig;
use crate::fetch::{extract_table, import_csv, Source};
use crate::load::{artifact_path, write_table, Format, PathLayout};
use crate::task::{TaskPolicy, TaskRunner};
use crate::transform::select_columns;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub revision: String,
    pub rows: usize,
    pub columns: Vec<String>,
    pub artifact: PathBuf,
}

/// CSV in, selected columns with nulls filled, flat CSV out at
/// `<store>/<prefix>_<epoch-seconds>.csv`.
pub struct TablePipeline {
    cfg: PipelineConfig,
    client: Client,
}

impl TablePipeline {
    pub fn new(cfg: PipelineConfig) -> Result<Self> {
        Ok(Self::with_client(cfg, http_client()?))
    }

    pub fn with_client(cfg: PipelineConfig, client: Client) -> Self {
        Self { cfg, client }
    }

    /// Run with the current time as the run timestamp.
    pub async fn run(&self) -> Result<TableSummary> {
        self.run_at(Utc::now()).await
    }

    /// `at` names the artifact; it is fixed before anything is fetched.
    #[instrument(level = "info", skip(self), fields(revision = %self.cfg.revision))]
    pub async fn run_at(&self, at: DateTime<Utc>) -> Result<TableSummary> {
        let tc = &self.cfg.table;
        let x = &self.cfg.extract;
        let source = Source::parse(&tc.source);
        let raw = x
            .save_raw
            .then(|| (x.raw_dir.as_path(), tc.raw_filename.as_str()));

        let inputs = (tc.source.as_str(), tc.raw_filename.as_str());
        let (client, source) = (&self.client, &source);
        let table = TaskRunner::default()
            .run(&TaskPolicy::once("extract_table"), &inputs, move || {
                extract_table(client, source, raw)
            })
            .await?;
        let selected = select_columns(&table, &tc.columns)?;

        let path = artifact_path(&self.cfg.load.store, &tc.prefix, at, Format::Csv, PathLayout::Flat);
        write_table(&path, &selected, Format::Csv)?;
        info!(path = %path.display(), rows = selected.len(), "wrote table");

        Ok(TableSummary {
            revision: self.cfg.revision.clone(),
            rows: selected.len(),
            columns: selected.headers,
            artifact: path,
        })
    }
}

/// Read a CSV document and write it as a JSON array of row objects.
/// Returns the number of rows written.
#[instrument(level = "info", skip(client), fields(source = %source, dest = %dest.display()))]
pub async fn convert_csv(client: &Client, source: &Source, dest: &Path) -> Result<usize> {
    let table = import_csv(client, source).await?;
    write_table(dest, &table, Format::Json)?;
    info!(rows = table.len(), "converted");
    Ok(table.len())
}
