// src/pipeline/mod.rs

use anyhow::Result;
use reqwest::Client;
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{info, instrument};

use crate::config::PipelineConfig;
use crate::error::EtlError;
use crate::fetch::{extract_feed, load_raw, RawFeed, Source};
use crate::load::{record_to_row, write_load, TimestampEncoding};
use crate::store::{write_remote, RemoteStore};
use crate::task::{ResultCache, TaskRunner};
use crate::transform::{transform_feed, OverrideTable, Transformed};
use crate::warehouse::{insert_warehouse, TableRef, Warehouse};

pub mod table;

pub use table::{convert_csv, TablePipeline, TableSummary};

/// HTTP client shared by every pipeline stage.
pub fn http_client() -> Result<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(60))
        .user_agent(concat!("decap/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// What one run of the feed pipeline did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub revision: String,
    pub run_label: String,
    /// Assets in the extracted payload.
    pub fetched: usize,
    /// Records that passed coercion.
    pub written: usize,
    pub rejected: usize,
    pub artifact: Option<PathBuf>,
    /// Object key of the uploaded artifact.
    pub uploaded: Option<String>,
    /// Rows accepted by the warehouse.
    pub inserted: Option<usize>,
}

/// Which stages run after transform.
#[derive(Debug, Clone, Copy)]
struct Stages {
    load: bool,
    warehouse: bool,
}

/// extract → transform → {write → upload} ∥ {warehouse insert}
pub struct FeedPipeline {
    cfg: PipelineConfig,
    client: Client,
    runner: TaskRunner,
    remote: Option<RemoteStore>,
    warehouse: Option<(Warehouse, TableRef)>,
}

impl FeedPipeline {
    pub async fn new(cfg: PipelineConfig) -> Result<Self> {
        Self::with_client(cfg, http_client()?).await
    }

    pub async fn with_client(cfg: PipelineConfig, client: Client) -> Result<Self> {
        cfg.validate()?;

        let cache = match cfg.extract.cache_ttl_secs {
            Some(_) => Some(ResultCache::new(&cfg.cache_dir)?),
            None => None,
        };
        let remote = match &cfg.upload {
            Some(up) => Some(RemoteStore::from_config(up).await?),
            None => None,
        };
        let warehouse = match &cfg.warehouse {
            Some(wh) => Some((Warehouse::from_config(wh, client.clone())?, TableRef::from(wh))),
            None => None,
        };

        Ok(Self {
            cfg,
            client,
            runner: TaskRunner::new(cache),
            remote,
            warehouse,
        })
    }

    /// Fetch the feed under the extract policy (retries, result cache).
    async fn extract(&self) -> Result<RawFeed> {
        let x = &self.cfg.extract;
        let source = Source::parse(&self.cfg.source);
        let raw = x
            .save_raw
            .then(|| (x.raw_dir.as_path(), x.raw_filename.as_str()));
        let inputs = (self.cfg.source.as_str(), x.raw_filename.as_str());

        let (client, source) = (&self.client, &source);
        self.runner
            .run(&self.cfg.extract_policy(), &inputs, move || {
                extract_feed(client, source, raw)
            })
            .await
    }

    /// Full run: write the artifact, upload it if configured, and insert
    /// into the warehouse if configured.
    #[instrument(level = "info", skip(self), fields(revision = %self.cfg.revision))]
    pub async fn run(&self) -> Result<RunSummary> {
        let feed = self.extract().await?;
        self.finish(
            feed,
            Stages {
                load: true,
                warehouse: true,
            },
        )
        .await
    }

    /// extract → transform → warehouse insert, no artifact.
    #[instrument(level = "info", skip(self), fields(revision = %self.cfg.revision))]
    pub async fn run_warehouse(&self) -> Result<RunSummary> {
        if self.warehouse.is_none() {
            return Err(EtlError::Config(
                "the warehouse pipeline needs a `warehouse` section".into(),
            )
            .into());
        }
        let feed = self.extract().await?;
        self.finish(
            feed,
            Stages {
                load: false,
                warehouse: true,
            },
        )
        .await
    }

    /// Transform and load a payload kept by an earlier run's raw save.
    #[instrument(level = "info", skip(self), fields(raw = %raw.display()))]
    pub async fn replay(&self, raw: &Path) -> Result<RunSummary> {
        let feed = load_raw(raw)?;
        self.finish(
            feed,
            Stages {
                load: true,
                warehouse: false,
            },
        )
        .await
    }

    async fn finish(&self, feed: RawFeed, stages: Stages) -> Result<RunSummary> {
        let fetched = feed.data.len();
        let transformed = transform_feed(&feed, OverrideTable::builtin())?;
        drop(feed);

        let load_branch = async {
            if !stages.load {
                return Ok::<_, anyhow::Error>((None, None));
            }
            let (artifact, uploaded) = self.load(&transformed).await?;
            Ok((Some(artifact), uploaded))
        };
        let warehouse_branch = async {
            match (&self.warehouse, stages.warehouse) {
                (Some((sink, table)), true) => {
                    let rows = transformed
                        .records
                        .iter()
                        .map(|r| record_to_row(r, TimestampEncoding::EpochSeconds))
                        .collect();
                    Ok::<_, anyhow::Error>(Some(insert_warehouse(sink, table, rows).await?))
                }
                _ => Ok(None),
            }
        };
        // The first error drops the other branch. A finished local artifact
        // stays on disk; an interrupted mirror copy removes its own `.tmp`.
        let ((artifact, uploaded), inserted) = tokio::try_join!(load_branch, warehouse_branch)?;

        let summary = RunSummary {
            revision: self.cfg.revision.clone(),
            run_label: transformed.run_label(),
            fetched,
            written: transformed.records.len(),
            rejected: transformed.rejected.len(),
            artifact,
            uploaded,
            inserted,
        };
        info!(
            run_label = %summary.run_label,
            fetched = summary.fetched,
            written = summary.written,
            rejected = summary.rejected,
            "run complete"
        );
        Ok(summary)
    }

    /// Write the artifact, then upload it. The upload never sees a partial file.
    async fn load(&self, transformed: &Transformed) -> Result<(PathBuf, Option<String>)> {
        let load = &self.cfg.load;
        let artifact = write_load(
            &transformed.records,
            &load.store,
            &load.prefix,
            transformed.observed_at,
            load.format,
            load.layout,
        )?;

        let uploaded = match (&self.remote, &self.cfg.upload) {
            (Some(remote), Some(up)) => {
                Some(write_remote(remote, &load.store, &artifact, up.prefix.as_deref()).await?)
            }
            _ => None,
        };
        Ok((artifact, uploaded))
    }
}
