// src/config.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::EtlError;
use crate::load::{Format, PathLayout};
use crate::task::TaskPolicy;

pub const DEFAULT_FEED_URL: &str = "https://api.coincap.io/v2/assets";

/// Everything a run needs, read once from YAML and handed to the pipeline.
/// Every field has a default, so an empty document is the stock coins run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Revision string stamped on every run summary. Supplied at construction.
    pub revision: String,
    pub source: String,
    pub cache_dir: PathBuf,
    pub extract: ExtractConfig,
    pub load: LoadConfig,
    pub upload: Option<UploadConfig>,
    pub warehouse: Option<WarehouseConfig>,
    pub table: TableConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractConfig {
    pub save_raw: bool,
    pub raw_dir: PathBuf,
    pub raw_filename: String,
    pub retries: u32,
    pub retry_delay_secs: u64,
    /// `None` disables the result cache.
    pub cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadConfig {
    pub store: PathBuf,
    pub prefix: String,
    pub format: Format,
    pub layout: PathLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadBackend {
    Local,
    Gcs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadConfig {
    pub backend: UploadBackend,
    /// Mirror root for the `local` backend.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Bucket name for the `gcs` backend.
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseBackend {
    Bigquery,
    Jsonl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarehouseConfig {
    pub backend: WarehouseBackend,
    pub dataset: String,
    pub table: String,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default)]
    pub project: Option<String>,
    /// Output root for the `jsonl` backend.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

/// Settings for the CSV table pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TableConfig {
    pub source: String,
    pub raw_filename: String,
    pub columns: Vec<String>,
    pub prefix: String,
}

fn default_location() -> String {
    "us-central1".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            revision: env!("CARGO_PKG_VERSION").to_string(),
            source: DEFAULT_FEED_URL.to_string(),
            cache_dir: PathBuf::from("data/.cache"),
            extract: ExtractConfig::default(),
            load: LoadConfig::default(),
            upload: None,
            warehouse: None,
            table: TableConfig::default(),
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            save_raw: true,
            raw_dir: PathBuf::from("data/raw"),
            raw_filename: "cryptocoin.json".to_string(),
            retries: 3,
            retry_delay_secs: 20,
            cache_ttl_secs: Some(60),
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            store: PathBuf::from("data"),
            prefix: "coins".to_string(),
            format: Format::Parquet,
            layout: PathLayout::Dated,
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            source: "http://localhost:8080/hardware.csv".to_string(),
            raw_filename: "hardware.csv".to_string(),
            columns: ["host", "host_sn", "display", "display_sn"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            prefix: "hosts".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        // an empty document deserializes as unit, not as an empty mapping
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Self = serde_yaml::from_str(s).context("parsing pipeline config")?;
        Ok(cfg)
    }

    /// Read `path` if given, otherwise fall back to defaults. Always validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg = match path {
            Some(p) => {
                let text = fs::read_to_string(p)
                    .with_context(|| format!("reading config {}", p.display()))?;
                Self::from_yaml_str(&text)
                    .with_context(|| format!("loading config {}", p.display()))?
            }
            None => Self::default(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    pub fn validate(&self) -> Result<(), EtlError> {
        if self.source.trim().is_empty() {
            return Err(EtlError::Config("source must not be empty".into()));
        }
        if self.load.prefix.trim().is_empty() {
            return Err(EtlError::Config("load.prefix must not be empty".into()));
        }
        if self.extract.raw_filename.trim().is_empty() {
            return Err(EtlError::Config(
                "extract.raw_filename must not be empty".into(),
            ));
        }
        if self.extract.cache_ttl_secs == Some(0) {
            return Err(EtlError::Config(
                "extract.cache_ttl_secs must be positive; omit it to disable caching".into(),
            ));
        }
        if let Some(up) = &self.upload {
            match up.backend {
                UploadBackend::Local if up.root.is_none() => {
                    return Err(EtlError::Config("upload.root is required for local".into()))
                }
                UploadBackend::Gcs if up.bucket.as_deref().map_or(true, str::is_empty) => {
                    return Err(EtlError::Config("upload.bucket is required for gcs".into()))
                }
                _ => {}
            }
        }
        if let Some(wh) = &self.warehouse {
            if wh.dataset.is_empty() || wh.table.is_empty() {
                return Err(EtlError::Config(
                    "warehouse.dataset and warehouse.table are required".into(),
                ));
            }
            match wh.backend {
                WarehouseBackend::Bigquery if wh.project.is_none() => {
                    return Err(EtlError::Config(
                        "warehouse.project is required for bigquery".into(),
                    ))
                }
                WarehouseBackend::Jsonl if wh.root.is_none() => {
                    return Err(EtlError::Config("warehouse.root is required for jsonl".into()))
                }
                _ => {}
            }
        }
        if self.table.prefix.trim().is_empty() || self.table.columns.is_empty() {
            return Err(EtlError::Config(
                "table.prefix and table.columns must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Retry and cache policy for the feed extract step.
    pub fn extract_policy(&self) -> TaskPolicy {
        TaskPolicy {
            name: "extract".to_string(),
            max_attempts: self.extract.retries.saturating_add(1),
            retry_delay: Duration::from_secs(self.extract.retry_delay_secs),
            cache_ttl: self.extract.cache_ttl_secs.map(Duration::from_secs),
        }
    }
}
