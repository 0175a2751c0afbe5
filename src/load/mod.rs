// src/load/mod.rs

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

use crate::error::EtlError;
use crate::fetch::Table;
use crate::transform::NormalizedRecord;

pub mod csv;
pub mod json;
pub mod parquet;

pub use self::json::{record_to_row, table_to_rows, TimestampEncoding};

/// Sink encoding of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Csv,
    Parquet,
    Json,
}

impl Format {
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Csv => "csv",
            Format::Parquet => "parquet",
            Format::Json => "json",
        }
    }
}

/// How artifacts are laid out under the store directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathLayout {
    /// `<store>/<prefix>_<epoch-seconds>.<ext>`
    Flat,
    /// `<store>/<YYYY>/<MM>/<DD>/<YYYYMMDDHHMM>_<prefix>.<ext>`
    Dated,
}

/// Deterministic artifact location; depends only on the arguments.
pub fn artifact_path(
    store: &Path,
    prefix: &str,
    at: DateTime<Utc>,
    format: Format,
    layout: PathLayout,
) -> PathBuf {
    let ext = format.extension();
    match layout {
        PathLayout::Flat => store.join(format!("{}_{}.{}", prefix, at.timestamp(), ext)),
        PathLayout::Dated => store
            .join(at.format("%Y").to_string())
            .join(at.format("%m").to_string())
            .join(at.format("%d").to_string())
            .join(format!("{}_{}.{}", at.format("%Y%m%d%H%M"), prefix, ext)),
    }
}

/// Write `path` through a sibling `<path>.tmp` and rename it into place.
/// Parent directories are created; an existing file is replaced. On any
/// error the temp file is removed and `EtlError::WriteFailure` is returned.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| EtlError::write_failure(parent, e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let written = (|| -> Result<()> {
        let mut w = BufWriter::new(File::create(&tmp)?);
        write(&mut w)?;
        w.flush()?;
        let file = w.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(EtlError::write_failure(path, format!("{:#}", e)).into());
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        EtlError::write_failure(path, e)
    })?;
    Ok(())
}

/// Encode `records` as `format` at `path`.
pub fn write_records(path: &Path, records: &[NormalizedRecord], format: Format) -> Result<()> {
    write_atomic(path, |w| match format {
        Format::Csv => csv::write_records(w, records),
        Format::Parquet => parquet::write_records(w, records),
        Format::Json => json::write_records(w, records),
    })
}

/// Encode a string table as `format` at `path`.
pub fn write_table(path: &Path, table: &Table, format: Format) -> Result<()> {
    write_atomic(path, |w| match format {
        Format::Csv => table.write_csv(w),
        Format::Parquet => parquet::write_table(w, table),
        Format::Json => json::write_rows(w, &table_to_rows(table)),
    })
}

/// Load step of the feed pipeline: compute the artifact path and write it.
#[instrument(level = "info", skip(records, store), fields(rows = records.len()))]
pub fn write_load(
    records: &[NormalizedRecord],
    store: &Path,
    prefix: &str,
    at: DateTime<Utc>,
    format: Format,
    layout: PathLayout,
) -> Result<PathBuf> {
    let path = artifact_path(store, prefix, at, format, layout);
    write_records(&path, records, format)?;
    info!(path = %path.display(), "wrote artifact");
    Ok(path)
}
