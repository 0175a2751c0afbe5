// src/transform/mod.rs

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::error::RecordMalformed;
use crate::fetch::RawFeed;

pub mod overrides;
pub mod record;
pub mod table;

pub use overrides::OverrideTable;
pub use record::{coerce, AssetRecord, FieldValue, NormalizedRecord, COLUMNS};
pub use table::{select_columns, NULL_FILL};

/// Output of one transform pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    /// Observation time of the batch, shared by every record.
    pub observed_at: DateTime<Utc>,
    /// Input order, minus rejected records.
    pub records: Vec<NormalizedRecord>,
    pub rejected: Vec<RecordMalformed>,
}

impl Transformed {
    /// `YYYY-MM-DD_HH-MM`, minute resolution.
    pub fn run_label(&self) -> String {
        self.observed_at.format("%Y-%m-%d_%H-%M").to_string()
    }
}

/// Convert the feed's epoch-millisecond timestamp.
pub fn observed_at(timestamp_ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(timestamp_ms)
        .ok_or_else(|| anyhow!("feed timestamp {} out of range", timestamp_ms))
}

/// Map every asset of `feed` to a [`NormalizedRecord`]. Malformed assets are
/// logged and dropped; they never fail the batch.
#[instrument(level = "info", skip_all, fields(assets = feed.data.len()))]
pub fn transform_feed(feed: &RawFeed, overrides: &OverrideTable) -> Result<Transformed> {
    let observed_at = observed_at(feed.timestamp)?;

    let mut records = Vec::with_capacity(feed.data.len());
    let mut rejected = Vec::new();
    for entry in &feed.data {
        match AssetRecord::from_value(entry).and_then(|a| coerce(&a, observed_at, overrides)) {
            Ok(r) => records.push(r),
            Err(e) => {
                warn!(record = %entry, error = %e, "dropping malformed record");
                rejected.push(e);
            }
        }
    }

    info!(
        kept = records.len(),
        rejected = rejected.len(),
        observed_at = %observed_at,
        "transformed feed"
    );
    Ok(Transformed {
        observed_at,
        records,
        rejected,
    })
}
