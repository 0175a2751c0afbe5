// src/load/parquet.rs

use anyhow::{anyhow, Context, Result};
use arrow::{
    array::{Array, ArrayRef, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray},
    datatypes::{DataType, Field, Schema, TimeUnit},
    record_batch::RecordBatch,
};
use chrono::DateTime;
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    basic::Compression,
    file::properties::WriterProperties,
};
use std::{fs::File, io::Write, path::Path, sync::Arc};

use crate::fetch::Table;
use crate::transform::NormalizedRecord;

/// Arrow schema of the normalized table, in column order.
pub fn record_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Microsecond, Some(Arc::from("UTC"))),
            false,
        ),
        Field::new("id", DataType::Utf8, false),
        Field::new("rank", DataType::Int64, false),
        Field::new("symbol", DataType::Utf8, false),
        Field::new("name", DataType::Utf8, false),
        Field::new("supply", DataType::Float64, false),
        Field::new("market_cap_usd", DataType::Float64, false),
        Field::new("volume_usd_24hr", DataType::Float64, false),
        Field::new("price_usd", DataType::Float64, false),
        Field::new("change_percent_24hr", DataType::Float64, false),
        Field::new("url", DataType::Utf8, false),
    ]))
}

pub fn records_to_batch(records: &[NormalizedRecord]) -> Result<RecordBatch> {
    let timestamp = TimestampMicrosecondArray::from_iter_values(
        records.iter().map(|r| r.timestamp.timestamp_micros()),
    )
    .with_timezone("UTC");

    let columns: Vec<ArrayRef> = vec![
        Arc::new(timestamp),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.id.as_str()))),
        Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.rank))),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.symbol.as_str()))),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.name.as_str()))),
        Arc::new(Float64Array::from_iter_values(records.iter().map(|r| r.supply))),
        Arc::new(Float64Array::from_iter_values(records.iter().map(|r| r.market_cap_usd))),
        Arc::new(Float64Array::from_iter_values(records.iter().map(|r| r.volume_usd_24hr))),
        Arc::new(Float64Array::from_iter_values(records.iter().map(|r| r.price_usd))),
        Arc::new(Float64Array::from_iter_values(
            records.iter().map(|r| r.change_percent_24hr),
        )),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.url.as_str()))),
    ];

    RecordBatch::try_new(record_schema(), columns).context("building record batch")
}

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build()
}

fn write_batch<W: Write + Send>(writer: W, batch: &RecordBatch) -> Result<()> {
    let mut writer = ArrowWriter::try_new(writer, batch.schema(), Some(writer_properties()))
        .context("creating ArrowWriter")?;
    writer.write(batch).context("writing batch")?;
    writer.close().context("closing ArrowWriter")?;
    Ok(())
}

/// One row group with the typed schema; an empty batch still carries it.
pub fn write_records<W: Write + Send>(writer: W, records: &[NormalizedRecord]) -> Result<()> {
    write_batch(writer, &records_to_batch(records)?)
}

/// Every column as nullable Utf8.
pub fn write_table<W: Write + Send>(writer: W, table: &Table) -> Result<()> {
    let schema = Arc::new(Schema::new(
        table
            .headers
            .iter()
            .map(|h| Field::new(h, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ));
    let columns: Vec<ArrayRef> = (0..table.headers.len())
        .map(|i| {
            Arc::new(StringArray::from(
                table
                    .rows
                    .iter()
                    .map(|row| row.get(i).and_then(|c| c.as_deref()))
                    .collect::<Vec<_>>(),
            )) as ArrayRef
        })
        .collect();
    let batch = RecordBatch::try_new(schema, columns).context("building table batch")?;
    write_batch(writer, &batch)
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| anyhow!("missing column `{}`", name))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| anyhow!("column `{}` has unexpected type", name))
}

/// Decode a file written by [`write_records`].
pub fn read_records(path: &Path) -> Result<Vec<NormalizedRecord>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading parquet metadata of {}", path.display()))?
        .with_batch_size(1024)
        .build()?;

    let mut out = Vec::new();
    for batch in reader {
        let batch = batch.context("reading record batch")?;
        let ts = column::<TimestampMicrosecondArray>(&batch, "timestamp")?;
        let id = column::<StringArray>(&batch, "id")?;
        let rank = column::<Int64Array>(&batch, "rank")?;
        let symbol = column::<StringArray>(&batch, "symbol")?;
        let name = column::<StringArray>(&batch, "name")?;
        let supply = column::<Float64Array>(&batch, "supply")?;
        let mcap = column::<Float64Array>(&batch, "market_cap_usd")?;
        let vol = column::<Float64Array>(&batch, "volume_usd_24hr")?;
        let price = column::<Float64Array>(&batch, "price_usd")?;
        let change = column::<Float64Array>(&batch, "change_percent_24hr")?;
        let url = column::<StringArray>(&batch, "url")?;

        for i in 0..batch.num_rows() {
            out.push(NormalizedRecord {
                timestamp: DateTime::from_timestamp_micros(ts.value(i))
                    .ok_or_else(|| anyhow!("timestamp out of range in row {}", i))?,
                id: id.value(i).to_string(),
                rank: rank.value(i),
                symbol: symbol.value(i).to_string(),
                name: name.value(i).to_string(),
                supply: supply.value(i),
                market_cap_usd: mcap.value(i),
                volume_usd_24hr: vol.value(i),
                price_usd: price.value(i),
                change_percent_24hr: change.value(i),
                url: url.value(i).to_string(),
            });
        }
    }
    Ok(out)
}
