// src/load/json.rs

use anyhow::Result;
use serde::Serialize;
use serde_json::{
    ser::{Formatter, PrettyFormatter},
    Map, Number, Value,
};
use std::io::{self, Write};

use crate::fetch::Table;
use crate::transform::NormalizedRecord;

/// Decimal places kept for floating point values.
pub const DOUBLE_PRECISION: usize = 10;

/// A plain column → value mapping.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampEncoding {
    /// Integer milliseconds since the epoch.
    EpochMillis,
    /// Fractional seconds since the epoch.
    EpochSeconds,
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

pub fn record_to_row(r: &NormalizedRecord, ts: TimestampEncoding) -> Row {
    let timestamp = match ts {
        TimestampEncoding::EpochMillis => Value::from(r.timestamp.timestamp_millis()),
        TimestampEncoding::EpochSeconds => float(r.timestamp.timestamp_millis() as f64 / 1000.0),
    };

    let mut row = Map::new();
    row.insert("timestamp".into(), timestamp);
    row.insert("id".into(), Value::from(r.id.as_str()));
    row.insert("rank".into(), Value::from(r.rank));
    row.insert("symbol".into(), Value::from(r.symbol.as_str()));
    row.insert("name".into(), Value::from(r.name.as_str()));
    row.insert("supply".into(), float(r.supply));
    row.insert("market_cap_usd".into(), float(r.market_cap_usd));
    row.insert("volume_usd_24hr".into(), float(r.volume_usd_24hr));
    row.insert("price_usd".into(), float(r.price_usd));
    row.insert("change_percent_24hr".into(), float(r.change_percent_24hr));
    row.insert("url".into(), Value::from(r.url.as_str()));
    row
}

/// One mapping per row; null cells become JSON `null`.
pub fn table_to_rows(table: &Table) -> Vec<Row> {
    table
        .rows
        .iter()
        .map(|cells| {
            table
                .headers
                .iter()
                .zip(cells)
                .map(|(h, c)| (h.clone(), c.as_deref().map_or(Value::Null, Value::from)))
                .collect()
        })
        .collect()
}

pub fn write_records<W: Write>(writer: W, records: &[NormalizedRecord]) -> Result<()> {
    let rows: Vec<Row> = records
        .iter()
        .map(|r| record_to_row(r, TimestampEncoding::EpochMillis))
        .collect();
    write_rows(writer, &rows)
}

/// Records array, two-space indent, floats rounded to [`DOUBLE_PRECISION`]
/// places, everything outside ASCII escaped as `\uXXXX`.
pub fn write_rows<W: Write>(writer: W, rows: &[Row]) -> Result<()> {
    let mut ser = serde_json::Serializer::with_formatter(writer, AsciiFormatter::default());
    rows.serialize(&mut ser)?;
    Ok(())
}

fn format_float(v: f64) -> String {
    let fixed = format!("{:.*}", DOUBLE_PRECISION, v);
    let trimmed = fixed.trim_end_matches('0');
    if trimmed.ends_with('.') {
        format!("{}0", trimmed)
    } else {
        trimmed.to_string()
    }
}

#[derive(Default)]
struct AsciiFormatter<'a> {
    pretty: PrettyFormatter<'a>,
}

impl<'a> Formatter for AsciiFormatter<'a> {
    fn begin_array<W: ?Sized + Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.pretty.begin_array(w)
    }

    fn end_array<W: ?Sized + Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.pretty.end_array(w)
    }

    fn begin_array_value<W: ?Sized + Write>(&mut self, w: &mut W, first: bool) -> io::Result<()> {
        self.pretty.begin_array_value(w, first)
    }

    fn end_array_value<W: ?Sized + Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.pretty.end_array_value(w)
    }

    fn begin_object<W: ?Sized + Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.pretty.begin_object(w)
    }

    fn end_object<W: ?Sized + Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.pretty.end_object(w)
    }

    fn begin_object_key<W: ?Sized + Write>(&mut self, w: &mut W, first: bool) -> io::Result<()> {
        self.pretty.begin_object_key(w, first)
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.pretty.begin_object_value(w)
    }

    fn end_object_value<W: ?Sized + Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.pretty.end_object_value(w)
    }

    fn write_f64<W: ?Sized + Write>(&mut self, w: &mut W, value: f64) -> io::Result<()> {
        w.write_all(format_float(value).as_bytes())
    }

    fn write_string_fragment<W: ?Sized + Write>(&mut self, w: &mut W, fragment: &str) -> io::Result<()> {
        if fragment.is_ascii() {
            return w.write_all(fragment.as_bytes());
        }
        let mut units = [0u16; 2];
        for c in fragment.chars() {
            if c.is_ascii() {
                w.write_all(&[c as u8])?;
            } else {
                for u in c.encode_utf16(&mut units) {
                    write!(w, "\\u{:04x}", u)?;
                }
            }
        }
        Ok(())
    }
}
