// src/load/csv.rs

use anyhow::{bail, Context, Result};
use std::io::{Read, Write};

use crate::transform::{NormalizedRecord, COLUMNS};

/// Header row (always, even for an empty batch) then one line per record.
pub fn write_records<W: Write>(writer: W, records: &[NormalizedRecord]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    wtr.write_record(COLUMNS)?;
    for r in records {
        wtr.serialize(r)
            .with_context(|| format!("serializing record {}", r.id))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Inverse of [`write_records`]; the header must match the record schema.
pub fn read_records<R: Read>(reader: R) -> Result<Vec<NormalizedRecord>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers().context("reading CSV header row")?;
    if !headers.iter().eq(COLUMNS.iter().copied()) {
        bail!("unexpected CSV header: {:?}", headers);
    }
    rdr.deserialize()
        .enumerate()
        .map(|(i, r)| r.with_context(|| format!("decoding CSV row {}", i + 1)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::fixtures::records;

    #[test]
    fn test_round_trip() -> Result<()> {
        let recs = records();
        let mut buf = Vec::new();
        write_records(&mut buf, &recs)?;

        let text = String::from_utf8(buf.clone())?;
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(COLUMNS.join(",").as_str()));
        assert!(lines.next().unwrap().starts_with("2023-07-22T04:26:40Z,bitcoin,1,BTC,"));

        assert_eq!(read_records(buf.as_slice())?, recs);
        Ok(())
    }

    #[test]
    fn test_empty_batch_keeps_header() -> Result<()> {
        let mut buf = Vec::new();
        write_records(&mut buf, &[])?;
        assert_eq!(String::from_utf8(buf.clone())?, format!("{}\n", COLUMNS.join(",")));
        assert!(read_records(buf.as_slice())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_foreign_header_rejected() {
        assert!(read_records("a,b\n1,2\n".as_bytes()).is_err());
    }
}
