// src/transform/table.rs

use anyhow::{bail, Result};

use crate::fetch::Table;

/// Placeholder written for null cells.
pub const NULL_FILL: &str = "None";

/// Keep `columns` in the given order and fill nulls with [`NULL_FILL`].
pub fn select_columns(table: &Table, columns: &[String]) -> Result<Table> {
    let mut idx = Vec::with_capacity(columns.len());
    for c in columns {
        match table.column_index(c) {
            Some(i) => idx.push(i),
            None => bail!(
                "column `{}` not found; source has [{}]",
                c,
                table.headers.join(", ")
            ),
        }
    }

    let rows = table
        .rows
        .iter()
        .map(|row| {
            idx.iter()
                .map(|&i| {
                    Some(
                        row.get(i)
                            .cloned()
                            .flatten()
                            .unwrap_or_else(|| NULL_FILL.to_string()),
                    )
                })
                .collect()
        })
        .collect();

    Ok(Table {
        headers: columns.to_vec(),
        rows,
    })
}
