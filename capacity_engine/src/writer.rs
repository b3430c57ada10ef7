use crate::error::Result;
use crate::models::{Table, Value};
use polars::prelude::*;
use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` to a sibling temp file then rename it over `path`, so a
/// reader never sees a half-written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = temp_path(path);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// A column whose non-null cells are all numbers is written as floats,
/// anything else as text.
fn column_series(name: &str, cells: Vec<&Value>) -> Series {
    let numeric = cells.iter().any(|v| !v.is_null())
        && cells
            .iter()
            .all(|v| matches!(v, Value::Null | Value::Number(_)));

    if numeric {
        let values: Vec<Option<f64>> = cells
            .iter()
            .map(|v| match v {
                Value::Number(n) => Some(*n),
                _ => None,
            })
            .collect();
        Series::new(name.into(), values)
    } else {
        let values: Vec<Option<String>> = cells
            .iter()
            .map(|v| v.text().map(|t| t.into_owned()))
            .collect();
        Series::new(name.into(), values)
    }
}

pub fn to_dataframe(table: &Table) -> Result<DataFrame> {
    let columns: Vec<Series> = table
        .columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let cells = table.rows.iter().map(|row| &row[idx]).collect();
            column_series(name, cells)
        })
        .collect();
    Ok(DataFrame::new(columns)?)
}

/// Write `table` as CSV with a header row, atomically replacing `path`.
pub fn write_table(table: &Table, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut df = to_dataframe(table)?;
    let tmp = temp_path(path);
    {
        let mut file = File::create(&tmp)?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)?;
    }
    std::fs::rename(&tmp, path)?;

    log::debug!(
        "wrote {} rows x {} columns to {}",
        table.height(),
        table.width(),
        path.display()
    );
    Ok(())
}
