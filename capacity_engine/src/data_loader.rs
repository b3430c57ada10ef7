use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::models::{Record, SourceTable, SourceTableKind, Value};
use crate::provenance::ColumnProvenance;
use crate::writer::write_atomic;
use polars::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Where the source tables come from.
pub trait TableSource {
    /// False when the source cannot be reached at all, in which case the
    /// pipeline falls back to the snapshot.
    fn is_available(&self) -> bool;

    fn fetch(&self, kind: SourceTableKind) -> Result<SourceTable>;
}

/// One `<table_name>.csv` per source table in a directory. Every cell is read
/// as text, empty cells as null.
pub struct CsvDirectorySource {
    dir: PathBuf,
}

impl CsvDirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn table_path(&self, kind: SourceTableKind) -> PathBuf {
        self.dir.join(format!("{}.csv", kind.table_name()))
    }
}

impl TableSource for CsvDirectorySource {
    fn is_available(&self) -> bool {
        self.dir.is_dir()
    }

    fn fetch(&self, kind: SourceTableKind) -> Result<SourceTable> {
        let path = self.table_path(kind);
        if !path.is_file() {
            return Err(PipelineError::MissingTable {
                table: kind.table_name(),
                reason: format!("{} not found", path.display()),
            });
        }
        let df = read_text_csv(&path)?;
        let table = dataframe_to_table(kind, &df)?;
        log::info!(
            "loaded {} rows x {} columns from {}",
            table.len(),
            table.columns.len(),
            path.display()
        );
        Ok(table)
    }
}

fn read_text_csv(path: &Path) -> Result<DataFrame> {
    // schema inference off: every column stays a string
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

fn dataframe_to_table(kind: SourceTableKind, df: &DataFrame) -> Result<SourceTable> {
    let mut columns = Vec::with_capacity(df.width());
    let mut rows = vec![Record::new(); df.height()];

    for series in df.get_columns() {
        let name = series.name().trim_start_matches('\u{feff}').to_string();
        let text = series.cast(&DataType::String)?;
        for (row, cell) in rows.iter_mut().zip(text.str()?.into_iter()) {
            let value = match cell {
                Some(cell) => Value::Text(cell.to_string()),
                None => Value::Null,
            };
            row.set(name.clone(), value);
        }
        columns.push(name);
    }

    Ok(SourceTable::new(kind, columns, rows))
}

/// Tables held in memory, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    tables: HashMap<SourceTableKind, SourceTable>,
    available: bool,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            available: true,
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: SourceTable) -> Self {
        self.tables.insert(table.kind, table);
        self
    }
}

impl TableSource for InMemorySource {
    fn is_available(&self) -> bool {
        self.available
    }

    fn fetch(&self, kind: SourceTableKind) -> Result<SourceTable> {
        self.tables
            .get(&kind)
            .cloned()
            .ok_or_else(|| PipelineError::MissingTable {
                table: kind.table_name(),
                reason: "not loaded".to_string(),
            })
    }
}

/// Every source table of one run.
#[derive(Debug, Clone)]
pub struct LoadedTables {
    tables: HashMap<SourceTableKind, SourceTable>,
}

impl LoadedTables {
    pub fn get(&self, kind: SourceTableKind) -> &SourceTable {
        &self.tables[&kind]
    }

    /// The main site table, handed over as the working rows.
    pub fn take_sites(&mut self) -> Vec<Record> {
        self.tables
            .get_mut(&SourceTableKind::GridAndPrimarySites)
            .map(|t| std::mem::take(&mut t.rows))
            .unwrap_or_default()
    }
}

/// Fetch all seven tables. A required table that cannot be fetched aborts
/// the run; an optional one is replaced by an empty placeholder.
pub fn load_all<S: TableSource + ?Sized>(
    source: &S,
    config: &PipelineConfig,
    provenance: &mut ColumnProvenance,
) -> Result<LoadedTables> {
    let mut tables = HashMap::new();

    for kind in SourceTableKind::ALL {
        let table = match source.fetch(kind) {
            Ok(table) => table,
            Err(err) if config.is_optional(kind) && kind != SourceTableKind::GridAndPrimarySites => {
                log::warn!("optional table {} unavailable, continuing without it: {}", kind, err);
                SourceTable::empty(kind)
            }
            Err(PipelineError::MissingTable { table, reason }) => {
                return Err(PipelineError::MissingTable { table, reason });
            }
            Err(err) => {
                return Err(PipelineError::MissingTable {
                    table: kind.table_name(),
                    reason: err.to_string(),
                });
            }
        };
        tables.insert(kind, table);
    }

    let sites = &tables[&SourceTableKind::GridAndPrimarySites];
    for column in &sites.columns {
        provenance.record_database(column, sites.kind.table_name(), column);
    }

    Ok(LoadedTables { tables })
}

/// Copy the last good output over `output`. Used when the source is down.
pub fn restore_snapshot(snapshot: &Path, output: &Path) -> Result<()> {
    if !snapshot.is_file() {
        return Err(PipelineError::SnapshotMissing(snapshot.to_path_buf()));
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = std::fs::read(snapshot)?;
    write_atomic(output, &bytes)?;
    log::warn!(
        "source unavailable, restored snapshot {} to {}",
        snapshot.display(),
        output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_csv_cells_stay_text() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("ukpn_dnoa.csv"),
            "\u{feff}functional_location,customers_served\nABC-01,0012\nXYZ,\n",
        )
        .unwrap();

        let source = CsvDirectorySource::new(dir.path());
        assert!(source.is_available());
        let table = source.fetch(SourceTableKind::Dnoa).unwrap();

        assert_eq!(table.columns, vec!["functional_location", "customers_served"]);
        assert_eq!(table.rows[0].get("customers_served"), &Value::from("0012"));
        assert!(table.rows[1].get("customers_served").is_null());
    }

    #[test]
    fn test_missing_file_is_missing_table() {
        let dir = tempdir().unwrap();
        let source = CsvDirectorySource::new(dir.path());
        let err = source.fetch(SourceTableKind::LtdsGeneration).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingTable { table: "ltds_table_5_generation", .. }
        ));
    }

    #[test]
    fn test_optional_tables_become_placeholders() {
        let sites = SourceTable::new(
            SourceTableKind::GridAndPrimarySites,
            vec!["sitename".to_string()],
            vec![Record::from_pairs([("sitename", "BURWELL")])],
        );
        let mut source = InMemorySource::new().with_table(sites);
        for kind in &SourceTableKind::ALL[1..] {
            source = source.with_table(SourceTable::empty(*kind));
        }
        source.tables.remove(&SourceTableKind::Dnoa);

        let mut provenance = ColumnProvenance::new();
        let strict = PipelineConfig::default();
        assert!(load_all(&source, &strict, &mut provenance).is_err());

        let lenient = PipelineConfig {
            optional_tables: vec![SourceTableKind::Dnoa],
            ..PipelineConfig::default()
        };
        let mut loaded = load_all(&source, &lenient, &mut provenance).unwrap();
        assert!(loaded.get(SourceTableKind::Dnoa).columns.is_empty());
        assert_eq!(loaded.take_sites().len(), 1);
        assert!(provenance.database("sitename").is_some());
    }

    #[test]
    fn test_restore_snapshot() {
        let dir = tempdir().unwrap();
        let snapshot = dir.path().join("snapshot.csv");
        let output = dir.path().join("out/result.csv");

        assert!(matches!(
            restore_snapshot(&snapshot, &output),
            Err(PipelineError::SnapshotMissing(_))
        ));

        fs::write(&snapshot, "a,b\n1,2\n").unwrap();
        restore_snapshot(&snapshot, &output).unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "a,b\n1,2\n");
    }
}
