use crate::error::Result;
use crate::writer::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const TABLE_MAPPING_FILE: &str = "table_to_columns_mapping.json";
pub const CALCULATED_FILE: &str = "calculated_columns.json";
pub const AGGREGATED_FILE: &str = "aggregated_columns.json";
pub const COMPLETE_FILE: &str = "complete_column_tracking.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseColumn {
    pub table: String,
    pub original_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculatedColumn {
    pub description: String,
    pub formula: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedColumn {
    pub source_table: String,
    pub aggregation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableColumn {
    pub column_name: String,
    pub original_name: String,
}

/// Where a column's values ultimately come from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnOrigin<'a> {
    Database(&'a DatabaseColumn),
    Calculated(&'a CalculatedColumn),
    Aggregated(&'a AggregatedColumn),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProvenanceSummary {
    pub database_columns: usize,
    pub calculated_columns: usize,
    pub aggregated_columns: usize,
    pub renamed_columns: usize,
}

/// Append-only log of where every output column came from.
///
/// The first record for a column wins. Later records under the same name,
/// including calculated re-declarations, are ignored. Table membership is
/// kept apart from that, so a column shared by several tables is listed
/// under each of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnProvenance {
    database_columns: BTreeMap<String, DatabaseColumn>,
    /// table -> column -> original column name
    #[serde(skip)]
    table_columns: BTreeMap<String, BTreeMap<String, String>>,
    calculated_columns: BTreeMap<String, CalculatedColumn>,
    renamed_columns: BTreeMap<String, String>,
    aggregated_columns: BTreeMap<String, AggregatedColumn>,
}

impl ColumnProvenance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a column read from `table`. A differing `original` also
    /// records the rename.
    pub fn record_database(&mut self, column: &str, table: &str, original: &str) {
        self.table_columns
            .entry(table.to_string())
            .or_default()
            .entry(column.to_string())
            .or_insert_with(|| original.to_string());
        if self.database_columns.contains_key(column) {
            return;
        }
        self.database_columns.insert(
            column.to_string(),
            DatabaseColumn {
                table: table.to_string(),
                original_column: original.to_string(),
            },
        );
        if column != original {
            self.record_renamed(column, original);
        }
    }

    pub fn record_calculated(&mut self, column: &str, description: &str, formula: &str) {
        self.calculated_columns
            .entry(column.to_string())
            .or_insert_with(|| CalculatedColumn {
                description: description.to_string(),
                formula: formula.to_string(),
            });
    }

    pub fn record_aggregated(&mut self, column: &str, source_table: &str, aggregation: &str) {
        self.aggregated_columns
            .entry(column.to_string())
            .or_insert_with(|| AggregatedColumn {
                source_table: source_table.to_string(),
                aggregation: aggregation.to_string(),
            });
    }

    pub fn record_renamed(&mut self, column: &str, renamed_from: &str) {
        self.renamed_columns
            .entry(column.to_string())
            .or_insert_with(|| renamed_from.to_string());
    }

    pub fn database(&self, column: &str) -> Option<&DatabaseColumn> {
        self.database_columns.get(column)
    }

    pub fn calculated(&self, column: &str) -> Option<&CalculatedColumn> {
        self.calculated_columns.get(column)
    }

    pub fn aggregated(&self, column: &str) -> Option<&AggregatedColumn> {
        self.aggregated_columns.get(column)
    }

    pub fn renamed_from(&self, column: &str) -> Option<&str> {
        self.renamed_columns.get(column).map(String::as_str)
    }

    fn direct_origin(&self, column: &str) -> Option<ColumnOrigin<'_>> {
        self.database_columns
            .get(column)
            .map(ColumnOrigin::Database)
            .or_else(|| self.calculated_columns.get(column).map(ColumnOrigin::Calculated))
            .or_else(|| self.aggregated_columns.get(column).map(ColumnOrigin::Aggregated))
    }

    /// Follow renamed-from links until a column with a recorded origin.
    pub fn resolve(&self, column: &str) -> Option<ColumnOrigin<'_>> {
        let mut current = column;
        // every hop consumes one rename, so a cycle cannot outlast this
        for _ in 0..=self.renamed_columns.len() {
            if let Some(origin) = self.direct_origin(current) {
                return Some(origin);
            }
            current = self.renamed_from(current)?;
        }
        None
    }

    pub fn summary(&self) -> ProvenanceSummary {
        ProvenanceSummary {
            database_columns: self.database_columns.len(),
            calculated_columns: self.calculated_columns.len(),
            aggregated_columns: self.aggregated_columns.len(),
            renamed_columns: self.renamed_columns.len(),
        }
    }

    /// Every column each table contributed, including columns whose
    /// origin was claimed by an earlier table.
    pub fn table_to_columns(&self) -> BTreeMap<String, Vec<TableColumn>> {
        self.table_columns
            .iter()
            .map(|(table, columns)| {
                let columns = columns
                    .iter()
                    .map(|(column, original)| TableColumn {
                        column_name: column.clone(),
                        original_name: original.clone(),
                    })
                    .collect();
                (table.clone(), columns)
            })
            .collect()
    }

    /// Write the four provenance artifacts into `dir`, replacing old ones.
    pub fn write_artifacts(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;

        let artifacts = [
            (
                TABLE_MAPPING_FILE,
                serde_json::to_vec_pretty(&self.table_to_columns())?,
            ),
            (
                CALCULATED_FILE,
                serde_json::to_vec_pretty(&self.calculated_columns)?,
            ),
            (
                AGGREGATED_FILE,
                serde_json::to_vec_pretty(&self.aggregated_columns)?,
            ),
            (COMPLETE_FILE, serde_json::to_vec_pretty(self)?),
        ];

        let mut written = Vec::with_capacity(artifacts.len());
        for (name, body) in artifacts {
            let path = dir.join(name);
            write_atomic(&path, &body)?;
            log::info!("wrote {}", path.display());
            written.push(path);
        }
        Ok(written)
    }
}
