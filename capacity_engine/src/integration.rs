//! Declarative joins of source tables onto the site rows.
//!
//! Every source table is described by a [`SourceIntegration`]: which keys to
//! compare, how to match them, how to collapse source rows per key and which
//! columns to copy under which names. [`MergeEngine`] executes any of them.

use crate::config::MatchingThresholds;
use crate::ecr::{self, EcrColumns};
use crate::error::{PipelineError, Result};
use crate::matching::{cascade_match, normalize_identifier, GspMapping, IdentifierTier, SiteNameMatcher};
use crate::metrics::StageMetrics;
use crate::models::{OrderedGroups, Record, SourceTable, SourceTableKind, Value};
use crate::provenance::ColumnProvenance;
use std::collections::{BTreeSet, HashMap};

/// Value written to rows that no source row reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    Zero,
    EmptyText,
    Null,
}

impl Fill {
    pub fn value(&self) -> Value {
        match self {
            Fill::Zero => Value::Number(0.0),
            Fill::EmptyText => Value::Text(String::new()),
            Fill::Null => Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    pub source: &'static str,
    pub output: &'static str,
    pub fill: Fill,
    /// Set when the output is a per-site aggregate rather than a copied value.
    pub aggregated: Option<&'static str>,
}

impl ColumnMapping {
    pub fn copy(source: &'static str, output: &'static str, fill: Fill) -> Self {
        Self {
            source,
            output,
            fill,
            aggregated: None,
        }
    }

    pub fn aggregate(source: &'static str, output: &'static str, fill: Fill, how: &'static str) -> Self {
        Self {
            source,
            output,
            fill,
            aggregated: Some(how),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchStrategy {
    /// Site key equals source key.
    Exact,
    /// Keys compared after [`normalize_identifier`]. Rows left unmatched are
    /// retried against the individual source rows with the identifier tiers.
    NormalizedIdentifier,
    /// Source key equals the site key, otherwise the title column is matched
    /// against site names.
    LocationThenSiteName {
        title_column: &'static str,
        site_name_column: &'static str,
    },
    /// Source names are matched to the distinct values of a site column.
    SupplyPointName { site_column: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    /// First source row per key.
    FirstOccurrence,
    /// Sum of one column per key, other columns from the first row.
    Sum { column: &'static str },
    /// Register sums routed by connection status.
    StatusAware(EcrColumns),
    /// Every source row applied on its own, in source order. Later rows
    /// overwrite earlier ones on the same site.
    Sequential,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceIntegration {
    pub stage: &'static str,
    pub table: SourceTableKind,
    /// Site column compared against `source_key`.
    pub site_key: &'static str,
    pub source_key: &'static str,
    pub strategy: MatchStrategy,
    pub aggregation: Aggregation,
    pub columns: Vec<ColumnMapping>,
    /// Coerced to numbers before aggregation, unparsable values as zero.
    pub numeric_columns: Vec<&'static str>,
    /// Only source rows with a positive number in this column take part.
    pub require_positive: Option<&'static str>,
}

impl SourceIntegration {
    /// Every source column the integration reads.
    pub fn required_columns(&self) -> BTreeSet<&'static str> {
        let mut required: BTreeSet<&'static str> = self.columns.iter().map(|c| c.source).collect();
        required.insert(self.source_key);
        required.extend(self.numeric_columns.iter().copied());
        required.extend(self.require_positive);
        if let MatchStrategy::LocationThenSiteName { title_column, .. } = &self.strategy {
            required.insert(*title_column);
        }
        match &self.aggregation {
            Aggregation::Sum { column } => {
                required.insert(*column);
            }
            Aggregation::StatusAware(cols) => {
                required.extend([cols.status, cols.connected, cols.accepted]);
            }
            Aggregation::FirstOccurrence | Aggregation::Sequential => {}
        }
        required
    }

    pub fn validate(&self, table: &SourceTable) -> Result<()> {
        // a placeholder for an absent optional table carries no header
        if table.columns.is_empty() {
            return Ok(());
        }
        for column in self.required_columns() {
            if !table.has_column(column) {
                return Err(PipelineError::MissingColumn {
                    table: self.table.table_name(),
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Source rows collapsed under one key.
#[derive(Debug, Clone)]
struct Group {
    key: String,
    payload: Record,
}

/// Outcome of one integration, alongside the merged rows.
#[derive(Debug, Clone)]
pub struct IntegrationResult {
    pub records: Vec<Record>,
    pub metrics: StageMetrics,
}

pub struct MergeEngine<'a> {
    thresholds: &'a MatchingThresholds,
}

impl<'a> MergeEngine<'a> {
    pub fn new(thresholds: &'a MatchingThresholds) -> Self {
        Self { thresholds }
    }

    pub fn integrate(
        &self,
        records: Vec<Record>,
        integration: &SourceIntegration,
        table: &SourceTable,
        provenance: &mut ColumnProvenance,
    ) -> Result<IntegrationResult> {
        integration.validate(table)?;
        let mut metrics = StageMetrics::start(integration.stage, records.len());
        metrics.set("source_rows", table.len());

        let rows = self.prepare_rows(integration, table);
        metrics.set("source_rows_used", rows.len());
        let groups = self.group(integration, &rows);
        metrics.set("source_groups", groups.len());

        let mut records = records;
        for record in records.iter_mut() {
            for mapping in &integration.columns {
                record.set(mapping.output, mapping.fill.value());
            }
        }

        let mut touched = vec![false; records.len()];
        let assignments = self.match_groups(integration, &records, &groups, &mut metrics);
        for (rows_hit, payload) in &assignments {
            for &idx in rows_hit {
                write_payload(&mut records[idx], payload, &integration.columns);
                touched[idx] = true;
            }
        }

        if matches!(integration.strategy, MatchStrategy::NormalizedIdentifier) {
            self.identifier_fallback(integration, &rows, &mut records, &mut touched, &mut metrics);
        }

        let matched = touched.iter().filter(|t| **t).count();
        metrics.set("matched_rows", matched);
        metrics.set("unmatched_rows", records.len() - matched);

        record_provenance(integration, provenance);
        let rows_out = records.len();
        Ok(IntegrationResult {
            records,
            metrics: metrics.finish(rows_out),
        })
    }

    fn prepare_rows(&self, integration: &SourceIntegration, table: &SourceTable) -> Vec<Record> {
        table
            .rows
            .iter()
            .filter(|row| match integration.require_positive {
                Some(column) => row.number(column).is_some_and(|n| n > 0.0),
                None => true,
            })
            .map(|row| {
                let mut row = row.clone();
                for column in &integration.numeric_columns {
                    let number = row.number_or_zero(column);
                    row.set(*column, number);
                }
                row
            })
            .collect()
    }

    fn group_key(&self, integration: &SourceIntegration, row: &Record) -> Option<String> {
        let raw = row.text(integration.source_key)?;
        let key = match integration.strategy {
            MatchStrategy::NormalizedIdentifier => normalize_identifier(&raw),
            _ => raw.into_owned(),
        };
        Some(key)
    }

    fn group(&self, integration: &SourceIntegration, rows: &[Record]) -> Vec<Group> {
        match &integration.aggregation {
            Aggregation::Sequential => rows
                .iter()
                .map(|row| Group {
                    key: self.group_key(integration, row).unwrap_or_default(),
                    payload: row.clone(),
                })
                .collect(),
            Aggregation::StatusAware(cols) => ecr::aggregate(rows, integration.source_key, cols)
                .into_iter()
                .map(|agg| Group {
                    key: agg.site_id.clone(),
                    payload: agg.into_payload(cols),
                })
                .collect(),
            Aggregation::FirstOccurrence | Aggregation::Sum { .. } => {
                let mut groups: OrderedGroups<Group> = OrderedGroups::default();
                for row in rows {
                    let Some(key) = self.group_key(integration, row).filter(|k| !k.trim().is_empty()) else {
                        continue;
                    };
                    let group = groups.entry_or_insert_with(&key, || Group {
                        key: key.clone(),
                        payload: match &integration.aggregation {
                            Aggregation::Sum { column } => row.clone().with(*column, 0.0),
                            _ => row.clone(),
                        },
                    });
                    if let Aggregation::Sum { column } = &integration.aggregation {
                        let total = group.payload.number_or_zero(column) + row.number_or_zero(column);
                        group.payload.set(*column, total);
                    }
                }
                groups.into_values()
            }
        }
    }

    /// Rows reached by each group, in group order.
    fn match_groups<'g>(
        &self,
        integration: &SourceIntegration,
        records: &[Record],
        groups: &'g [Group],
        metrics: &mut StageMetrics,
    ) -> Vec<(Vec<usize>, &'g Record)> {
        match &integration.strategy {
            MatchStrategy::Exact => {
                let index = index_rows(records, |r| r.text(integration.site_key).map(|k| k.into_owned()));
                assign_by_key(groups, &index)
            }
            MatchStrategy::NormalizedIdentifier => {
                let index = index_rows(records, |r| {
                    r.text(integration.site_key).map(|k| normalize_identifier(&k))
                });
                assign_by_key(groups, &index)
            }
            MatchStrategy::LocationThenSiteName {
                title_column,
                site_name_column,
            } => self.match_location_then_name(integration, records, groups, title_column, site_name_column, metrics),
            MatchStrategy::SupplyPointName { site_column } => {
                let site_names: Vec<String> = records
                    .iter()
                    .filter_map(|r| r.text(site_column).map(|s| s.into_owned()))
                    .collect();
                let mapping = GspMapping::build(
                    groups.iter().map(|g| g.key.as_str()),
                    site_names.iter().map(String::as_str),
                    self.thresholds.gsp_similarity,
                );
                metrics.set("names_exact", mapping.counts.exact);
                metrics.set("names_fuzzy", mapping.counts.fuzzy);
                metrics.set("names_unmatched", mapping.counts.no_match);

                let index = index_rows(records, |r| {
                    r.text(site_column)
                        .and_then(|name| mapping.overview_name(&name).map(str::to_string))
                });
                assign_by_key(groups, &index)
            }
        }
    }

    fn match_location_then_name<'g>(
        &self,
        integration: &SourceIntegration,
        records: &[Record],
        groups: &'g [Group],
        title_column: &str,
        site_name_column: &str,
        metrics: &mut StageMetrics,
    ) -> Vec<(Vec<usize>, &'g Record)> {
        let by_location = index_rows(records, |r| r.text(integration.site_key).map(|k| k.into_owned()));
        let by_name = index_rows(records, |r| r.text(site_name_column).map(|k| k.into_owned()));
        let site_names: Vec<String> = records
            .iter()
            .filter_map(|r| r.text(site_name_column).map(|s| s.into_owned()))
            .collect();
        let matcher = SiteNameMatcher::new(
            self.thresholds.site_name_min_score,
            self.thresholds.site_name_fuzzy_ratio,
        );

        let mut assignments = Vec::new();
        for group in groups {
            if !group.key.is_empty() {
                if let Some(rows) = by_location.get(&group.key) {
                    metrics.incr("location_matches");
                    assignments.push((rows.clone(), &group.payload));
                    continue;
                }
            }

            let title = group.payload.text(title_column);
            let found = title
                .as_deref()
                .filter(|t| !t.is_empty())
                .and_then(|t| matcher.best_match(t, site_names.iter().map(String::as_str)));

            match found.and_then(|m| by_name.get(&m.site_name).map(|rows| (m, rows))) {
                Some((m, rows)) => {
                    log::debug!(
                        "{}: '{}' -> '{}' via {} ({:.3})",
                        integration.stage,
                        title.as_deref().unwrap_or_default(),
                        m.site_name,
                        m.method,
                        m.score
                    );
                    metrics.incr("site_name_matches");
                    metrics.incr(&format!("method:{}", m.method));
                    assignments.push((rows.clone(), &group.payload));
                }
                None => metrics.incr("no_match"),
            }
        }
        assignments
    }

    /// Per-row retry for sites the normalised join missed, against the
    /// individual source rows.
    fn identifier_fallback(
        &self,
        integration: &SourceIntegration,
        rows: &[Record],
        records: &mut [Record],
        touched: &mut [bool],
        metrics: &mut StageMetrics,
    ) {
        let candidates: Vec<(String, &Record)> = rows
            .iter()
            .filter_map(|row| row.text(integration.source_key).map(|k| (k.into_owned(), row)))
            .collect();

        for tier in IdentifierTier::ALL {
            metrics.set(format!("fallback:{}", tier.label()), 0);
        }

        for (idx, record) in records.iter_mut().enumerate() {
            if touched[idx] {
                continue;
            }
            let Some(site_id) = record.text(integration.site_key).map(|k| k.trim().to_string()) else {
                continue;
            };
            if let Some((tier, row)) = cascade_match(&site_id, &candidates) {
                log::debug!("{}: fallback {} match for '{}'", integration.stage, tier.label(), site_id);
                write_payload(record, row, &integration.columns);
                touched[idx] = true;
                metrics.incr(&format!("fallback:{}", tier.label()));
            }
        }
    }
}

fn index_rows<F>(records: &[Record], key: F) -> HashMap<String, Vec<usize>>
where
    F: Fn(&Record) -> Option<String>,
{
    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, record) in records.iter().enumerate() {
        if let Some(k) = key(record).filter(|k| !k.trim().is_empty()) {
            index.entry(k).or_default().push(idx);
        }
    }
    index
}

fn assign_by_key<'g>(
    groups: &'g [Group],
    index: &HashMap<String, Vec<usize>>,
) -> Vec<(Vec<usize>, &'g Record)> {
    groups
        .iter()
        .filter_map(|g| index.get(&g.key).map(|rows| (rows.clone(), &g.payload)))
        .collect()
}

fn write_payload(record: &mut Record, payload: &Record, mappings: &[ColumnMapping]) {
    for mapping in mappings {
        let value = payload.get(mapping.source);
        let value = if value.is_null() {
            mapping.fill.value()
        } else {
            value.clone()
        };
        record.set(mapping.output, value);
    }
}

fn record_provenance(integration: &SourceIntegration, provenance: &mut ColumnProvenance) {
    let table = integration.table.table_name();
    provenance.record_database(integration.source_key, table, integration.source_key);
    for mapping in &integration.columns {
        match mapping.aggregated {
            Some(how) => {
                provenance.record_database(mapping.source, table, mapping.source);
                provenance.record_aggregated(mapping.output, table, how);
            }
            None => provenance.record_database(mapping.output, table, mapping.source),
        }
    }
}
