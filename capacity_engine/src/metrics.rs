use crate::error::Result;
use crate::provenance::ProvenanceSummary;
use crate::writer::write_atomic;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Instant;

pub const METRICS_FILE: &str = "pipeline_metrics.json";

/// Row counts and named counters for one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageMetrics {
    pub stage: String,
    pub rows_in: usize,
    pub rows_out: usize,
    pub counters: BTreeMap<String, usize>,
    pub elapsed_ms: u128,
    #[serde(skip)]
    started: Option<Instant>,
}

impl StageMetrics {
    pub fn start(stage: impl Into<String>, rows_in: usize) -> Self {
        Self {
            stage: stage.into(),
            rows_in,
            rows_out: rows_in,
            counters: BTreeMap::new(),
            elapsed_ms: 0,
            started: Some(Instant::now()),
        }
    }

    pub fn set(&mut self, counter: impl Into<String>, value: usize) {
        self.counters.insert(counter.into(), value);
    }

    pub fn incr(&mut self, counter: &str) {
        *self.counters.entry(counter.to_string()).or_insert(0) += 1;
    }

    pub fn counter(&self, counter: &str) -> usize {
        self.counters.get(counter).copied().unwrap_or(0)
    }

    pub fn finish(mut self, rows_out: usize) -> Self {
        self.rows_out = rows_out;
        if let Some(started) = self.started.take() {
            self.elapsed_ms = started.elapsed().as_millis();
        }
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageMetrics>,
    pub output_rows: usize,
    pub output_columns: usize,
    pub provenance: ProvenanceSummary,
}

impl Default for RunReport {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
            output_rows: 0,
            output_columns: 0,
            provenance: ProvenanceSummary::default(),
        }
    }
}

impl RunReport {
    pub fn push(&mut self, stage: StageMetrics) {
        log::info!(
            "{}: {} -> {} rows in {}ms",
            stage.stage,
            stage.rows_in,
            stage.rows_out,
            stage.elapsed_ms
        );
        for (name, value) in &stage.counters {
            log::debug!("  {}.{} = {}", stage.stage, name, value);
        }
        self.stages.push(stage);
    }

    pub fn stage(&self, stage: &str) -> Option<&StageMetrics> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn finish(&mut self, output_rows: usize, output_columns: usize, provenance: ProvenanceSummary) {
        self.output_rows = output_rows;
        self.output_columns = output_columns;
        self.provenance = provenance;
        self.finished_at = Some(Utc::now());
    }

    pub fn write_json(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let body = serde_json::to_vec_pretty(self)?;
        write_atomic(&dir.join(METRICS_FILE), &body)?;
        Ok(())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pipeline run started {}", self.started_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        for stage in &self.stages {
            writeln!(
                f,
                "  {:<28} {:>7} -> {:>7} rows {:>6}ms",
                stage.stage, stage.rows_in, stage.rows_out, stage.elapsed_ms
            )?;
            for (name, value) in &stage.counters {
                writeln!(f, "      {:<32} {:>7}", name, value)?;
            }
        }
        writeln!(
            f,
            "Output: {} rows x {} columns",
            self.output_rows, self.output_columns
        )?;
        write!(
            f,
            "Provenance: {} database, {} calculated, {} aggregated, {} renamed",
            self.provenance.database_columns,
            self.provenance.calculated_columns,
            self.provenance.aggregated_columns,
            self.provenance.renamed_columns
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut stage = StageMetrics::start("filter", 10);
        stage.incr("removed_no_transformers");
        stage.incr("removed_no_transformers");
        stage.set("removed_no_reverse_power", 3);
        let stage = stage.finish(5);
        assert_eq!(stage.counter("removed_no_transformers"), 2);
        assert_eq!(stage.counter("removed_no_reverse_power"), 3);
        assert_eq!(stage.counter("missing"), 0);
        assert_eq!(stage.rows_out, 5);
    }

    #[test]
    fn test_report_serializes() {
        let mut report = RunReport::default();
        report.push(StageMetrics::start("capacity", 2).finish(2));
        report.finish(2, 40, ProvenanceSummary::default());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["stages"][0]["stage"], "capacity");
        assert_eq!(json["output_columns"], 40);
        assert!(json["stages"][0].get("started").is_none());
        assert!(report.to_string().contains("capacity"));
    }
}
