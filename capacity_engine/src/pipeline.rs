//! Stage-by-stage orchestration of one run.

use crate::capacity::CapacityCalculator;
use crate::config::PipelineConfig;
use crate::data_loader::{load_all, restore_snapshot, LoadedTables, TableSource};
use crate::ecr::consolidate_supply_points;
use crate::error::{PipelineError, Result};
use crate::filter::apply_filters;
use crate::integration::{MergeEngine, SourceIntegration};
use crate::metrics::{RunReport, StageMetrics};
use crate::models::{columns, Record, Table};
use crate::normalizer::OutputNormalizer;
use crate::provenance::ColumnProvenance;
use crate::sources::{self, EcrTier};
use crate::spatial;
use crate::totals::{apply_deviation, apply_headroom, apply_totals};
use crate::writer::write_table;
use std::path::PathBuf;

/// State carried from stage to stage besides the rows themselves.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    pub provenance: ColumnProvenance,
    pub report: RunReport,
}

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Completed(RunReport),
    /// The source was unreachable and the snapshot was copied to this path.
    RestoredSnapshot(PathBuf),
}

pub struct Pipeline<S: TableSource> {
    source: S,
    config: PipelineConfig,
}

impl<S: TableSource> Pipeline<S> {
    pub fn new(source: S, config: PipelineConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage, write the output and the JSON artifacts. Falls back
    /// to the snapshot when the source cannot be reached.
    pub fn run(&self) -> Result<PipelineOutcome> {
        if !self.source.is_available() {
            log::warn!("source {} unavailable", self.config.source_dir.display());
            restore_snapshot(&self.config.snapshot_path, &self.config.output_path)?;
            return Ok(PipelineOutcome::RestoredSnapshot(self.config.output_path.clone()));
        }

        let mut ctx = PipelineContext::default();
        let table = self.compute(&mut ctx)?;

        write_table(&table, &self.config.output_path)?;
        log::info!(
            "wrote {} rows x {} columns to {}",
            table.height(),
            table.width(),
            self.config.output_path.display()
        );

        ctx.provenance.write_artifacts(&self.config.artifacts_dir)?;
        ctx.report
            .finish(table.height(), table.width(), ctx.provenance.summary());
        ctx.report.write_json(&self.config.artifacts_dir)?;

        Ok(PipelineOutcome::Completed(ctx.report))
    }

    /// All stages up to the normalised output table, without the final write.
    pub fn compute(&self, ctx: &mut PipelineContext) -> Result<Table> {
        if !self.source.is_available() {
            return Err(PipelineError::SourceUnavailable(self.config.source_dir.clone()));
        }

        let mut loaded = load_all(&self.source, &self.config, &mut ctx.provenance)?;
        let sites = loaded.take_sites();
        log::info!("processing {} sites", sites.len());

        let mut metrics = StageMetrics::start("capacity", sites.len());
        let calculator = CapacityCalculator::new(self.config.spare_multiplier);
        let records = calculator.run(&sites, &mut ctx.provenance);
        metrics.set(
            "sites_with_generation_capacity",
            records
                .iter()
                .filter(|r| r.number_or_zero(columns::GENERATION_CAPACITY) > 0.0)
                .count(),
        );
        ctx.report.push(metrics.finish(records.len()));
        self.checkpoint("capacity", &records)?;

        let mut metrics = StageMetrics::start("filter", records.len());
        let (mut records, filtered) = apply_filters(records);
        filtered.record(&mut metrics);
        ctx.report.push(metrics.finish(records.len()));
        self.checkpoint("filter", &records)?;

        let engine = MergeEngine::new(&self.config.matching);
        records = self.integrate(&engine, records, &sources::ecr(EcrTier::AtLeast1Mva), &loaded, ctx)?;
        records = self.integrate(&engine, records, &sources::ecr(EcrTier::Under1Mva), &loaded, ctx)?;
        self.checkpoint("ecr", &records)?;

        self.row_stage("totals", &mut records, ctx, |rows, prov, _| {
            apply_totals(rows, prov);
        });
        self.row_stage("supply_point_consolidation", &mut records, ctx, |rows, prov, _| {
            consolidate_supply_points(rows, prov);
        });
        self.row_stage("headroom", &mut records, ctx, |rows, prov, _| {
            apply_headroom(rows, prov);
        });
        self.row_stage("spatial_format", &mut records, ctx, |rows, _, metrics| {
            metrics.set("formatted", spatial::apply(rows, columns::SPATIAL_COORDINATES));
        });

        records = self.integrate(&engine, records, &sources::installed_capacity(), &loaded, ctx)?;
        let threshold = self.config.deviation_threshold_pct;
        self.row_stage("deviation", &mut records, ctx, |rows, prov, metrics| {
            metrics.set("flagged", apply_deviation(rows, threshold, prov));
        });

        records = self.integrate(&engine, records, &sources::dnoa(), &loaded, ctx)?;
        self.checkpoint("dnoa", &records)?;
        records = self.integrate(&engine, records, &sources::infrastructure_projects(), &loaded, ctx)?;
        self.checkpoint("infrastructure_projects", &records)?;
        records = self.integrate(&engine, records, &sources::gsp_overview(), &loaded, ctx)?;

        let mut metrics = StageMetrics::start("normalize", records.len());
        let table = OutputNormalizer::default().normalize(&records, &mut ctx.provenance);
        metrics.set("output_columns", table.width());
        ctx.report.push(metrics.finish(table.height()));

        Ok(table)
    }

    fn integrate(
        &self,
        engine: &MergeEngine<'_>,
        records: Vec<Record>,
        integration: &SourceIntegration,
        loaded: &LoadedTables,
        ctx: &mut PipelineContext,
    ) -> Result<Vec<Record>> {
        let table = loaded.get(integration.table);
        if table.is_empty() {
            log::warn!("{}: {} has no rows, applying fills only", integration.stage, table.kind);
        }
        let result = engine.integrate(records, integration, table, &mut ctx.provenance)?;
        ctx.report.push(result.metrics);
        Ok(result.records)
    }

    /// A stage that rewrites rows in place and never changes their count.
    fn row_stage<F>(&self, stage: &str, records: &mut [Record], ctx: &mut PipelineContext, apply: F)
    where
        F: FnOnce(&mut [Record], &mut ColumnProvenance, &mut StageMetrics),
    {
        let mut metrics = StageMetrics::start(stage, records.len());
        apply(records, &mut ctx.provenance, &mut metrics);
        ctx.report.push(metrics.finish(records.len()));
    }

    fn checkpoint(&self, stage: &str, records: &[Record]) -> Result<()> {
        if !self.config.checkpoint_stages {
            return Ok(());
        }
        write_table(&Table::from_records(records), &self.config.output_path)?;
        log::info!(
            "checkpoint after {}: {}",
            stage,
            self.config.output_path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_loader::InMemorySource;
    use crate::models::{SourceTable, SourceTableKind};
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            source_dir: dir.join("sources"),
            snapshot_path: dir.join("snapshot.csv"),
            output_path: dir.join("out.csv"),
            artifacts_dir: dir.join("artifacts"),
            checkpoint_stages: false,
            optional_tables: SourceTableKind::ALL[1..].to_vec(),
            ..PipelineConfig::default()
        }
    }

    fn sites_only() -> InMemorySource {
        let header = [
            columns::SITE_ID,
            columns::SITE_NAME,
            columns::TRANSFORMER_COUNT,
            columns::RATING_SUMMER,
            columns::RATING_WINTER,
            columns::REVERSE_POWER,
        ];
        let rows = vec![
            Record::from_pairs(header.iter().copied().zip(["S1", "BURWELL", "1", "20", "24", "50%"])),
            Record::from_pairs(header.iter().copied().zip(["S2", "ELY", "0", "20", "24", "50%"])),
        ];
        InMemorySource::new().with_table(SourceTable::new(
            SourceTableKind::GridAndPrimarySites,
            header.iter().map(|c| c.to_string()).collect(),
            rows,
        ))
    }

    #[test]
    fn test_compute_with_only_the_site_table() {
        let dir = tempdir().unwrap();
        let pipeline = Pipeline::new(sites_only(), config_in(dir.path()));
        let mut ctx = PipelineContext::default();
        let table = pipeline.compute(&mut ctx).unwrap();

        assert_eq!(table.height(), 1);
        let generation = table.column_index("Generation Capacity").unwrap();
        assert_eq!(table.rows[0][generation].to_number(), Some(10.0));
        let headroom = table.column_index("Generation Headroom Mw").unwrap();
        assert_eq!(table.rows[0][headroom].to_number(), Some(10.0));
        let key = table.column_index("Site Functional Location").unwrap();
        assert_eq!(table.rows[0][key], crate::models::Value::from("S1"));

        assert_eq!(ctx.report.stage("filter").unwrap().counter("removed_no_transformers"), 1);
        assert_eq!(ctx.report.stages.last().unwrap().stage, "normalize");
        assert!(ctx.provenance.calculated(columns::GENERATION_HEADROOM).is_some());
    }

    #[test]
    fn test_unavailable_source_restores_snapshot() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(&config.snapshot_path, "Site Name\nBURWELL\n").unwrap();

        let pipeline = Pipeline::new(InMemorySource::unavailable(), config.clone());
        match pipeline.run().unwrap() {
            PipelineOutcome::RestoredSnapshot(path) => assert_eq!(path, config.output_path),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(
            std::fs::read_to_string(&config.output_path).unwrap(),
            "Site Name\nBURWELL\n"
        );

        let mut ctx = PipelineContext::default();
        assert!(matches!(
            pipeline.compute(&mut ctx),
            Err(PipelineError::SourceUnavailable(_))
        ));
    }
}
