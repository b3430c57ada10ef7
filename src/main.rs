use anyhow::{Context, Result};
use capacity_engine::{
    CsvDirectorySource, Pipeline, PipelineConfig, PipelineOutcome, SourceTableKind,
};
use clap::Parser;
use log::info;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "site_capacity_processor")]
#[command(about = "Build the per-site transformer capacity table from the network source tables")]
struct Args {
    /// JSON configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding one <table>.csv per source table
    #[arg(long, env = "SITE_CAPACITY_SOURCE_DIR")]
    source_dir: Option<PathBuf>,

    /// Previous output copied into place when the source directory is missing
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Output CSV path
    #[arg(short, long, env = "SITE_CAPACITY_OUTPUT")]
    output: Option<PathBuf>,

    /// Directory for the provenance and metrics JSON files
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,

    /// Deviation percentage above which a site is flagged
    #[arg(long)]
    deviation_threshold: Option<f64>,

    /// Only write the output once, at the end
    #[arg(long)]
    no_checkpoints: bool,

    /// Source table that may be absent (repeatable)
    #[arg(long = "optional-table", value_name = "TABLE")]
    optional_tables: Vec<SourceTableKind>,
}

impl Args {
    fn into_config(self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(dir) = self.source_dir {
            config.source_dir = dir;
        }
        if let Some(path) = self.snapshot {
            config.snapshot_path = path;
        }
        if let Some(path) = self.output {
            config.output_path = path;
        }
        if let Some(dir) = self.artifacts_dir {
            config.artifacts_dir = dir;
        }
        if let Some(pct) = self.deviation_threshold {
            config.deviation_threshold_pct = pct;
        }
        if self.no_checkpoints {
            config.checkpoint_stages = false;
        }
        for table in self.optional_tables {
            if !config.optional_tables.contains(&table) {
                config.optional_tables.push(table);
            }
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let config = Args::parse().into_config()?;

    info!("Starting site capacity pipeline");
    info!("Source directory: {}", config.source_dir.display());

    let source = CsvDirectorySource::new(&config.source_dir);
    let output = config.output_path.clone();
    let pipeline = Pipeline::new(source, config);

    match pipeline.run().context("site capacity pipeline failed")? {
        PipelineOutcome::Completed(report) => {
            println!("{}", report);
            println!("Output written to {}", output.display());
        }
        PipelineOutcome::RestoredSnapshot(path) => {
            println!("Source unavailable, snapshot restored to {}", path.display());
        }
    }

    Ok(())
}
