use crate::error::{PipelineError, Result};
use crate::models::SourceTableKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// De-rating applied to spare and firm capacity.
pub const SPARE_MULTIPLIER: f64 = 0.96;

/// Score thresholds for the fuzzy matchers. These were tuned by hand against
/// live data and carry no validation against a labelled set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingThresholds {
    /// A site-name match must score above this to be accepted.
    pub site_name_min_score: f64,
    /// Raw similarity ratio required by the last-resort site-name strategy.
    pub site_name_fuzzy_ratio: f64,
    /// Minimum similarity ratio for supply-point names.
    pub gsp_similarity: f64,
}

impl Default for MatchingThresholds {
    fn default() -> Self {
        Self {
            site_name_min_score: 0.1,
            site_name_fuzzy_ratio: 0.8,
            gsp_similarity: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding one `<table>.csv` per source table.
    pub source_dir: PathBuf,
    /// Previously produced output used when the source is unavailable.
    pub snapshot_path: PathBuf,
    pub output_path: PathBuf,
    /// Where the provenance and metrics JSON artifacts are written.
    pub artifacts_dir: PathBuf,
    pub spare_multiplier: f64,
    /// Deviation percentage above which a site is flagged.
    pub deviation_threshold_pct: f64,
    pub matching: MatchingThresholds,
    /// Rewrite the output file after every major stage.
    pub checkpoint_stages: bool,
    /// Tables that may be absent; their stage then only applies fills.
    pub optional_tables: Vec<SourceTableKind>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("data/sources"),
            snapshot_path: PathBuf::from("data/transformed_transformer_data.csv"),
            output_path: PathBuf::from("transformed_transformer_data.csv"),
            artifacts_dir: PathBuf::from("."),
            spare_multiplier: SPARE_MULTIPLIER,
            deviation_threshold_pct: 5.0,
            matching: MatchingThresholds::default(),
            checkpoint_stages: true,
            optional_tables: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.spare_multiplier > 0.0 && self.spare_multiplier <= 1.0) {
            return Err(PipelineError::Config(format!(
                "spare_multiplier must be in (0, 1], got {}",
                self.spare_multiplier
            )));
        }
        if self.deviation_threshold_pct < 0.0 {
            return Err(PipelineError::Config(format!(
                "deviation_threshold_pct must not be negative, got {}",
                self.deviation_threshold_pct
            )));
        }
        Ok(())
    }

    pub fn is_optional(&self, kind: SourceTableKind) -> bool {
        self.optional_tables.contains(&kind)
    }
}
