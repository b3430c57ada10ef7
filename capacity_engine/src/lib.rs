pub mod capacity;
pub mod config;
pub mod data_loader;
pub mod ecr;
pub mod error;
pub mod filter;
pub mod integration;
pub mod matching;
pub mod metrics;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod provenance;
pub mod sources;
pub mod spatial;
pub mod totals;
pub mod writer;

pub use capacity::CapacityCalculator;
pub use config::{MatchingThresholds, PipelineConfig};
pub use data_loader::{CsvDirectorySource, InMemorySource, TableSource};
pub use error::{PipelineError, Result};
pub use integration::{MergeEngine, SourceIntegration};
pub use metrics::{RunReport, StageMetrics};
pub use models::{Record, SourceTable, SourceTableKind, Table, Value};
pub use normalizer::OutputNormalizer;
pub use pipeline::{Pipeline, PipelineContext, PipelineOutcome};
pub use provenance::ColumnProvenance;
