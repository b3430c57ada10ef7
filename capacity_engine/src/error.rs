use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no data source available at {0}")]
    SourceUnavailable(PathBuf),

    #[error("no data source available and no snapshot file at {0}")]
    SnapshotMissing(PathBuf),

    #[error("required table `{table}` could not be fetched: {reason}")]
    MissingTable { table: &'static str, reason: String },

    #[error("table `{table}` has no column `{column}`")]
    MissingColumn { table: &'static str, column: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
