use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Process(#[from] process::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid json in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write image: {0}")]
    Image(#[from] image::ImageError),

    #[error("failed to set up resampler: {0}")]
    ResamplerSetup(#[from] rubato::ResamplerConstructionError),

    #[error("failed to resample: {0}")]
    Resample(#[from] rubato::ResampleError),

    #[error("failed to format timestamp: {0}")]
    Time(#[from] time::error::Format),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
