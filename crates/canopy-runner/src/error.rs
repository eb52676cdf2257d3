//! Error types for batch configuration, tile tasks and batches.

use canopy_common::{Interrupted, Product};
use canopy_pointcloud::PipelineError;
use canopy_raster::RasterError;
use canopy_store::StoreError;
use canopy_terrain::TerrainError;
use thiserror::Error;

/// Invalid or unreadable batch configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Failure to bring a tile into its scratch tree.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("fetching {key} failed: {source}")]
    Fetch {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("object {0} is empty")]
    EmptyObject(String),

    #[error("scratch directory error: {0}")]
    Scratch(#[from] std::io::Error),
}

/// Why a tile task did not complete.
///
/// Everything except [`TaskError::PublishFailure`] stops the task. Publish
/// failures are recorded per product and the task goes on.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("intake failed: {0}")]
    IntakeFailure(#[from] IntakeError),

    #[error("{product} pipeline failed: {source}")]
    PipelineFailure {
        product: Product,
        #[source]
        source: PipelineError,
    },

    #[error("{product} computation failed: {source}")]
    DerivativeComputeFailure {
        product: Product,
        #[source]
        source: DerivativeError,
    },

    #[error("publishing {product} to {key} failed: {reason}")]
    PublishFailure {
        product: Product,
        key: String,
        reason: String,
    },

    #[error("task cancelled")]
    Cancelled,

    #[error("task timed out")]
    TimedOut,

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("unreadable task result: {0}")]
    MalformedResult(String),
}

/// Errors from the derivative steps: engine calls or the in-process FCC.
#[derive(Debug, Error)]
pub enum DerivativeError {
    #[error(transparent)]
    Terrain(#[from] TerrainError),

    #[error(transparent)]
    Raster(#[from] RasterError),
}

impl From<Interrupted> for TaskError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::Cancelled => TaskError::Cancelled,
            Interrupted::DeadlineExceeded => TaskError::TimedOut,
        }
    }
}

impl TaskError {
    /// Wrap a pipeline error, folding interruptions into
    /// [`TaskError::Cancelled`] or [`TaskError::TimedOut`].
    pub fn pipeline(product: Product, source: PipelineError) -> Self {
        match source.interruption() {
            Some(interrupted) => interrupted.into(),
            None => TaskError::PipelineFailure { product, source },
        }
    }

    /// Wrap a derivative error, folding interruptions like [`TaskError::pipeline`].
    pub fn derivative(product: Product, source: impl Into<DerivativeError>) -> Self {
        let source = source.into();
        let interruption = match &source {
            DerivativeError::Terrain(e) => e.interruption(),
            DerivativeError::Raster(_) => None,
        };
        match interruption {
            Some(interrupted) => interrupted.into(),
            None => TaskError::DerivativeComputeFailure { product, source },
        }
    }

    /// Short machine-readable kind, used as a metric label and in manifests.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::IntakeFailure(_) => "intake",
            TaskError::PipelineFailure { .. } => "pipeline",
            TaskError::DerivativeComputeFailure { .. } => "derivative",
            TaskError::PublishFailure { .. } => "publish",
            TaskError::Cancelled => "cancelled",
            TaskError::TimedOut => "timed_out",
            TaskError::Panicked(_) => "panicked",
            TaskError::MalformedResult(_) => "malformed_result",
        }
    }
}

/// Batch-level failures that stop a run before or after dispatch.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("tiles {first} and {second} share the stem {stem}")]
    DuplicateStem {
        stem: String,
        first: String,
        second: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("signal handler error: {0}")]
    Signal(#[from] ctrlc::Error),
}
