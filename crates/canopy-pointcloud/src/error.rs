//! Error types for point-cloud pipelines.

use canopy_common::{Interrupted, ToolError};
use canopy_raster::RasterError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building or executing a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// IO error reading or writing a file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The LAS/LAZ reader rejected the input.
    #[error("LAS error: {0}")]
    Las(#[from] las::Error),

    /// Writing or validating the output raster failed.
    #[error("raster error: {0}")]
    Raster(#[from] RasterError),

    /// The external pipeline tool failed.
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    /// Encoding the stage list or decoding tool metadata failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stage parameter is out of range.
    #[error("invalid parameter for {stage}: {reason}")]
    InvalidParameter { stage: &'static str, reason: String },

    /// Stages are missing or out of order.
    #[error("invalid pipeline '{pipeline}': {reason}")]
    InvalidPipeline { pipeline: String, reason: String },

    /// The engine cannot run a stage as configured.
    #[error("unsupported stage {stage}: {reason}")]
    UnsupportedStage { stage: &'static str, reason: String },

    /// Every point was removed before rasterization.
    #[error("no points left after {stage} in pipeline '{pipeline}'")]
    EmptyPointSet {
        pipeline: String,
        stage: &'static str,
    },

    /// The written raster has no valid cells.
    #[error("raster {} has no valid cells", path.display())]
    EmptyRaster { path: PathBuf },

    /// Tool output could not be interpreted.
    #[error("unexpected tool output: {0}")]
    UnexpectedOutput(String),

    /// The task was cancelled or ran out of time.
    #[error("pipeline interrupted: {0}")]
    Interrupted(#[from] Interrupted),
}

impl PipelineError {
    /// Whether this error came from cancellation or a deadline rather than
    /// from the data or the tools.
    pub fn interruption(&self) -> Option<Interrupted> {
        match self {
            PipelineError::Interrupted(why) => Some(*why),
            PipelineError::Tool(ToolError::Cancelled { .. }) => Some(Interrupted::Cancelled),
            PipelineError::Tool(ToolError::DeadlineExceeded { .. }) => {
                Some(Interrupted::DeadlineExceeded)
            }
            _ => None,
        }
    }
}
