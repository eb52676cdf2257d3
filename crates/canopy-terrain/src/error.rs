//! Error types for raster derivatives.

use canopy_common::{Interrupted, ToolError};
use canopy_raster::RasterError;
use thiserror::Error;

/// Errors that can occur while computing a derivative raster.
#[derive(Debug, Error)]
pub enum TerrainError {
    /// Reading, writing or combining rasters failed.
    #[error("raster error: {0}")]
    Raster(#[from] RasterError),

    /// The external raster tool failed.
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    /// IO error preparing an output location.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Moving-window size must be odd and at least 1.
    #[error("window size {0} must be odd and at least 1")]
    InvalidWindow(usize),

    /// Tool output could not be used.
    #[error("unexpected tool output: {0}")]
    UnexpectedOutput(String),

    /// The task was cancelled or ran out of time.
    #[error("derivative interrupted: {0}")]
    Interrupted(#[from] Interrupted),
}

impl TerrainError {
    /// Whether this error came from cancellation or a deadline.
    pub fn interruption(&self) -> Option<Interrupted> {
        match self {
            TerrainError::Interrupted(why) => Some(*why),
            TerrainError::Tool(ToolError::Cancelled { .. }) => Some(Interrupted::Cancelled),
            TerrainError::Tool(ToolError::DeadlineExceeded { .. }) => {
                Some(Interrupted::DeadlineExceeded)
            }
            _ => None,
        }
    }
}
