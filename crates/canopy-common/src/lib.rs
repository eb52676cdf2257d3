//! # canopy-common
//!
//! Types shared by every canopy crate:
//!
//! - [`Product`] - the six raster products derived from a lidar tile, with
//!   their scratch subdirectories and output key layout
//! - [`CancelToken`] - batch-wide cooperative cancellation
//! - [`TaskContext`] - the cancellation token and deadline of one task
//! - [`ToolCommand`] - external tool invocation that checks exit status and
//!   expected outputs, and kills the child on deadline or cancellation

mod cancel;
mod context;
mod error;
mod product;
mod tool;

pub use cancel::CancelToken;
pub use context::{Interrupted, TaskContext};
pub use error::ToolError;
pub use product::{Product, RAW_SUBDIR};
pub use tool::{ToolCommand, ToolOutput};

/// Nodata sentinel for DSM, DEM, aspect and slope rasters.
pub const ELEVATION_NODATA: f32 = -9999.0;

/// Nodata sentinel for the canopy height model.
///
/// Differs from [`ELEVATION_NODATA`]: invalid CHM cells read as zero height.
pub const CHM_NODATA: f32 = 0.0;
