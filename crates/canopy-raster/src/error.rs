//! Error types for the raster crate.

use thiserror::Error;

/// Errors that can occur when working with rasters.
#[derive(Debug, Error)]
pub enum RasterError {
    /// I/O error reading or writing a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF encoding or decoding error.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Invalid GeoTIFF - missing or malformed georeferencing tags.
    #[error("Invalid GeoTIFF: {0}")]
    InvalidGeoTiff(String),

    /// Unsupported data type in the TIFF file.
    #[error("Unsupported TIFF data type: {0}")]
    UnsupportedDataType(String),

    /// Cell buffer does not match the grid dimensions.
    #[error("Buffer of {len} cells does not fit a {width}x{height} grid")]
    ShapeMismatch {
        /// Number of cells supplied.
        len: usize,
        /// Grid width.
        width: usize,
        /// Grid height.
        height: usize,
    },

    /// Two rasters that must be co-registered are not.
    #[error("Rasters are not co-registered: {0}")]
    GridMismatch(String),

    /// A grid with no cells or a non-positive cell size.
    #[error("Invalid grid: {0}")]
    InvalidGrid(String),
}
