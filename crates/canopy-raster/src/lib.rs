//! # canopy-raster
//!
//! Single-band georeferenced rasters and their GeoTIFF encoding.
//!
//! ## Overview
//!
//! A [`Raster`] is a north-up grid of `f32` cells described by a
//! [`GridSpec`] (lower-left origin, size in cells, cell size), an optional
//! CRS string such as `EPSG:2154`, and an optional nodata sentinel.
//!
//! All rasters derived from one lidar tile share a single `GridSpec`, which
//! is what makes cell-wise algebra between them valid.
//!
//! GeoTIFF files are read and written with the `tiff` crate using the
//! standard georeferencing tags:
//! - `ModelPixelScaleTag` (33550) and `ModelTiepointTag` (33922)
//! - `GeoKeyDirectoryTag` (34735) for the EPSG code
//! - `GDAL_NODATA` (42113) for the nodata sentinel
//!
//! ## Example
//!
//! ```no_run
//! use canopy_raster::{geotiff, GridSpec, Raster};
//!
//! let grid = GridSpec::from_bounds(500_000.0, 4_000_000.0, 500_010.0, 4_000_010.0, 1.0);
//! let raster = Raster::filled(grid, -9999.0, Some(-9999.0)).with_crs("EPSG:32611");
//! geotiff::write("dsm.tif", &raster)?;
//!
//! let back = geotiff::read("dsm.tif")?;
//! assert!(back.grid().same_as(raster.grid()));
//! # Ok::<(), canopy_raster::RasterError>(())
//! ```

mod error;
pub mod geotiff;
mod grid;
mod raster;

pub use error::RasterError;
pub use grid::GridSpec;
pub use raster::Raster;

/// Result type for raster operations.
pub type Result<T> = std::result::Result<T, RasterError>;
