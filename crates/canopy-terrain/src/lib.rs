//! # canopy-terrain
//!
//! Rasters derived from a tile's elevation surfaces.
//!
//! ## Overview
//!
//! - [`algebra`] - canopy height (`DSM - DEM`, zero where either is missing)
//! - [`derivative`] - aspect and slope from a Horn 3x3 gradient
//! - [`fraction`] - fractional canopy cover from a binary mask and a
//!   reflected moving window
//!
//! Canopy height, aspect and slope run behind the [`RasterEngine`] trait,
//! either in-process ([`NativeRasterEngine`]) or through `gdal_calc.py` and
//! `gdaldem` ([`GdalEngine`]). Every derivative keeps the grid, CRS and
//! shape of its source.
//!
//! ## Example
//!
//! ```
//! use canopy_raster::{GridSpec, Raster};
//! use canopy_terrain::fraction::{binarize, canopy_fraction};
//!
//! let grid = GridSpec::from_bounds(0.0, 0.0, 4.0, 4.0, 1.0);
//! let mut dem = Raster::filled(grid, 1.0, Some(-9999.0));
//! dem.set(2, 2, 10.0);
//!
//! let mask = binarize(&dem, 2.0);
//! assert_eq!(binarize(&mask, 2.0), mask);
//!
//! let fcc = canopy_fraction(&dem, 2.0, 3)?;
//! assert!((fcc.get(2, 2) - 100.0 / 9.0).abs() < 1e-4);
//! # Ok::<(), canopy_terrain::TerrainError>(())
//! ```

pub mod algebra;
pub mod derivative;
mod engine;
mod error;
pub mod fraction;
mod gdal;

pub use derivative::TerrainKind;
pub use engine::{NativeRasterEngine, RasterEngine};
pub use error::TerrainError;
pub use fraction::{CoverMask, DEFAULT_WINDOW};
pub use gdal::GdalEngine;

/// Result type for derivative operations.
pub type Result<T> = std::result::Result<T, TerrainError>;
