//! The in-process raster engine working on GeoTIFF files.

use approx::assert_relative_eq;
use canopy_common::{CancelToken, Interrupted, TaskContext, CHM_NODATA, ELEVATION_NODATA};
use canopy_raster::{geotiff, GridSpec, Raster};
use canopy_terrain::{NativeRasterEngine, RasterEngine, TerrainError, TerrainKind};
use std::path::{Path, PathBuf};

fn grid_7x6() -> GridSpec {
    GridSpec {
        min_x: 400_000.0,
        min_y: 5_000_000.0,
        width: 7,
        height: 6,
        res_x: 1.0,
        res_y: 1.0,
    }
}

fn write(dir: &Path, name: &str, raster: &Raster) -> PathBuf {
    let path = dir.join(name);
    geotiff::write(&path, raster).unwrap();
    path
}

fn surfaces() -> (Raster, Raster) {
    let g = grid_7x6();
    let dem_data: Vec<f32> = (0..g.len()).map(|i| 200.0 + (i % g.width) as f32 * 0.5).collect();
    let mut dem = Raster::from_vec(g, dem_data, Some(ELEVATION_NODATA))
        .unwrap()
        .with_crs("EPSG:32610");
    let mut dsm = dem.clone();
    dsm.set(2, 3, dem.get(2, 3) + 12.0);
    dsm.set(0, 0, ELEVATION_NODATA);
    dem.set(5, 6, ELEVATION_NODATA);
    (dsm, dem)
}

#[test]
fn test_canopy_height_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let (dsm, dem) = surfaces();
    let dsm_path = write(dir.path(), "dsm.tif", &dsm);
    let dem_path = write(dir.path(), "dem.tif", &dem);
    let out = dir.path().join("chm.tif");

    let engine = NativeRasterEngine::new();
    let chm = engine
        .difference(&dsm_path, &dem_path, CHM_NODATA, &out, &TaskContext::unbounded())
        .unwrap();

    let back = geotiff::read(&out).unwrap();
    assert!(back.grid().same_as(chm.grid()));
    assert_eq!(back.data(), chm.data());
    assert_eq!(back.nodata(), Some(0.0));
    assert_relative_eq!(back.get(2, 3), 12.0);
    assert_eq!(back.get(0, 0), 0.0);
    assert_eq!(back.get(5, 6), 0.0);
    assert_eq!(back.get(1, 1), 0.0);
    assert_eq!(back.crs(), Some("EPSG:32610"));
}

#[test]
fn test_aspect_and_slope_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let (_, dem) = surfaces();
    let dem_path = write(dir.path(), "dem.tif", &dem);
    let engine = NativeRasterEngine::new();
    let ctx = TaskContext::unbounded();

    let aspect = engine
        .terrain(&dem_path, TerrainKind::Aspect, true, &dir.path().join("aspect.tif"), &ctx)
        .unwrap();
    let slope = engine
        .terrain(&dem_path, TerrainKind::Slope, true, &dir.path().join("slope.tif"), &ctx)
        .unwrap();

    assert!(aspect.grid().same_as(dem.grid()));
    assert!(slope.grid().same_as(dem.grid()));
    assert_eq!(slope.get(5, 6), ELEVATION_NODATA);
    // Interior of the eastward ramp faces west.
    assert_relative_eq!(aspect.get(2, 2), 270.0, epsilon = 1e-4);
    assert_relative_eq!(
        slope.get(2, 2),
        0.5f32.atan().to_degrees(),
        epsilon = 1e-4
    );
}

#[test]
fn test_cancelled_context_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (_, dem) = surfaces();
    let dem_path = write(dir.path(), "dem.tif", &dem);

    let token = CancelToken::new();
    token.cancel();
    let ctx = TaskContext::new(token, None);
    let err = NativeRasterEngine::new()
        .terrain(&dem_path, TerrainKind::Slope, true, &dir.path().join("s.tif"), &ctx)
        .unwrap_err();
    assert_eq!(err.interruption(), Some(Interrupted::Cancelled));
}

#[test]
fn test_missing_input_is_a_raster_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = NativeRasterEngine::new()
        .terrain(
            &dir.path().join("absent.tif"),
            TerrainKind::Aspect,
            true,
            &dir.path().join("aspect.tif"),
            &TaskContext::unbounded(),
        )
        .unwrap_err();
    assert!(matches!(err, TerrainError::Raster(_)));
}
