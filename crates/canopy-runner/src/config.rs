//! Batch configuration.
//!
//! A [`BatchConfig`] is read once per run from YAML, optionally adjusted by
//! command-line overrides, validated, and then shared read-only by every
//! tile task. Every field has a default, so an empty document is a valid
//! configuration.
//!
//! ```yaml
//! input_prefix: tiles
//! output_prefix: products
//! scratch_root: /var/tmp/canopy
//! workers: 8
//! task_timeout_secs: 1800
//! retry: { attempts: 3, backoff_ms: 500 }
//! pipeline:
//!   input_crs: EPSG:2154
//!   resolution: 1.0
//!   smrf: { slope: 0.15, window: 18.0, threshold: 0.5, scalar: 1.25 }
//! engines: { pointcloud: pdal, raster: gdal }
//! fcc: { source: dem, breakpoint: 2.0, window: 3 }
//! store: { kind: fs, root: /data/lidar }
//! ```

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use canopy_pointcloud::{NativeEngine, PdalEngine, PipelineParams, PointCloudEngine};
use canopy_store::{FsStore, HttpStore, ObjectStore, StoreError};
use canopy_terrain::{GdalEngine, NativeRasterEngine, RasterEngine, DEFAULT_WINDOW};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Everything a batch run needs to know, fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Prefix listed for `.las`/`.laz` tiles.
    pub input_prefix: String,
    /// Prefix prepended to every product key.
    pub output_prefix: String,
    /// Directory holding one scratch tree per running task.
    pub scratch_root: PathBuf,
    /// Keep scratch trees after publishing, for debugging.
    pub keep_scratch: bool,
    /// Concurrent tile tasks.
    pub workers: usize,
    /// Per-task wall-clock limit; `None` waits forever.
    pub task_timeout_secs: Option<u64>,
    /// Retries for transient fetch and upload failures.
    pub retry: RetryPolicy,
    /// Elevation pipeline settings.
    pub pipeline: PipelineParams,
    pub engines: EngineConfig,
    pub derivatives: DerivativeConfig,
    pub fcc: FccConfig,
    pub store: StoreConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            input_prefix: "tiles".to_string(),
            output_prefix: String::new(),
            scratch_root: std::env::temp_dir().join("canopy"),
            keep_scratch: false,
            workers: std::thread::available_parallelism().map_or(1, |n| n.get()),
            task_timeout_secs: None,
            retry: RetryPolicy::default(),
            pipeline: PipelineParams::default(),
            engines: EngineConfig::default(),
            derivatives: DerivativeConfig::default(),
            fcc: FccConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Which point-cloud engine runs the elevation pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointCloudEngineKind {
    #[default]
    Native,
    Pdal,
}

/// Which raster engine computes CHM, aspect and slope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterEngineKind {
    #[default]
    Native,
    Gdal,
}

/// Engine selection and external tool locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pointcloud: PointCloudEngineKind,
    pub raster: RasterEngineKind,
    pub pdal_program: String,
    pub gdal_calc_program: String,
    pub gdaldem_program: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pointcloud: PointCloudEngineKind::Native,
            raster: RasterEngineKind::Native,
            pdal_program: "pdal".to_string(),
            gdal_calc_program: "gdal_calc.py".to_string(),
            gdaldem_program: "gdaldem".to_string(),
        }
    }
}

impl EngineConfig {
    /// Instantiate the configured point-cloud engine.
    pub fn point_cloud_engine(&self) -> Arc<dyn PointCloudEngine> {
        match self.pointcloud {
            PointCloudEngineKind::Native => Arc::new(NativeEngine::new()),
            PointCloudEngineKind::Pdal => Arc::new(PdalEngine::new(self.pdal_program.clone())),
        }
    }

    /// Instantiate the configured raster engine.
    pub fn raster_engine(&self) -> Arc<dyn RasterEngine> {
        match self.raster {
            RasterEngineKind::Native => Arc::new(NativeRasterEngine::new()),
            RasterEngineKind::Gdal => Arc::new(GdalEngine::new(
                self.gdal_calc_program.clone(),
                self.gdaldem_program.clone(),
            )),
        }
    }
}

/// Aspect and slope settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivativeConfig {
    /// Compute border cells instead of leaving them nodata.
    pub compute_edges: bool,
}

impl Default for DerivativeConfig {
    fn default() -> Self {
        Self { compute_edges: true }
    }
}

/// Raster thresholded for fractional canopy cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FccSource {
    /// The ground-surface model.
    #[default]
    Dem,
    /// The canopy height model.
    Chm,
}

/// Fractional canopy cover settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FccConfig {
    pub source: FccSource,
    /// Cells strictly above this value count as covered.
    pub breakpoint: f32,
    /// Odd moving-window size.
    pub window: usize,
}

impl Default for FccConfig {
    fn default() -> Self {
        Self {
            source: FccSource::Dem,
            breakpoint: 2.0,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Where tiles are read from and products written to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    /// A local directory.
    Fs { root: PathBuf },
    /// An S3-compatible endpoint URL including the bucket.
    Http {
        endpoint: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Fs {
            root: PathBuf::from("."),
        }
    }
}

impl StoreConfig {
    /// Open the configured store.
    pub fn open(&self) -> Result<Arc<dyn ObjectStore>, StoreError> {
        Ok(match self {
            StoreConfig::Fs { root } => Arc::new(FsStore::new(root)?),
            StoreConfig::Http {
                endpoint,
                timeout_secs: Some(secs),
            } => Arc::new(HttpStore::with_timeout(endpoint, Duration::from_secs(*secs))?),
            StoreConfig::Http { endpoint, .. } => Arc::new(HttpStore::new(endpoint)?),
        })
    }
}

impl BatchConfig {
    /// Load and validate a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values that would otherwise fail deep inside a task.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.fcc.window == 0 || self.fcc.window % 2 == 0 {
            return Err(ConfigError::Invalid(format!(
                "fcc.window {} must be odd and at least 1",
                self.fcc.window
            )));
        }
        if !self.fcc.breakpoint.is_finite() {
            return Err(ConfigError::Invalid("fcc.breakpoint must be finite".into()));
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Invalid("retry.attempts must be at least 1".into()));
        }
        if self.task_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("task_timeout_secs must be positive".into()));
        }
        self.pipeline
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    /// Per-task time limit.
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = BatchConfig::from_yaml("{}").unwrap();
        assert_eq!(config.input_prefix, "tiles");
        assert_eq!(config.fcc.window, 3);
        assert_eq!(config.fcc.source, FccSource::Dem);
        assert!(config.derivatives.compute_edges);
        assert_eq!(config.engines.pointcloud, PointCloudEngineKind::Native);
        assert!(config.workers >= 1);
    }

    #[test]
    fn test_parse_full_document() {
        let text = r#"
input_prefix: survey/2023
output_prefix: products
workers: 4
task_timeout_secs: 600
retry: { attempts: 5, backoff_ms: 50 }
pipeline:
  input_crs: "EPSG:2154"
  resolution: 0.5
  smrf: { slope: 0.2, window: 16.0, threshold: 0.45, scalar: 1.2 }
engines: { pointcloud: pdal, raster: gdal, gdaldem_program: /opt/gdal/bin/gdaldem }
fcc: { source: chm, breakpoint: 3.5, window: 5 }
store: { kind: http, endpoint: "http://localhost:9000/lidar" }
"#;
        let config = BatchConfig::from_yaml(text).unwrap();
        assert_eq!(config.input_prefix, "survey/2023");
        assert_eq!(config.workers, 4);
        assert_eq!(config.task_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.pipeline.input_crs.as_deref(), Some("EPSG:2154"));
        assert_eq!(config.pipeline.smrf.scalar, 1.2);
        assert_eq!(config.engines.raster, RasterEngineKind::Gdal);
        assert_eq!(config.engines.gdaldem_program, "/opt/gdal/bin/gdaldem");
        assert_eq!(config.engines.gdal_calc_program, "gdal_calc.py");
        assert_eq!(config.fcc.source, FccSource::Chm);
        assert_eq!(config.fcc.window, 5);
        assert!(matches!(config.store, StoreConfig::Http { timeout_secs: None, .. }));
    }

    #[test]
    fn test_sample_config_is_valid() {
        let config = BatchConfig::from_yaml(include_str!("../../../configs/batch.yaml")).unwrap();
        assert_eq!(config.output_prefix, "products");
        assert_eq!(config.pipeline, PipelineParams {
            input_crs: Some("EPSG:2154".to_string()),
            ..PipelineParams::default()
        });
        assert_eq!(config.fcc, FccConfig::default());
    }

    #[test]
    fn test_even_window_rejected() {
        let err = BatchConfig::from_yaml("fcc: { window: 4 }").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("fcc.window")));
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(
            BatchConfig::from_yaml("workers: 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_non_positive_resolution_rejected() {
        for resolution in ["0.0", "-1.0"] {
            let text = format!("pipeline: {{ resolution: {resolution} }}");
            assert!(matches!(
                BatchConfig::from_yaml(&text),
                Err(ConfigError::Invalid(_))
            ));
        }
    }

    #[test]
    fn test_unknown_engine_is_a_parse_error() {
        assert!(matches!(
            BatchConfig::from_yaml("engines: { raster: grass }"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.yaml");
        std::fs::write(&path, "workers: 2\nkeep_scratch: true\n").unwrap();
        let config = BatchConfig::load(&path).unwrap();
        assert_eq!(config.workers, 2);
        assert!(config.keep_scratch);
    }
}
