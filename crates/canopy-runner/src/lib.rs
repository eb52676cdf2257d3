//! # canopy-runner
//!
//! Batch processing of lidar tiles into elevation and vegetation rasters.
//!
//! ## Overview
//!
//! A batch lists every `.las`/`.laz` object under an input prefix and runs
//! one independent [`TileTask`] per tile on a [`WorkerPool`]:
//!
//! ```text
//! Orchestrator ──┬── TileTask(t1): intake → DSM, DEM → CHM, aspect, slope, FCC → publish
//!                ├── TileTask(t2): ...
//!                └── TileTask(tn): ...
//!                        │
//!                  gather (barrier) → BatchReport
//! ```
//!
//! Tasks share nothing but the read-only [`BatchConfig`], the stores and the
//! engines. Each writes into its own scratch tree and publishes under keys
//! derived from its tile stem, so no two tasks touch the same file or key.
//! A task hands back a JSON [`Manifest`]; the orchestrator aggregates them
//! into a [`BatchReport`] ordered by stem.
//!
//! ## Failures
//!
//! Failures are isolated per tile. Intake and pipeline errors, timeouts,
//! cancellation and panics mark the tile [`Failed`](TileStatus::Failed).
//! A derivative that could not be computed, or an artifact that could not
//! be uploaded, only costs that product: the tile is
//! [`Partial`](TileStatus::Partial) as long as something was published.
//!
//! ## Example
//!
//! ```no_run
//! use canopy_runner::{BatchConfig, Orchestrator, TileTask};
//! use std::sync::Arc;
//!
//! let config = Arc::new(BatchConfig::load("batch.yaml")?);
//! let store = config.store.open()?;
//! let orchestrator = Orchestrator::new(TileTask::new(config, store));
//! let report = orchestrator.run()?;
//! println!("{} of {} tiles complete", report.summary.complete, report.summary.total);
//! # Ok::<(), canopy_runner::BatchError>(())
//! ```

pub mod config;
mod error;
pub mod intake;
pub mod manifest;
pub mod metrics;
pub mod orchestrator;
pub mod pool;
pub mod publish;
pub mod retry;
pub mod task;

pub use config::{BatchConfig, FccSource, StoreConfig};
pub use error::{BatchError, ConfigError, DerivativeError, IntakeError, TaskError};
pub use manifest::{ArtifactEntry, Manifest, MissingArtifact, TileStatus};
pub use orchestrator::{BatchReport, BatchSummary, Orchestrator};
pub use pool::{BatchHandle, TaskOutcome, WorkerPool};
pub use retry::RetryPolicy;
pub use task::{TileRef, TileTask};
