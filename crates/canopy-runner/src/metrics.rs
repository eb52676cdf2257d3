//! Metric declarations for batch runs.
//!
//! Metrics are declared as [`Metric`] constants so names and units live in
//! one place. Call [`describe_metrics`] once at startup, after
//! installing a recorder; without a recorder every update is a no-op.
//!
//! ```rust
//! use canopy_runner::metrics::{metric_defs, MetricKind};
//!
//! assert_eq!(metric_defs::TILES_PROCESSED.kind, MetricKind::Counter);
//! metrics::counter!(metric_defs::TILES_PROCESSED.name, "status" => "complete").increment(1);
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// Name, kind and unit of one batch metric.
#[derive(Debug, Clone, Copy)]
pub struct Metric {
    pub name: &'static str,
    pub kind: MetricKind,
    pub unit: Unit,
    pub description: &'static str,
}

impl Metric {
    const fn counter(name: &'static str, unit: Unit, description: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            unit,
            description,
        }
    }

    /// Register the description with the installed recorder.
    pub fn describe(&self) {
        let Self {
            name,
            unit,
            description,
            ..
        } = *self;
        match self.kind {
            MetricKind::Counter => describe_counter!(name, unit, description),
            MetricKind::Gauge => describe_gauge!(name, unit, description),
            MetricKind::Histogram => describe_histogram!(name, unit, description),
        }
    }
}

/// Every metric a batch records. Label keys are noted per metric.
pub mod metric_defs {
    use super::{Metric, MetricKind, Unit};

    /// Labelled by `status`: complete, partial or failed.
    pub const TILES_PROCESSED: Metric =
        Metric::counter("canopy.tiles.processed", Unit::Count, "Tiles that reached a final state");

    /// Labelled by `kind`, see `TaskError::kind`.
    pub const TILES_FAILED: Metric = Metric::counter("canopy.tiles.failed", Unit::Count, "Tiles that failed");

    /// Labelled by `product`.
    pub const ARTIFACTS_PUBLISHED: Metric = Metric::counter(
        "canopy.artifacts.published",
        Unit::Count,
        "Artifacts uploaded to the output store",
    );

    pub const ARTIFACT_BYTES: Metric =
        Metric::counter("canopy.artifacts.bytes", Unit::Bytes, "Bytes uploaded to the output store");

    /// Labelled by `product`.
    pub const ARTIFACTS_MISSING: Metric = Metric::counter(
        "canopy.artifacts.missing",
        Unit::Count,
        "Artifacts that were not produced or failed to upload",
    );

    pub const TASK_DURATION: Metric = Metric {
        name: "canopy.task.duration",
        kind: MetricKind::Histogram,
        unit: Unit::Seconds,
        description: "Wall-clock time of one tile task",
    };

    pub const TASKS_RUNNING: Metric = Metric {
        name: "canopy.tasks.running",
        kind: MetricKind::Gauge,
        unit: Unit::Count,
        description: "Tile tasks currently running",
    };

    pub const STORE_RETRIES: Metric =
        Metric::counter("canopy.store.retries", Unit::Count, "Store calls retried after a transient error");

    pub const ALL: [Metric; 8] = [
        TILES_PROCESSED,
        TILES_FAILED,
        ARTIFACTS_PUBLISHED,
        ARTIFACT_BYTES,
        ARTIFACTS_MISSING,
        TASK_DURATION,
        TASKS_RUNNING,
        STORE_RETRIES,
    ];
}

/// Register descriptions for every metric in [`metric_defs::ALL`].
pub fn describe_metrics() {
    for metric in &metric_defs::ALL {
        metric.describe();
    }
}
