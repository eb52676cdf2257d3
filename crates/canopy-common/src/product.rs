//! The fixed catalogue of per-tile raster products.

use serde::{Deserialize, Serialize};

/// Scratch subdirectory holding the raw point-cloud bytes of a tile.
pub const RAW_SUBDIR: &str = "raw";

/// A raster product derived from one lidar tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Product {
    /// Digital surface model (top of canopy).
    Dsm,
    /// Digital elevation model (bare earth).
    Dem,
    /// Canopy height model, DSM minus DEM.
    Chm,
    /// Compass direction of steepest descent.
    Aspect,
    /// Steepest-descent magnitude.
    Slope,
    /// Fractional canopy cover.
    Fcc,
}

impl Product {
    /// Every product, in pipeline order.
    pub const ALL: [Product; 6] = [
        Product::Dsm,
        Product::Dem,
        Product::Chm,
        Product::Aspect,
        Product::Slope,
        Product::Fcc,
    ];

    /// Name of the product's subdirectory, both in scratch and in the output store.
    pub const fn subdir(&self) -> &'static str {
        match self {
            Product::Dsm => "dsm",
            Product::Dem => "dem",
            Product::Chm => "chm",
            Product::Aspect => "aspect",
            Product::Slope => "slope",
            Product::Fcc => "fcc",
        }
    }

    /// File extension of the product artifact.
    pub const fn extension(&self) -> &'static str {
        "tif"
    }

    /// Artifact file name for a tile stem, e.g. `tile_01.tif`.
    pub fn file_name(&self, stem: &str) -> String {
        format!("{}.{}", stem, self.extension())
    }

    /// Relative artifact path for a tile stem, e.g. `dsm/tile_01.tif`.
    ///
    /// This is both the location under a task's scratch root and the
    /// output key (before any output prefix).
    pub fn relative_key(&self, stem: &str) -> String {
        format!("{}/{}", self.subdir(), self.file_name(stem))
    }
}

impl std::fmt::Display for Product {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.subdir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_relative_keys_are_disjoint() {
        let keys: HashSet<String> = Product::ALL
            .iter()
            .flat_map(|p| ["a", "b"].map(|stem| p.relative_key(stem)))
            .collect();
        assert_eq!(keys.len(), 12);
        assert!(keys.contains("fcc/b.tif"));
    }

    #[test]
    fn test_display_matches_subdir() {
        for product in Product::ALL {
            assert_eq!(product.to_string(), product.subdir());
        }
        assert_eq!(Product::Chm.file_name("t1"), "t1.tif");
    }
}
