use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

/// Number of grid resolutions, widths `1 << 0` through `1 << 11`.
pub const DEFAULT_MAX_LEVEL: u32 = 12;

/// Packs the grid cell of `(x, y)` at `level` into one key. Negative local
/// coordinates from tile buffers floor towards negative cells.
pub fn bin_key(x: i32, y: i32, level: u32) -> u64 {
    let bx = (x >> level) as u32 as u64;
    let by = (y >> level) as u32 as u64;
    (bx << 32) | by
}

/// Per-tile scratch: accumulated weight per grid cell, per level.
#[derive(Debug, Clone)]
pub struct TileDensity {
    levels: Vec<HashMap<u64, u64>>,
    total_weight: u64,
}

impl TileDensity {
    pub fn new(max_level: u32) -> Self {
        Self {
            levels: vec![HashMap::new(); max_level as usize],
            total_weight: 0,
        }
    }

    /// Zero weights are ignored.
    pub fn add(&mut self, x: i32, y: i32, weight: u64) {
        if weight == 0 {
            return;
        }
        self.total_weight += weight;
        for (level, bins) in self.levels.iter_mut().enumerate() {
            *bins.entry(bin_key(x, y, level as u32)).or_insert(0) += weight;
        }
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Histogram of cell weights: per level, weight K -> number of cells.
    pub fn summarize(&self) -> DensitySummary {
        let mut summary = DensitySummary::new(self.levels.len() as u32);
        for (level, bins) in self.levels.iter().enumerate() {
            let histogram = &mut summary.levels[level];
            for &weight in bins.values() {
                *histogram.entry(weight).or_insert(0) += 1;
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DensityRow {
    /// Grid cell side in local units.
    pub width: u32,
    pub points: u64,
    pub bins: u64,
}

/// Per level, accumulated weight K -> number of cells holding K.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DensitySummary {
    levels: Vec<BTreeMap<u64, u64>>,
}

impl DensitySummary {
    pub fn new(max_level: u32) -> Self {
        Self {
            levels: vec![BTreeMap::new(); max_level as usize],
        }
    }

    pub fn max_level(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn merge(&mut self, other: &DensitySummary) {
        if self.levels.len() < other.levels.len() {
            self.levels.resize(other.levels.len(), BTreeMap::new());
        }
        for (mine, theirs) in self.levels.iter_mut().zip(&other.levels) {
            for (&points, &bins) in theirs {
                *mine.entry(points).or_insert(0) += bins;
            }
        }
    }

    pub fn level(&self, level: u32) -> Option<&BTreeMap<u64, u64>> {
        self.levels.get(level as usize)
    }

    /// Sum of K * bins(K) at `level`.
    pub fn total_weight(&self, level: u32) -> u64 {
        self.level(level)
            .map(|h| h.iter().map(|(&points, &bins)| points * bins).sum())
            .unwrap_or(0)
    }

    /// Rows ordered by level then by K.
    pub fn rows(&self) -> Vec<DensityRow> {
        let mut rows = Vec::new();
        for (level, histogram) in self.levels.iter().enumerate() {
            for (&points, &bins) in histogram {
                rows.push(DensityRow {
                    width: 1 << level,
                    points,
                    bins,
                });
            }
        }
        rows
    }
}
