use std::collections::BTreeMap;

use serde::Serialize;

use crate::pmtiles::tile_id_from_xyz;

/// Direct feature counts per tile, keyed by zoom then `(x, y)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileCounts {
    by_zoom: BTreeMap<u8, BTreeMap<(u32, u32), u64>>,
}

impl TileCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, zoom: u8, x: u32, y: u32, count: u64) {
        self.by_zoom.entry(zoom).or_default().insert((x, y), count);
    }

    pub fn get(&self, zoom: u8, x: u32, y: u32) -> Option<u64> {
        self.by_zoom.get(&zoom)?.get(&(x, y)).copied()
    }

    pub fn zoom(&self, zoom: u8) -> impl Iterator<Item = ((u32, u32), u64)> + '_ {
        self.by_zoom
            .get(&zoom)
            .into_iter()
            .flat_map(|tiles| tiles.iter().map(|(&xy, &count)| (xy, count)))
    }

    pub fn total(&self, zoom: u8) -> u64 {
        self.zoom(zoom).map(|(_, count)| count).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RollupRow {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
    pub tile_id: u64,
    /// Sum of all leaf counts under this tile.
    pub total: u64,
    /// The tile's own count at its zoom, zero if the directory lacks it.
    pub count: u64,
    pub fraction: f64,
}

/// Pushes every leaf count at `max_zoom` into each ancestor down to
/// `min_zoom`, halving tile indices per level.
pub fn rollup(counts: &TileCounts, min_zoom: u8, max_zoom: u8) -> Vec<RollupRow> {
    let mut sums: BTreeMap<u8, BTreeMap<(u32, u32), u64>> = BTreeMap::new();
    for ((leaf_x, leaf_y), count) in counts.zoom(max_zoom) {
        let (mut x, mut y) = (leaf_x, leaf_y);
        for zoom in (min_zoom..=max_zoom).rev() {
            *sums.entry(zoom).or_default().entry((x, y)).or_insert(0) += count;
            x >>= 1;
            y >>= 1;
        }
    }

    let mut rows = Vec::new();
    for (zoom, tiles) in sums {
        for ((x, y), total) in tiles {
            let count = counts.get(zoom, x, y).unwrap_or(0);
            let fraction = if total == 0 {
                0.0
            } else {
                count as f64 / total as f64
            };
            rows.push(RollupRow {
                zoom,
                x,
                y,
                tile_id: tile_id_from_xyz(zoom, x, y),
                total,
                count,
                fraction,
            });
        }
    }
    rows
}

/// Direct counts without any rollup, for single-zoom queries.
pub fn leaf_rows(counts: &TileCounts) -> Vec<RollupRow> {
    let mut rows = Vec::new();
    for (&zoom, tiles) in &counts.by_zoom {
        for (&(x, y), &count) in tiles {
            rows.push(RollupRow {
                zoom,
                x,
                y,
                tile_id: tile_id_from_xyz(zoom, x, y),
                total: count,
                count,
                fraction: 1.0,
            });
        }
    }
    rows
}
