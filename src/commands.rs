//! Query drivers shared by the CLI and tests.

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::aggregate::{DEFAULT_MAX_LEVEL, DensitySummary, RollupRow, TileCounts, TileDensity, leaf_rows, rollup};
use crate::features::{
    FeatureFrame, PointFrame, PolygonFrame, count_features, decode_points, decode_polygons, decode_weighted_points,
};
use crate::filter::{QueryBounds, SpatialQuery, TileFilter, ZoomSelection, resolve_zoom};
use crate::geometry::Polygon;
use crate::output::{write_density_header, write_density_summary, write_density_tile};
use crate::pipeline::{self, PipelineOptions, PipelineStats, SharedAggregator, TileAggregate};
use crate::pmtiles::{Archive, Header, TileEntry};
use crate::progress::progress_for_phase;

#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryOptions {
    pub header: bool,
    pub metadata: bool,
    pub tiles: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    pub source: String,
    pub tile_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<Header>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiles: Option<Vec<TileEntry>>,
}

pub fn summarize(archive: &Archive, options: SummaryOptions) -> ArchiveSummary {
    ArchiveSummary {
        source: archive.describe(),
        tile_count: archive.entries().len(),
        header: options.header.then(|| archive.header().clone()),
        metadata: options.metadata.then(|| archive.metadata().clone()),
        tiles: options.tiles.then(|| archive.entries().to_vec()),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Defaults to the archive's maximum zoom.
    pub zoom: Option<u8>,
    pub bounds: QueryBounds,
    pub polygons: Vec<Polygon>,
    pub no_progress: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportStats {
    pub zoom: u8,
    pub tiles_selected: u64,
    pub tiles_decoded: u64,
    pub features: u64,
}

/// Shared tile walk for exports: directory order, zoom and tile filters
/// applied, one frame handed to `sink` per decoded tile.
fn export_with<G, D, S>(
    archive: &Archive,
    options: &ExportOptions,
    mut decode: D,
    mut sink: S,
) -> Result<ExportStats>
where
    D: FnMut(Vec<u8>, &TileEntry, &TileFilter<'_>, &mut FeatureFrame<G>) -> Result<usize>,
    S: FnMut(&TileEntry, &FeatureFrame<G>) -> Result<()>,
{
    archive.require_vector()?;
    let zoom = resolve_zoom(options.zoom, archive.header())?;
    let query = SpatialQuery::new(zoom, options.bounds, options.polygons.clone());
    let selection = ZoomSelection::Exact(zoom);

    let selected: Vec<(&TileEntry, TileFilter<'_>)> = archive
        .entries()
        .iter()
        .filter(|entry| selection.admits(entry.zoom))
        .filter_map(|entry| query.tile_filter(entry.x, entry.y).map(|filter| (entry, filter)))
        .collect();
    info!(zoom, tiles = selected.len(), "found {} tiles that intersect with the region", selected.len());

    let mut stats = ExportStats {
        zoom,
        tiles_selected: selected.len() as u64,
        ..ExportStats::default()
    };
    let progress = progress_for_phase("exporting tiles", selected.len() as u64, options.no_progress);
    let mut frame = FeatureFrame::new();
    for (entry, filter) in selected {
        debug!("fetching tile {}/{}/{}", entry.zoom, entry.x, entry.y);
        let bytes = archive.fetch_entry(entry)?;
        let appended = decode(bytes, entry, &filter, &mut frame)
            .with_context(|| format!("decode tile {}/{}/{}", entry.zoom, entry.x, entry.y))?;
        stats.tiles_decoded += 1;
        stats.features += appended as u64;
        if !frame.is_empty() {
            sink(entry, &frame)?;
        }
        frame.clear_rows();
        if let Some(progress) = &progress {
            progress.inc(1);
        }
    }
    if let Some(progress) = progress {
        progress.finish();
    }
    info!(features = stats.features, "exported {} features", stats.features);
    Ok(stats)
}

pub fn export_points<S>(archive: &Archive, options: &ExportOptions, sink: S) -> Result<ExportStats>
where
    S: FnMut(&TileEntry, &PointFrame) -> Result<()>,
{
    export_with(
        archive,
        options,
        |bytes, entry, filter, frame: &mut PointFrame| Ok(decode_points(bytes, entry, filter, frame)?),
        sink,
    )
}

pub fn export_polygons<S>(archive: &Archive, options: &ExportOptions, sink: S) -> Result<ExportStats>
where
    S: FnMut(&TileEntry, &PolygonFrame) -> Result<()>,
{
    export_with(
        archive,
        options,
        |bytes, entry, filter, frame: &mut PolygonFrame| Ok(decode_polygons(bytes, entry, filter, frame)?),
        sink,
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountReport {
    pub rolled_up: bool,
    pub rows: Vec<RollupRow>,
}

/// Feature counts per tile. With no zoom every entry is counted and the
/// maximum zoom is rolled up the pyramid; with a zoom only that level is
/// reported as-is.
pub fn count_tiles(archive: &Archive, zoom: Option<u8>, no_progress: bool) -> Result<CountReport> {
    archive.require_vector()?;
    let header = archive.header();
    let selection = match zoom {
        Some(z) => ZoomSelection::Exact(resolve_zoom(Some(z), header)?),
        None => ZoomSelection::All,
    };

    let entries: Vec<&TileEntry> = archive
        .entries()
        .iter()
        .filter(|entry| selection.admits(entry.zoom))
        .collect();
    let progress = progress_for_phase("counting features", entries.len() as u64, no_progress);
    let mut counts = TileCounts::new();
    for (idx, entry) in entries.iter().enumerate() {
        if idx % 100 == 0 {
            debug!("processing {}-th tile {}/{}/{}", idx + 1, entry.zoom, entry.x, entry.y);
        }
        let bytes = archive.fetch_entry(entry)?;
        let n = count_features(bytes)
            .with_context(|| format!("decode tile {}/{}/{}", entry.zoom, entry.x, entry.y))?;
        counts.insert(entry.zoom, entry.x, entry.y, n);
        if let Some(progress) = &progress {
            progress.inc(1);
        }
    }
    if let Some(progress) = progress {
        progress.finish();
    }

    Ok(match selection {
        ZoomSelection::All => CountReport {
            rolled_up: true,
            rows: rollup(&counts, header.min_zoom, header.max_zoom),
        },
        ZoomSelection::Exact(_) => CountReport {
            rolled_up: false,
            rows: leaf_rows(&counts),
        },
    })
}

#[derive(Debug, Clone)]
pub struct DensityOptions {
    pub zoom: Option<u8>,
    /// Attribute holding per-feature counts; `None` weighs every feature 1.
    pub count_field: Option<String>,
    pub max_level: u32,
    pub threads: usize,
    pub compact: bool,
    pub no_progress: bool,
}

impl Default for DensityOptions {
    fn default() -> Self {
        Self {
            zoom: None,
            count_field: Some("gn".to_string()),
            max_level: DEFAULT_MAX_LEVEL,
            threads: 0,
            compact: false,
            no_progress: false,
        }
    }
}

/// Run-wide density histogram, optionally streaming per-tile rows.
pub struct DensityAggregate<'w> {
    summary: DensitySummary,
    out: &'w mut (dyn Write + Send),
    compact: bool,
}

impl TileAggregate for DensityAggregate<'_> {
    type Partial = DensitySummary;

    fn merge(&mut self, tile: &TileEntry, partial: DensitySummary) -> Result<()> {
        if !self.compact {
            write_density_tile(&mut *self.out, tile, &partial)?;
        }
        self.summary.merge(&partial);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DensityReport {
    pub zoom: u8,
    pub summary: DensitySummary,
    pub stats: PipelineStats,
}

/// Density histogram over every tile at one zoom, computed on a worker
/// pool. Writes the table header, per-tile rows unless `compact`, then the
/// `ALL` rows.
pub fn density_stats(
    archive: &Archive,
    options: &DensityOptions,
    out: &mut (dyn Write + Send),
) -> Result<DensityReport> {
    archive.require_vector()?;
    let zoom = resolve_zoom(options.zoom, archive.header())?;
    let tiles: Vec<TileEntry> = archive
        .entries()
        .iter()
        .filter(|entry| entry.zoom == zoom)
        .copied()
        .collect();
    info!(zoom, tiles = tiles.len(), "found {} tiles at zoom level {zoom}", tiles.len());

    write_density_header(&mut *out)?;
    let progress = progress_for_phase("density statistics", tiles.len() as u64, options.no_progress);
    let pipeline_options = PipelineOptions {
        threads: options.threads,
        progress: progress.as_ref().map(|p| p.handle()),
        ..PipelineOptions::default()
    };
    let max_level = options.max_level;
    let count_field = options.count_field.as_deref();

    let aggregator = SharedAggregator::new(DensityAggregate {
        summary: DensitySummary::new(max_level),
        out: &mut *out,
        compact: options.compact,
    });
    let stats = pipeline::run(archive, &tiles, &pipeline_options, &aggregator, |_, bytes| {
        let points = decode_weighted_points(bytes, count_field)?;
        let mut density = TileDensity::new(max_level);
        for point in &points {
            density.add(point.x, point.y, point.weight);
        }
        Ok((density.summarize(), points.len() as u64))
    })?;
    if let Some(progress) = progress {
        progress.finish();
    }

    let summary = aggregator.into_inner()?.summary;
    write_density_summary(&mut *out, zoom, &summary)?;
    info!(
        tiles = stats.tiles,
        features = stats.features,
        "processed {} features in {} tiles",
        stats.features,
        stats.tiles
    );
    Ok(DensityReport {
        zoom,
        summary,
        stats,
    })
}
