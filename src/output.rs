use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Map, Value, json};

use crate::aggregate::{DensitySummary, RollupRow};
use crate::commands::ArchiveSummary;
use crate::features::{PointFrame, PolygonFrame};
use crate::mercator::GlobalPolygon;
use crate::pmtiles::TileEntry;

/// A result file, gzip-compressed when its name ends in `.gz`.
pub enum OutputSink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl OutputSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let writer = BufWriter::new(file);
        let gzip = path.extension().is_some_and(|ext| ext == "gz");
        Ok(if gzip {
            OutputSink::Gzip(GzEncoder::new(writer, Compression::default()))
        } else {
            OutputSink::Plain(writer)
        })
    }

    /// Flushes buffers and writes the gzip trailer.
    pub fn finish(self) -> Result<()> {
        match self {
            OutputSink::Plain(mut writer) => writer.flush().context("flush output")?,
            OutputSink::Gzip(encoder) => {
                let mut writer = encoder.finish().context("finish gzip output")?;
                writer.flush().context("flush output")?;
            }
        }
        Ok(())
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputSink::Plain(writer) => writer.write(buf),
            OutputSink::Gzip(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputSink::Plain(writer) => writer.flush(),
            OutputSink::Gzip(writer) => writer.flush(),
        }
    }
}

fn round_to(value: f64, precision: usize) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

fn properties_object(names: &[String], values: &[&str]) -> Value {
    let map: Map<String, Value> = names
        .iter()
        .zip(values)
        .map(|(name, value)| (name.clone(), Value::String((*value).to_string())))
        .collect();
    Value::Object(map)
}

/// Writes tab-separated rows with a header taken from the first frame.
pub struct TsvWriter {
    precision: usize,
    columns: Option<Vec<String>>,
}

impl TsvWriter {
    pub fn new(precision: usize) -> Self {
        Self {
            precision,
            columns: None,
        }
    }

    fn header(&mut self, out: &mut dyn Write, leading: &str, names: &[String]) -> Result<()> {
        match &self.columns {
            Some(existing) if existing.as_slice() != names => anyhow::bail!(
                "feature columns changed from [{}] to [{}]",
                existing.join(","),
                names.join(",")
            ),
            Some(_) => Ok(()),
            None => {
                write!(out, "{leading}")?;
                for name in names {
                    write!(out, "\t{name}")?;
                }
                writeln!(out)?;
                self.columns = Some(names.to_vec());
                Ok(())
            }
        }
    }

    pub fn write_points(&mut self, out: &mut dyn Write, frame: &PointFrame) -> Result<()> {
        if frame.is_empty() {
            return Ok(());
        }
        self.header(out, "X\tY", frame.column_names())?;
        let p = self.precision;
        for idx in 0..frame.len() {
            let (point, values) = frame.row(idx);
            write!(out, "{:.p$}\t{:.p$}", point.x(), point.y())?;
            for value in values {
                write!(out, "\t{value}")?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    pub fn write_polygons(&mut self, out: &mut dyn Write, frame: &PolygonFrame) -> Result<()> {
        if frame.is_empty() {
            return Ok(());
        }
        self.header(out, "WKT", frame.column_names())?;
        for idx in 0..frame.len() {
            let (polygon, values) = frame.row(idx);
            write!(out, "{}", polygon_wkt(polygon, self.precision))?;
            for value in values {
                write!(out, "\t{value}")?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

fn closed_ring(polygon: &GlobalPolygon, precision: usize) -> Vec<[f64; 2]> {
    let mut ring: Vec<[f64; 2]> = polygon
        .points()
        .iter()
        .map(|p| [round_to(p.x(), precision), round_to(p.y(), precision)])
        .collect();
    if let (Some(first), Some(last)) = (ring.first().copied(), ring.last())
        && first != *last
    {
        ring.push(first);
    }
    ring
}

pub fn polygon_wkt(polygon: &GlobalPolygon, precision: usize) -> String {
    let coords = closed_ring(polygon, precision)
        .iter()
        .map(|[x, y]| format!("{x:.precision$} {y:.precision$}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("POLYGON (({coords}))")
}

/// One GeoJSON Feature per line.
pub fn write_points_geojson(out: &mut dyn Write, frame: &PointFrame, precision: usize) -> Result<()> {
    for idx in 0..frame.len() {
        let (point, values) = frame.row(idx);
        let feature = json!({
            "type": "Feature",
            "properties": properties_object(frame.column_names(), &values),
            "geometry": {
                "type": "Point",
                "coordinates": [round_to(point.x(), precision), round_to(point.y(), precision)],
            },
        });
        writeln!(out, "{}", serde_json::to_string(&feature)?)?;
    }
    Ok(())
}

pub fn write_polygons_geojson(out: &mut dyn Write, frame: &PolygonFrame, precision: usize) -> Result<()> {
    for idx in 0..frame.len() {
        let (polygon, values) = frame.row(idx);
        let feature = json!({
            "type": "Feature",
            "properties": properties_object(frame.column_names(), &values),
            "geometry": {
                "type": "Polygon",
                "coordinates": [closed_ring(polygon, precision)],
            },
        });
        writeln!(out, "{}", serde_json::to_string(&feature)?)?;
    }
    Ok(())
}

/// Tile count table; `rolled_up` selects the pyramid layout.
pub fn write_rollup_tsv(out: &mut dyn Write, rows: &[RollupRow], rolled_up: bool) -> Result<()> {
    if rolled_up {
        writeln!(out, "zoom\tx\ty\ttile_id\ttotal_count\ttile_count\tfrac_in_tile")?;
        for row in rows {
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}\t{}\t{:.5}",
                row.zoom, row.x, row.y, row.tile_id, row.total, row.count, row.fraction
            )?;
        }
    } else {
        writeln!(out, "zoom\tx\ty\ttile_id\ttile_count")?;
        for row in rows {
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}",
                row.zoom, row.x, row.y, row.tile_id, row.count
            )?;
        }
    }
    Ok(())
}

pub fn write_density_header(out: &mut dyn Write) -> Result<()> {
    writeln!(out, "zoom\ttile_x\ttile_y\twidth\tnum_pts\tnum_grids")?;
    Ok(())
}

pub fn write_density_tile(out: &mut dyn Write, tile: &TileEntry, summary: &DensitySummary) -> Result<()> {
    for row in summary.rows() {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}",
            tile.zoom, tile.x, tile.y, row.width, row.points, row.bins
        )?;
    }
    Ok(())
}

pub fn write_density_summary(out: &mut dyn Write, zoom: u8, summary: &DensitySummary) -> Result<()> {
    for row in summary.rows() {
        writeln!(
            out,
            "{}\tALL\tALL\t{}\t{}\t{}",
            zoom, row.width, row.points, row.bins
        )?;
    }
    Ok(())
}

pub fn summary_text_lines(summary: &ArchiveSummary) -> Vec<String> {
    let mut lines = vec![format!("source: {}", summary.source)];
    if let Some(header) = &summary.header {
        let [min_lon, min_lat, max_lon, max_lat] = header.bounds_degrees();
        let [center_lon, center_lat] = header.center_degrees();
        lines.push(format!("version: {}", header.version));
        lines.push(format!(
            "root: offset={} length={}",
            header.root_offset, header.root_length
        ));
        lines.push(format!(
            "metadata: offset={} length={}",
            header.metadata_offset, header.metadata_length
        ));
        lines.push(format!(
            "leaf: offset={} length={}",
            header.leaf_offset, header.leaf_length
        ));
        lines.push(format!(
            "data: offset={} length={}",
            header.data_offset, header.data_length
        ));
        lines.push(format!(
            "tiles: addressed={} entries={} contents={} clustered={}",
            header.n_addressed_tiles, header.n_tile_entries, header.n_tile_contents, header.clustered
        ));
        lines.push(format!(
            "compression: internal={} tile={}",
            header.internal_compression, header.tile_compression
        ));
        lines.push(format!("tile_type: {}", header.tile_type));
        lines.push(format!("zoom: min={} max={}", header.min_zoom, header.max_zoom));
        lines.push(format!(
            "bounds: {min_lon:.7},{min_lat:.7},{max_lon:.7},{max_lat:.7}"
        ));
        lines.push(format!(
            "center: zoom={} lon={center_lon:.7} lat={center_lat:.7}",
            header.center_zoom
        ));
    }
    if let Some(metadata) = &summary.metadata {
        lines.push(format!("metadata: {metadata}"));
    }
    if let Some(tiles) = &summary.tiles {
        lines.push(format!("tile_entries: {}", tiles.len()));
        for tile in tiles {
            lines.push(format!(
                "z={}: x={} y={} offset={} length={}",
                tile.zoom, tile.x, tile.y, tile.offset, tile.length
            ));
        }
    }
    lines
}
