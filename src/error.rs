use std::io;

use crate::pmtiles::{Compression, TileType};

/// Failures of a byte-range source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("cannot open {uri}: {source}")]
    Open {
        uri: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid archive URI: {0}")]
    InvalidUri(String),

    #[error("byte source {0} is closed")]
    Closed(String),

    #[error("read of {length} bytes at offset {offset} failed: {source}")]
    Io {
        offset: u64,
        length: u64,
        #[source]
        source: io::Error,
    },

    #[error("short read at offset {offset}: expected {expected} bytes, got {got}")]
    ShortRead { offset: u64, expected: u64, got: u64 },

    #[error("HTTP request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("HTTP status {status} for range {offset}+{length}")]
    Status { status: u16, offset: u64, length: u64 },

    #[error("giving up after {attempts} attempts (last status {status})")]
    RetriesExhausted { attempts: u32, status: u16 },
}

/// Archive-level failures, fatal at open time or for the tile being fetched.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("invalid PMTiles magic")]
    InvalidMagic,

    #[error("unsupported PMTiles version {0}")]
    UnsupportedVersion(u8),

    #[error("unsupported {section} compression: {codec}")]
    UnsupportedCompression {
        section: &'static str,
        codec: Compression,
    },

    #[error("malformed directory: {0}")]
    Directory(String),

    #[error("duplicate tile id {tile_id} in directory")]
    DuplicateTile { tile_id: u64 },

    #[error("tile {z}/{x}/{y} is outside the declared zoom range {min_zoom}..={max_zoom}")]
    ZoomOutOfRange {
        z: u8,
        x: u32,
        y: u32,
        min_zoom: u8,
        max_zoom: u8,
    },

    #[error("decompress {what}: {source}")]
    Decompress {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("parse metadata json: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("tile not found {z}/{x}/{y}")]
    TileNotFound { z: u8, x: u32, y: u32 },

    #[error("read tile {z}/{x}/{y}: {source}")]
    TileRead {
        z: u8,
        x: u32,
        y: u32,
        #[source]
        source: SourceError,
    },

    #[error("decompress tile {z}/{x}/{y}: {source}")]
    TileDecompress {
        z: u8,
        x: u32,
        y: u32,
        #[source]
        source: io::Error,
    },

    #[error("archive payload type is {0}, expected MVT vector tiles")]
    NotVector(TileType),
}

/// The vector tile did not have the shape the query expects.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("decode vector tile: {0}")]
    Tile(String),

    #[error("layer {layer}: expected {expected} geometry, found {found}")]
    UnexpectedGeometry {
        layer: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("layer {layer}: multi-part {kind} features are not supported")]
    MultiPart { layer: String, kind: &'static str },

    #[error("layer {layer}: polygons with interior rings are not supported")]
    PolygonHoles { layer: String },

    #[error("feature columns {found:?} do not match frame columns {expected:?}")]
    ColumnMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
}

/// Invalid query parameters, reported before any tile work begins.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("zoom level {zoom} is unavailable (archive covers {min_zoom}..={max_zoom})")]
    ZoomUnavailable { zoom: u8, min_zoom: u8, max_zoom: u8 },

    #[error("missing required option: {0}")]
    MissingInput(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum GeoJsonError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("parse geojson: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unsupported geojson type: {0}")]
    UnsupportedType(String),

    #[error("polygon holes are not supported")]
    Holes,

    #[error("malformed coordinates: {0}")]
    Coordinates(String),
}
