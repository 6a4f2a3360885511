use std::fmt;

use serde::Serialize;

pub const HEADER_SIZE: usize = 127;
pub const MAGIC: &[u8; 7] = b"PMTiles";
pub const VERSION: u8 = 3;
/// Deepest zoom a tile ID can encode without overflowing u64.
pub const MAX_ZOOM: u8 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Unknown,
    None,
    Gzip,
    Brotli,
    Zstd,
    Other(u8),
}

impl Compression {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Compression::Unknown,
            1 => Compression::None,
            2 => Compression::Gzip,
            3 => Compression::Brotli,
            4 => Compression::Zstd,
            other => Compression::Other(other),
        }
    }

    pub fn is_supported(self) -> bool {
        matches!(self, Compression::None | Compression::Gzip)
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Unknown => write!(f, "unknown"),
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Brotli => write!(f, "brotli"),
            Compression::Zstd => write!(f, "zstd"),
            Compression::Other(code) => write!(f, "code {code}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TileType {
    Unknown,
    Mvt,
    Png,
    Jpeg,
    Webp,
    Avif,
    Other(u8),
}

impl TileType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => TileType::Unknown,
            1 => TileType::Mvt,
            2 => TileType::Png,
            3 => TileType::Jpeg,
            4 => TileType::Webp,
            5 => TileType::Avif,
            other => TileType::Other(other),
        }
    }
}

impl fmt::Display for TileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileType::Unknown => write!(f, "unknown"),
            TileType::Mvt => write!(f, "mvt"),
            TileType::Png => write!(f, "png"),
            TileType::Jpeg => write!(f, "jpeg"),
            TileType::Webp => write!(f, "webp"),
            TileType::Avif => write!(f, "avif"),
            TileType::Other(code) => write!(f, "code {code}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Header {
    pub version: u8,
    pub root_offset: u64,
    pub root_length: u64,
    pub metadata_offset: u64,
    pub metadata_length: u64,
    pub leaf_offset: u64,
    pub leaf_length: u64,
    pub data_offset: u64,
    pub data_length: u64,
    pub n_addressed_tiles: u64,
    pub n_tile_entries: u64,
    pub n_tile_contents: u64,
    pub clustered: bool,
    pub internal_compression: Compression,
    pub tile_compression: Compression,
    pub tile_type: TileType,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub min_longitude: i32,
    pub min_latitude: i32,
    pub max_longitude: i32,
    pub max_latitude: i32,
    pub center_zoom: u8,
    pub center_longitude: i32,
    pub center_latitude: i32,
}

impl Header {
    /// Geographic bounds in degrees as `[min_lon, min_lat, max_lon, max_lat]`.
    pub fn bounds_degrees(&self) -> [f64; 4] {
        [
            self.min_longitude as f64 / 1e7,
            self.min_latitude as f64 / 1e7,
            self.max_longitude as f64 / 1e7,
            self.max_latitude as f64 / 1e7,
        ]
    }

    pub fn center_degrees(&self) -> [f64; 2] {
        [
            self.center_longitude as f64 / 1e7,
            self.center_latitude as f64 / 1e7,
        ]
    }
}

/// One raw directory record, as stored in a root or leaf directory.
#[derive(Debug, Clone)]
pub struct Entry {
    pub tile_id: u64,
    pub offset: u64,
    pub length: u32,
    pub run_length: u32,
}

impl Entry {
    pub fn is_leaf_pointer(&self) -> bool {
        self.run_length == 0
    }
}

/// An addressable tile with its byte range relative to the tile data section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileEntry {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
    pub offset: u64,
    pub length: u32,
}
