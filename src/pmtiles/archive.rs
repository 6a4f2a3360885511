use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ArchiveError, SourceError};
use crate::pmtiles::algo::{
    decode_directory, parse_header, tile_id_from_xyz, tile_id_to_xyz, zoom_base_id,
};
use crate::pmtiles::inflate::decompress;
use crate::pmtiles::types::{
    Compression, Entry, HEADER_SIZE, Header, MAX_ZOOM, TileEntry, TileType,
};
use crate::source::{ByteSource, open_source};

/// Directories nest at most a few levels in practice; this bounds hostile input.
const MAX_DIRECTORY_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Unopened,
    HeaderRead,
    Ready,
}

/// An archive whose source is open but whose header has not been read.
pub struct UnopenedArchive {
    source: Box<dyn ByteSource>,
}

impl UnopenedArchive {
    pub fn new(source: Box<dyn ByteSource>) -> Self {
        Self { source }
    }

    pub fn state(&self) -> ArchiveState {
        ArchiveState::Unopened
    }

    /// Reads and validates the header. Codecs other than none/gzip are
    /// rejected here rather than at the first tile.
    pub fn read_header(mut self) -> Result<HeaderRead, ArchiveError> {
        let buf = self.source.read_at(0, HEADER_SIZE as u64)?;
        let header = parse_header(&buf)?;
        for (section, codec) in [
            ("internal", header.internal_compression),
            ("tile", header.tile_compression),
        ] {
            if !codec.is_supported() {
                return Err(ArchiveError::UnsupportedCompression { section, codec });
            }
        }
        Ok(HeaderRead {
            source: self.source,
            header,
        })
    }
}

/// Header parsed; directory and metadata not loaded yet.
pub struct HeaderRead {
    source: Box<dyn ByteSource>,
    header: Header,
}

impl HeaderRead {
    pub fn state(&self) -> ArchiveState {
        ArchiveState::HeaderRead
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn load(mut self) -> Result<Archive, ArchiveError> {
        let metadata = read_metadata(self.source.as_mut(), &self.header)?;

        let mut entries = Vec::new();
        let header = &self.header;
        collect_entries(
            self.source.as_mut(),
            header,
            header.root_offset,
            header.root_length,
            0,
            &mut entries,
            addressed_tile_limit(header),
        )?;

        let mut index = HashMap::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            let tile_id = tile_id_from_xyz(entry.zoom, entry.x, entry.y);
            if index.insert(tile_id, idx).is_some() {
                return Err(ArchiveError::DuplicateTile { tile_id });
            }
        }

        info!(
            source = self.source.describe(),
            entries = entries.len(),
            "a total of {} tile entries are found",
            entries.len()
        );

        Ok(Archive {
            source: Mutex::new(self.source),
            header: self.header,
            metadata,
            entries,
            index,
        })
    }
}

fn read_section(
    source: &mut dyn ByteSource,
    offset: u64,
    length: u64,
    compression: Compression,
    what: &'static str,
) -> Result<Vec<u8>, ArchiveError> {
    let raw = source.read_at(offset, length)?;
    decompress(raw, compression).map_err(|source| ArchiveError::Decompress { what, source })
}

fn read_metadata(source: &mut dyn ByteSource, header: &Header) -> Result<Value, ArchiveError> {
    if header.metadata_length == 0 {
        return Ok(Value::Object(Default::default()));
    }
    let bytes = read_section(
        source,
        header.metadata_offset,
        header.metadata_length,
        header.internal_compression,
        "metadata",
    )?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Upper bound on expanded directory entries: the header's addressed tile
/// count, or the tile id space of the zoom range when that count is unset.
fn addressed_tile_limit(header: &Header) -> u64 {
    if header.n_addressed_tiles > 0 {
        return header.n_addressed_tiles;
    }
    let max_zoom = header.max_zoom.min(MAX_ZOOM);
    zoom_base_id(max_zoom + 1) - zoom_base_id(header.min_zoom.min(max_zoom))
}

/// Tile id for coordinates inside the zoom's grid, `None` otherwise.
fn checked_tile_id(z: u8, x: u32, y: u32) -> Option<u64> {
    if z > MAX_ZOOM {
        return None;
    }
    let side = 1u64 << z;
    if u64::from(x) >= side || u64::from(y) >= side {
        return None;
    }
    Some(tile_id_from_xyz(z, x, y))
}

/// Walks root and leaf directories depth-first, keeping directory order.
fn collect_entries(
    source: &mut dyn ByteSource,
    header: &Header,
    offset: u64,
    length: u64,
    depth: usize,
    out: &mut Vec<TileEntry>,
    limit: u64,
) -> Result<(), ArchiveError> {
    if depth > MAX_DIRECTORY_DEPTH {
        return Err(ArchiveError::Directory(
            "leaf directories nested too deeply".to_string(),
        ));
    }
    if length == 0 {
        return Ok(());
    }
    let bytes = read_section(
        source,
        offset,
        length,
        header.internal_compression,
        "directory",
    )?;
    let directory: Vec<Entry> = decode_directory(&bytes)?;
    debug!(offset, length, entries = directory.len(), "decoded directory");

    for entry in directory {
        if entry.is_leaf_pointer() {
            let leaf_offset = header.leaf_offset.checked_add(entry.offset).ok_or_else(|| {
                ArchiveError::Directory(format!(
                    "leaf directory offset {} overflows",
                    entry.offset
                ))
            })?;
            collect_entries(
                source,
                header,
                leaf_offset,
                entry.length as u64,
                depth + 1,
                out,
                limit,
            )?;
            continue;
        }
        let run_length = entry.run_length as u64;
        let run_end = entry.tile_id.checked_add(run_length).ok_or_else(|| {
            ArchiveError::Directory(format!("tile id run at {} overflows", entry.tile_id))
        })?;
        if out.len() as u64 + run_length > limit {
            return Err(ArchiveError::Directory(format!(
                "directory addresses more than {limit} tiles"
            )));
        }
        for tile_id in entry.tile_id..run_end {
            let (z, x, y) = tile_id_to_xyz(tile_id).ok_or_else(|| {
                ArchiveError::Directory(format!("tile id {tile_id} is out of range"))
            })?;
            if z < header.min_zoom || z > header.max_zoom {
                return Err(ArchiveError::ZoomOutOfRange {
                    z,
                    x,
                    y,
                    min_zoom: header.min_zoom,
                    max_zoom: header.max_zoom,
                });
            }
            out.push(TileEntry {
                zoom: z,
                x,
                y,
                offset: entry.offset,
                length: entry.length,
            });
        }
    }
    Ok(())
}

/// A ready archive: header, metadata and directory are immutable, the
/// byte source sits behind a lock shared by all readers.
pub struct Archive {
    source: Mutex<Box<dyn ByteSource>>,
    header: Header,
    metadata: Value,
    entries: Vec<TileEntry>,
    index: HashMap<u64, usize>,
}

impl Archive {
    pub fn open(uri: &str) -> Result<Self, ArchiveError> {
        Self::from_source(open_source(uri)?)
    }

    pub fn from_source(source: Box<dyn ByteSource>) -> Result<Self, ArchiveError> {
        UnopenedArchive::new(source).read_header()?.load()
    }

    pub fn state(&self) -> ArchiveState {
        ArchiveState::Ready
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    pub fn entries(&self) -> &[TileEntry] {
        &self.entries
    }

    pub fn entry(&self, z: u8, x: u32, y: u32) -> Option<&TileEntry> {
        let tile_id = checked_tile_id(z, x, y)?;
        self.index.get(&tile_id).map(|&idx| &self.entries[idx])
    }

    pub fn is_vector(&self) -> bool {
        self.header.tile_type == TileType::Mvt
    }

    /// Fails unless tiles are MVT, which point and polygon queries need.
    pub fn require_vector(&self) -> Result<(), ArchiveError> {
        if self.is_vector() {
            Ok(())
        } else {
            Err(ArchiveError::NotVector(self.header.tile_type))
        }
    }

    pub fn describe(&self) -> String {
        self.lock_source().describe().to_string()
    }

    fn lock_source(&self) -> MutexGuard<'_, Box<dyn ByteSource>> {
        // A panic while reading leaves no partial state in the source
        // worth protecting, so a poisoned lock is still usable.
        self.source
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn fetch(&self, z: u8, x: u32, y: u32) -> Result<Vec<u8>, ArchiveError> {
        let entry = self
            .entry(z, x, y)
            .ok_or(ArchiveError::TileNotFound { z, x, y })?;
        self.fetch_entry(entry)
    }

    /// Reads and decompresses one tile. Only the read holds the lock.
    pub fn fetch_entry(&self, entry: &TileEntry) -> Result<Vec<u8>, ArchiveError> {
        let (z, x, y) = (entry.zoom, entry.x, entry.y);
        let raw = {
            let mut source = self.lock_source();
            let offset = self.header.data_offset.saturating_add(entry.offset);
            source
                .read_at(offset, entry.length as u64)
                .map_err(|source: SourceError| ArchiveError::TileRead { z, x, y, source })?
        };
        decompress(raw, self.header.tile_compression)
            .map_err(|source| ArchiveError::TileDecompress { z, x, y, source })
    }

    pub fn close(&self) {
        self.lock_source().close();
    }
}
