use std::io::Read;

use hilbert_2d::{Variant, h2xy_discrete, xy2h_discrete};
use varint_rs::VarintReader;

use crate::error::ArchiveError;
use crate::pmtiles::types::{
    Compression, Entry, HEADER_SIZE, Header, MAGIC, MAX_ZOOM, TileType, VERSION,
};

pub fn pow4(z: u8) -> u64 {
    1u64 << (2 * (z as u64))
}

/// First tile ID used at zoom `z`.
pub fn zoom_base_id(z: u8) -> u64 {
    if z >= 32 {
        // 4^32 - 1 == u64::MAX
        return u64::MAX / 3;
    }
    (pow4(z) - 1) / 3
}

pub fn tile_id_from_xyz(z: u8, x: u32, y: u32) -> u64 {
    if z == 0 {
        return 0;
    }
    let order = z as usize;
    let hilbert = xy2h_discrete(x as usize, y as usize, order, Variant::Hilbert) as u64;
    zoom_base_id(z) + hilbert
}

pub fn tile_id_to_xyz(tile_id: u64) -> Option<(u8, u32, u32)> {
    if tile_id == 0 {
        return Some((0, 0, 0));
    }
    for z in 1..=MAX_ZOOM {
        if tile_id < zoom_base_id(z + 1) {
            let idx = tile_id - zoom_base_id(z);
            let (x, y) = h2xy_discrete(idx as usize, z as usize, Variant::Hilbert);
            return Some((z, x as u32, y as u32));
        }
    }
    None
}

fn read_u8(input: &mut &[u8]) -> Result<u8, ArchiveError> {
    let mut byte = [0u8; 1];
    input
        .read_exact(&mut byte)
        .map_err(|_| ArchiveError::Directory("truncated header".to_string()))?;
    Ok(byte[0])
}

fn read_u64(input: &mut &[u8]) -> Result<u64, ArchiveError> {
    let mut bytes = [0u8; 8];
    input
        .read_exact(&mut bytes)
        .map_err(|_| ArchiveError::Directory("truncated header".to_string()))?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_i32(input: &mut &[u8]) -> Result<i32, ArchiveError> {
    let mut bytes = [0u8; 4];
    input
        .read_exact(&mut bytes)
        .map_err(|_| ArchiveError::Directory("truncated header".to_string()))?;
    Ok(i32::from_le_bytes(bytes))
}

/// Parses the fixed 127-byte header record.
pub fn parse_header(buf: &[u8]) -> Result<Header, ArchiveError> {
    if buf.len() < HEADER_SIZE || &buf[0..MAGIC.len()] != MAGIC {
        return Err(ArchiveError::InvalidMagic);
    }
    let mut cursor = &buf[MAGIC.len()..HEADER_SIZE];
    let version = read_u8(&mut cursor)?;
    if version != VERSION {
        return Err(ArchiveError::UnsupportedVersion(version));
    }

    Ok(Header {
        version,
        root_offset: read_u64(&mut cursor)?,
        root_length: read_u64(&mut cursor)?,
        metadata_offset: read_u64(&mut cursor)?,
        metadata_length: read_u64(&mut cursor)?,
        leaf_offset: read_u64(&mut cursor)?,
        leaf_length: read_u64(&mut cursor)?,
        data_offset: read_u64(&mut cursor)?,
        data_length: read_u64(&mut cursor)?,
        n_addressed_tiles: read_u64(&mut cursor)?,
        n_tile_entries: read_u64(&mut cursor)?,
        n_tile_contents: read_u64(&mut cursor)?,
        clustered: read_u8(&mut cursor)? == 1,
        internal_compression: Compression::from_u8(read_u8(&mut cursor)?),
        tile_compression: Compression::from_u8(read_u8(&mut cursor)?),
        tile_type: TileType::from_u8(read_u8(&mut cursor)?),
        min_zoom: read_u8(&mut cursor)?,
        max_zoom: read_u8(&mut cursor)?,
        min_longitude: read_i32(&mut cursor)?,
        min_latitude: read_i32(&mut cursor)?,
        max_longitude: read_i32(&mut cursor)?,
        max_latitude: read_i32(&mut cursor)?,
        center_zoom: read_u8(&mut cursor)?,
        center_longitude: read_i32(&mut cursor)?,
        center_latitude: read_i32(&mut cursor)?,
    })
}

fn malformed(err: std::io::Error) -> ArchiveError {
    ArchiveError::Directory(err.to_string())
}

/// Decodes one decompressed directory block.
pub fn decode_directory(mut data: &[u8]) -> Result<Vec<Entry>, ArchiveError> {
    let n_entries = data.read_usize_varint().map_err(malformed)?;
    // Every entry takes at least four bytes, which bounds the allocation.
    if n_entries.saturating_mul(4) > data.len() {
        return Err(ArchiveError::Directory(format!(
            "entry count {n_entries} exceeds directory size"
        )));
    }
    let mut entries = vec![
        Entry {
            tile_id: 0,
            offset: 0,
            length: 0,
            run_length: 0,
        };
        n_entries
    ];

    let mut next_tile_id = 0u64;
    for entry in entries.iter_mut() {
        let delta = data.read_u64_varint().map_err(malformed)?;
        next_tile_id = next_tile_id
            .checked_add(delta)
            .ok_or_else(|| ArchiveError::Directory("tile id overflow".to_string()))?;
        entry.tile_id = next_tile_id;
    }

    for entry in entries.iter_mut() {
        entry.run_length = data.read_u32_varint().map_err(malformed)?;
    }

    for entry in entries.iter_mut() {
        entry.length = data.read_u32_varint().map_err(malformed)?;
    }

    let mut previous: Option<(u64, u32)> = None;
    for entry in entries.iter_mut() {
        let offset = data.read_u64_varint().map_err(malformed)?;
        entry.offset = if offset == 0 {
            let (prev_offset, prev_length) = previous.ok_or_else(|| {
                ArchiveError::Directory("first entry has a relative offset".to_string())
            })?;
            prev_offset + prev_length as u64
        } else {
            offset - 1
        };
        previous = Some((entry.offset, entry.length));
    }

    Ok(entries)
}
