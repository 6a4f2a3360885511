#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use mvt::{GeomEncoder, GeomType, Tile};
use pmpoint::pmtiles::tile_id_from_xyz;
use varint_rs::VarintWriter;

pub const NONE: u8 = 1;
pub const GZIP: u8 = 2;
pub const BROTLI: u8 = 3;
pub const MVT: u8 = 1;
pub const PNG: u8 = 2;

pub const NO_TAGS: &[(&str, &str)] = &[];

pub struct FixtureOptions {
    pub internal_compression: u8,
    pub tile_compression: u8,
    pub tile_type: u8,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub metadata: String,
    /// Split the directory into leaves of this many entries.
    pub leaf_size: Option<usize>,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            internal_compression: NONE,
            tile_compression: NONE,
            tile_type: MVT,
            min_zoom: 0,
            max_zoom: 0,
            metadata: r#"{"name":"fixture"}"#.to_string(),
            leaf_size: None,
        }
    }
}

struct DirEntry {
    tile_id: u64,
    offset: u64,
    length: u32,
    run_length: u32,
}

fn encode_directory(entries: &[DirEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_usize_varint(entries.len()).expect("count");
    let mut last_tile_id = 0u64;
    for entry in entries {
        buf.write_u64_varint(entry.tile_id - last_tile_id).expect("tile id");
        last_tile_id = entry.tile_id;
    }
    for entry in entries {
        buf.write_u32_varint(entry.run_length).expect("run length");
    }
    for entry in entries {
        buf.write_u32_varint(entry.length).expect("length");
    }
    for (idx, entry) in entries.iter().enumerate() {
        let contiguous = idx > 0 && {
            let prev = &entries[idx - 1];
            entry.offset == prev.offset + prev.length as u64
        };
        if contiguous {
            buf.write_u64_varint(0).expect("offset");
        } else {
            buf.write_u64_varint(entry.offset + 1).expect("offset");
        }
    }
    buf
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

fn compress(data: &[u8], codec: u8) -> Vec<u8> {
    match codec {
        GZIP => gzip(data),
        _ => data.to_vec(),
    }
}

/// Writes a PMTiles v3 archive holding `tiles` as `(z, x, y, payload)`.
pub fn write_archive(path: &Path, tiles: &[(u8, u32, u32, Vec<u8>)], options: &FixtureOptions) {
    let mut sorted: Vec<(u64, &Vec<u8>)> = tiles
        .iter()
        .map(|(z, x, y, data)| (tile_id_from_xyz(*z, *x, *y), data))
        .collect();
    sorted.sort_by_key(|(id, _)| *id);

    let mut tile_data = Vec::new();
    let mut entries = Vec::new();
    for (tile_id, data) in &sorted {
        let payload = compress(data, options.tile_compression);
        entries.push(DirEntry {
            tile_id: *tile_id,
            offset: tile_data.len() as u64,
            length: payload.len() as u32,
            run_length: 1,
        });
        tile_data.extend_from_slice(&payload);
    }

    let mut leaves = Vec::new();
    let root_entries = match options.leaf_size {
        Some(size) => {
            let mut root = Vec::new();
            for chunk in entries.chunks(size) {
                let leaf = compress(&encode_directory(chunk), options.internal_compression);
                root.push(DirEntry {
                    tile_id: chunk[0].tile_id,
                    offset: leaves.len() as u64,
                    length: leaf.len() as u32,
                    run_length: 0,
                });
                leaves.extend_from_slice(&leaf);
            }
            root
        }
        None => entries,
    };
    let root = compress(&encode_directory(&root_entries), options.internal_compression);
    let metadata = compress(options.metadata.as_bytes(), options.internal_compression);

    let root_offset = 127u64;
    let metadata_offset = root_offset + root.len() as u64;
    let leaf_offset = metadata_offset + metadata.len() as u64;
    let data_offset = leaf_offset + leaves.len() as u64;

    let mut header = Vec::with_capacity(127);
    header.extend_from_slice(b"PMTiles");
    header.push(3);
    for value in [
        root_offset,
        root.len() as u64,
        metadata_offset,
        metadata.len() as u64,
        leaf_offset,
        leaves.len() as u64,
        data_offset,
        tile_data.len() as u64,
        tiles.len() as u64,
        tiles.len() as u64,
        tiles.len() as u64,
    ] {
        header.extend_from_slice(&value.to_le_bytes());
    }
    header.push(1); // clustered
    header.push(options.internal_compression);
    header.push(options.tile_compression);
    header.push(options.tile_type);
    header.push(options.min_zoom);
    header.push(options.max_zoom);
    for value in [-1_800_000_000i32, -850_000_000, 1_800_000_000, 850_000_000] {
        header.extend_from_slice(&value.to_le_bytes());
    }
    header.push(options.min_zoom); // center_zoom
    header.extend_from_slice(&0i32.to_le_bytes());
    header.extend_from_slice(&0i32.to_le_bytes());
    assert_eq!(header.len(), 127);

    let mut file = File::create(path).expect("create pmtiles");
    file.write_all(&header).expect("write header");
    file.write_all(&root).expect("write root");
    file.write_all(&metadata).expect("write metadata");
    file.write_all(&leaves).expect("write leaves");
    file.write_all(&tile_data).expect("write tiles");
}

/// Point tile in one layer; each point carries string tags.
pub fn point_tile(layer_name: &str, points: &[(f32, f32, &[(&str, &str)])]) -> Vec<u8> {
    let mut tile = Tile::new(4096);
    let mut layer = tile.create_layer(layer_name);
    for (x, y, tags) in points {
        let geom = GeomEncoder::new(GeomType::Point)
            .point(*x, *y)
            .expect("point")
            .encode()
            .expect("encode");
        let mut feature = layer.into_feature(geom);
        for (key, value) in tags.iter() {
            feature.add_tag_string(key, value);
        }
        layer = feature.into_layer();
    }
    tile.add_layer(layer).expect("add layer");
    tile.to_bytes().expect("tile bytes")
}

/// Point tile whose features carry an unsigned `gn` count.
pub fn counted_point_tile(points: &[(f32, f32, u64)]) -> Vec<u8> {
    let mut tile = Tile::new(4096);
    let mut layer = tile.create_layer("points");
    for (x, y, count) in points {
        let geom = GeomEncoder::new(GeomType::Point)
            .point(*x, *y)
            .expect("point")
            .encode()
            .expect("encode");
        let mut feature = layer.into_feature(geom);
        feature.add_tag_uint("gn", *count);
        layer = feature.into_layer();
    }
    tile.add_layer(layer).expect("add layer");
    tile.to_bytes().expect("tile bytes")
}

/// `n` untagged points spread along the diagonal.
pub fn n_point_tile(n: usize) -> Vec<u8> {
    let points: Vec<(f32, f32, &[(&str, &str)])> = (0..n)
        .map(|i| {
            let v = (i * 37 % 4096) as f32;
            (v, v, NO_TAGS)
        })
        .collect();
    point_tile("points", &points)
}

/// Polygon tile; rings are given without the closing vertex.
pub fn polygon_tile(layer_name: &str, rings: &[(&[(f32, f32)], &[(&str, &str)])]) -> Vec<u8> {
    let mut tile = Tile::new(4096);
    let mut layer = tile.create_layer(layer_name);
    for (ring, tags) in rings {
        let mut encoder = GeomEncoder::new(GeomType::Polygon);
        for (x, y) in ring.iter() {
            encoder.add_point(*x, *y).expect("vertex");
        }
        let geom = encoder.encode().expect("encode");
        let mut feature = layer.into_feature(geom);
        for (key, value) in tags.iter() {
            feature.add_tag_string(key, value);
        }
        layer = feature.into_layer();
    }
    tile.add_layer(layer).expect("add layer");
    tile.to_bytes().expect("tile bytes")
}
