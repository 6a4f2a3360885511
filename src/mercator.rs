//! Web Mercator (EPSG:3857) to tile and local pixel conversions.
//!
//! Local coordinates use the vector tile extent (`TILE_EXTENT` units per
//! tile side), the same unit decoded features carry, so no rescaling
//! happens between the decoder and the filters.

use crate::geometry::Rectangle;

pub const EARTH_RADIUS: f64 = 6_378_137.0;
pub const MERCATOR_BOUND: f64 = EARTH_RADIUS * std::f64::consts::PI;
pub const TILE_EXTENT_BITS: u32 = 12;
pub const TILE_EXTENT: u32 = 1 << TILE_EXTENT_BITS;
/// Substituted for NaN or infinite global coordinates.
pub const OFF_PLANE: f64 = 40_000_000.0;

fn sanitize(value: f64) -> f64 {
    if value.is_finite() { value } else { OFF_PLANE }
}

/// Width of one tile in meters.
pub fn tile_span(zoom: u8) -> f64 {
    2.0 * MERCATOR_BOUND / (1u64 << zoom) as f64
}

/// Meters per local unit.
pub fn scale_factor(zoom: u8) -> f64 {
    tile_span(zoom) / TILE_EXTENT as f64
}

/// Upper-left corner of a tile in global coordinates.
pub fn tile_origin(zoom: u8, tile_x: i64, tile_y: i64) -> (f64, f64) {
    let span = tile_span(zoom);
    (
        -MERCATOR_BOUND + tile_x as f64 * span,
        MERCATOR_BOUND - tile_y as f64 * span,
    )
}

pub fn tile_bounds(zoom: u8, tile_x: i64, tile_y: i64) -> Rectangle {
    let span = tile_span(zoom);
    let (left, top) = tile_origin(zoom, tile_x, tile_y);
    Rectangle::new(left, top - span, left + span, top)
}

/// Tile column holding global `x`.
pub fn tile_column(x: f64, zoom: u8) -> i64 {
    ((sanitize(x) + MERCATOR_BOUND) / tile_span(zoom)).floor() as i64
}

/// Tile row holding global `y`; rows grow southwards.
pub fn tile_row(y: f64, zoom: u8) -> i64 {
    ((MERCATOR_BOUND - sanitize(y)) / tile_span(zoom)).floor() as i64
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePosition {
    pub tile_x: i64,
    pub tile_y: i64,
    pub local_x: f64,
    pub local_y: f64,
}

pub fn global_to_tile(x: f64, y: f64, zoom: u8) -> TilePosition {
    let (x, y) = (sanitize(x), sanitize(y));
    let tile_x = tile_column(x, zoom);
    let tile_y = tile_row(y, zoom);
    let (origin_x, origin_y) = tile_origin(zoom, tile_x, tile_y);
    let scale = scale_factor(zoom);
    TilePosition {
        tile_x,
        tile_y,
        local_x: (x - origin_x) / scale,
        local_y: (origin_y - y) / scale,
    }
}

pub fn tile_to_global(tile_x: i64, tile_y: i64, zoom: u8, local_x: f64, local_y: f64) -> (f64, f64) {
    let (origin_x, origin_y) = tile_origin(zoom, tile_x, tile_y);
    let scale = scale_factor(zoom);
    (origin_x + local_x * scale, origin_y - local_y * scale)
}

/// A point known both globally and relative to its tile at one zoom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalPoint {
    zoom: u8,
    global_x: f64,
    global_y: f64,
    tile_x: i64,
    tile_y: i64,
    local_x: f64,
    local_y: f64,
}

impl GlobalPoint {
    pub fn from_global(zoom: u8, x: f64, y: f64) -> Self {
        let pos = global_to_tile(x, y, zoom);
        Self {
            zoom,
            global_x: sanitize(x),
            global_y: sanitize(y),
            tile_x: pos.tile_x,
            tile_y: pos.tile_y,
            local_x: pos.local_x,
            local_y: pos.local_y,
        }
    }

    pub fn from_tile(zoom: u8, tile_x: i64, tile_y: i64, local_x: f64, local_y: f64) -> Self {
        let (global_x, global_y) = tile_to_global(tile_x, tile_y, zoom, local_x, local_y);
        Self {
            zoom,
            global_x,
            global_y,
            tile_x,
            tile_y,
            local_x,
            local_y,
        }
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn x(&self) -> f64 {
        self.global_x
    }

    pub fn y(&self) -> f64 {
        self.global_y
    }

    pub fn tile(&self) -> (i64, i64) {
        (self.tile_x, self.tile_y)
    }

    pub fn local(&self) -> (f64, f64) {
        (self.local_x, self.local_y)
    }
}

/// Closed ring of global points with a running bounding box.
#[derive(Debug, Clone)]
pub struct GlobalPolygon {
    zoom: u8,
    points: Vec<GlobalPoint>,
    bbox: Rectangle,
}

impl GlobalPolygon {
    pub fn new(zoom: u8) -> Self {
        Self {
            zoom,
            points: Vec::new(),
            bbox: Rectangle::empty(),
        }
    }

    pub fn with_capacity(zoom: u8, capacity: usize) -> Self {
        Self {
            zoom,
            points: Vec::with_capacity(capacity),
            bbox: Rectangle::empty(),
        }
    }

    pub fn push(&mut self, point: GlobalPoint) {
        self.bbox.extend(point.x(), point.y());
        self.points.push(point);
    }

    pub fn push_tile(&mut self, tile_x: i64, tile_y: i64, local_x: f64, local_y: f64) {
        self.push(GlobalPoint::from_tile(self.zoom, tile_x, tile_y, local_x, local_y));
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn points(&self) -> &[GlobalPoint] {
        &self.points
    }

    pub fn bbox(&self) -> &Rectangle {
        &self.bbox
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
