//! Zoom, tile and feature level selection for spatial queries.

use crate::error::QueryError;
use crate::geometry::{Polygon, Rectangle};
use crate::mercator::{GlobalPolygon, tile_bounds, tile_column, tile_row};
use crate::pmtiles::Header;

/// Which zoom levels of the directory a query touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomSelection {
    Exact(u8),
    All,
}

impl ZoomSelection {
    pub fn admits(&self, zoom: u8) -> bool {
        match self {
            ZoomSelection::Exact(z) => *z == zoom,
            ZoomSelection::All => true,
        }
    }
}

/// Resolves an optional zoom to a concrete level, defaulting to the
/// archive's maximum zoom.
pub fn resolve_zoom(requested: Option<u8>, header: &Header) -> Result<u8, QueryError> {
    let zoom = requested.unwrap_or(header.max_zoom);
    if zoom < header.min_zoom || zoom > header.max_zoom {
        return Err(QueryError::ZoomUnavailable {
            zoom,
            min_zoom: header.min_zoom,
            max_zoom: header.max_zoom,
        });
    }
    Ok(zoom)
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Query rectangle with optional sides; `None` means unconstrained.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueryBounds {
    pub min_x: Option<f64>,
    pub min_y: Option<f64>,
    pub max_x: Option<f64>,
    pub max_y: Option<f64>,
}

impl QueryBounds {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Non-finite sides (NaN, ±inf) are dropped.
    pub fn new(
        min_x: Option<f64>,
        min_y: Option<f64>,
        max_x: Option<f64>,
        max_y: Option<f64>,
    ) -> Self {
        Self {
            min_x: finite(min_x),
            min_y: finite(min_y),
            max_x: finite(max_x),
            max_y: finite(max_y),
        }
    }

    pub fn from_rect(rect: &Rectangle) -> Self {
        Self::new(
            Some(rect.min.x),
            Some(rect.min.y),
            Some(rect.max.x),
            Some(rect.max.y),
        )
    }

    pub fn is_unbounded(&self) -> bool {
        self.min_x.is_none() && self.min_y.is_none() && self.max_x.is_none() && self.max_y.is_none()
    }

    fn admits_min(&self, x: f64, y: f64) -> bool {
        self.min_x.is_none_or(|m| x >= m) && self.min_y.is_none_or(|m| y >= m)
    }

    fn admits_max(&self, x: f64, y: f64) -> bool {
        self.max_x.is_none_or(|m| x <= m) && self.max_y.is_none_or(|m| y <= m)
    }
}

/// Inclusive tile index range at one zoom. Rows are inverted relative to
/// Mercator Y, so `min_y` comes from the query's `max_y` and vice versa.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileRange {
    pub min_x: Option<i64>,
    pub max_x: Option<i64>,
    pub min_y: Option<i64>,
    pub max_y: Option<i64>,
}

impl TileRange {
    pub fn for_bounds(bounds: &QueryBounds, zoom: u8) -> Self {
        Self {
            min_x: bounds.min_x.map(|x| tile_column(x, zoom)),
            max_x: bounds.max_x.map(|x| tile_column(x, zoom)),
            min_y: bounds.max_y.map(|y| tile_row(y, zoom)),
            max_y: bounds.min_y.map(|y| tile_row(y, zoom)),
        }
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        self.min_x.is_none_or(|m| x >= m)
            && self.max_x.is_none_or(|m| x <= m)
            && self.min_y.is_none_or(|m| y >= m)
            && self.max_y.is_none_or(|m| y <= m)
    }
}

/// A bounding box and/or polygon set evaluated at one zoom level.
#[derive(Debug, Clone)]
pub struct SpatialQuery {
    zoom: u8,
    bounds: QueryBounds,
    polygons: Vec<Polygon>,
    range: TileRange,
}

impl SpatialQuery {
    pub fn new(zoom: u8, bounds: QueryBounds, polygons: Vec<Polygon>) -> Self {
        let range = TileRange::for_bounds(&bounds, zoom);
        Self {
            zoom,
            bounds,
            polygons,
            range,
        }
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn bounds(&self) -> &QueryBounds {
        &self.bounds
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn tile_range(&self) -> &TileRange {
        &self.range
    }

    /// Per-tile filter, or `None` when the tile can be skipped without
    /// decoding. Corner checks are enabled only for tiles on the matching
    /// boundary row or column; interior tiles need no per-feature bounds test.
    pub fn tile_filter(&self, tile_x: u32, tile_y: u32) -> Option<TileFilter<'_>> {
        let (tx, ty) = (tile_x as i64, tile_y as i64);
        if !self.range.contains(tx, ty) {
            return None;
        }
        if !self.polygons.is_empty() {
            let rect = tile_bounds(self.zoom, tx, ty);
            if !self.polygons.iter().any(|p| p.bbox().intersects(&rect)) {
                return None;
            }
        }
        Some(TileFilter {
            bounds: self.bounds,
            check_min: self.range.min_x == Some(tx) || self.range.max_y == Some(ty),
            check_max: self.range.max_x == Some(tx) || self.range.min_y == Some(ty),
            polygons: &self.polygons,
        })
    }
}

/// Feature-level filter for one admitted tile.
#[derive(Debug, Clone, Copy)]
pub struct TileFilter<'a> {
    bounds: QueryBounds,
    check_min: bool,
    check_max: bool,
    polygons: &'a [Polygon],
}

impl<'a> TileFilter<'a> {
    /// Admits everything; used for unfiltered scans.
    pub fn pass_all() -> Self {
        Self {
            bounds: QueryBounds::unbounded(),
            check_min: false,
            check_max: false,
            polygons: &[],
        }
    }

    pub fn checks_min(&self) -> bool {
        self.check_min
    }

    pub fn checks_max(&self) -> bool {
        self.check_max
    }

    pub fn admits_point(&self, x: f64, y: f64) -> bool {
        if self.check_min && !self.bounds.admits_min(x, y) {
            return false;
        }
        if self.check_max && !self.bounds.admits_max(x, y) {
            return false;
        }
        self.polygons.is_empty() || self.polygons.iter().any(|p| p.contains_point(x, y))
    }

    /// Approximate polygon test. Bounds constraints pass when the feature's
    /// bounding box overlaps the allowed side. Against query polygons the
    /// feature passes when either bbox corner or any vertex lies inside;
    /// a feature crossing a polygon edge with no such point is missed.
    pub fn admits_polygon(&self, polygon: &GlobalPolygon) -> bool {
        let bbox = polygon.bbox();
        if bbox.is_empty() {
            return false;
        }
        if self.check_min && !self.bounds.admits_min(bbox.max.x, bbox.max.y) {
            return false;
        }
        if self.check_max && !self.bounds.admits_max(bbox.min.x, bbox.min.y) {
            return false;
        }
        if self.polygons.is_empty() {
            return true;
        }
        self.polygons.iter().any(|query| {
            if !query.bbox().intersects(bbox) {
                return false;
            }
            query.contains_point(bbox.min.x, bbox.min.y)
                || query.contains_point(bbox.max.x, bbox.max.y)
                || polygon
                    .points()
                    .iter()
                    .any(|p| query.contains_point(p.x(), p.y()))
        })
    }
}
