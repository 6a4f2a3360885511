//! Vector tile decoding into global-coordinate feature frames.

use std::collections::HashMap;

use geo_types::{Coord, Geometry};
use mvt_reader::Reader;
use mvt_reader::feature::Value;
use mvt_reader::layer::Layer;
use tracing::warn;

use crate::error::DecodeError;
use crate::filter::TileFilter;
use crate::mercator::{GlobalPoint, GlobalPolygon, TILE_EXTENT};
use crate::pmtiles::TileEntry;

/// Columnar feature rows: one geometry per row plus named string columns.
#[derive(Debug, Clone)]
pub struct FeatureFrame<G> {
    geometries: Vec<G>,
    names: Vec<String>,
    columns: Vec<Vec<String>>,
}

pub type PointFrame = FeatureFrame<GlobalPoint>;
pub type PolygonFrame = FeatureFrame<GlobalPolygon>;

impl<G> Default for FeatureFrame<G> {
    fn default() -> Self {
        Self {
            geometries: Vec::new(),
            names: Vec::new(),
            columns: Vec::new(),
        }
    }
}

impl<G> FeatureFrame<G> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.geometries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }

    pub fn geometries(&self) -> &[G] {
        &self.geometries
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, idx: usize) -> &[String] {
        &self.columns[idx]
    }

    /// Appends a row. The first row of an empty frame fixes the column
    /// layout; later rows must carry the same names in the same order.
    pub fn push_row(&mut self, geometry: G, properties: Vec<(String, String)>) -> Result<(), DecodeError> {
        if self.geometries.is_empty() {
            self.names = properties.iter().map(|(k, _)| k.clone()).collect();
            self.columns = vec![Vec::new(); self.names.len()];
        } else if properties.len() != self.names.len()
            || properties.iter().zip(&self.names).any(|((k, _), name)| k != name)
        {
            return Err(DecodeError::ColumnMismatch {
                expected: self.names.clone(),
                found: properties.into_iter().map(|(k, _)| k).collect(),
            });
        }
        for (column, (_, value)) in self.columns.iter_mut().zip(properties) {
            column.push(value);
        }
        self.geometries.push(geometry);
        Ok(())
    }

    /// Drops rows but keeps the column names.
    pub fn clear_rows(&mut self) {
        self.geometries.clear();
        for column in &mut self.columns {
            column.clear();
        }
    }

    /// Row `idx` as `(geometry, values)` with values in column order.
    pub fn row(&self, idx: usize) -> (&G, Vec<&str>) {
        let values = self.columns.iter().map(|c| c[idx].as_str()).collect();
        (&self.geometries[idx], values)
    }
}

pub fn format_property_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Float(val) => val.to_string(),
        Value::Double(val) => val.to_string(),
        Value::Int(val) => val.to_string(),
        Value::UInt(val) => val.to_string(),
        Value::SInt(val) => val.to_string(),
        Value::Bool(val) => val.to_string(),
        Value::Null => "null".to_string(),
    }
}

/// Properties sorted by key, since the decoder does not preserve tag order.
fn sorted_properties(properties: Option<HashMap<String, Value>>) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = properties
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let text = format_property_value(&value);
            (key, text)
        })
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

fn geometry_name(geometry: &Geometry<f32>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "point",
        Geometry::MultiPoint(_) => "multipoint",
        Geometry::Line(_) | Geometry::LineString(_) => "linestring",
        Geometry::MultiLineString(_) => "multilinestring",
        Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => "polygon",
        Geometry::MultiPolygon(_) => "multipolygon",
        Geometry::GeometryCollection(_) => "geometrycollection",
    }
}

fn open_tile(bytes: Vec<u8>) -> Result<(Reader, Vec<Layer>), DecodeError> {
    let reader = Reader::new(bytes).map_err(|err| DecodeError::Tile(err.to_string()))?;
    let layers = reader
        .get_layer_metadata()
        .map_err(|err| DecodeError::Tile(format!("read layer metadata: {err}")))?;
    Ok((reader, layers))
}

/// Multiplier from a layer's extent to `TILE_EXTENT` local units.
fn extent_scale(layer: &Layer) -> f64 {
    if layer.extent == 0 {
        1.0
    } else {
        TILE_EXTENT as f64 / layer.extent as f64
    }
}

fn single_point(geometry: &Geometry<f32>, layer: &str) -> Result<Coord<f32>, DecodeError> {
    match geometry {
        Geometry::Point(point) => Ok(point.0),
        Geometry::MultiPoint(points) if points.0.len() == 1 => Ok(points.0[0].0),
        Geometry::MultiPoint(_) => Err(DecodeError::MultiPart {
            layer: layer.to_string(),
            kind: "point",
        }),
        other => Err(DecodeError::UnexpectedGeometry {
            layer: layer.to_string(),
            expected: "point",
            found: geometry_name(other),
        }),
    }
}

fn single_ring<'g>(geometry: &'g Geometry<f32>, layer: &str) -> Result<&'g [Coord<f32>], DecodeError> {
    let polygon = match geometry {
        Geometry::Polygon(polygon) => polygon,
        Geometry::MultiPolygon(polygons) if polygons.0.len() == 1 => &polygons.0[0],
        Geometry::MultiPolygon(_) => {
            return Err(DecodeError::MultiPart {
                layer: layer.to_string(),
                kind: "polygon",
            });
        }
        other => {
            return Err(DecodeError::UnexpectedGeometry {
                layer: layer.to_string(),
                expected: "polygon",
                found: geometry_name(other),
            });
        }
    };
    if !polygon.interiors().is_empty() {
        return Err(DecodeError::PolygonHoles {
            layer: layer.to_string(),
        });
    }
    Ok(&polygon.exterior().0)
}

/// Decodes every point feature of a tile, appending those admitted by
/// `filter` to `frame`. Returns the number of rows appended.
pub fn decode_points(
    bytes: Vec<u8>,
    entry: &TileEntry,
    filter: &TileFilter<'_>,
    frame: &mut PointFrame,
) -> Result<usize, DecodeError> {
    let (reader, layers) = open_tile(bytes)?;
    let (tx, ty) = (entry.x as i64, entry.y as i64);
    let mut appended = 0;
    for layer in &layers {
        let scale = extent_scale(layer);
        let features = reader
            .get_features(layer.layer_index)
            .map_err(|err| DecodeError::Tile(format!("read layer {}: {err}", layer.name)))?;
        for feature in features {
            let coord = single_point(&feature.geometry, &layer.name)?;
            let point = GlobalPoint::from_tile(
                entry.zoom,
                tx,
                ty,
                coord.x as f64 * scale,
                coord.y as f64 * scale,
            );
            if !filter.admits_point(point.x(), point.y()) {
                continue;
            }
            frame.push_row(point, sorted_properties(feature.properties))?;
            appended += 1;
        }
    }
    Ok(appended)
}

/// Polygon counterpart of [`decode_points`]; each feature must be a single
/// ring without holes.
pub fn decode_polygons(
    bytes: Vec<u8>,
    entry: &TileEntry,
    filter: &TileFilter<'_>,
    frame: &mut PolygonFrame,
) -> Result<usize, DecodeError> {
    let (reader, layers) = open_tile(bytes)?;
    let (tx, ty) = (entry.x as i64, entry.y as i64);
    let mut appended = 0;
    for layer in &layers {
        let scale = extent_scale(layer);
        let features = reader
            .get_features(layer.layer_index)
            .map_err(|err| DecodeError::Tile(format!("read layer {}: {err}", layer.name)))?;
        for feature in features {
            let ring = single_ring(&feature.geometry, &layer.name)?;
            let mut polygon = GlobalPolygon::with_capacity(entry.zoom, ring.len());
            for coord in ring {
                polygon.push_tile(tx, ty, coord.x as f64 * scale, coord.y as f64 * scale);
            }
            if !filter.admits_polygon(&polygon) {
                continue;
            }
            frame.push_row(polygon, sorted_properties(feature.properties))?;
            appended += 1;
        }
    }
    Ok(appended)
}

/// Total number of features across all layers.
pub fn count_features(bytes: Vec<u8>) -> Result<u64, DecodeError> {
    let (_, layers) = open_tile(bytes)?;
    Ok(layers.iter().map(|layer| layer.feature_count as u64).sum())
}

/// A point in integer local units with its count weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedPoint {
    pub x: i32,
    pub y: i32,
    pub weight: u64,
}

fn parse_weight(value: &Value, field: &str) -> u64 {
    let parsed = match value {
        Value::Int(v) => u64::try_from(*v).ok(),
        Value::SInt(v) => u64::try_from(*v).ok(),
        Value::UInt(v) => Some(*v),
        Value::Float(v) if v.fract() == 0.0 && *v >= 0.0 => Some(*v as u64),
        Value::Double(v) if v.fract() == 0.0 && *v >= 0.0 => Some(*v as u64),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    parsed.unwrap_or_else(|| {
        warn!(
            field,
            value = %format_property_value(value),
            "count attribute is not a non-negative integer; using 0"
        );
        0
    })
}

/// Decodes point features as integer local coordinates with weights from
/// `count_field`. Features lacking the field weigh 1, as do all features
/// when no field is given.
pub fn decode_weighted_points(
    bytes: Vec<u8>,
    count_field: Option<&str>,
) -> Result<Vec<WeightedPoint>, DecodeError> {
    let (reader, layers) = open_tile(bytes)?;
    let mut points = Vec::new();
    for layer in &layers {
        let scale = extent_scale(layer);
        let features = reader
            .get_features(layer.layer_index)
            .map_err(|err| DecodeError::Tile(format!("read layer {}: {err}", layer.name)))?;
        points.reserve(features.len());
        for feature in features {
            let coord = single_point(&feature.geometry, &layer.name)?;
            let weight = match (count_field, feature.properties.as_ref()) {
                (Some(field), Some(props)) => props.get(field).map_or(1, |v| parse_weight(v, field)),
                _ => 1,
            };
            points.push(WeightedPoint {
                x: (coord.x as f64 * scale).floor() as i32,
                y: (coord.y as f64 * scale).floor() as i32,
                weight,
            });
        }
    }
    Ok(points)
}
