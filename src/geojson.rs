//! Query polygons from GeoJSON. Coordinates are taken as EPSG:3857 meters.

use std::fs;
use std::path::Path;

use geo_types::Coord;
use serde_json::Value;

use crate::error::GeoJsonError;
use crate::geometry::Polygon;

pub fn load_polygons(path: &Path) -> Result<Vec<Polygon>, GeoJsonError> {
    let text = fs::read_to_string(path).map_err(|source| GeoJsonError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let value: Value = serde_json::from_str(&text)?;
    parse_polygons(&value)
}

/// Accepts a FeatureCollection, a Feature, or a bare Polygon/MultiPolygon.
pub fn parse_polygons(value: &Value) -> Result<Vec<Polygon>, GeoJsonError> {
    let mut out = Vec::new();
    collect(value, &mut out)?;
    Ok(out)
}

fn type_of(value: &Value) -> Result<&str, GeoJsonError> {
    value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| GeoJsonError::UnsupportedType("object without a type".to_string()))
}

fn collect(value: &Value, out: &mut Vec<Polygon>) -> Result<(), GeoJsonError> {
    match type_of(value)? {
        "FeatureCollection" => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| GeoJsonError::Coordinates("missing features array".to_string()))?;
            for feature in features {
                collect(feature, out)?;
            }
        }
        "Feature" => {
            let geometry = value
                .get("geometry")
                .ok_or_else(|| GeoJsonError::Coordinates("feature without geometry".to_string()))?;
            collect(geometry, out)?;
        }
        "Polygon" => out.push(polygon(coordinates(value)?)?),
        "MultiPolygon" => {
            let polygons = coordinates(value)?
                .as_array()
                .ok_or_else(|| GeoJsonError::Coordinates("multipolygon is not an array".to_string()))?;
            for rings in polygons {
                out.push(polygon(rings)?);
            }
        }
        other => return Err(GeoJsonError::UnsupportedType(other.to_string())),
    }
    Ok(())
}

fn coordinates(value: &Value) -> Result<&Value, GeoJsonError> {
    value
        .get("coordinates")
        .ok_or_else(|| GeoJsonError::Coordinates("missing coordinates".to_string()))
}

fn polygon(rings: &Value) -> Result<Polygon, GeoJsonError> {
    let rings = rings
        .as_array()
        .ok_or_else(|| GeoJsonError::Coordinates("polygon is not an array of rings".to_string()))?;
    match rings.len() {
        0 => Err(GeoJsonError::Coordinates("polygon has no rings".to_string())),
        1 => Ok(Polygon::new(ring(&rings[0])?)),
        _ => Err(GeoJsonError::Holes),
    }
}

fn ring(value: &Value) -> Result<Vec<Coord<f64>>, GeoJsonError> {
    let positions = value
        .as_array()
        .ok_or_else(|| GeoJsonError::Coordinates("ring is not an array".to_string()))?;
    positions
        .iter()
        .map(|position| {
            let pair = position.as_array().filter(|p| p.len() >= 2);
            match pair.map(|p| (p[0].as_f64(), p[1].as_f64())) {
                Some((Some(x), Some(y))) => Ok(Coord { x, y }),
                _ => Err(GeoJsonError::Coordinates(format!("invalid position {position}"))),
            }
        })
        .collect()
}
