//! Minimal GeoJSON geometry decoding (Polygon and MultiPolygon)

use crate::types::{RevisitError, RevisitResult};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde_json::Value;

/// Decode a GeoJSON geometry object.
///
/// Returns `Ok(None)` for a `null` geometry and for geometry types that carry
/// no area (points, lines). Malformed coordinates are an error.
pub fn geometry_from_value(geometry: &Value) -> RevisitResult<Option<MultiPolygon<f64>>> {
    if geometry.is_null() {
        return Ok(None);
    }

    let kind = geometry
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| RevisitError::Geometry("Geometry without a type".to_string()))?;
    let coordinates = geometry.get("coordinates");

    match (kind, coordinates) {
        ("Polygon", Some(coords)) => Ok(Some(MultiPolygon(vec![polygon_from_value(coords)?]))),
        ("MultiPolygon", Some(Value::Array(parts))) => {
            let polygons = parts
                .iter()
                .map(polygon_from_value)
                .collect::<RevisitResult<Vec<_>>>()?;
            Ok(Some(MultiPolygon(polygons)))
        }
        ("Polygon", None) | ("MultiPolygon", _) => Err(RevisitError::Geometry(format!(
            "{} without coordinates array",
            kind
        ))),
        (other, _) => {
            log::debug!("Ignoring non-areal geometry type {}", other);
            Ok(None)
        }
    }
}

fn polygon_from_value(value: &Value) -> RevisitResult<Polygon<f64>> {
    let rings = value
        .as_array()
        .ok_or_else(|| RevisitError::Geometry("Polygon rings must be an array".to_string()))?;

    let mut rings = rings.iter().map(ring_from_value);
    let exterior = match rings.next() {
        Some(ring) => ring?,
        None => LineString(Vec::new()),
    };
    let interiors = rings.collect::<RevisitResult<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn ring_from_value(value: &Value) -> RevisitResult<LineString<f64>> {
    let points = value
        .as_array()
        .ok_or_else(|| RevisitError::Geometry("Ring must be an array of positions".to_string()))?;

    points
        .iter()
        .map(|p| {
            let pos = p.as_array().filter(|a| a.len() >= 2).ok_or_else(|| {
                RevisitError::Geometry(format!("Invalid position: {}", p))
            })?;
            match (pos[0].as_f64(), pos[1].as_f64()) {
                (Some(x), Some(y)) => Ok(Coord { x, y }),
                _ => Err(RevisitError::Geometry(format!("Non-numeric position: {}", p))),
            }
        })
        .collect::<RevisitResult<Vec<_>>>()
        .map(LineString)
}
