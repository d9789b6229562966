//! Planar geometry over `[lon, lat]` coordinates.

use serde_json::Value;

pub type Coord = [f64; 2];
pub type Ring = Vec<Coord>;
/// Outer ring first, holes after it.
pub type Polygon = Vec<Ring>;

/// Ray-casting containment test against the outer ring.
///
/// Holes are ignored. Rings with fewer than three vertices contain nothing.
/// The half-open `(yi > y) != (yj > y)` test counts a vertex lying on the ray
/// exactly once and skips horizontal edges.
pub fn contains(polygon: &Polygon, point: Coord) -> bool {
    let Some(ring) = polygon.first() else {
        return false;
    };
    if ring.len() < 3 {
        return false;
    }
    let [x, y] = point;
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let [xi, yi] = ring[i];
        let [xj, yj] = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Arithmetic mean of every vertex of the outer ring, a repeated closing
/// vertex included.
pub fn centroid(polygon: &Polygon) -> Option<Coord> {
    let ring = polygon.first()?;
    if ring.is_empty() {
        return None;
    }
    let count = ring.len() as f64;
    let (sx, sy) = ring
        .iter()
        .fold((0.0, 0.0), |(sx, sy), [x, y]| (sx + x, sy + y));
    Some([sx / count, sy / count])
}

/// Mean of the centroids of every polygon that has one.
pub fn mean_centroid<'a>(polygons: impl IntoIterator<Item = &'a Polygon>) -> Option<Coord> {
    let centroids: Vec<Coord> = polygons.into_iter().filter_map(centroid).collect();
    if centroids.is_empty() {
        return None;
    }
    let count = centroids.len() as f64;
    let (sx, sy) = centroids
        .iter()
        .fold((0.0, 0.0), |(sx, sy), [x, y]| (sx + x, sy + y));
    Some([sx / count, sy / count])
}

pub fn coord_from_json(value: &Value) -> Option<Coord> {
    let items = value.as_array()?;
    match items.as_slice() {
        [x, y, ..] => Some([x.as_f64()?, y.as_f64()?]),
        _ => None,
    }
}

pub fn ring_from_json(value: &Value) -> Option<Ring> {
    value.as_array()?.iter().map(coord_from_json).collect()
}

pub fn polygon_from_json(value: &Value) -> Option<Polygon> {
    value.as_array()?.iter().map(ring_from_json).collect()
}

pub fn coord_to_json(coord: Coord) -> Value {
    Value::from(coord.to_vec())
}

pub fn polygon_to_json(polygon: &Polygon) -> Value {
    Value::Array(
        polygon
            .iter()
            .map(|ring| Value::Array(ring.iter().copied().map(coord_to_json).collect()))
            .collect(),
    )
}
