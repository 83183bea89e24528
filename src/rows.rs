//! Shaping index rows for output.

use crate::bbox::Interval;
use crate::error::Result;
use geo::Geometry;
use serde_json::{Map, Value, json};

/// Value stored under a key: either a single value or every value emitted
/// for the same key by one document.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Single(Value),
    Dups(Vec<Value>),
}

/// A row as it comes out of the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub key: Vec<Interval>,
    pub doc_id: String,
    pub geometry: Option<Geometry<f64>>,
    pub value: StoredValue,
}

/// A row with exactly one value.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Minimum bounding box, one interval per dimension
    pub key: Vec<Interval>,
    pub doc_id: String,
    pub geometry: Option<Geometry<f64>>,
    pub value: Value,
}

/// Expands duplicate rows into one row per value.
///
/// Rows keep their input order; the values of a duplicate row come out in
/// the order they were stored.
pub fn expand_dups(rows: Vec<StoredRow>) -> Vec<Row> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let StoredRow {
            key,
            doc_id,
            geometry,
            value,
        } = row;
        match value {
            StoredValue::Single(value) => out.push(Row {
                key,
                doc_id,
                geometry,
                value,
            }),
            StoredValue::Dups(values) => out.extend(values.into_iter().map(|value| Row {
                key: key.clone(),
                doc_id: doc_id.clone(),
                geometry: geometry.clone(),
                value,
            })),
        }
    }
    out
}

/// Encodes a geometry for output.
pub trait GeometryEncoder {
    fn encode(&self, geometry: &Geometry<f64>) -> Result<Value>;
}

/// Encodes geometries as GeoJSON geometry objects.
#[cfg(feature = "geojson")]
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoJsonEncoder;

#[cfg(feature = "geojson")]
impl GeometryEncoder for GeoJsonEncoder {
    fn encode(&self, geometry: &Geometry<f64>) -> Result<Value> {
        let geom = geojson::Geometry::new(geojson::Value::from(geometry));
        Ok(serde_json::to_value(&geom)?)
    }
}

/// Builds the external shape of a row: `{id, key, value}`, plus `bbox` as
/// `[W, S, E, N]` and `geometry` when the row carries a geometry.
///
/// The first two key intervals are the geometry's own bounding box.
pub fn row_to_json<E: GeometryEncoder + ?Sized>(row: &Row, encoder: &E) -> Result<Value> {
    let mut obj = Map::new();
    obj.insert("id".to_string(), Value::String(row.doc_id.clone()));
    obj.insert("key".to_string(), serde_json::to_value(&row.key)?);

    if let Some(geometry) = &row.geometry {
        if let [x, y, ..] = row.key.as_slice() {
            obj.insert("bbox".to_string(), json!([x.min, y.min, x.max, y.max]));
        }
        obj.insert("geometry".to_string(), encoder.encode(geometry)?);
    }

    obj.insert("value".to_string(), row.value.clone());
    Ok(Value::Object(obj))
}
