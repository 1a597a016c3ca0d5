use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Position = [f64; 2];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    LineString { coordinates: Vec<Position> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPoint { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<Geometry> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
}

impl Geometry {
    pub fn kind(&self) -> GeometryKind {
        match self {
            Geometry::Point { .. } => GeometryKind::Point,
            Geometry::LineString { .. } => GeometryKind::LineString,
            Geometry::Polygon { .. } => GeometryKind::Polygon,
            Geometry::MultiPoint { .. } => GeometryKind::MultiPoint,
            Geometry::MultiLineString { .. } => GeometryKind::MultiLineString,
            Geometry::MultiPolygon { .. } => GeometryKind::MultiPolygon,
            Geometry::GeometryCollection { .. } => GeometryKind::GeometryCollection,
        }
    }

    /// Parses a GeoJSON geometry object. Extra ordinates (z, m) are dropped.
    pub fn from_geojson(value: &Value) -> Result<Geometry, String> {
        let object = value
            .as_object()
            .ok_or_else(|| "geometry is not an object".to_string())?;
        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| "geometry has no type".to_string())?;

        if kind == "GeometryCollection" {
            let members = object
                .get("geometries")
                .and_then(Value::as_array)
                .ok_or_else(|| "GeometryCollection without geometries".to_string())?;
            let geometries = members
                .iter()
                .map(Geometry::from_geojson)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Geometry::GeometryCollection { geometries });
        }

        let coordinates = object
            .get("coordinates")
            .ok_or_else(|| format!("{} without coordinates", kind))?;
        let geometry = match kind {
            "Point" => Geometry::Point {
                coordinates: position(coordinates)?,
            },
            "LineString" => Geometry::LineString {
                coordinates: positions(coordinates)?,
            },
            "Polygon" => Geometry::Polygon {
                coordinates: rings(coordinates)?,
            },
            "MultiPoint" => Geometry::MultiPoint {
                coordinates: positions(coordinates)?,
            },
            "MultiLineString" => Geometry::MultiLineString {
                coordinates: rings(coordinates)?,
            },
            "MultiPolygon" => Geometry::MultiPolygon {
                coordinates: array(coordinates)?
                    .iter()
                    .map(rings)
                    .collect::<Result<Vec<_>, _>>()?,
            },
            other => return Err(format!("unsupported geometry type '{}'", other)),
        };
        Ok(geometry)
    }

    /// Short human readable form used in table previews.
    pub fn summary(&self) -> String {
        match self {
            Geometry::Point { coordinates } => {
                format!("POINT ({} {})", coordinates[0], coordinates[1])
            }
            Geometry::LineString { coordinates } => {
                format!("LINESTRING ({} points)", coordinates.len())
            }
            Geometry::Polygon { coordinates } => {
                format!("POLYGON ({} rings)", coordinates.len())
            }
            Geometry::MultiPoint { coordinates } => {
                format!("MULTIPOINT ({} points)", coordinates.len())
            }
            Geometry::MultiLineString { coordinates } => {
                format!("MULTILINESTRING ({} lines)", coordinates.len())
            }
            Geometry::MultiPolygon { coordinates } => {
                format!("MULTIPOLYGON ({} polygons)", coordinates.len())
            }
            Geometry::GeometryCollection { geometries } => {
                format!("GEOMETRYCOLLECTION ({} members)", geometries.len())
            }
        }
    }
}

fn array(value: &Value) -> Result<&Vec<Value>, String> {
    value
        .as_array()
        .ok_or_else(|| format!("expected an array, got {}", value))
}

fn position(value: &Value) -> Result<Position, String> {
    let ordinates = array(value)?;
    match (
        ordinates.first().and_then(Value::as_f64),
        ordinates.get(1).and_then(Value::as_f64),
    ) {
        (Some(x), Some(y)) => Ok([x, y]),
        _ => Err(format!("invalid position {}", value)),
    }
}

fn positions(value: &Value) -> Result<Vec<Position>, String> {
    array(value)?.iter().map(position).collect()
}

fn rings(value: &Value) -> Result<Vec<Vec<Position>>, String> {
    array(value)?.iter().map(positions).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeKind {
    String,
    Integer,
    Decimal,
    Boolean,
}

impl AttributeKind {
    /// Guesses the kind of a JSON value. `None` for null.
    pub fn of(value: &Value) -> Option<AttributeKind> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(AttributeKind::Boolean),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(AttributeKind::Integer),
            Value::Number(_) => Some(AttributeKind::Decimal),
            _ => Some(AttributeKind::String),
        }
    }

    /// The narrowest kind covering both.
    pub fn merge(self, other: AttributeKind) -> AttributeKind {
        use AttributeKind::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Integer, Decimal) | (Decimal, Integer) => Decimal,
            _ => String,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    pub kind: AttributeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub name: String,
    pub attributes: Vec<AttributeDef>,
    pub geometry: Option<GeometryKind>,
    pub crs: Option<String>,
}

impl FeatureSchema {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            geometry: None,
            crs: None,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub geometry: Option<Geometry>,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    pub schema: FeatureSchema,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(schema: FeatureSchema) -> Self {
        Self {
            schema,
            features: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Returns a copy whose schema carries `name`.
    pub fn renamed(&self, name: &str) -> FeatureCollection {
        let mut copy = self.clone();
        copy.schema.name = name.to_string();
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_point_drops_z() {
        let geometry =
            Geometry::from_geojson(&json!({"type": "Point", "coordinates": [13.4, 52.5, 34.0]}))
                .unwrap();
        assert_eq!(
            geometry,
            Geometry::Point {
                coordinates: [13.4, 52.5]
            }
        );
    }

    #[test]
    fn test_polygon() {
        let geometry = Geometry::from_geojson(&json!({
            "type": "Polygon",
            "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]
        }))
        .unwrap();
        assert_eq!(geometry.kind(), GeometryKind::Polygon);
        assert_eq!(geometry.summary(), "POLYGON (1 rings)");
    }

    #[test]
    fn test_invalid_position() {
        let err = Geometry::from_geojson(&json!({"type": "Point", "coordinates": ["a"]}))
            .unwrap_err();
        assert!(err.contains("invalid position"));
    }

    #[test]
    fn test_unknown_type() {
        let err = Geometry::from_geojson(&json!({"type": "Circle", "coordinates": [0, 0]}))
            .unwrap_err();
        assert!(err.contains("Circle"));
    }

    #[test]
    fn test_attribute_kind_merge() {
        assert_eq!(
            AttributeKind::Integer.merge(AttributeKind::Decimal),
            AttributeKind::Decimal
        );
        assert_eq!(
            AttributeKind::Boolean.merge(AttributeKind::Integer),
            AttributeKind::String
        );
        assert_eq!(AttributeKind::of(&json!(3)), Some(AttributeKind::Integer));
        assert_eq!(AttributeKind::of(&json!(3.5)), Some(AttributeKind::Decimal));
        assert_eq!(AttributeKind::of(&Value::Null), None);
    }

    #[test]
    fn test_renamed_keeps_features() {
        let mut collection = FeatureCollection::new(FeatureSchema::named("points"));
        collection.features.push(Feature {
            id: "points.1".into(),
            geometry: None,
            properties: Map::new(),
        });
        let renamed = collection.renamed("stations");
        assert_eq!(renamed.schema.name, "stations");
        assert_eq!(renamed.len(), 1);
        assert_eq!(collection.schema.name, "points");
    }
}
