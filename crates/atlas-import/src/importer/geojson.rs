use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::factory::FileImporterFactory;
use super::files::{bind_file, file_name, file_stem, FILE_SLOT};
use super::prompts::{normalize_crs, SchemaNamePrompt};
use super::{Importer, ImporterEnv, ImporterFactory, ImporterMonitor, ImporterSite, Preview, Verdict};
use crate::context::{ContextValue, Inbound, Outbound, OutputValue, Slot, TypeTag};
use crate::error::{ContextError, ImporterError};
use crate::model::{
    AttributeDef, AttributeKind, Feature, FeatureCollection, FeatureSchema, Geometry, GeometryKind,
};

const OUTPUT_SLOTS: &[Slot] = &[Slot::new("features", TypeTag::Features)];

/// GeoJSON without a `crs` member is WGS 84 longitude/latitude.
pub const DEFAULT_CRS: &str = "EPSG:4326";

pub fn factory(env: &ImporterEnv) -> Box<dyn ImporterFactory> {
    FileImporterFactory::boxed("geojson", &["geojson", "json"], env, |env| {
        Box::new(GeoJsonFileImporter::new(env.clone()))
    })
}

/// Parses a GeoJSON `FeatureCollection` or a single `Feature`.
///
/// Attribute kinds are merged across all features; a property that is an
/// integer in one feature and a decimal in another becomes a decimal.
pub fn parse_features(
    name: &str,
    document: &Value,
    limit: usize,
) -> Result<FeatureCollection, ImporterError> {
    let kind = document
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ImporterError::Format("The document has no GeoJSON type.".to_string()))?;
    let members: Vec<&Value> = match kind {
        "FeatureCollection" => document
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| ImporterError::Format("FeatureCollection without features.".to_string()))?
            .iter()
            .collect(),
        "Feature" => vec![document],
        other => {
            return Err(ImporterError::Format(format!(
                "Expected a Feature or FeatureCollection, found {}.",
                other
            )))
        }
    };
    if members.len() > limit {
        return Err(ImporterError::LimitExceeded {
            limit,
            found: members.len(),
        });
    }

    let mut schema = FeatureSchema::named(name);
    schema.crs = Some(declared_crs(document).unwrap_or_else(|| DEFAULT_CRS.to_string()));

    let mut features = Vec::with_capacity(members.len());
    for (index, member) in members.into_iter().enumerate() {
        let geometry = match member.get("geometry") {
            None => {
                return Err(ImporterError::Format(format!(
                    "Feature {} has no geometry member.",
                    index + 1
                )))
            }
            Some(Value::Null) => None,
            Some(value) => Some(Geometry::from_geojson(value).map_err(|reason| {
                ImporterError::Format(format!("Feature {}: {}", index + 1, reason))
            })?),
        };
        let properties = member
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        merge_attributes(&mut schema.attributes, &properties);

        let id = match member.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => format!("{}.{}", name, index + 1),
        };
        features.push(Feature {
            id,
            geometry,
            properties,
        });
    }
    schema.geometry = common_geometry_kind(&features);

    let mut collection = FeatureCollection::new(schema);
    collection.features = features;
    Ok(collection)
}

/// The geometry kind shared by all features, `GeometryCollection` if they
/// differ.
pub(crate) fn common_geometry_kind(features: &[Feature]) -> Option<GeometryKind> {
    features
        .iter()
        .filter_map(|f| f.geometry.as_ref().map(Geometry::kind))
        .fold(None, |known, kind| match known {
            None => Some(kind),
            Some(known) if known == kind => Some(known),
            Some(_) => Some(GeometryKind::GeometryCollection),
        })
}

pub(crate) fn merge_attributes(attributes: &mut Vec<AttributeDef>, properties: &Map<String, Value>) {
    for (key, value) in properties {
        let Some(kind) = AttributeKind::of(value) else {
            continue;
        };
        match attributes.iter_mut().find(|a| &a.name == key) {
            Some(existing) => existing.kind = existing.kind.merge(kind),
            None => attributes.push(AttributeDef {
                name: key.clone(),
                kind,
            }),
        }
    }
}

/// The legacy named `crs` member, if present.
fn declared_crs(document: &Value) -> Option<String> {
    let name = document
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()?;
    normalize_crs(name)
}

pub struct GeoJsonFileImporter {
    env: ImporterEnv,
    site: Option<Arc<ImporterSite>>,
    file: Option<PathBuf>,
    schema_name: Option<SchemaNamePrompt>,
    parsed: Option<Arc<FeatureCollection>>,
    features: Option<Arc<FeatureCollection>>,
}

impl GeoJsonFileImporter {
    pub fn new(env: ImporterEnv) -> Self {
        Self {
            env,
            site: None,
            file: None,
            schema_name: None,
            parsed: None,
            features: None,
        }
    }
}

impl Inbound for GeoJsonFileImporter {
    fn input_slots(&self) -> &'static [Slot] {
        FILE_SLOT
    }

    fn bind(&mut self, slot: &Slot, value: ContextValue) -> Result<(), ContextError> {
        bind_file(&mut self.file, slot, value)
    }

    fn owner_name(&self) -> &'static str {
        "GeoJsonFileImporter"
    }
}

impl Outbound for GeoJsonFileImporter {
    fn output_values(&self) -> Vec<OutputValue> {
        vec![OutputValue::new(
            OUTPUT_SLOTS[0],
            self.features.clone().map(ContextValue::Features),
        )]
    }
}

impl Importer for GeoJsonFileImporter {
    fn site(&self) -> Option<&Arc<ImporterSite>> {
        self.site.as_ref()
    }

    fn init(&mut self, site: Arc<ImporterSite>, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let file = self.file.as_ref().ok_or(ImporterError::NotInitialized)?;
        site.set_summary(format!("GeoJSON: {}", file_name(file)));
        site.set_description("Reads features from a GeoJSON document.");
        site.set_icon("features");
        site.set_terminal(true);
        self.site = Some(site);
        Ok(())
    }

    fn create_prompts(&mut self, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let site = self.site.as_ref().ok_or(ImporterError::NotInitialized)?;
        let file = self.file.as_ref().ok_or(ImporterError::NotInitialized)?;
        self.schema_name = Some(SchemaNamePrompt::new(site, &file_stem(file))?);
        Ok(())
    }

    fn verify(&mut self, monitor: &ImporterMonitor) -> Result<Verdict, ImporterError> {
        self.parsed = None;
        let file = self.file.clone().ok_or(ImporterError::NotInitialized)?;
        monitor.begin_task(&format!("Reading {}", file_name(&file)), None);

        let bytes = std::fs::read(&file).map_err(|e| ImporterError::ReadFile {
            path: file.clone(),
            source: e,
        })?;
        let document: Value = serde_json::from_slice(&bytes)
            .map_err(|e| ImporterError::Format(format!("Invalid JSON: {}", e)))?;
        let name = self
            .schema_name
            .as_ref()
            .map(SchemaNamePrompt::value)
            .unwrap_or_else(|| file_stem(&file));
        let collection = parse_features(&name, &document, self.env.config.limits.import_features)?;
        monitor.done();

        if collection.is_empty() {
            return Ok(Verdict::NotOk("The document contains no features.".to_string()));
        }
        self.parsed = Some(Arc::new(collection));
        Ok(Verdict::Ok)
    }

    fn preview(&self) -> Preview {
        match &self.parsed {
            Some(features) => Preview::table(features, self.env.config.limits.preview_features),
            None => Preview::message("The document has not been read yet."),
        }
    }

    fn execute(&mut self, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let parsed = self
            .parsed
            .as_ref()
            .ok_or_else(|| ImporterError::NotVerified("the document has not been read".to_string()))?;
        let name = self
            .schema_name
            .as_ref()
            .map(SchemaNamePrompt::value)
            .unwrap_or_else(|| parsed.schema.name.clone());
        self.features = Some(Arc::new(parsed.renamed(&name)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_feature_collection() {
        let document = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "id": "a", "geometry": {"type": "Point", "coordinates": [1.0, 2.0]},
                 "properties": {"name": "A", "count": 1}},
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [3.0, 4.0]},
                 "properties": {"name": "B", "count": 2.5}}
            ]
        });
        let collection = parse_features("places", &document, 100).unwrap();
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.features[0].id, "a");
        assert_eq!(collection.features[1].id, "places.2");
        assert_eq!(collection.schema.geometry, Some(GeometryKind::Point));
        assert_eq!(collection.schema.crs.as_deref(), Some(DEFAULT_CRS));
        assert_eq!(
            collection.schema.attribute("count").map(|a| a.kind),
            Some(AttributeKind::Decimal)
        );
    }

    #[test]
    fn test_single_feature_and_named_crs() {
        let document = json!({
            "type": "Feature",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::25832"}},
            "geometry": {"type": "LineString", "coordinates": [[0, 0], [1, 1]]},
            "properties": null
        });
        let collection = parse_features("line", &document, 100).unwrap();
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.schema.crs.as_deref(), Some("EPSG:25832"));
        assert_eq!(collection.schema.geometry, Some(GeometryKind::LineString));
    }

    #[test]
    fn test_mixed_geometries_become_collection_kind() {
        let document = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1, 2]}, "properties": {}},
                {"type": "Feature", "geometry": {"type": "LineString", "coordinates": [[0, 0], [1, 1]]}, "properties": {}},
                {"type": "Feature", "geometry": null, "properties": {}}
            ]
        });
        let collection = parse_features("mixed", &document, 100).unwrap();
        assert_eq!(
            collection.schema.geometry,
            Some(GeometryKind::GeometryCollection)
        );
        assert!(collection.features[2].geometry.is_none());
    }

    #[test]
    fn test_missing_geometry_member_is_error() {
        let document = json!({"type": "Feature", "properties": {}});
        assert!(matches!(
            parse_features("x", &document, 100),
            Err(ImporterError::Format(_))
        ));
    }

    #[test]
    fn test_limit() {
        let feature = json!({"type": "Feature", "geometry": null, "properties": {}});
        let document = json!({"type": "FeatureCollection", "features": [feature.clone(), feature.clone(), feature]});
        let err = parse_features("x", &document, 2).unwrap_err();
        assert!(err.to_string().contains("more than 2 elements (3 found)"));
    }

    #[test]
    fn test_geometry_type_is_rejected() {
        let document = json!({"type": "Point", "coordinates": [1, 2]});
        assert!(parse_features("x", &document, 10).is_err());
    }
}
