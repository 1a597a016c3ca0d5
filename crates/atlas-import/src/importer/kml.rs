//! KML placemarks. Zipped KML (kmz) is unpacked by the archive importer
//! first.

use std::path::PathBuf;
use std::sync::Arc;

use log::debug;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

use super::factory::FileImporterFactory;
use super::files::{bind_file, file_name, file_stem, FILE_SLOT};
use super::geojson::{common_geometry_kind, merge_attributes};
use super::prompts::SchemaNamePrompt;
use super::{Importer, ImporterEnv, ImporterFactory, ImporterMonitor, ImporterSite, Preview, Verdict};
use crate::context::{ContextValue, Inbound, Outbound, OutputValue, Slot, TypeTag};
use crate::error::{ContextError, ImporterError};
use crate::model::{Feature, FeatureCollection, FeatureSchema, Geometry, Position};

const OUTPUT_SLOTS: &[Slot] = &[Slot::new("features", TypeTag::Features)];

pub fn factory(env: &ImporterEnv) -> Box<dyn ImporterFactory> {
    FileImporterFactory::boxed("kml", &["kml"], env, |env| {
        Box::new(KmlFileImporter::new(env.clone()))
    })
}

/// Parses `lon,lat[,alt]` tuples separated by whitespace.
fn parse_coordinates(text: &str) -> Result<Vec<Position>, ImporterError> {
    text.split_whitespace()
        .map(|tuple| {
            let mut parts = tuple.split(',').map(|part| part.trim().parse::<f64>());
            match (parts.next(), parts.next()) {
                (Some(Ok(x)), Some(Ok(y))) => Ok([x, y]),
                _ => Err(ImporterError::Format(format!(
                    "Invalid KML coordinate '{}'",
                    tuple
                ))),
            }
        })
        .collect()
}

fn attribute(element: &BytesStart, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name)
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

#[derive(Default)]
struct PlacemarkBuilder {
    properties: Map<String, Value>,
    geometries: Vec<Geometry>,
    rings: Vec<Vec<Position>>,
    multi: bool,
    data_key: Option<String>,
}

impl PlacemarkBuilder {
    fn geometry(&mut self) -> Option<Geometry> {
        if self.multi || self.geometries.len() > 1 {
            Some(Geometry::GeometryCollection {
                geometries: std::mem::take(&mut self.geometries),
            })
        } else {
            self.geometries.pop()
        }
    }
}

/// Reads all placemarks of a KML document. Returns `None` if `monitor`
/// was canceled.
pub fn parse_placemarks(
    name: &str,
    xml: &str,
    limit: usize,
    monitor: &ImporterMonitor,
) -> Result<Option<FeatureCollection>, ImporterError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut current: Option<PlacemarkBuilder> = None;
    let mut features: Vec<Feature> = Vec::new();
    let mut events = 0usize;

    loop {
        events += 1;
        if events % 1000 == 0 && monitor.is_canceled() {
            return Ok(None);
        }
        let event = reader
            .read_event()
            .map_err(|e| ImporterError::Format(format!("Invalid KML: {}", e)))?;
        match event {
            Event::Start(ref e) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                text.clear();
                match local.as_str() {
                    "Placemark" => current = Some(PlacemarkBuilder::default()),
                    "MultiGeometry" => {
                        if let Some(placemark) = current.as_mut() {
                            placemark.multi = true;
                        }
                    }
                    "Data" | "SimpleData" => {
                        if let Some(placemark) = current.as_mut() {
                            placemark.data_key = attribute(e, b"name");
                        }
                    }
                    "Polygon" => {
                        if let Some(placemark) = current.as_mut() {
                            placemark.rings.clear();
                        }
                    }
                    _ => {}
                }
                stack.push(local);
            }
            Event::Text(e) => {
                let raw = e
                    .decode()
                    .map_err(|e| ImporterError::Format(format!("Invalid KML text: {}", e)))?;
                match quick_xml::escape::unescape(&raw) {
                    Ok(unescaped) => text.push_str(&unescaped),
                    Err(_) => text.push_str(&raw),
                }
            }
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e)),
            Event::GeneralRef(e) => {
                let entity = e
                    .decode()
                    .map_err(|e| ImporterError::Format(format!("Invalid KML text: {}", e)))?;
                if let Some(resolved) = quick_xml::escape::resolve_predefined_entity(&entity) {
                    text.push_str(resolved);
                }
            }
            Event::End(_) => {
                let Some(local) = stack.pop() else {
                    continue;
                };
                let parent = stack.last().map(String::as_str);
                let value = std::mem::take(&mut text).trim().to_string();
                let Some(placemark) = current.as_mut() else {
                    continue;
                };
                match local.as_str() {
                    "name" | "description" if parent == Some("Placemark") => {
                        placemark.properties.insert(local.clone(), Value::String(value));
                    }
                    "value" if parent == Some("Data") => {
                        if let Some(key) = placemark.data_key.clone() {
                            placemark.properties.insert(key, Value::String(value));
                        }
                    }
                    "SimpleData" => {
                        if let Some(key) = placemark.data_key.take() {
                            placemark.properties.insert(key, Value::String(value));
                        }
                    }
                    "Data" => placemark.data_key = None,
                    "coordinates" => {
                        let positions = parse_coordinates(&value)?;
                        match parent {
                            Some("Point") => {
                                if let Some(first) = positions.first() {
                                    placemark.geometries.push(Geometry::Point {
                                        coordinates: *first,
                                    });
                                }
                            }
                            Some("LineString") => placemark.geometries.push(Geometry::LineString {
                                coordinates: positions,
                            }),
                            Some("LinearRing") => placemark.rings.push(positions),
                            _ => {}
                        }
                    }
                    "Polygon" => {
                        let rings = std::mem::take(&mut placemark.rings);
                        placemark.geometries.push(Geometry::Polygon { coordinates: rings });
                    }
                    "Placemark" => {
                        if let Some(mut done) = current.take() {
                            features.push(Feature {
                                id: format!("{}.{}", name, features.len() + 1),
                                geometry: done.geometry(),
                                properties: done.properties,
                            });
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if features.len() > limit {
        return Err(ImporterError::LimitExceeded {
            limit,
            found: features.len(),
        });
    }
    debug!("Parsed {} placemarks", features.len());

    let mut schema = FeatureSchema::named(name);
    schema.crs = Some("EPSG:4326".to_string());
    for feature in &features {
        merge_attributes(&mut schema.attributes, &feature.properties);
    }
    schema.geometry = common_geometry_kind(&features);

    let mut collection = FeatureCollection::new(schema);
    collection.features = features;
    Ok(Some(collection))
}

pub struct KmlFileImporter {
    env: ImporterEnv,
    site: Option<Arc<ImporterSite>>,
    file: Option<PathBuf>,
    schema_name: Option<SchemaNamePrompt>,
    parsed: Option<Arc<FeatureCollection>>,
    features: Option<Arc<FeatureCollection>>,
}

impl KmlFileImporter {
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

impl Inbound for KmlFileImporter {
    fn input_slots(&self) -> &'static [Slot] {
        FILE_SLOT
    }

    fn bind(&mut self, slot: &Slot, value: ContextValue) -> Result<(), ContextError> {
        bind_file(&mut self.file, slot, value)
    }

    fn owner_name(&self) -> &'static str {
        "KmlFileImporter"
    }
}

impl Outbound for KmlFileImporter {
    fn output_values(&self) -> Vec<OutputValue> {
        vec![OutputValue::new(
            OUTPUT_SLOTS[0],
            self.features.clone().map(ContextValue::Features),
        )]
    }
}

impl Importer for KmlFileImporter {
    fn site(&self) -> Option<&Arc<ImporterSite>> {
        self.site.as_ref()
    }

    fn init(&mut self, site: Arc<ImporterSite>, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let file = self.file.as_ref().ok_or(ImporterError::NotInitialized)?;
        site.set_summary(format!("KML: {}", file_name(file)));
        site.set_description("Reads the placemarks of a KML document.");
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

        let xml = std::fs::read_to_string(&file).map_err(|e| ImporterError::ReadFile {
            path: file.clone(),
            source: e,
        })?;
        let name = self
            .schema_name
            .as_ref()
            .map(SchemaNamePrompt::value)
            .unwrap_or_else(|| file_stem(&file));
        let Some(collection) =
            parse_placemarks(&name, &xml, self.env.config.limits.import_features, monitor)?
        else {
            return Ok(Verdict::NotOk("Reading was canceled.".to_string()));
        };
        monitor.done();

        if collection.is_empty() {
            return Ok(Verdict::NotOk("The document contains no placemarks.".to_string()));
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
    use crate::model::GeometryKind;

    const DOCUMENT: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <name>Sights</name>
    <Placemark>
      <name>Tower</name>
      <description><![CDATA[<b>tall</b>]]></description>
      <ExtendedData>
        <Data name="height"><value>368</value></Data>
      </ExtendedData>
      <Point><coordinates>13.409,52.520,0</coordinates></Point>
    </Placemark>
    <Placemark>
      <name>Park</name>
      <ExtendedData>
        <SchemaData schemaUrl="#s"><SimpleData name="area">210</SimpleData></SchemaData>
      </ExtendedData>
      <Polygon>
        <outerBoundaryIs><LinearRing><coordinates>
          13.35,52.51 13.37,52.51 13.37,52.52 13.35,52.51
        </coordinates></LinearRing></outerBoundaryIs>
      </Polygon>
    </Placemark>
  </Document>
</kml>"##;

    #[test]
    fn test_parse_placemarks() {
        let collection = parse_placemarks("sights", DOCUMENT, 100, &ImporterMonitor::new())
            .unwrap()
            .unwrap();
        assert_eq!(collection.len(), 2);

        let tower = &collection.features[0];
        assert_eq!(tower.id, "sights.1");
        assert_eq!(tower.properties["name"], Value::String("Tower".into()));
        assert_eq!(tower.properties["description"], Value::String("<b>tall</b>".into()));
        assert_eq!(tower.properties["height"], Value::String("368".into()));
        assert_eq!(
            tower.geometry,
            Some(Geometry::Point {
                coordinates: [13.409, 52.520]
            })
        );

        let park = &collection.features[1];
        assert_eq!(park.properties["area"], Value::String("210".into()));
        match &park.geometry {
            Some(Geometry::Polygon { coordinates }) => assert_eq!(coordinates[0].len(), 4),
            other => panic!("unexpected geometry {:?}", other),
        }

        assert!(collection.schema.attribute("name").is_some());
        assert!(!collection
            .features
            .iter()
            .any(|f| f.properties["name"] == Value::String("Sights".into())));
        assert_eq!(
            collection.schema.geometry,
            Some(GeometryKind::GeometryCollection)
        );
        assert_eq!(collection.schema.crs.as_deref(), Some("EPSG:4326"));
    }

    #[test]
    fn test_multi_geometry() {
        let xml = r#"<kml><Placemark><MultiGeometry>
            <Point><coordinates>1,2</coordinates></Point>
            <LineString><coordinates>0,0 1,1</coordinates></LineString>
        </MultiGeometry></Placemark></kml>"#;
        let collection = parse_placemarks("m", xml, 10, &ImporterMonitor::new())
            .unwrap()
            .unwrap();
        match &collection.features[0].geometry {
            Some(Geometry::GeometryCollection { geometries }) => assert_eq!(geometries.len(), 2),
            other => panic!("unexpected geometry {:?}", other),
        }
    }

    #[test]
    fn test_bad_coordinates() {
        let xml = "<kml><Placemark><Point><coordinates>east,north</coordinates></Point></Placemark></kml>";
        assert!(matches!(
            parse_placemarks("x", xml, 10, &ImporterMonitor::new()),
            Err(ImporterError::Format(_))
        ));
    }

    #[test]
    fn test_limit() {
        let xml = "<kml><Placemark/><Placemark><name>a</name></Placemark><Placemark><name>b</name></Placemark></kml>";
        let err = parse_placemarks("x", xml, 1, &ImporterMonitor::new()).unwrap_err();
        assert!(matches!(err, ImporterError::LimitExceeded { limit: 1, found: 2 }));
    }
}
