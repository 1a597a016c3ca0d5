//! OpenStreetMap XML extracts. Tagged nodes become points, ways become
//! line strings. The user has to choose which tags to import before
//! anything is read.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use serde_json::{Map, Value};

use super::factory::FileImporterFactory;
use super::files::{bind_file, file_name, file_stem, FILE_SLOT};
use super::geojson::{common_geometry_kind, merge_attributes};
use super::{
    Accepted, EditorKind, Importer, ImporterEnv, ImporterFactory, ImporterMonitor, ImporterSite,
    Preview, PromptEditor, Severity, Verdict,
};
use crate::context::{ContextValue, Inbound, Outbound, OutputValue, Slot, TypeTag};
use crate::error::{ContextError, ImporterError};
use crate::model::{Feature, FeatureCollection, FeatureSchema, Geometry, Position};

pub const TAG_FILTER: &str = "tagFilter";

const OUTPUT_SLOTS: &[Slot] = &[Slot::new("features", TypeTag::Features)];

pub fn factory(env: &ImporterEnv) -> Box<dyn ImporterFactory> {
    FileImporterFactory::boxed("osm", &["osm"], env, |env| {
        Box::new(OsmXmlFileImporter::new(env.clone()))
    })
}

/// Selects elements by their tags.
///
/// The filter is a list of `key`, `key=value` or `*` entries separated by
/// commas or new lines. Keys and values may contain `*` wildcards. An
/// element matches if any entry matches one of its tags.
#[derive(Debug, Clone)]
pub struct TagFilter {
    entries: Vec<(Regex, Option<Regex>)>,
    all: bool,
}

fn wildcard(pattern: &str) -> Result<Regex, String> {
    let escaped = regex::escape(pattern.trim()).replace(r"\*", ".*");
    Regex::new(&format!("^{}$", escaped)).map_err(|e| e.to_string())
}

impl TagFilter {
    pub fn parse(text: &str) -> Result<TagFilter, String> {
        let mut entries = Vec::new();
        let mut all = false;
        for entry in text
            .split(|c: char| c == ',' || c == '\n')
            .map(str::trim)
            .filter(|e| !e.is_empty())
        {
            if entry == "*" {
                all = true;
                continue;
            }
            let (key, value) = match entry.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (entry, None),
            };
            if key.trim().is_empty() {
                return Err(format!("'{}' has no tag key", entry));
            }
            entries.push((wildcard(key)?, value.map(wildcard).transpose()?));
        }
        if entries.is_empty() && !all {
            return Err("enter * or at least one key=value pair".to_string());
        }
        Ok(TagFilter { entries, all })
    }

    pub fn matches(&self, tags: &Map<String, Value>) -> bool {
        if self.all {
            return true;
        }
        self.entries.iter().any(|(key, value)| {
            tags.iter().any(|(k, v)| {
                key.is_match(k)
                    && match (value, v.as_str()) {
                        (None, _) => true,
                        (Some(value), Some(v)) => value.is_match(v),
                        (Some(_), None) => false,
                    }
            })
        })
    }
}

struct TagFilterEditor;

impl PromptEditor for TagFilterEditor {
    fn kind(&self) -> EditorKind {
        EditorKind::Text
    }

    fn accept(&self, value: &str) -> Result<Accepted, String> {
        TagFilter::parse(value)?;
        Ok(Accepted::ok(value.trim()))
    }
}

#[derive(Debug, Default)]
struct OsmElement {
    id: String,
    position: Option<Position>,
    refs: Vec<String>,
    tags: Map<String, Value>,
}

fn attribute(element: &BytesStart, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name)
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

fn node_position(element: &BytesStart) -> Option<Position> {
    let lon = attribute(element, b"lon")?.parse().ok()?;
    let lat = attribute(element, b"lat")?.parse().ok()?;
    Some([lon, lat])
}

/// Reads an OSM XML document and keeps the elements `filter` selects.
/// Returns `None` if `monitor` was canceled.
pub fn parse_osm(
    name: &str,
    xml: &str,
    filter: &TagFilter,
    limit: usize,
    monitor: &ImporterMonitor,
) -> Result<Option<FeatureCollection>, ImporterError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut positions: HashMap<String, Position> = HashMap::new();
    let mut nodes: Vec<OsmElement> = Vec::new();
    let mut ways: Vec<OsmElement> = Vec::new();
    let mut current: Option<(bool, OsmElement)> = None;
    let mut events = 0usize;

    loop {
        events += 1;
        if events % 1000 == 0 && monitor.is_canceled() {
            return Ok(None);
        }
        let event = reader
            .read_event()
            .map_err(|e| ImporterError::Format(format!("Invalid OSM XML: {}", e)))?;
        let (element, closed) = match &event {
            Event::Start(e) => (e, false),
            Event::Empty(e) => (e, true),
            Event::End(e) => {
                match e.local_name().as_ref() {
                    b"node" | b"way" => {
                        if let Some((is_node, element)) = current.take() {
                            if is_node {
                                nodes.push(element);
                            } else {
                                ways.push(element);
                            }
                        }
                    }
                    _ => {}
                }
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };

        match element.local_name().as_ref() {
            b"node" => {
                let node = OsmElement {
                    id: attribute(element, b"id").unwrap_or_default(),
                    position: node_position(element),
                    ..Default::default()
                };
                if let Some(position) = node.position {
                    positions.insert(node.id.clone(), position);
                }
                if closed {
                    nodes.push(node);
                } else {
                    current = Some((true, node));
                }
            }
            b"way" => {
                let way = OsmElement {
                    id: attribute(element, b"id").unwrap_or_default(),
                    ..Default::default()
                };
                if closed {
                    ways.push(way);
                } else {
                    current = Some((false, way));
                }
            }
            b"nd" => {
                if let (Some((_, way)), Some(reference)) =
                    (current.as_mut(), attribute(element, b"ref"))
                {
                    way.refs.push(reference);
                }
            }
            b"tag" => {
                if let (Some((_, owner)), Some(key)) = (current.as_mut(), attribute(element, b"k")) {
                    let value = attribute(element, b"v").unwrap_or_default();
                    owner.tags.insert(key, Value::String(value));
                }
            }
            _ => {}
        }
    }
    debug!("Read {} nodes and {} ways", nodes.len(), ways.len());

    let mut features = Vec::new();
    for node in nodes {
        if node.tags.is_empty() || !filter.matches(&node.tags) {
            continue;
        }
        features.push(Feature {
            id: format!("node/{}", node.id),
            geometry: node.position.map(|coordinates| Geometry::Point { coordinates }),
            properties: node.tags,
        });
    }
    for way in ways {
        if !filter.matches(&way.tags) {
            continue;
        }
        let coordinates: Vec<Position> = way
            .refs
            .iter()
            .filter_map(|reference| positions.get(reference).copied())
            .collect();
        let geometry = (coordinates.len() >= 2).then_some(Geometry::LineString { coordinates });
        features.push(Feature {
            id: format!("way/{}", way.id),
            geometry,
            properties: way.tags,
        });
    }

    if features.len() > limit {
        return Err(ImporterError::LimitExceeded {
            limit,
            found: features.len(),
        });
    }

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

pub struct OsmXmlFileImporter {
    env: ImporterEnv,
    site: Option<Arc<ImporterSite>>,
    file: Option<PathBuf>,
    parsed: Option<Arc<FeatureCollection>>,
    features: Option<Arc<FeatureCollection>>,
}

impl OsmXmlFileImporter {
    pub fn new(env: ImporterEnv) -> Self {
        Self {
            env,
            site: None,
            file: None,
            parsed: None,
            features: None,
        }
    }
}

impl Inbound for OsmXmlFileImporter {
    fn input_slots(&self) -> &'static [Slot] {
        FILE_SLOT
    }

    fn bind(&mut self, slot: &Slot, value: ContextValue) -> Result<(), ContextError> {
        bind_file(&mut self.file, slot, value)
    }

    fn owner_name(&self) -> &'static str {
        "OsmXmlFileImporter"
    }
}

impl Outbound for OsmXmlFileImporter {
    fn output_values(&self) -> Vec<OutputValue> {
        vec![OutputValue::new(
            OUTPUT_SLOTS[0],
            self.features.clone().map(ContextValue::Features),
        )]
    }
}

impl Importer for OsmXmlFileImporter {
    fn site(&self) -> Option<&Arc<ImporterSite>> {
        self.site.as_ref()
    }

    fn init(&mut self, site: Arc<ImporterSite>, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let file = self.file.as_ref().ok_or(ImporterError::NotInitialized)?;
        site.set_summary(format!("OpenStreetMap: {}", file_name(file)));
        site.set_description("Reads tagged nodes and ways of an OpenStreetMap extract.");
        site.set_icon("osm");
        site.set_terminal(true);
        self.site = Some(site);
        Ok(())
    }

    fn create_prompts(&mut self, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let site = self.site.as_ref().ok_or(ImporterError::NotInitialized)?;
        site.new_prompt(TAG_FILTER)?
            .summary("Tags")
            .description(
                "The tags of the elements to import, e.g. amenity=school or highway=*. \
                 Use * to import all tagged elements.",
            )
            .value("*")
            .severity(Severity::Required)
            .ok(false)
            .editor(TagFilterEditor);
        Ok(())
    }

    fn verify(&mut self, monitor: &ImporterMonitor) -> Result<Verdict, ImporterError> {
        self.parsed = None;
        let site = Arc::clone(self.site.as_ref().ok_or(ImporterError::NotInitialized)?);
        let file = self.file.clone().ok_or(ImporterError::NotInitialized)?;

        let prompt = site
            .prompt(TAG_FILTER)
            .ok_or(ImporterError::NotInitialized)?;
        if !prompt.is_ok() {
            return Ok(Verdict::NotOk("Choose the tags to import.".to_string()));
        }
        let filter = match TagFilter::parse(&prompt.current_value()) {
            Ok(filter) => filter,
            Err(reason) => return Ok(Verdict::NotOk(format!("Invalid tag filter: {}", reason))),
        };

        monitor.begin_task(&format!("Reading {}", file_name(&file)), None);
        let xml = std::fs::read_to_string(&file).map_err(|e| ImporterError::ReadFile {
            path: file.clone(),
            source: e,
        })?;
        let parsed = parse_osm(
            &file_stem(&file),
            &xml,
            &filter,
            self.env.config.limits.import_features,
            monitor,
        );
        let collection = match parsed {
            Ok(Some(collection)) => collection,
            Ok(None) => return Ok(Verdict::NotOk("Reading was canceled.".to_string())),
            Err(e @ ImporterError::LimitExceeded { .. }) => return Ok(Verdict::NotOk(e.to_string())),
            Err(e) => return Err(e),
        };
        monitor.done();

        if collection.is_empty() {
            return Ok(Verdict::NotOk("No elements match the tag filter.".to_string()));
        }
        info!("{} OSM elements match", collection.len());
        self.parsed = Some(Arc::new(collection));
        Ok(Verdict::Ok)
    }

    fn preview(&self) -> Preview {
        match &self.parsed {
            Some(features) => Preview::table(features, self.env.config.limits.preview_features),
            None => Preview::message("The extract has not been read yet."),
        }
    }

    fn execute(&mut self, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let parsed = self
            .parsed
            .clone()
            .ok_or_else(|| ImporterError::NotVerified("the extract has not been read".to_string()))?;
        self.features = Some(parsed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportConfig;
    use crate::context::{collect_outputs, inject_inputs, ContextMap};
    use crate::model::GeometryKind;
    use crate::pipeline::{ChangeSignal, ContextEventBroadcaster, ContextId};
    use serde_json::json;
    use tempfile::TempDir;

    const EXTRACT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6">
  <node id="1" lat="52.50" lon="13.40"/>
  <node id="2" lat="52.51" lon="13.41"/>
  <node id="3" lat="52.52" lon="13.42">
    <tag k="amenity" v="school"/>
    <tag k="name" v="Grundschule"/>
  </node>
  <way id="10">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="residential"/>
  </way>
</osm>"#;

    fn tags(value: serde_json::Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_tag_filter() {
        let filter = TagFilter::parse("amenity=school, highway=*").unwrap();
        assert!(filter.matches(&tags(json!({"amenity": "school"}))));
        assert!(filter.matches(&tags(json!({"highway": "primary"}))));
        assert!(!filter.matches(&tags(json!({"amenity": "pub"}))));

        let by_key = TagFilter::parse("name").unwrap();
        assert!(by_key.matches(&tags(json!({"name": "x"}))));
        assert!(!by_key.matches(&tags(json!({}))));

        assert!(TagFilter::parse("*").unwrap().matches(&tags(json!({}))));
        assert!(TagFilter::parse("").is_err());
        assert!(TagFilter::parse("=school").is_err());
    }

    #[test]
    fn test_parse_nodes_and_ways() {
        let filter = TagFilter::parse("*").unwrap();
        let collection = parse_osm("berlin", EXTRACT, &filter, 100, &ImporterMonitor::new())
            .unwrap()
            .unwrap();
        // untagged nodes are only way vertices
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.features[0].id, "node/3");
        assert_eq!(
            collection.features[1].geometry,
            Some(Geometry::LineString {
                coordinates: vec![[13.40, 52.50], [13.41, 52.51]]
            })
        );
        assert_eq!(
            collection.schema.geometry,
            Some(GeometryKind::GeometryCollection)
        );
    }

    #[test]
    fn test_filter_and_limit() {
        let schools = TagFilter::parse("amenity=school").unwrap();
        let collection = parse_osm("x", EXTRACT, &schools, 100, &ImporterMonitor::new())
            .unwrap()
            .unwrap();
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.schema.geometry, Some(GeometryKind::Point));

        let all = TagFilter::parse("*").unwrap();
        assert!(matches!(
            parse_osm("x", EXTRACT, &all, 1, &ImporterMonitor::new()),
            Err(ImporterError::LimitExceeded { limit: 1, found: 2 })
        ));
    }

    #[test]
    fn test_importer_requires_tag_filter() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("berlin.osm");
        std::fs::write(&path, EXTRACT).unwrap();

        let env = ImporterEnv::new(Arc::new(ImportConfig::default()), temp_dir.path());
        let mut importer = OsmXmlFileImporter::new(env);
        inject_inputs(
            &mut importer,
            &ContextMap::from_values(vec![ContextValue::File(path)]),
        )
        .unwrap();
        let site = Arc::new(ImporterSite::new(
            ContextId::new(),
            ChangeSignal::detached(),
            ContextEventBroadcaster::default(),
        ));
        importer.init(Arc::clone(&site), &ImporterMonitor::new()).unwrap();
        importer.create_prompts(&ImporterMonitor::new()).unwrap();

        assert!(!site.required_prompts_ok());
        assert_eq!(
            importer.verify(&ImporterMonitor::new()).unwrap(),
            Verdict::NotOk("Choose the tags to import.".into())
        );

        let prompt = site.prompt(TAG_FILTER).unwrap();
        assert!(prompt.submit("bogus=").is_ok());
        assert!(prompt.submit("=x").is_err());
        prompt.submit("highway=*").unwrap();
        assert!(site.required_prompts_ok());
        assert_eq!(importer.verify(&ImporterMonitor::new()).unwrap(), Verdict::Ok);

        importer.execute(&ImporterMonitor::new()).unwrap();
        let outputs = collect_outputs(&importer).unwrap();
        assert_eq!(outputs.features().unwrap().len(), 1);
    }
}
