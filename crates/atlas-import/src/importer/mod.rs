//! Importers turn context values (files, feature collections, ...) into
//! new context values, asking the user for parameters through prompts.
//!
//! Factories inspect the outputs of a context and offer importers for them.
//! The built-in factories are listed in [`FactoryRegistry::builtin`].

pub mod archive;
pub mod csv;
pub mod excel;
mod factory;
mod files;
pub mod geojson;
pub mod kml;
mod monitor;
pub mod osm;
mod prompt;
pub mod prompts;
pub mod raster;
mod site;
pub mod tabular;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::config::ImportConfig;
use crate::context::Outbound;
use crate::error::ImporterError;
use crate::model::{FeatureCollection, RasterSource};

pub use factory::{FactoryConstructor, FactoryRegistration, FactoryRegistry, ImporterBuilder, ImporterFactory};
pub use files::{has_extension, FileInputs};
pub use monitor::{CancelHandle, ImporterMonitor, MonitorSnapshot};
pub use prompt::{
    Accepted, ChoiceEditor, ConfirmEditor, EditorKind, ImporterPrompt, NumberEditor,
    PromptEditor, PromptView, Severity, TextEditor,
};
pub use site::ImporterSite;

/// Configuration and scratch space handed to factories and importers.
#[derive(Debug, Clone)]
pub struct ImporterEnv {
    pub config: Arc<ImportConfig>,
    /// Directory below which importers may create temporary files.
    pub work_dir: PathBuf,
}

impl ImporterEnv {
    pub fn new(config: Arc<ImportConfig>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            work_dir: work_dir.into(),
        }
    }
}

/// Result of a verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    NotOk(String),
}

impl Verdict {
    pub fn is_ok(&self) -> bool {
        matches!(self, Verdict::Ok)
    }
}

/// What a context shows about its data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Preview {
    /// A verification is running.
    Pending,
    Files {
        names: Vec<String>,
    },
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
        total: usize,
    },
    Raster {
        format: String,
        crs: Option<String>,
        world_file: Option<String>,
        size_bytes: u64,
    },
    Message {
        text: String,
    },
}

impl Preview {
    pub fn message(text: impl Into<String>) -> Self {
        Preview::Message { text: text.into() }
    }

    /// The message shown when verification failed with an error.
    pub fn unable_to_read(reason: &str) -> String {
        format!("Unable to read the data.\n\nReason: {}", reason)
    }

    /// A table of at most `limit` features.
    pub fn table(features: &FeatureCollection, limit: usize) -> Self {
        let mut columns = vec!["id".to_string()];
        columns.extend(features.schema.attributes.iter().map(|a| a.name.clone()));
        let has_geometry = features.features.iter().any(|f| f.geometry.is_some());
        if has_geometry {
            columns.push("geometry".to_string());
        }

        let rows = features
            .features
            .iter()
            .take(limit)
            .map(|feature| {
                let mut row = vec![feature.id.clone()];
                for attribute in &features.schema.attributes {
                    row.push(match feature.properties.get(&attribute.name) {
                        None | Some(serde_json::Value::Null) => String::new(),
                        Some(serde_json::Value::String(s)) => s.clone(),
                        Some(other) => other.to_string(),
                    });
                }
                if has_geometry {
                    row.push(
                        feature
                            .geometry
                            .as_ref()
                            .map(|g| g.summary())
                            .unwrap_or_default(),
                    );
                }
                row
            })
            .collect();

        Preview::Table {
            columns,
            rows,
            total: features.len(),
        }
    }

    pub fn raster(source: &RasterSource) -> Self {
        Preview::Raster {
            format: source.format.name().to_string(),
            crs: source.crs.clone(),
            world_file: source
                .world_file
                .as_ref()
                .map(|p| crate::sanitize::redact_path(p)),
            size_bytes: source.size_bytes,
        }
    }
}

/// One import step for concrete input data.
///
/// The lifecycle is `init`, `create_prompts`, then any number of `verify`
/// calls (one per prompt change burst), and finally `execute` once the
/// context is ready. Inputs are bound before `init`; outputs are collected
/// after `execute`.
pub trait Importer: Outbound + Send {
    fn site(&self) -> Option<&Arc<ImporterSite>>;

    /// Receives the site. Sets summary, description, icon and terminal.
    fn init(&mut self, site: Arc<ImporterSite>, monitor: &ImporterMonitor) -> Result<(), ImporterError>;

    fn create_prompts(&mut self, monitor: &ImporterMonitor) -> Result<(), ImporterError>;

    /// Checks the input against the current prompt values. Errors are shown
    /// to the user as "unable to read" problems.
    fn verify(&mut self, monitor: &ImporterMonitor) -> Result<Verdict, ImporterError>;

    fn preview(&self) -> Preview;

    /// Produces the outputs. Called only when the context is ready.
    fn execute(&mut self, monitor: &ImporterMonitor) -> Result<(), ImporterError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeDef, AttributeKind, Feature, FeatureSchema, Geometry};
    use serde_json::{json, Map};

    fn collection(count: usize) -> FeatureCollection {
        let mut schema = FeatureSchema::named("points");
        schema.attributes.push(AttributeDef {
            name: "name".into(),
            kind: AttributeKind::String,
        });
        let mut fc = FeatureCollection::new(schema);
        for i in 0..count {
            let mut properties = Map::new();
            properties.insert("name".into(), json!(format!("P{}", i)));
            fc.features.push(Feature {
                id: format!("points.{}", i + 1),
                geometry: Some(Geometry::Point {
                    coordinates: [1.0, 2.0],
                }),
                properties,
            });
        }
        fc
    }

    #[test]
    fn test_table_preview_is_limited() {
        let preview = Preview::table(&collection(5), 2);
        match preview {
            Preview::Table {
                columns,
                rows,
                total,
            } => {
                assert_eq!(columns, vec!["id", "name", "geometry"]);
                assert_eq!(rows.len(), 2);
                assert_eq!(total, 5);
                assert_eq!(rows[0], vec!["points.1", "P0", "POINT (1 2)"]);
            }
            other => panic!("unexpected preview {:?}", other),
        }
    }

    #[test]
    fn test_unable_to_read_message() {
        assert_eq!(
            Preview::unable_to_read("Wrong charset: UTF-8"),
            "Unable to read the data.\n\nReason: Wrong charset: UTF-8"
        );
    }

    #[test]
    fn test_verdict() {
        assert!(Verdict::Ok.is_ok());
        assert!(!Verdict::NotOk("no".into()).is_ok());
    }
}
