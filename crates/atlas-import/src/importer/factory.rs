use std::fmt;
use std::path::PathBuf;

use log::debug;

use super::files::FileInputs;
use super::{Importer, ImporterEnv};
use crate::config::ImportConfig;
use crate::context::{ContextValue, Inbound, Slot};
use crate::error::{ConfigError, ContextError, ImporterError};

/// Receives the importers a factory offers.
pub trait ImporterBuilder {
    /// Offers `importer`, to be fed `context_in` as its inputs.
    fn new_importer(
        &mut self,
        importer: Box<dyn Importer>,
        context_in: Vec<ContextValue>,
    ) -> Result<(), ImporterError>;
}

/// Inspects the outputs of a context (bound to its input slots) and offers
/// importers that can read them.
pub trait ImporterFactory: Inbound + Send {
    fn name(&self) -> &'static str;

    fn create_importers(&self, builder: &mut dyn ImporterBuilder) -> Result<(), ImporterError>;
}

pub type FactoryConstructor = fn(&ImporterEnv) -> Box<dyn ImporterFactory>;

#[derive(Clone, Copy)]
pub struct FactoryRegistration {
    pub name: &'static str,
    pub construct: FactoryConstructor,
}

impl fmt::Debug for FactoryRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryRegistration")
            .field("name", &self.name)
            .finish()
    }
}

/// Ordered table of factories. Discovery asks them in registration order,
/// which is also the order of the offered importers.
#[derive(Debug, Clone, Default)]
pub struct FactoryRegistry {
    entries: Vec<FactoryRegistration>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register("archive", super::archive::factory)
            .register("csv", super::csv::factory)
            .register("excel", super::excel::factory)
            .register("kml", super::kml::factory)
            .register("geojson", super::geojson::factory)
            .register("raster", super::raster::factory)
            .register("osm", super::osm::factory);
        registry
    }

    /// The built-in factories minus those disabled in `config`.
    pub fn from_config(config: &ImportConfig) -> Result<Self, ConfigError> {
        let builtin = Self::builtin();
        for name in &config.factories.disabled {
            if !builtin.contains(name) {
                return Err(ConfigError::UnknownFactory(name.clone()));
            }
        }
        let entries = builtin
            .entries
            .into_iter()
            .filter(|entry| {
                let disabled = config.factories.disabled.iter().any(|d| d == entry.name);
                if disabled {
                    debug!("Importer factory '{}' disabled by configuration", entry.name);
                }
                !disabled
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn register(&mut self, name: &'static str, construct: FactoryConstructor) -> &mut Self {
        self.entries.push(FactoryRegistration { name, construct });
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|entry| entry.name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FactoryRegistration> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

type ImporterConstructor = fn(&ImporterEnv) -> Box<dyn Importer>;

/// Offers one importer per input file whose extension matches.
pub(crate) struct FileImporterFactory {
    name: &'static str,
    extensions: &'static [&'static str],
    env: ImporterEnv,
    inputs: FileInputs,
    construct: ImporterConstructor,
}

impl FileImporterFactory {
    pub(crate) fn boxed(
        name: &'static str,
        extensions: &'static [&'static str],
        env: &ImporterEnv,
        construct: ImporterConstructor,
    ) -> Box<dyn ImporterFactory> {
        Box::new(Self {
            name,
            extensions,
            env: env.clone(),
            inputs: FileInputs::default(),
            construct,
        })
    }

    pub(crate) fn candidates(&self) -> Vec<PathBuf> {
        self.inputs
            .matching(self.extensions)
            .into_iter()
            .cloned()
            .collect()
    }
}

impl Inbound for FileImporterFactory {
    fn input_slots(&self) -> &'static [Slot] {
        FileInputs::SLOTS
    }

    fn bind(&mut self, slot: &Slot, value: ContextValue) -> Result<(), ContextError> {
        self.inputs.bind(slot, value)
    }

    fn owner_name(&self) -> &'static str {
        self.name
    }
}

impl ImporterFactory for FileImporterFactory {
    fn name(&self) -> &'static str {
        self.name
    }

    fn create_importers(&self, builder: &mut dyn ImporterBuilder) -> Result<(), ImporterError> {
        for path in self.candidates() {
            debug!(
                "Factory '{}' offers an importer for {}",
                self.name,
                crate::sanitize::redact_path(&path)
            );
            builder.new_importer((self.construct)(&self.env), vec![ContextValue::File(path)])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{inject_inputs, ContextMap};
    use std::sync::Arc;

    struct Collecting {
        offered: Vec<Vec<ContextValue>>,
    }

    impl ImporterBuilder for Collecting {
        fn new_importer(
            &mut self,
            _importer: Box<dyn Importer>,
            context_in: Vec<ContextValue>,
        ) -> Result<(), ImporterError> {
            self.offered.push(context_in);
            Ok(())
        }
    }

    fn env() -> ImporterEnv {
        ImporterEnv::new(Arc::new(ImportConfig::default()), std::env::temp_dir())
    }

    #[test]
    fn test_builtin_order() {
        assert_eq!(
            FactoryRegistry::builtin().names(),
            vec!["archive", "csv", "excel", "kml", "geojson", "raster", "osm"]
        );
    }

    #[test]
    fn test_from_config_disables() {
        let mut config = ImportConfig::default();
        config.factories.disabled = vec!["excel".into(), "osm".into()];
        let registry = FactoryRegistry::from_config(&config).unwrap();
        assert_eq!(
            registry.names(),
            vec!["archive", "csv", "kml", "geojson", "raster"]
        );
    }

    #[test]
    fn test_from_config_unknown_factory() {
        let mut config = ImportConfig::default();
        config.factories.disabled = vec!["shapefile".into()];
        let err = FactoryRegistry::from_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownFactory(name) if name == "shapefile"));
    }

    #[test]
    fn test_file_factory_offers_per_matching_file() {
        let mut factory = super::super::csv::factory(&env());
        let values = ContextMap::from_values(vec![ContextValue::Files(vec![
            PathBuf::from("/t/points.csv"),
            PathBuf::from("/t/readme.txt"),
            PathBuf::from("/t/lines.tsv"),
        ])]);
        inject_inputs(factory.as_mut(), &values).unwrap();

        let mut builder = Collecting { offered: vec![] };
        factory.create_importers(&mut builder).unwrap();
        assert_eq!(builder.offered.len(), 2);
        assert_eq!(
            builder.offered[0][0].as_file(),
            Some(std::path::Path::new("/t/points.csv"))
        );
    }

    #[test]
    fn test_file_factory_without_inputs_offers_nothing() {
        let factory = super::super::geojson::factory(&env());
        let mut builder = Collecting { offered: vec![] };
        factory.create_importers(&mut builder).unwrap();
        assert!(builder.offered.is_empty());
    }
}
