use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::model::{FeatureCollection, RasterSource};

/// The type of a value flowing between importer stages.
///
/// `Dataset` is abstract: no value ever has it as its runtime tag, but an
/// input declared as `Dataset` accepts features or rasters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TypeTag {
    File,
    Files,
    Features,
    Raster,
    Dataset,
}

impl TypeTag {
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::File => "File",
            TypeTag::Files => "Files",
            TypeTag::Features => "Features",
            TypeTag::Raster => "Raster",
            TypeTag::Dataset => "Dataset",
        }
    }

    pub fn is_abstract(self) -> bool {
        matches!(self, TypeTag::Dataset)
    }

    /// Whether a value of type `other` may be assigned to a slot of this type.
    pub fn is_assignable_from(self, other: TypeTag) -> bool {
        self == other
            || matches!(
                (self, other),
                (TypeTag::Dataset, TypeTag::Features) | (TypeTag::Dataset, TypeTag::Raster)
            )
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub enum ContextValue {
    File(PathBuf),
    Files(Vec<PathBuf>),
    Features(Arc<FeatureCollection>),
    Raster(Arc<RasterSource>),
}

impl ContextValue {
    pub fn tag(&self) -> TypeTag {
        match self {
            ContextValue::File(_) => TypeTag::File,
            ContextValue::Files(_) => TypeTag::Files,
            ContextValue::Features(_) => TypeTag::Features,
            ContextValue::Raster(_) => TypeTag::Raster,
        }
    }

    pub fn as_file(&self) -> Option<&Path> {
        match self {
            ContextValue::File(path) => Some(path),
            _ => None,
        }
    }

    pub fn as_files(&self) -> Option<&[PathBuf]> {
        match self {
            ContextValue::Files(paths) => Some(paths),
            _ => None,
        }
    }

    pub fn as_features(&self) -> Option<&Arc<FeatureCollection>> {
        match self {
            ContextValue::Features(features) => Some(features),
            _ => None,
        }
    }

    pub fn as_raster(&self) -> Option<&Arc<RasterSource>> {
        match self {
            ContextValue::Raster(raster) => Some(raster),
            _ => None,
        }
    }
}

/// Values of a context keyed by type.
///
/// Outputs collected from an importer are keyed by the declared slot type,
/// values added directly are keyed by their runtime type.
#[derive(Debug, Clone, Default)]
pub struct ContextMap {
    entries: BTreeMap<TypeTag, ContextValue>,
}

impl ContextMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map keyed by runtime type. Later values replace earlier
    /// values of the same type.
    pub fn from_values(values: impl IntoIterator<Item = ContextValue>) -> Self {
        let mut map = Self::new();
        for value in values {
            map.insert(value);
        }
        map
    }

    /// Inserts under the runtime type, returning the replaced value.
    pub fn insert(&mut self, value: ContextValue) -> Option<ContextValue> {
        self.entries.insert(value.tag(), value)
    }

    pub fn insert_as(&mut self, tag: TypeTag, value: ContextValue) -> Option<ContextValue> {
        self.entries.insert(tag, value)
    }

    pub fn get(&self, tag: TypeTag) -> Option<&ContextValue> {
        self.entries.get(&tag)
    }

    pub fn contains(&self, tag: TypeTag) -> bool {
        self.entries.contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeTag, &ContextValue)> {
        self.entries.iter().map(|(tag, value)| (*tag, value))
    }

    pub fn values(&self) -> impl Iterator<Item = &ContextValue> {
        self.entries.values()
    }

    pub fn file(&self) -> Option<&Path> {
        self.get(TypeTag::File).and_then(ContextValue::as_file)
    }

    pub fn files(&self) -> Option<&[PathBuf]> {
        self.get(TypeTag::Files).and_then(ContextValue::as_files)
    }

    pub fn features(&self) -> Option<&Arc<FeatureCollection>> {
        self.get(TypeTag::Features)
            .and_then(ContextValue::as_features)
    }

    pub fn raster(&self) -> Option<&Arc<RasterSource>> {
        self.get(TypeTag::Raster).and_then(ContextValue::as_raster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_accepts_features_and_raster() {
        assert!(TypeTag::Dataset.is_assignable_from(TypeTag::Features));
        assert!(TypeTag::Dataset.is_assignable_from(TypeTag::Raster));
        assert!(!TypeTag::Dataset.is_assignable_from(TypeTag::File));
        assert!(!TypeTag::Features.is_assignable_from(TypeTag::Dataset));
        assert!(TypeTag::File.is_assignable_from(TypeTag::File));
    }

    #[test]
    fn test_from_values_keys_by_runtime_type() {
        let map = ContextMap::from_values(vec![
            ContextValue::File(PathBuf::from("/tmp/a.zip")),
            ContextValue::Files(vec![PathBuf::from("/tmp/b.csv")]),
        ]);
        assert_eq!(map.len(), 2);
        assert_eq!(map.file(), Some(Path::new("/tmp/a.zip")));
        assert_eq!(map.files().map(<[PathBuf]>::len), Some(1));
    }

    #[test]
    fn test_insert_replaces_same_type() {
        let mut map = ContextMap::new();
        assert!(map.insert(ContextValue::File(PathBuf::from("a"))).is_none());
        let previous = map.insert(ContextValue::File(PathBuf::from("b")));
        assert_eq!(
            previous.as_ref().and_then(ContextValue::as_file),
            Some(Path::new("a"))
        );
        assert_eq!(map.file(), Some(Path::new("b")));
    }
}
