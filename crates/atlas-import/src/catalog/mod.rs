//! The metadata catalog imported data is registered in.
//!
//! The pipeline only needs a transactional handle: create entries, attach
//! data, commit. [`MemoryCatalog`] keeps everything in memory.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CatalogError;
use crate::model::{FeatureCollection, RasterSource};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EntryId(String);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Features,
    Raster,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub title: String,
    pub description: String,
    pub kind: EntryKind,
    /// How to reach the data, e.g. `path` or `schema`.
    pub connection: BTreeMap<String, String>,
    pub created: DateTime<Utc>,
}

impl CatalogEntry {
    pub fn new(title: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            kind,
            connection: BTreeMap::new(),
            created: Utc::now(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn connection(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.connection.insert(key.into(), value.into());
        self
    }

    /// Entry describing an imported feature collection.
    pub fn for_features(features: &FeatureCollection) -> Self {
        let mut entry = Self::new(&features.schema.name, EntryKind::Features)
            .description(format!("{} features", features.len()))
            .connection("schema", &features.schema.name);
        if let Some(crs) = &features.schema.crs {
            entry = entry.connection("crs", crs);
        }
        entry
    }

    /// Entry describing an imported raster.
    pub fn for_raster(raster: &RasterSource) -> Self {
        let title = raster
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "raster".to_string());
        let mut entry = Self::new(title, EntryKind::Raster)
            .description(format!("{} image", raster.format.name()))
            .connection("path", raster.path.to_string_lossy());
        if let Some(crs) = &raster.crs {
            entry = entry.connection("crs", crs);
        }
        entry
    }
}

pub trait Catalog: Send + Sync {
    fn begin(&self) -> Result<Box<dyn CatalogTransaction + '_>, CatalogError>;

    fn entry(&self, id: &EntryId) -> Option<CatalogEntry>;
}

/// Changes made through a transaction become visible on `commit`. A
/// transaction dropped without commit changes nothing.
pub trait CatalogTransaction {
    fn new_entry(&mut self, entry: CatalogEntry) -> EntryId;

    fn put_features(
        &mut self,
        id: &EntryId,
        features: Arc<FeatureCollection>,
    ) -> Result<(), CatalogError>;

    fn commit(self: Box<Self>) -> Result<Vec<EntryId>, CatalogError>;
}

#[derive(Default)]
struct CatalogState {
    entries: BTreeMap<EntryId, CatalogEntry>,
    features: BTreeMap<EntryId, Arc<FeatureCollection>>,
}

#[derive(Default)]
pub struct MemoryCatalog {
    state: RwLock<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CatalogState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CatalogState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    pub fn entries(&self) -> Vec<(EntryId, CatalogEntry)> {
        self.read()
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect()
    }

    pub fn features(&self, id: &EntryId) -> Option<Arc<FeatureCollection>> {
        self.read().features.get(id).cloned()
    }
}

impl Catalog for MemoryCatalog {
    fn begin(&self) -> Result<Box<dyn CatalogTransaction + '_>, CatalogError> {
        Ok(Box::new(MemoryTransaction {
            catalog: self,
            entries: Vec::new(),
            features: BTreeMap::new(),
        }))
    }

    fn entry(&self, id: &EntryId) -> Option<CatalogEntry> {
        self.read().entries.get(id).cloned()
    }
}

impl fmt::Debug for MemoryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCatalog")
            .field("entries", &self.len())
            .finish()
    }
}

struct MemoryTransaction<'a> {
    catalog: &'a MemoryCatalog,
    entries: Vec<(EntryId, CatalogEntry)>,
    features: BTreeMap<EntryId, Arc<FeatureCollection>>,
}

impl CatalogTransaction for MemoryTransaction<'_> {
    fn new_entry(&mut self, entry: CatalogEntry) -> EntryId {
        let id = EntryId::new();
        debug!("New catalog entry '{}' ({})", entry.title, id);
        self.entries.push((id.clone(), entry));
        id
    }

    fn put_features(
        &mut self,
        id: &EntryId,
        features: Arc<FeatureCollection>,
    ) -> Result<(), CatalogError> {
        if !self.entries.iter().any(|(known, _)| known == id) {
            return Err(CatalogError::UnknownEntry(id.to_string()));
        }
        self.features.insert(id.clone(), features);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<Vec<EntryId>, CatalogError> {
        let MemoryTransaction {
            catalog,
            entries,
            features,
        } = *self;
        let ids: Vec<EntryId> = entries.iter().map(|(id, _)| id.clone()).collect();

        let mut state = catalog.write();
        state.entries.extend(entries);
        state.features.extend(features);
        info!("Committed {} catalog entries", ids.len());
        Ok(ids)
    }
}
