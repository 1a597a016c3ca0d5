pub mod archive;
pub mod catalog;
pub mod charset;
pub mod config;
pub mod context;
pub mod error;
pub mod importer;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod sanitize;
pub mod storage;

pub use archive::ArchiveReader;
pub use catalog::{Catalog, CatalogEntry, CatalogTransaction, EntryId, MemoryCatalog};
pub use config::{load_config, load_config_from_str, ImportConfig};
pub use context::{ContextMap, ContextValue, TypeTag};
pub use error::{
    AtlasError, ArchiveError, CatalogError, ConfigError, ContextError, ImporterError, PromptError,
    Result, StorageError, UploadError,
};
pub use importer::{FactoryRegistry, Importer, ImporterFactory, ImporterMonitor, Preview, Verdict};
pub use pipeline::{
    ContextEvent, ContextEventKind, ImportElement, ImportOutcome, ImportSession, ImporterContext,
    PipelineError, Proceeded, Selection,
};
