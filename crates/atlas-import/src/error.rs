use std::path::PathBuf;
use thiserror::Error;

use crate::context::TypeTag;

#[derive(Error, Debug)]
pub enum AtlasError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Importer error: {0}")]
    Importer(#[from] ImporterError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Unknown importer factory: {0}")]
    UnknownFactory(String),
}

/// Mismatches between the values of a context and the inputs/outputs an
/// importer or factory declares. These are programmer errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Context out already contains a value for type {tag} (declared twice by {owner})")]
    DuplicateOutput { tag: TypeTag, owner: String },

    #[error("More than one value could be assigned to input '{slot}' of {owner}: {candidates:?}")]
    AmbiguousInput {
        slot: &'static str,
        owner: String,
        candidates: Vec<TypeTag>,
    },

    #[error("Input '{slot}' expects {expected} but got {found}")]
    TypeMismatch {
        slot: &'static str,
        expected: TypeTag,
        found: TypeTag,
    },
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Wrong charset: {charset}")]
    WrongCharset { charset: String },

    #[error("Unknown charset: {0}")]
    UnknownCharset(String),

    #[error("File already exists: {0}")]
    FileExists(PathBuf),

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to extract '{path}': {source}")]
    Extract {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read archive '{name}': {source}")]
    ReadArchive {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid zip archive '{name}': {message}")]
    Zip { name: String, message: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("Prompt '{0}' already exists")]
    DuplicateId(String),

    #[error("Prompt '{0}' not found")]
    NotFound(String),

    #[error("Prompt '{0}' has no editor")]
    NoEditor(String),

    #[error("Invalid value '{value}' for prompt '{id}': {reason}")]
    InvalidValue {
        id: String,
        value: String,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum ImporterError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Wrong charset: {charset}")]
    WrongCharset { charset: String },

    #[error("{0}")]
    Format(String),

    #[error("Your data results in more than {limit} elements ({found} found). Please provide a smaller extract or refine the filter.")]
    LimitExceeded { limit: usize, found: usize },

    #[error("Importer has not been initialized")]
    NotInitialized,

    #[error("Importer has nothing to execute: {0}")]
    NotVerified(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to read upload '{name}': {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload of '{0}' was canceled")]
    Canceled(String),

    #[error("Path not found: {0}")]
    NotFound(PathBuf),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Unknown catalog entry: {0}")]
    UnknownEntry(String),

    #[error("Catalog commit failed: {0}")]
    Commit(String),
}

pub type Result<T> = std::result::Result<T, AtlasError>;
