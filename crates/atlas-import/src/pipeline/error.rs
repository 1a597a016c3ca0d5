use thiserror::Error;

use crate::error::{
    CatalogError, ConfigError, ContextError, ImporterError, PromptError, StorageError, UploadError,
};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Importer factory '{factory}' failed: {source}")]
    Discovery {
        factory: &'static str,
        #[source]
        source: ImporterError,
    },

    #[error("Execution failed: {0}")]
    Execute(#[source] ImporterError),

    #[error("'{summary}' is not ready: {reason}")]
    NotReady { summary: String, reason: String },

    #[error("The root context has no importer")]
    NoImporter,

    #[error("Only the root context accepts external values")]
    NotRoot,

    #[error("No stage to go back to")]
    NoSuchStage,

    #[error("No candidate at index {0}")]
    NoSuchCandidate(usize),

    #[error("No context with id {0}")]
    NoSuchContext(String),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
