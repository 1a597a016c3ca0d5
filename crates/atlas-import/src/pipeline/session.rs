//! A staged import: upload data, pick one of the offered importers, answer
//! its prompts, proceed until a terminal importer commits to the catalog.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info_span;
use walkdir::WalkDir;

use super::context::{ImporterContext, PipelineEnv};
use super::element::{ImportElement, Selection};
use super::error::PipelineError;
use super::events::{ContextEvent, ContextEventBroadcaster, ContextId};
use crate::catalog::{Catalog, CatalogEntry, EntryId};
use crate::config::ImportConfig;
use crate::context::ContextValue;
use crate::error::{CatalogError, PromptError, UploadError};
use crate::importer::{FactoryRegistry, ImporterEnv, ImporterMonitor};
use crate::sanitize::redact_path;
use crate::storage::{write_upload, ImportTempDir, UploadProgress};

/// A context and the importers offered for its outputs.
#[derive(Debug)]
pub struct Stage {
    context: Arc<ImporterContext>,
    candidates: Vec<Arc<ImporterContext>>,
}

impl Stage {
    pub fn context(&self) -> &Arc<ImporterContext> {
        &self.context
    }

    pub fn candidates(&self) -> &[Arc<ImporterContext>] {
        &self.candidates
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportOutcome {
    pub context: ContextId,
    pub entries: Vec<EntryId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Proceeded {
    /// A non-terminal importer ran; a new stage with this many candidates
    /// was pushed.
    NextStage { candidates: usize },
    Imported(ImportOutcome),
}

pub struct ImportSession {
    env: PipelineEnv,
    catalog: Arc<dyn Catalog>,
    stages: Vec<Stage>,
    uploads: Vec<PathBuf>,
    // Dropped last: contexts may still point into it
    temp_dir: ImportTempDir,
}

impl ImportSession {
    /// A session with the built-in factories minus those disabled in
    /// `config`.
    pub fn new(config: ImportConfig, catalog: Arc<dyn Catalog>) -> Result<Self, PipelineError> {
        let registry = FactoryRegistry::from_config(&config)?;
        Self::with_registry(config, registry, catalog)
    }

    pub fn with_registry(
        config: ImportConfig,
        registry: FactoryRegistry,
        catalog: Arc<dyn Catalog>,
    ) -> Result<Self, PipelineError> {
        let temp_dir = ImportTempDir::create_in(&config.temp_base(), "atlas-import")?
            .keep(config.keep_temp_files);
        let env = PipelineEnv::new(
            ImporterEnv::new(Arc::new(config), temp_dir.path()),
            registry,
        );
        let root = Arc::new(ImporterContext::root(env.clone()));
        info!(
            "Import session started in {}",
            redact_path(temp_dir.path())
        );
        Ok(Self {
            env,
            catalog,
            stages: vec![Stage {
                context: root,
                candidates: Vec::new(),
            }],
            uploads: Vec::new(),
            temp_dir,
        })
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn events(&self) -> &ContextEventBroadcaster {
        &self.env.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContextEvent> {
        self.env.events.subscribe()
    }

    pub fn root(&self) -> &Arc<ImporterContext> {
        &self.stages[0].context
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn current(&self) -> &Stage {
        // A session always has its root stage
        &self.stages[self.stages.len() - 1]
    }

    pub fn candidates(&self) -> &[Arc<ImporterContext>] {
        self.current().candidates()
    }

    /// Streams an upload into the session directory, hands it to the root
    /// context and rediscovers importers. Returns the stored path.
    ///
    /// Going back to the root stage is implied: later stages were built
    /// from the previous root values.
    pub fn upload<R: Read>(
        &mut self,
        name: &str,
        content_type: Option<&str>,
        reader: R,
        progress: &dyn UploadProgress,
    ) -> Result<PathBuf, PipelineError> {
        let _span = info_span!("upload", name = %name).entered();
        let config = Arc::clone(&self.env.importer.config);
        let (path, bytes) = write_upload(
            &self.temp_dir.path().join("uploads"),
            name,
            content_type,
            reader,
            config.upload_settings(),
            progress,
        )?;
        info!("Received {} ({} bytes)", redact_path(&path), bytes);
        self.add_file(path.clone())?;
        Ok(path)
    }

    /// References an existing file, or all files below a directory.
    pub fn add_path(&mut self, path: &Path) -> Result<(), PipelineError> {
        if path.is_file() {
            return self.add_file(path.to_path_buf());
        }
        if !path.is_dir() {
            return Err(UploadError::NotFound(path.to_path_buf()).into());
        }
        let mut files: Vec<PathBuf> = WalkDir::new(path)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        files.sort();
        info!("Adding {} file(s) from {}", files.len(), redact_path(path));

        self.stages.truncate(1);
        self.root().add_context_out(ContextValue::Files(files))?;
        self.discover()
    }

    fn add_file(&mut self, path: PathBuf) -> Result<(), PipelineError> {
        self.stages.truncate(1);
        self.uploads.push(path);
        let root = Arc::clone(self.root());
        if let [single] = self.uploads.as_slice() {
            root.add_context_out(ContextValue::File(single.clone()))?;
        } else {
            root.add_context_out(ContextValue::Files(self.uploads.clone()))?;
        }
        self.discover()
    }

    /// Replaces the candidates of the current stage with a fresh discovery.
    pub fn discover(&mut self) -> Result<(), PipelineError> {
        let monitor = ImporterMonitor::new();
        let Some(stage) = self.stages.last_mut() else {
            return Ok(());
        };
        stage.candidates = stage.context.find_next(&monitor)?;
        Ok(())
    }

    /// Every context of the session, current stage first.
    fn find_context(&self, id: ContextId) -> Option<Arc<ImporterContext>> {
        self.stages
            .iter()
            .rev()
            .flat_map(|stage| stage.candidates.iter().chain(std::iter::once(&stage.context)))
            .find(|context| context.id() == id)
            .cloned()
    }

    /// The candidates of the current stage, each followed by its prompts.
    pub fn elements(&self) -> Vec<ImportElement> {
        let mut elements = Vec::new();
        for candidate in self.candidates() {
            elements.push(ImportElement::Context(candidate.id()));
            elements.extend(candidate.prompts().iter().map(|prompt| ImportElement::Prompt {
                context: candidate.id(),
                prompt: prompt.id().to_string(),
            }));
        }
        elements
    }

    pub fn select(&self, element: &ImportElement) -> Result<Selection, PipelineError> {
        match element {
            ImportElement::Context(id) => {
                let context = self
                    .find_context(*id)
                    .ok_or_else(|| PipelineError::NoSuchContext(id.to_string()))?;
                Ok(Selection::Preview {
                    context: *id,
                    summary: context.summary(),
                    ok: context.is_ok(),
                    severity: context.max_not_ok_prompt_severity(),
                    preview: context.preview(),
                })
            }
            ImportElement::Prompt { context, prompt } => {
                let owner = self
                    .find_context(*context)
                    .ok_or_else(|| PipelineError::NoSuchContext(context.to_string()))?;
                let prompt = owner
                    .prompt(prompt)
                    .ok_or_else(|| PromptError::NotFound(prompt.clone()))?;
                Ok(Selection::Prompt(prompt.view()))
            }
            ImportElement::CatalogEntry(id) => self
                .catalog
                .entry(id)
                .map(Selection::CatalogEntry)
                .ok_or_else(|| CatalogError::UnknownEntry(id.to_string()).into()),
        }
    }

    /// Changes a prompt of any context in the session. Stages built on the
    /// outputs of an executed context are dropped, so the current stage
    /// becomes the one offering that context again.
    pub fn submit_prompt(
        &mut self,
        context: ContextId,
        prompt: &str,
        value: &str,
    ) -> Result<(), PipelineError> {
        let owner = self
            .find_context(context)
            .ok_or_else(|| PipelineError::NoSuchContext(context.to_string()))?;
        owner.submit_prompt(prompt, value)?;

        if let Some(index) = self
            .stages
            .iter()
            .skip(1)
            .position(|stage| stage.context.id() == context)
        {
            let keep = index + 1;
            info!(
                "Prompt of '{}' changed, dropping {} later stage(s)",
                owner.summary(),
                self.stages.len() - keep
            );
            self.stages.truncate(keep);
        }
        Ok(())
    }

    /// Executes candidate `index` of the current stage. A terminal importer
    /// commits its outputs to the catalog; any other pushes a new stage
    /// with the importers offered for its outputs.
    pub fn proceed(
        &mut self,
        index: usize,
        monitor: &ImporterMonitor,
    ) -> Result<Proceeded, PipelineError> {
        let candidate = self
            .candidates()
            .get(index)
            .cloned()
            .ok_or(PipelineError::NoSuchCandidate(index))?;
        candidate.execute(monitor)?;

        if candidate.is_terminal() {
            let outcome = self.commit(&candidate)?;
            return Ok(Proceeded::Imported(outcome));
        }

        let next = candidate.find_next(monitor)?;
        let count = next.len();
        info!(
            "'{}' leads to {} candidate(s)",
            candidate.summary(),
            count
        );
        self.stages.push(Stage {
            context: candidate,
            candidates: next,
        });
        Ok(Proceeded::NextStage { candidates: count })
    }

    /// Returns to the previous stage. Earlier stages are kept as they are.
    pub fn back(&mut self) -> Result<(), PipelineError> {
        if self.stages.len() <= 1 {
            return Err(PipelineError::NoSuchStage);
        }
        self.stages.pop();
        Ok(())
    }

    fn commit(&self, context: &ImporterContext) -> Result<ImportOutcome, PipelineError> {
        let _span = info_span!("commit", context = %context.id()).entered();
        let outputs = context.context_out();
        let mut transaction = self.catalog.begin()?;
        for value in outputs.values() {
            match value {
                ContextValue::Features(features) => {
                    let id = transaction.new_entry(CatalogEntry::for_features(features));
                    transaction.put_features(&id, Arc::clone(features))?;
                }
                ContextValue::Raster(raster) => {
                    transaction.new_entry(CatalogEntry::for_raster(raster));
                }
                ContextValue::File(_) | ContextValue::Files(_) => {}
            }
        }
        let entries = transaction.commit()?;
        Ok(ImportOutcome {
            context: context.id(),
            entries,
        })
    }
}

impl fmt::Debug for ImportSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportSession")
            .field("stages", &self.stages.len())
            .field("candidates", &self.candidates().len())
            .finish()
    }
}
