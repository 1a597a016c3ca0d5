use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use log::debug;

use super::prompt::{ImporterPrompt, Severity};
use crate::error::PromptError;
use crate::pipeline::{ChangeSignal, ContextEventBroadcaster, ContextEventKind, ContextId};

/// The state an importer shares with its context: what it is, whether it
/// is ready, and the prompts it asks.
///
/// Importers write the descriptive fields and create prompts. The ready
/// flag and problem are written by the context after each verification.
pub struct ImporterSite {
    context: ContextId,
    summary: RwLock<String>,
    description: RwLock<String>,
    icon: RwLock<Option<String>>,
    terminal: AtomicBool,
    ok: AtomicBool,
    problem: RwLock<Option<String>>,
    prompts: RwLock<Vec<Arc<ImporterPrompt>>>,
    signal: ChangeSignal,
    events: ContextEventBroadcaster,
}

impl ImporterSite {
    pub(crate) fn new(
        context: ContextId,
        signal: ChangeSignal,
        events: ContextEventBroadcaster,
    ) -> Self {
        Self {
            context,
            summary: RwLock::new(String::new()),
            description: RwLock::new(String::new()),
            icon: RwLock::new(None),
            terminal: AtomicBool::new(false),
            ok: AtomicBool::new(false),
            problem: RwLock::new(None),
            prompts: RwLock::new(Vec::new()),
            signal,
            events,
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context
    }

    pub fn set_summary(&self, summary: impl Into<String>) {
        *write(&self.summary) = summary.into();
    }

    pub fn summary(&self) -> String {
        read(&self.summary).clone()
    }

    pub fn set_description(&self, description: impl Into<String>) {
        *write(&self.description) = description.into();
    }

    pub fn description(&self) -> String {
        read(&self.description).clone()
    }

    pub fn set_icon(&self, icon: impl Into<String>) {
        *write(&self.icon) = Some(icon.into());
    }

    pub fn icon(&self) -> Option<String> {
        read(&self.icon).clone()
    }

    /// Terminal importers produce final data; executing them ends the
    /// import.
    pub fn set_terminal(&self, terminal: bool) {
        self.terminal.store(terminal, Ordering::SeqCst);
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::SeqCst)
    }

    pub fn is_ok(&self) -> bool {
        self.ok.load(Ordering::SeqCst)
    }

    pub fn problem(&self) -> Option<String> {
        read(&self.problem).clone()
    }

    pub(crate) fn set_status(&self, ok: bool, problem: Option<String>) {
        *write(&self.problem) = problem;
        self.ok.store(ok, Ordering::SeqCst);
    }

    /// Creates a prompt with a unique id. New prompts are ok, have
    /// `Info` severity and no editor.
    pub fn new_prompt(&self, id: &str) -> Result<Arc<ImporterPrompt>, PromptError> {
        let prompt = {
            let mut prompts = write(&self.prompts);
            if prompts.iter().any(|p| p.id() == id) {
                return Err(PromptError::DuplicateId(id.to_string()));
            }
            let prompt = Arc::new(ImporterPrompt::new(id, self.signal.clone()));
            prompts.push(Arc::clone(&prompt));
            prompt
        };
        debug!("New prompt '{}' for context {}", id, self.context);
        self.events.emit(
            self.context,
            ContextEventKind::PromptAdded {
                prompt: id.to_string(),
            },
        );
        Ok(prompt)
    }

    pub fn prompt(&self, id: &str) -> Option<Arc<ImporterPrompt>> {
        read(&self.prompts).iter().find(|p| p.id() == id).cloned()
    }

    /// Prompts in creation order.
    pub fn prompts(&self) -> Vec<Arc<ImporterPrompt>> {
        read(&self.prompts).clone()
    }

    pub fn prompt_value(&self, id: &str) -> Result<String, PromptError> {
        self.prompt(id)
            .map(|p| p.current_value())
            .ok_or_else(|| PromptError::NotFound(id.to_string()))
    }

    /// Whether every `Required` prompt is ok.
    pub fn required_prompts_ok(&self) -> bool {
        read(&self.prompts)
            .iter()
            .filter(|p| p.current_severity() == Severity::Required)
            .all(|p| p.is_ok())
    }

    /// Highest severity among prompts that are not ok.
    pub fn max_not_ok_prompt_severity(&self) -> Option<Severity> {
        read(&self.prompts)
            .iter()
            .filter(|p| !p.is_ok())
            .map(|p| p.current_severity())
            .max()
    }
}

impl fmt::Debug for ImporterSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImporterSite")
            .field("context", &self.context)
            .field("summary", &self.summary())
            .field("terminal", &self.is_terminal())
            .field("ok", &self.is_ok())
            .field("prompts", &read(&self.prompts).len())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
