//! One node of the import tree: an importer (none for the root), the values
//! it was given, the values it produced and its prompts.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tracing::info_span;

use super::error::PipelineError;
use super::events::{ContextEventBroadcaster, ContextEventKind, ContextId};
use super::verifier::{ChangeSignal, Verifier, VerifyOutcome, VerifyTask};
use crate::context::{collect_outputs, inject_inputs, ContextMap, ContextValue};
use crate::error::{ContextError, ImporterError, PromptError};
use crate::importer::{
    FactoryRegistry, Importer, ImporterBuilder, ImporterEnv, ImporterMonitor, ImporterPrompt,
    ImporterSite, Preview, Severity, Verdict,
};

/// Everything a context needs from its surroundings. Shared by all
/// contexts of one session.
#[derive(Debug, Clone)]
pub struct PipelineEnv {
    pub importer: ImporterEnv,
    pub registry: Arc<FactoryRegistry>,
    pub events: ContextEventBroadcaster,
}

impl PipelineEnv {
    pub fn new(importer: ImporterEnv, registry: FactoryRegistry) -> Self {
        Self {
            importer,
            registry: Arc::new(registry),
            events: ContextEventBroadcaster::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    /// The first verification has not finished yet.
    Initializing,
    /// A verification is pending or running.
    Prompting,
    Ready,
    Blocked,
    Executed,
}

type SharedImporter = Arc<Mutex<Box<dyn Importer>>>;

fn lock_importer(importer: &SharedImporter) -> MutexGuard<'_, Box<dyn Importer>> {
    importer
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Verification of one context, run by its [`Verifier`].
struct ContextTask {
    id: ContextId,
    importer: SharedImporter,
    site: Arc<ImporterSite>,
    events: ContextEventBroadcaster,
    /// Set when `init` or `create_prompts` failed. Every run reports it.
    init_problem: Option<String>,
    verified: Arc<AtomicBool>,
}

impl VerifyTask for ContextTask {
    fn run(&self, run: u64, monitor: &ImporterMonitor) -> VerifyOutcome {
        let _span = info_span!("verify", context = %self.id, run).entered();
        self.events
            .emit(self.id, ContextEventKind::VerificationStarted { run });

        if let Some(problem) = &self.init_problem {
            return VerifyOutcome {
                ok: false,
                problem: Some(problem.clone()),
            };
        }

        let verdict = lock_importer(&self.importer).verify(monitor);
        let (ok, problem) = match verdict {
            _ if monitor.is_canceled() => (false, Some("Verification canceled".to_string())),
            Ok(Verdict::Ok) => (true, None),
            Ok(Verdict::NotOk(reason)) => (false, Some(reason)),
            Err(e) => {
                debug!("Verification run {} of {} failed: {}", run, self.id, e);
                (false, Some(Preview::unable_to_read(&e.to_string())))
            }
        };

        VerifyOutcome {
            ok: ok && self.site.required_prompts_ok(),
            problem,
        }
    }

    fn apply(&self, run: u64, outcome: VerifyOutcome) {
        debug!(
            "Context {} verified by run {}: ok={}",
            self.id, run, outcome.ok
        );
        self.site.set_status(outcome.ok, outcome.problem.clone());
        self.verified.store(true, Ordering::SeqCst);
        self.events.emit(
            self.id,
            ContextEventKind::Verified {
                run,
                ok: outcome.ok,
                problem: outcome.problem,
            },
        );
    }
}

/// Turns offered importers into child contexts during discovery.
struct ContextBuilder<'a> {
    env: &'a PipelineEnv,
    monitor: &'a ImporterMonitor,
    created: Vec<Arc<ImporterContext>>,
}

impl ImporterBuilder for ContextBuilder<'_> {
    fn new_importer(
        &mut self,
        importer: Box<dyn Importer>,
        context_in: Vec<ContextValue>,
    ) -> Result<(), ImporterError> {
        let context = ImporterContext::new(
            importer,
            ContextMap::from_values(context_in),
            self.env.clone(),
            self.monitor,
        )?;
        self.created.push(Arc::new(context));
        Ok(())
    }
}

pub struct ImporterContext {
    id: ContextId,
    env: PipelineEnv,
    importer: Option<SharedImporter>,
    site: Arc<ImporterSite>,
    context_in: ContextMap,
    context_out: RwLock<ContextMap>,
    executed: AtomicBool,
    verified: Arc<AtomicBool>,
    verifier: Option<Verifier>,
}

impl ImporterContext {
    /// The starting context. It has no importer and is always ok; values
    /// are added with [`ImporterContext::add_context_out`].
    pub fn root(env: PipelineEnv) -> Self {
        let id = ContextId::new();
        let site = Arc::new(ImporterSite::new(
            id,
            ChangeSignal::detached(),
            env.events.clone(),
        ));
        site.set_summary("Start");
        site.set_status(true, None);
        Self {
            id,
            env,
            importer: None,
            site,
            context_in: ContextMap::new(),
            context_out: RwLock::new(ContextMap::new()),
            executed: AtomicBool::new(false),
            verified: Arc::new(AtomicBool::new(true)),
            verifier: None,
        }
    }

    /// Binds `context_in` to the importer, runs `init` and `create_prompts`
    /// and schedules the first verification.
    ///
    /// Failures of `init` and `create_prompts` do not fail construction;
    /// the context becomes not ok and shows the error as its problem.
    pub fn new(
        mut importer: Box<dyn Importer>,
        context_in: ContextMap,
        env: PipelineEnv,
        monitor: &ImporterMonitor,
    ) -> Result<Self, ContextError> {
        let id = ContextId::new();
        let _span = info_span!("context", id = %id, importer = importer.owner_name()).entered();

        let bound = inject_inputs(importer.as_mut(), &context_in)?;
        debug!(
            "Bound {} input(s) of {} for context {}",
            bound,
            importer.owner_name(),
            id
        );

        let mut verifier = Verifier::new(env.importer.config.verify_debounce());
        let site = Arc::new(ImporterSite::new(id, verifier.signal(), env.events.clone()));

        let init_problem = importer
            .init(Arc::clone(&site), monitor)
            .and_then(|()| importer.create_prompts(monitor))
            .err()
            .map(|e| {
                warn!("Failed to initialize {}: {}", importer.owner_name(), e);
                Preview::unable_to_read(&e.to_string())
            });

        let importer: SharedImporter = Arc::new(Mutex::new(importer));
        let verified = Arc::new(AtomicBool::new(false));
        verifier.start(Arc::new(ContextTask {
            id,
            importer: Arc::clone(&importer),
            site: Arc::clone(&site),
            events: env.events.clone(),
            init_problem,
            verified: Arc::clone(&verified),
        }));
        verifier.schedule_now();

        Ok(Self {
            id,
            env,
            importer: Some(importer),
            site,
            context_in,
            context_out: RwLock::new(ContextMap::new()),
            executed: AtomicBool::new(false),
            verified,
            verifier: Some(verifier),
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn site(&self) -> &Arc<ImporterSite> {
        &self.site
    }

    pub fn is_root(&self) -> bool {
        self.importer.is_none()
    }

    pub fn summary(&self) -> String {
        self.site.summary()
    }

    pub fn is_terminal(&self) -> bool {
        self.site.is_terminal()
    }

    pub fn is_executed(&self) -> bool {
        self.executed.load(Ordering::SeqCst)
    }

    pub fn context_in(&self) -> &ContextMap {
        &self.context_in
    }

    pub fn context_out(&self) -> ContextMap {
        self.context_out
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn prompts(&self) -> Vec<Arc<ImporterPrompt>> {
        self.site.prompts()
    }

    pub fn prompt(&self, id: &str) -> Option<Arc<ImporterPrompt>> {
        self.site.prompt(id)
    }

    /// Validates and stores a prompt value, which schedules a verification.
    ///
    /// An executed context becomes unexecuted and drops its outputs, since
    /// they were produced with the previous value.
    pub fn submit_prompt(&self, id: &str, value: &str) -> Result<(), PromptError> {
        self.site
            .prompt(id)
            .ok_or_else(|| PromptError::NotFound(id.to_string()))?
            .submit(value)?;

        if self.executed.swap(false, Ordering::SeqCst) {
            info!(
                "Prompt '{}' of executed context {} changed, dropping its outputs",
                id, self.id
            );
            *self
                .context_out
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = ContextMap::new();
            self.env
                .events
                .emit(self.id, ContextEventKind::ContextOutChanged);
        }
        Ok(())
    }

    /// Whether the importer reported ok and every required prompt is ok.
    pub fn is_ok(&self) -> bool {
        self.is_root() || (self.site.is_ok() && self.site.required_prompts_ok())
    }

    pub fn problem(&self) -> Option<String> {
        self.site.problem()
    }

    pub fn max_not_ok_prompt_severity(&self) -> Option<Severity> {
        self.site.max_not_ok_prompt_severity()
    }

    pub fn is_busy(&self) -> bool {
        self.verifier.as_ref().is_some_and(Verifier::is_busy)
    }

    pub fn state(&self) -> ContextState {
        if self.is_executed() {
            ContextState::Executed
        } else if !self.verified.load(Ordering::SeqCst) {
            ContextState::Initializing
        } else if self.is_busy() {
            ContextState::Prompting
        } else if self.is_ok() {
            ContextState::Ready
        } else {
            ContextState::Blocked
        }
    }

    /// Waits until no verification is pending or running.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.verifier
            .as_ref()
            .map_or(true, |verifier| verifier.wait_idle(timeout))
    }

    pub fn cancel_verification(&self) {
        if let Some(verifier) = &self.verifier {
            verifier.cancel_current();
        }
    }

    /// Schedules a verification without waiting for the debounce window.
    pub fn reverify(&self) {
        if let Some(verifier) = &self.verifier {
            verifier.schedule_now();
        }
    }

    /// Number of verification runs started so far.
    pub fn verification_runs(&self) -> u64 {
        self.verifier.as_ref().map_or(0, Verifier::runs_scheduled)
    }

    /// Adds an external value, e.g. an uploaded file. Only the root context
    /// accepts values this way.
    pub fn add_context_out(&self, value: ContextValue) -> Result<(), PipelineError> {
        if !self.is_root() {
            return Err(PipelineError::NotRoot);
        }
        debug!("Root context {} receives a {}", self.id, value.tag());
        self.context_out
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(value);
        self.env
            .events
            .emit(self.id, ContextEventKind::ContextOutChanged);
        Ok(())
    }

    /// Asks every registered factory, in order, for importers of this
    /// context's outputs and returns one child context per offer.
    ///
    /// A failing factory fails the whole discovery.
    pub fn find_next(
        &self,
        monitor: &ImporterMonitor,
    ) -> Result<Vec<Arc<ImporterContext>>, PipelineError> {
        let _span = info_span!("discover", context = %self.id).entered();
        let context_out = self.context_out();
        let mut builder = ContextBuilder {
            env: &self.env,
            monitor,
            created: Vec::new(),
        };

        for registration in self.env.registry.iter() {
            if monitor.is_canceled() {
                info!("Discovery for context {} canceled", self.id);
                break;
            }
            let mut factory = (registration.construct)(&self.env.importer);
            inject_inputs(factory.as_mut(), &context_out)?;
            factory
                .create_importers(&mut builder)
                .map_err(|source| PipelineError::Discovery {
                    factory: registration.name,
                    source,
                })?;
        }

        info!(
            "Context {} offers {} importer(s)",
            self.id,
            builder.created.len()
        );
        Ok(builder.created)
    }

    /// Runs the importer and replaces the outputs with what it produced.
    ///
    /// Refused unless the context is ok and idle. Outputs are only replaced
    /// after the importer succeeded.
    pub fn execute(&self, monitor: &ImporterMonitor) -> Result<(), PipelineError> {
        let importer = self.importer.as_ref().ok_or(PipelineError::NoImporter)?;
        if self.is_busy() {
            return Err(PipelineError::NotReady {
                summary: self.summary(),
                reason: "Verification is still running.".to_string(),
            });
        }
        if !self.is_ok() {
            return Err(PipelineError::NotReady {
                summary: self.summary(),
                reason: self
                    .problem()
                    .unwrap_or_else(|| "Required prompts are not answered.".to_string()),
            });
        }

        let _span = info_span!("execute", context = %self.id).entered();
        let outputs = {
            let mut importer = lock_importer(importer);
            importer.execute(monitor).map_err(PipelineError::Execute)?;
            collect_outputs(&**importer)?
        };
        info!(
            "Executed '{}', {} output value(s)",
            self.summary(),
            outputs.len()
        );

        *self
            .context_out
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = outputs;
        self.executed.store(true, Ordering::SeqCst);
        self.env.events.emit(
            self.id,
            ContextEventKind::Executed {
                terminal: self.is_terminal(),
            },
        );
        self.env
            .events
            .emit(self.id, ContextEventKind::ContextOutChanged);
        Ok(())
    }

    /// What to show for this context: `Pending` while verifying, the problem
    /// when not ok, else the importer's own preview.
    pub fn preview(&self) -> Preview {
        let Some(importer) = &self.importer else {
            let names = self
                .context_out()
                .values()
                .flat_map(|value| match value {
                    ContextValue::File(path) => vec![path.clone()],
                    ContextValue::Files(paths) => paths.clone(),
                    _ => Vec::new(),
                })
                .map(|path| crate::sanitize::redact_path(&path))
                .collect();
            return Preview::Files { names };
        };
        if self.is_busy() {
            return Preview::Pending;
        }
        if !self.site.is_ok() {
            if let Some(problem) = self.site.problem() {
                return Preview::message(problem);
            }
        }
        match importer.try_lock() {
            Ok(importer) => importer.preview(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().preview(),
            Err(TryLockError::WouldBlock) => Preview::Pending,
        }
    }
}

impl fmt::Debug for ImporterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImporterContext")
            .field("id", &self.id)
            .field("summary", &self.summary())
            .field("root", &self.is_root())
            .field("state", &self.state())
            .finish()
    }
}
