//! An importer whose behaviour is scripted by the test.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use atlas_import::context::{expect_tag, ContextValue, Inbound, Outbound, OutputValue, Slot, TypeTag};
use atlas_import::error::{ContextError, ImporterError};
use atlas_import::importer::{
    Importer, ImporterBuilder, ImporterEnv, ImporterFactory, ImporterMonitor, ImporterSite,
    Preview, Severity, TextEditor, Verdict,
};
use atlas_import::model::{FeatureCollection, FeatureSchema};

/// Id of the single prompt a scripted importer creates.
pub const VALUE: &str = "value";

/// Verification reports not ok for this prompt value.
pub const BAD_VALUE: &str = "bad";

const INPUT_SLOTS: &[Slot] = &[Slot::new("file", TypeTag::File)];
const OUTPUT_SLOTS: &[Slot] = &[Slot::new("features", TypeTag::Features)];

pub struct Script {
    pub prompt: Option<Severity>,
    pub terminal: bool,
    pub verify_delay: Duration,
    pub fail_execute: AtomicBool,
    pub verify_calls: AtomicUsize,
    /// Prompt values seen by verification, in call order.
    pub verified_values: Mutex<Vec<String>>,
}

impl Script {
    pub fn new() -> Self {
        Self {
            prompt: Some(Severity::Verify),
            terminal: true,
            verify_delay: Duration::ZERO,
            fail_execute: AtomicBool::new(false),
            verify_calls: AtomicUsize::new(0),
            verified_values: Mutex::new(Vec::new()),
        }
    }

    pub fn prompt(mut self, severity: Option<Severity>) -> Self {
        self.prompt = severity;
        self
    }

    pub fn verify_delay(mut self, delay: Duration) -> Self {
        self.verify_delay = delay;
        self
    }

    pub fn failing_execute(self) -> Self {
        self.fail_execute.store(true, Ordering::SeqCst);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn values(&self) -> Vec<String> {
        self.verified_values.lock().unwrap().clone()
    }
}

pub struct ScriptedImporter {
    script: Arc<Script>,
    site: Option<Arc<ImporterSite>>,
    file: Option<PathBuf>,
    features: Option<Arc<FeatureCollection>>,
}

impl ScriptedImporter {
    pub fn boxed(script: &Arc<Script>) -> Box<dyn Importer> {
        Box::new(Self {
            script: Arc::clone(script),
            site: None,
            file: None,
            features: None,
        })
    }
}

impl Inbound for ScriptedImporter {
    fn input_slots(&self) -> &'static [Slot] {
        INPUT_SLOTS
    }

    fn bind(&mut self, slot: &Slot, value: ContextValue) -> Result<(), ContextError> {
        expect_tag(slot, &value)?;
        if let ContextValue::File(path) = value {
            self.file = Some(path);
        }
        Ok(())
    }

    fn owner_name(&self) -> &'static str {
        "ScriptedImporter"
    }
}

impl Outbound for ScriptedImporter {
    fn output_values(&self) -> Vec<OutputValue> {
        vec![OutputValue::new(
            OUTPUT_SLOTS[0],
            self.features.clone().map(ContextValue::Features),
        )]
    }
}

impl Importer for ScriptedImporter {
    fn site(&self) -> Option<&Arc<ImporterSite>> {
        self.site.as_ref()
    }

    fn init(&mut self, site: Arc<ImporterSite>, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        site.set_summary("Scripted");
        site.set_terminal(self.script.terminal);
        self.site = Some(site);
        Ok(())
    }

    fn create_prompts(&mut self, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let site = self.site.as_ref().ok_or(ImporterError::NotInitialized)?;
        if let Some(severity) = self.script.prompt {
            site.new_prompt(VALUE)?
                .summary("Value")
                .value("initial")
                .severity(severity)
                .ok(severity != Severity::Required)
                .editor(TextEditor);
        }
        Ok(())
    }

    fn verify(&mut self, monitor: &ImporterMonitor) -> Result<Verdict, ImporterError> {
        self.script.verify_calls.fetch_add(1, Ordering::SeqCst);
        let site = self.site.as_ref().ok_or(ImporterError::NotInitialized)?;
        let value = site.prompt_value(VALUE).unwrap_or_default();

        let deadline = Instant::now() + self.script.verify_delay;
        while Instant::now() < deadline && !monitor.is_canceled() {
            thread::sleep(Duration::from_millis(5));
        }

        self.script.verified_values.lock().unwrap().push(value.clone());
        if value == BAD_VALUE {
            Ok(Verdict::NotOk("bad value".to_string()))
        } else {
            Ok(Verdict::Ok)
        }
    }

    fn preview(&self) -> Preview {
        Preview::message("scripted")
    }

    fn execute(&mut self, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        if self.script.fail_execute.load(Ordering::SeqCst) {
            return Err(ImporterError::Format("scripted failure".to_string()));
        }
        self.features = Some(Arc::new(FeatureCollection::new(FeatureSchema::named(
            "scripted",
        ))));
        Ok(())
    }
}

/// A factory that always fails.
pub struct FailingFactory;

impl FailingFactory {
    pub fn construct(_env: &ImporterEnv) -> Box<dyn ImporterFactory> {
        Box::new(FailingFactory)
    }
}

impl Inbound for FailingFactory {
    fn input_slots(&self) -> &'static [Slot] {
        &[]
    }

    fn bind(&mut self, _slot: &Slot, _value: ContextValue) -> Result<(), ContextError> {
        Ok(())
    }

    fn owner_name(&self) -> &'static str {
        "FailingFactory"
    }
}

impl ImporterFactory for FailingFactory {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn create_importers(&self, _builder: &mut dyn ImporterBuilder) -> Result<(), ImporterError> {
        Err(ImporterError::Format("factory exploded".to_string()))
    }
}
