//! Test harness for isolated test execution.
//!
//! Every harness owns a temp directory with an `input` directory for
//! fixtures and a `work` directory that sessions use as their temp base.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use atlas_import::catalog::{Catalog, MemoryCatalog};
use atlas_import::config::ImportConfig;
use atlas_import::importer::{FactoryRegistry, ImporterEnv};
use atlas_import::pipeline::{ImportSession, PipelineEnv};

/// Upper bound for waiting on background verification.
pub const WAIT: Duration = Duration::from_secs(10);

pub struct TestHarness {
    temp_dir: TempDir,
    pub input_dir: PathBuf,
    pub work_dir: PathBuf,
    debounce_ms: u64,
}

impl TestHarness {
    /// A harness with a short debounce window.
    pub fn new() -> Self {
        Self::with_debounce(20)
    }

    pub fn with_debounce(debounce_ms: u64) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let input_dir = temp_dir.path().join("input");
        let work_dir = temp_dir.path().join("work");
        std::fs::create_dir_all(&input_dir).expect("Failed to create input dir");
        std::fs::create_dir_all(&work_dir).expect("Failed to create work dir");

        Self {
            temp_dir,
            input_dir,
            work_dir,
            debounce_ms,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn write_input(&self, filename: &str, content: &[u8]) -> PathBuf {
        let path = self.input_dir.join(filename);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create input subdirectory");
        }
        std::fs::write(&path, content).expect("Failed to write input file");
        path
    }

    pub fn write_text_input(&self, filename: &str, content: &str) -> PathBuf {
        self.write_input(filename, content.as_bytes())
    }

    pub fn config(&self) -> ImportConfig {
        let mut config = ImportConfig::default();
        config.temp_directory = Some(self.work_dir.to_string_lossy().into_owned());
        config.verify.debounce_ms = self.debounce_ms;
        config
    }

    pub fn env(&self, registry: FactoryRegistry) -> PipelineEnv {
        PipelineEnv::new(
            ImporterEnv::new(Arc::new(self.config()), &self.work_dir),
            registry,
        )
    }

    /// A session with the built-in factories and an in-memory catalog.
    pub fn session(&self) -> (ImportSession, Arc<MemoryCatalog>) {
        let catalog = Arc::new(MemoryCatalog::new());
        let session = ImportSession::new(self.config(), Arc::clone(&catalog) as Arc<dyn Catalog>)
            .expect("Failed to create session");
        (session, catalog)
    }
}
