use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::UploadSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_version")]
    pub version: String,
    /// Base directory for session temp dirs. `~` is expanded.
    #[serde(default)]
    pub temp_directory: Option<String>,
    #[serde(default)]
    pub keep_temp_files: bool,
    #[serde(default)]
    pub verify: VerifyConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub csv: CsvConfig,
    #[serde(default)]
    pub factories: FactoriesConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            temp_directory: None,
            keep_temp_files: false,
            verify: VerifyConfig::default(),
            upload: UploadConfig::default(),
            archive: ArchiveConfig::default(),
            limits: LimitsConfig::default(),
            csv: CsvConfig::default(),
            factories: FactoriesConfig::default(),
        }
    }
}

impl ImportConfig {
    pub fn temp_base(&self) -> PathBuf {
        match &self.temp_directory {
            Some(dir) => expand_home(dir),
            None => std::env::temp_dir(),
        }
    }

    pub fn verify_debounce(&self) -> Duration {
        Duration::from_millis(self.verify.debounce_ms)
    }

    pub fn upload_settings(&self) -> UploadSettings {
        UploadSettings {
            buffer_size: self.upload.buffer_size,
            progress_interval: Duration::from_millis(self.upload.progress_interval_ms),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Prompt changes within this window cause a single verification.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    100
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_buffer_size() -> usize {
    4096
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: default_progress_interval_ms(),
            buffer_size: default_buffer_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Charset of entry names in archives that don't flag UTF-8.
    #[serde(default = "default_charset")]
    pub charset: String,
    #[serde(default)]
    pub overwrite: bool,
    /// Drop root and `..` components from entry paths.
    #[serde(default = "default_true")]
    pub sanitize_entry_paths: bool,
}

fn default_charset() -> String {
    "UTF-8".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            charset: default_charset(),
            overwrite: false,
            sanitize_entry_paths: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_preview_features")]
    pub preview_features: usize,
    #[serde(default = "default_import_features")]
    pub import_features: usize,
}

fn default_preview_features() -> usize {
    100
}

fn default_import_features() -> usize {
    50_000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            preview_features: default_preview_features(),
            import_features: default_import_features(),
        }
    }
}

/// Initial values of the CSV prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvConfig {
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default = "default_quote")]
    pub quote: String,
    #[serde(default = "default_charset")]
    pub encoding: String,
    #[serde(default = "default_number_format")]
    pub number_format: String,
}

fn default_separator() -> String {
    ",".to_string()
}

fn default_quote() -> String {
    "\"".to_string()
}

fn default_number_format() -> String {
    "1,234.56".to_string()
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            quote: default_quote(),
            encoding: default_charset(),
            number_format: default_number_format(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactoriesConfig {
    #[serde(default)]
    pub disabled: Vec<String>,
}
