use std::path::Path;

use crate::charset::Charset;
use crate::config::schema::ImportConfig;
use crate::error::ConfigError;
use crate::importer::csv::separator_byte;
use crate::importer::tabular::NumberFormat;
use crate::importer::FactoryRegistry;

const SCHEMA_JSON: &str = include_str!("../../../../schema/import-config-v1.json");

const MAX_DEBOUNCE_MS: u64 = 10_000;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ImportConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<ImportConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: ImportConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Validation { message }
}

fn validate_config(config: &ImportConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.verify.debounce_ms > MAX_DEBOUNCE_MS {
        return Err(invalid(format!(
            "verify.debounce_ms must not exceed {} (got {})",
            MAX_DEBOUNCE_MS, config.verify.debounce_ms
        )));
    }

    if config.upload.buffer_size == 0 {
        return Err(invalid("upload.buffer_size must be positive".to_string()));
    }

    if config.limits.preview_features > config.limits.import_features {
        return Err(invalid(format!(
            "limits.preview_features ({}) exceeds limits.import_features ({})",
            config.limits.preview_features, config.limits.import_features
        )));
    }

    for (field, label) in [
        ("archive.charset", &config.archive.charset),
        ("csv.encoding", &config.csv.encoding),
    ] {
        if Charset::for_label(label).is_err() {
            return Err(invalid(format!("{}: unknown charset '{}'", field, label)));
        }
    }

    if separator_byte(&config.csv.separator).is_none() {
        return Err(invalid(format!(
            "csv.separator must be a single character (got '{}')",
            config.csv.separator
        )));
    }
    if separator_byte(&config.csv.quote).is_none() {
        return Err(invalid(format!(
            "csv.quote must be a single character (got '{}')",
            config.csv.quote
        )));
    }
    if NumberFormat::parse(&config.csv.number_format).is_none() {
        return Err(invalid(format!(
            "csv.number_format: unknown pattern '{}'",
            config.csv.number_format
        )));
    }

    let builtin = FactoryRegistry::builtin();
    for name in &config.factories.disabled {
        if !builtin.contains(name) {
            return Err(ConfigError::UnknownFactory(name.clone()));
        }
    }

    Ok(())
}
