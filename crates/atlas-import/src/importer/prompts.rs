//! Prompts shared by several importers.

use std::sync::Arc;

use super::prompt::{ChoiceEditor, ImporterPrompt, Severity, TextEditor};
use super::site::ImporterSite;
use crate::charset::{Charset, OFFERED_CHARSETS};
use crate::error::{ImporterError, PromptError};

/// Lets the user choose the encoding of file names or contents.
#[derive(Debug, Clone)]
pub struct CharsetPrompt {
    prompt: Arc<ImporterPrompt>,
}

impl CharsetPrompt {
    pub fn new(site: &ImporterSite, id: &str, default: &str) -> Result<Self, PromptError> {
        let prompt = site.new_prompt(id)?;
        prompt
            .summary("Character set")
            .description(
                "The character set of the text. Choose another one if names or \
                 values look garbled or the data cannot be read.",
            )
            .value(default)
            .severity(Severity::Verify)
            .editor(ChoiceEditor::new(OFFERED_CHARSETS.iter().copied()).free_text(true));
        Ok(Self { prompt })
    }

    pub fn prompt(&self) -> &Arc<ImporterPrompt> {
        &self.prompt
    }

    pub fn charset(&self) -> Result<Charset, ImporterError> {
        let label = self.prompt.current_value();
        Charset::for_label(&label).map_err(|_| ImporterError::WrongCharset { charset: label })
    }
}

/// Name of the feature type created by an import. Defaults to the base
/// name of the input file.
#[derive(Debug, Clone)]
pub struct SchemaNamePrompt {
    prompt: Arc<ImporterPrompt>,
}

impl SchemaNamePrompt {
    pub const ID: &'static str = "schemaName";

    pub fn new(site: &ImporterSite, default: &str) -> Result<Self, PromptError> {
        let prompt = site.new_prompt(Self::ID)?;
        prompt
            .summary("Name of the data set")
            .description("The name under which the imported features are stored.")
            .value(sanitize_schema_name(default))
            .severity(Severity::Info)
            .editor(TextEditor);
        Ok(Self { prompt })
    }

    pub fn prompt(&self) -> &Arc<ImporterPrompt> {
        &self.prompt
    }

    pub fn value(&self) -> String {
        sanitize_schema_name(&self.prompt.current_value())
    }
}

/// Keeps letters, digits, `_` and `-`; everything else becomes `_`.
pub fn sanitize_schema_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "import".to_string()
    } else {
        cleaned
    }
}

pub const OFFERED_CRS: &[&str] = &[
    "EPSG:4326",
    "EPSG:3857",
    "EPSG:25832",
    "EPSG:25833",
    "EPSG:31467",
    "EPSG:31468",
];

/// Coordinate reference system of data that does not declare one.
#[derive(Debug, Clone)]
pub struct CrsPrompt {
    prompt: Arc<ImporterPrompt>,
}

impl CrsPrompt {
    pub const ID: &'static str = "crs";

    pub fn new(site: &ImporterSite, default: &str) -> Result<Self, PromptError> {
        let prompt = site.new_prompt(Self::ID)?;
        prompt
            .summary("Coordinate reference system")
            .description("The coordinate reference system of the data, e.g. EPSG:4326.")
            .value(default)
            .severity(Severity::Verify)
            .editor(ChoiceEditor::new(OFFERED_CRS.iter().copied()).free_text(true));
        Ok(Self { prompt })
    }

    pub fn prompt(&self) -> &Arc<ImporterPrompt> {
        &self.prompt
    }

    /// The chosen CRS, normalized to `AUTHORITY:CODE`, or `None` if the
    /// value is not of that form.
    pub fn crs(&self) -> Option<String> {
        normalize_crs(&self.prompt.current_value())
    }
}

/// Normalizes CRS identifiers. `CRS84` style URNs map to `EPSG:4326`.
pub fn normalize_crs(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.to_ascii_uppercase().ends_with("CRS84") {
        return Some("EPSG:4326".to_string());
    }
    // urn:ogc:def:crs:EPSG::4326
    let candidate = match trimmed.rsplit_once("::") {
        Some((prefix, code)) if prefix.to_ascii_uppercase().contains("EPSG") => {
            format!("EPSG:{}", code)
        }
        _ => trimmed.to_string(),
    };
    let (authority, code) = candidate.split_once(':')?;
    if authority.is_empty() || code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{}:{}", authority.to_ascii_uppercase(), code))
}
