//! Questions an importer asks the user, and the editors that validate the
//! answers.

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::PromptError;
use crate::pipeline::ChangeSignal;

/// How strongly a prompt needs the user's attention.
///
/// Only `Required` prompts gate the readiness of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Verify,
    Required,
}

impl Severity {
    pub fn rank(self) -> u8 {
        match self {
            Severity::Info => 0,
            Severity::Verify => 1,
            Severity::Required => 2,
        }
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EditorKind {
    Choice {
        options: Vec<String>,
        free_text: bool,
    },
    Number {
        min: i64,
        max: i64,
    },
    Text,
    Confirm,
}

/// A value accepted by an editor, and whether it satisfies the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub value: String,
    pub ok: bool,
}

impl Accepted {
    pub fn ok(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ok: true,
        }
    }
}

pub trait PromptEditor: Send + Sync {
    fn kind(&self) -> EditorKind;

    /// Validates and normalizes a submitted value. `Err` carries the reason
    /// shown to the user.
    fn accept(&self, value: &str) -> Result<Accepted, String>;
}

pub struct ChoiceEditor {
    options: Vec<String>,
    free_text: bool,
}

impl ChoiceEditor {
    pub fn new<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            options: options.into_iter().map(Into::into).collect(),
            free_text: false,
        }
    }

    pub fn free_text(mut self, free_text: bool) -> Self {
        self.free_text = free_text;
        self
    }
}

impl PromptEditor for ChoiceEditor {
    fn kind(&self) -> EditorKind {
        EditorKind::Choice {
            options: self.options.clone(),
            free_text: self.free_text,
        }
    }

    fn accept(&self, value: &str) -> Result<Accepted, String> {
        if self.free_text {
            if value.is_empty() {
                return Err("value must not be empty".to_string());
            }
            return Ok(Accepted::ok(value));
        }
        self.options
            .iter()
            .find(|option| option.eq_ignore_ascii_case(value))
            .map(|option| Accepted::ok(option.as_str()))
            .ok_or_else(|| format!("expected one of: {}", self.options.join(", ")))
    }
}

pub struct NumberEditor {
    min: i64,
    max: i64,
}

impl NumberEditor {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }
}

impl PromptEditor for NumberEditor {
    fn kind(&self) -> EditorKind {
        EditorKind::Number {
            min: self.min,
            max: self.max,
        }
    }

    fn accept(&self, value: &str) -> Result<Accepted, String> {
        let number: i64 = value
            .trim()
            .parse()
            .map_err(|_| "not a whole number".to_string())?;
        if number < self.min || number > self.max {
            return Err(format!("must be between {} and {}", self.min, self.max));
        }
        Ok(Accepted::ok(number.to_string()))
    }
}

pub struct TextEditor;

impl PromptEditor for TextEditor {
    fn kind(&self) -> EditorKind {
        EditorKind::Text
    }

    fn accept(&self, value: &str) -> Result<Accepted, String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("value must not be empty".to_string());
        }
        Ok(Accepted::ok(trimmed))
    }
}

/// Yes/no confirmation. The prompt is ok only when confirmed.
pub struct ConfirmEditor;

impl PromptEditor for ConfirmEditor {
    fn kind(&self) -> EditorKind {
        EditorKind::Confirm
    }

    fn accept(&self, value: &str) -> Result<Accepted, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "ok" => Ok(Accepted {
                value: "true".to_string(),
                ok: true,
            }),
            "false" | "no" => Ok(Accepted {
                value: "false".to_string(),
                ok: false,
            }),
            _ => Err("expected yes or no".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct PromptState {
    summary: String,
    description: String,
    value: String,
    severity: Severity,
    ok: bool,
}

/// Serializable snapshot of a prompt for UIs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptView {
    pub id: String,
    pub summary: String,
    pub description: String,
    pub value: String,
    pub severity: Severity,
    pub ok: bool,
    pub editor: Option<EditorKind>,
}

/// A single question of an importer.
///
/// The chained setters (`summary`, `value`, ...) configure the prompt while
/// the importer builds it and do not trigger verification. `set_value`,
/// `set_ok` and `submit` are user edits and do.
pub struct ImporterPrompt {
    id: String,
    state: RwLock<PromptState>,
    editor: RwLock<Option<Arc<dyn PromptEditor>>>,
    signal: ChangeSignal,
}

impl ImporterPrompt {
    pub(crate) fn new(id: impl Into<String>, signal: ChangeSignal) -> Self {
        Self {
            id: id.into(),
            state: RwLock::new(PromptState {
                summary: String::new(),
                description: String::new(),
                value: String::new(),
                severity: Severity::Info,
                ok: true,
            }),
            editor: RwLock::new(None),
            signal,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn summary(&self, summary: impl Into<String>) -> &Self {
        self.write().summary = summary.into();
        self
    }

    pub fn description(&self, description: impl Into<String>) -> &Self {
        self.write().description = description.into();
        self
    }

    pub fn value(&self, value: impl Into<String>) -> &Self {
        self.write().value = value.into();
        self
    }

    pub fn severity(&self, severity: Severity) -> &Self {
        self.write().severity = severity;
        self
    }

    pub fn ok(&self, ok: bool) -> &Self {
        self.write().ok = ok;
        self
    }

    pub fn editor(&self, editor: impl PromptEditor + 'static) -> &Self {
        *self
            .editor
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(editor));
        self
    }

    pub fn current_summary(&self) -> String {
        self.read().summary.clone()
    }

    pub fn current_description(&self) -> String {
        self.read().description.clone()
    }

    pub fn current_value(&self) -> String {
        self.read().value.clone()
    }

    pub fn current_severity(&self) -> Severity {
        self.read().severity
    }

    pub fn is_ok(&self) -> bool {
        self.read().ok
    }

    pub fn editor_kind(&self) -> Option<EditorKind> {
        self.editor
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|editor| editor.kind())
    }

    /// Sets the value and schedules re-verification.
    pub fn set_value(&self, value: impl Into<String>) {
        self.write().value = value.into();
        self.signal.fire();
    }

    pub fn set_ok(&self, ok: bool) {
        self.write().ok = ok;
        self.signal.fire();
    }

    /// Runs `value` through the editor, stores the accepted value and ok
    /// flag, and schedules re-verification.
    pub fn submit(&self, value: &str) -> Result<(), PromptError> {
        let editor = self
            .editor
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| PromptError::NoEditor(self.id.clone()))?;
        let accepted = editor
            .accept(value)
            .map_err(|reason| PromptError::InvalidValue {
                id: self.id.clone(),
                value: value.to_string(),
                reason,
            })?;
        debug!("Prompt '{}' set to '{}'", self.id, accepted.value);
        {
            let mut state = self.write();
            state.value = accepted.value;
            state.ok = accepted.ok;
        }
        self.signal.fire();
        Ok(())
    }

    pub fn view(&self) -> PromptView {
        let state = self.read().clone();
        PromptView {
            id: self.id.clone(),
            summary: state.summary,
            description: state.description,
            value: state.value,
            severity: state.severity,
            ok: state.ok,
            editor: self.editor_kind(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, PromptState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, PromptState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for ImporterPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("ImporterPrompt")
            .field("id", &self.id)
            .field("value", &state.value)
            .field("severity", &state.severity)
            .field("ok", &state.ok)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(id: &str) -> ImporterPrompt {
        ImporterPrompt::new(id, ChangeSignal::detached())
    }

    #[test]
    fn test_severity_ranking() {
        assert!(Severity::Required > Severity::Verify);
        assert!(Severity::Verify > Severity::Info);
        assert_eq!(
            [Severity::Verify, Severity::Required, Severity::Info]
                .into_iter()
                .max(),
            Some(Severity::Required)
        );
    }

    #[test]
    fn test_defaults() {
        let p = prompt("separator");
        assert!(p.is_ok());
        assert_eq!(p.current_severity(), Severity::Info);
        assert_eq!(p.current_value(), "");
        assert!(p.editor_kind().is_none());
    }

    #[test]
    fn test_builder_chain() {
        let p = prompt("headlines");
        p.summary("Headlines")
            .value("1")
            .severity(Severity::Verify)
            .editor(NumberEditor::new(0, 10));
        let view = p.view();
        assert_eq!(view.summary, "Headlines");
        assert_eq!(view.value, "1");
        assert_eq!(view.severity, Severity::Verify);
        assert_eq!(view.editor, Some(EditorKind::Number { min: 0, max: 10 }));
    }

    #[test]
    fn test_submit_without_editor() {
        let p = prompt("x");
        assert_eq!(p.submit("1"), Err(PromptError::NoEditor("x".into())));
    }

    #[test]
    fn test_submit_number_out_of_range() {
        let p = prompt("headlines");
        p.editor(NumberEditor::new(0, 10)).value("1");
        let err = p.submit("11").unwrap_err();
        assert!(matches!(err, PromptError::InvalidValue { .. }));
        assert_eq!(p.current_value(), "1");

        p.submit(" 3 ").unwrap();
        assert_eq!(p.current_value(), "3");
    }

    #[test]
    fn test_choice_normalizes_case() {
        let p = prompt("encoding");
        p.editor(ChoiceEditor::new(["UTF-8", "ISO-8859-1"]));
        p.submit("utf-8").unwrap();
        assert_eq!(p.current_value(), "UTF-8");
        assert!(p.submit("EBCDIC").is_err());
    }

    #[test]
    fn test_choice_free_text() {
        let p = prompt("separator");
        p.editor(ChoiceEditor::new([",", ";"]).free_text(true));
        p.submit("#").unwrap();
        assert_eq!(p.current_value(), "#");
    }

    #[test]
    fn test_confirm_sets_ok() {
        let p = prompt("tagFilter");
        p.severity(Severity::Required).ok(false).editor(ConfirmEditor);
        p.submit("yes").unwrap();
        assert!(p.is_ok());
        p.submit("no").unwrap();
        assert!(!p.is_ok());
    }
}
