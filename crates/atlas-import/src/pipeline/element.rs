use serde::Serialize;

use super::events::ContextId;
use crate::catalog::{CatalogEntry, EntryId};
use crate::importer::{Preview, PromptView, Severity};

/// Something a user can select in an import session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportElement {
    Context(ContextId),
    Prompt { context: ContextId, prompt: String },
    CatalogEntry(EntryId),
}

/// What selecting an [`ImportElement`] shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selection {
    Preview {
        context: ContextId,
        summary: String,
        ok: bool,
        severity: Option<Severity>,
        preview: Preview,
    },
    Prompt(PromptView),
    CatalogEntry(CatalogEntry),
}
