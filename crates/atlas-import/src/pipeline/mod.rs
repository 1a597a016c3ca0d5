//! Drives importers: one [`ImporterContext`] per offered importer, a
//! debounced [`Verifier`] per context, and the staged [`ImportSession`]
//! on top.

mod context;
mod element;
mod error;
mod events;
mod session;
mod verifier;

pub use context::{ContextState, ImporterContext, PipelineEnv};
pub use element::{ImportElement, Selection};
pub use error::PipelineError;
pub use events::{ContextEvent, ContextEventBroadcaster, ContextEventKind, ContextId};
pub use session::{ImportOutcome, ImportSession, Proceeded, Stage};
pub use verifier::{ChangeSignal, Verifier, VerifyOutcome, VerifyTask};
