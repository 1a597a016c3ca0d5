//! Typed values exchanged between importer stages.

mod inject;
mod values;

pub use inject::{collect_outputs, expect_tag, inject_inputs, Inbound, Outbound, OutputValue, Slot};
pub use values::{ContextMap, ContextValue, TypeTag};
