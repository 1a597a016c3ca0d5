//! Broadcasting of context state changes to observers (UI, tests).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ContextEventKind {
    PromptAdded { prompt: String },
    ContextOutChanged,
    VerificationStarted { run: u64 },
    Verified {
        run: u64,
        ok: bool,
        problem: Option<String>,
    },
    Executed { terminal: bool },
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextEvent {
    pub timestamp: DateTime<Utc>,
    pub context: ContextId,
    #[serde(flatten)]
    pub kind: ContextEventKind,
}

impl ContextEvent {
    pub fn new(context: ContextId, kind: ContextEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            context,
            kind,
        }
    }
}

#[derive(Clone)]
pub struct ContextEventBroadcaster {
    sender: broadcast::Sender<ContextEvent>,
}

impl ContextEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn send(&self, event: ContextEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn emit(&self, context: ContextId, kind: ContextEventKind) {
        self.send(ContextEvent::new(context, kind));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContextEvent> {
        self.sender.subscribe()
    }
}

impl Default for ContextEventBroadcaster {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl fmt::Debug for ContextEventBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextEventBroadcaster")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}
