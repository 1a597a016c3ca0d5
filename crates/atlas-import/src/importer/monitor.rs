//! Progress reporting and cooperative cancellation for long running
//! importer work.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorSnapshot {
    pub task: String,
    pub sub_task: String,
    pub total: Option<u64>,
    pub worked: u64,
    pub canceled: bool,
}

type Listener = Arc<dyn Fn(&MonitorSnapshot) + Send + Sync>;

/// Cancels the work observed by a monitor from another thread.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Clones share the cancel flag and progress state.
#[derive(Clone, Default)]
pub struct ImporterMonitor {
    canceled: Arc<AtomicBool>,
    state: Arc<Mutex<MonitorSnapshot>>,
    listener: Arc<Mutex<Option<Listener>>>,
}

impl ImporterMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback invoked after every progress update.
    pub fn on_progress(&self, listener: impl Fn(&MonitorSnapshot) + Send + Sync + 'static) {
        let mut slot = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(Arc::new(listener));
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.canceled),
        }
    }

    pub fn begin_task(&self, name: &str, total: Option<u64>) {
        self.update(|state| {
            state.task = name.to_string();
            state.sub_task.clear();
            state.total = total;
            state.worked = 0;
        });
    }

    pub fn sub_task(&self, name: &str) {
        self.update(|state| state.sub_task = name.to_string());
    }

    pub fn worked(&self, amount: u64) {
        self.update(|state| state.worked = state.worked.saturating_add(amount));
    }

    pub fn done(&self) {
        self.update(|state| {
            if let Some(total) = state.total {
                state.worked = total;
            }
            state.sub_task.clear();
        });
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let mut snapshot = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        snapshot.canceled = self.is_canceled();
        snapshot
    }

    fn update(&self, change: impl FnOnce(&mut MonitorSnapshot)) {
        let snapshot = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            change(&mut state);
            state.canceled = self.is_canceled();
            state.clone()
        };
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(listener) = listener {
            listener(&snapshot);
        }
    }
}

impl fmt::Debug for ImporterMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImporterMonitor")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_clones_share_cancel_flag() {
        let monitor = ImporterMonitor::new();
        let clone = monitor.clone();
        assert!(!clone.is_canceled());
        monitor.cancel();
        assert!(clone.is_canceled());
        assert!(monitor.snapshot().canceled);
    }

    #[test]
    fn test_progress_accumulates() {
        let monitor = ImporterMonitor::new();
        monitor.begin_task("Unpacking", Some(10));
        monitor.sub_task("data.zip");
        monitor.worked(3);
        monitor.worked(2);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.task, "Unpacking");
        assert_eq!(snapshot.sub_task, "data.zip");
        assert_eq!(snapshot.worked, 5);

        monitor.done();
        assert_eq!(monitor.snapshot().worked, 10);
    }

    #[test]
    fn test_listener_can_cancel() {
        let monitor = ImporterMonitor::new();
        let handle = monitor.cancel_handle();
        let calls = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&calls);
        monitor.on_progress(move |snapshot| {
            seen.fetch_add(1, Ordering::SeqCst);
            if snapshot.worked >= 2 {
                handle.cancel();
            }
        });

        monitor.worked(1);
        assert!(!monitor.is_canceled());
        monitor.worked(1);
        assert!(monitor.is_canceled());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
