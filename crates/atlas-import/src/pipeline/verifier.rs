//! Debounced background verification of one importer context.
//!
//! Prompt changes arrive as signals on a channel. A dispatcher thread waits
//! until no signal has arrived for the debounce window, cancels the running
//! verification (if any) and starts a new run on its own thread. A finished
//! run publishes its outcome only if it is still the newest run.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use crate::importer::ImporterMonitor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub ok: bool,
    pub problem: Option<String>,
}

/// The work a verifier schedules.
///
/// `apply` is called with the verifier lock held, only for the newest run.
/// It must not fire change signals.
pub trait VerifyTask: Send + Sync {
    fn run(&self, run: u64, monitor: &ImporterMonitor) -> VerifyOutcome;

    fn apply(&self, run: u64, outcome: VerifyOutcome);
}

#[derive(Default)]
struct VerifierState {
    /// Number of the newest scheduled run. Runs are numbered from 1.
    scheduled: u64,
    current: Option<(u64, ImporterMonitor)>,
    /// Signals fired but not yet folded into a scheduled run.
    pending: usize,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<VerifierState>,
    idle: Condvar,
    task: OnceLock<Arc<dyn VerifyTask>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, VerifierState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct Verifier {
    shared: Arc<Shared>,
    signals: Sender<()>,
    receiver: Option<Receiver<()>>,
    debounce: Duration,
}

impl Verifier {
    /// Creates a verifier without a task. Signals fired before
    /// [`Verifier::start`] are queued.
    pub fn new(debounce: Duration) -> Self {
        let (signals, receiver) = unbounded();
        Self {
            shared: Arc::new(Shared::default()),
            signals,
            receiver: Some(receiver),
            debounce,
        }
    }

    /// Installs the task and starts the dispatcher thread.
    pub fn start(&mut self, task: Arc<dyn VerifyTask>) {
        if self.shared.task.set(task).is_err() {
            debug!("Verifier already started");
            return;
        }
        let Some(receiver) = self.receiver.take() else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        let debounce = self.debounce;
        let spawned = thread::Builder::new()
            .name("verify-dispatch".to_string())
            .spawn(move || dispatch(shared, receiver, debounce));
        if let Err(e) = spawned {
            error!("Failed to start verification dispatcher: {}", e);
        }
    }

    pub fn signal(&self) -> ChangeSignal {
        ChangeSignal {
            target: Some((self.signals.clone(), Arc::downgrade(&self.shared))),
        }
    }

    /// Schedules a run immediately, without waiting for the debounce window.
    pub fn schedule_now(&self) {
        schedule(&self.shared, 0);
    }

    /// Cancels the running verification. Its outcome is still applied.
    pub fn cancel_current(&self) {
        if let Some((run, monitor)) = &self.shared.lock().current {
            info!("Cancel verifier run {}", run);
            monitor.cancel();
        }
    }

    pub fn is_busy(&self) -> bool {
        let state = self.shared.lock();
        state.pending > 0 || state.current.is_some()
    }

    /// The run currently executing, if any.
    pub fn current_run(&self) -> Option<u64> {
        self.shared.lock().current.as_ref().map(|(run, _)| *run)
    }

    pub fn runs_scheduled(&self) -> u64 {
        self.shared.lock().scheduled
    }

    /// Blocks until no signal is pending and no run is executing. Returns
    /// `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        while state.pending > 0 || state.current.is_some() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.shared.idle.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

impl Drop for Verifier {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            state.pending = 0;
            if let Some((_, monitor)) = state.current.take() {
                monitor.cancel();
            }
        }
        self.shared.idle.notify_all();
        // Wake the dispatcher so it sees the shutdown flag
        let _ = self.signals.send(());
    }
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("debounce", &self.debounce)
            .field("busy", &self.is_busy())
            .finish()
    }
}

/// Notifies a verifier that a prompt changed.
#[derive(Clone, Default)]
pub struct ChangeSignal {
    target: Option<(Sender<()>, Weak<Shared>)>,
}

impl ChangeSignal {
    /// A signal connected to nothing.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        let Some((sender, shared)) = &self.target else {
            return;
        };
        let Some(shared) = shared.upgrade() else {
            return;
        };
        {
            let mut state = shared.lock();
            if state.shutdown {
                return;
            }
            state.pending += 1;
        }
        if sender.send(()).is_err() {
            let mut state = shared.lock();
            state.pending = state.pending.saturating_sub(1);
            drop(state);
            shared.idle.notify_all();
        }
    }
}

impl fmt::Debug for ChangeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSignal")
            .field("attached", &self.target.is_some())
            .finish()
    }
}

fn dispatch(shared: Arc<Shared>, receiver: Receiver<()>, debounce: Duration) {
    debug!("Verification dispatcher started");
    loop {
        if receiver.recv().is_err() {
            break;
        }
        let mut collapsed = 1;
        loop {
            match receiver.recv_timeout(debounce) {
                Ok(()) => collapsed += 1,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Verification signal channel disconnected");
                    return;
                }
            }
        }
        if shared.lock().shutdown {
            break;
        }
        if collapsed > 1 {
            debug!("Collapsed {} prompt changes into one verification", collapsed);
        }
        schedule(&shared, collapsed);
    }
    debug!("Verification dispatcher stopped");
}

fn schedule(shared: &Arc<Shared>, collapsed: usize) {
    let Some(task) = shared.task.get().cloned() else {
        debug!("Verification requested before a task was installed");
        return;
    };

    let (run, monitor) = {
        let mut state = shared.lock();
        if state.shutdown {
            return;
        }
        state.pending = state.pending.saturating_sub(collapsed);
        if let Some((previous, monitor)) = state.current.take() {
            info!("Cancel verifier run {}", previous);
            monitor.cancel();
        }
        state.scheduled += 1;
        let run = state.scheduled;
        let monitor = ImporterMonitor::new();
        state.current = Some((run, monitor.clone()));
        (run, monitor)
    };

    let run_shared = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name(format!("verify-{}", run))
        .spawn(move || execute_run(run_shared, task, run, monitor));

    if let Err(e) = spawned {
        error!("Failed to start verification run {}: {}", run, e);
        let mut state = shared.lock();
        if matches!(&state.current, Some((current, _)) if *current == run) {
            state.current = None;
        }
        drop(state);
        shared.idle.notify_all();
    }
}

fn execute_run(shared: Arc<Shared>, task: Arc<dyn VerifyTask>, run: u64, monitor: ImporterMonitor) {
    let outcome = task.run(run, &monitor);

    let mut state = shared.lock();
    let is_current = matches!(&state.current, Some((current, _)) if *current == run);
    if is_current {
        state.current = None;
        task.apply(run, outcome);
    } else {
        debug!("Discarding result of superseded verification run {}", run);
    }
    drop(state);
    shared.idle.notify_all();
}
