//! # Periodic Worker
//!
//! One background thread that ticks registered [`Module`]s on the schedule
//! each module asks for. The controller registers the pacer and the estimator
//! here and owns the single `start`/`stop` pair.
//!
//! The module list is guarded by one mutex that the worker holds while
//! ticking, so [`ProcessWorker::deregister_module`] returns only once any
//! in-flight tick of that module has finished. Modules must not call back
//! into the worker from `process`.
//!
//! The control path (wake-ups, shutdown) uses a crossbeam channel; the worker
//! sleeps on it with a timeout equal to the earliest module deadline.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use quanta::{Clock, Instant};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::WorkerError;

/// A component invoked on a recurring schedule by the [`ProcessWorker`].
pub trait Module: Send + Sync {
    /// How long until `process` should run next. `Duration::ZERO` means now.
    fn time_until_next_process(&self) -> Duration;

    /// Do one unit of periodic work.
    fn process(&self);
}

/// Worker thread settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Name given to the OS thread.
    pub thread_name: String,
    /// Longest the worker sleeps when no module is due sooner.
    pub max_idle: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            thread_name: "strata-send-ctl".into(),
            max_idle: Duration::from_millis(500),
        }
    }
}

enum ControlMessage {
    Wake,
    Shutdown,
}

struct Registration {
    module: Arc<dyn Module>,
    next_run: Option<Instant>,
}

type Registrations = Arc<Mutex<Vec<Registration>>>;

/// Owner of the periodic tick thread.
///
/// Dropping the worker stops it.
pub struct ProcessWorker {
    config: WorkerConfig,
    modules: Registrations,
    control_tx: Sender<ControlMessage>,
    control_rx: Receiver<ControlMessage>,
    handle: Option<thread::JoinHandle<()>>,
    started: bool,
}

impl ProcessWorker {
    pub fn new(config: WorkerConfig) -> Self {
        let (control_tx, control_rx) = unbounded();
        ProcessWorker {
            config,
            modules: Arc::new(Mutex::new(Vec::new())),
            control_tx,
            control_rx,
            handle: None,
            started: false,
        }
    }

    /// Add a module to the tick set. Returns `false` if it was already there.
    pub fn register_module(&self, module: Arc<dyn Module>) -> bool {
        {
            let mut modules = self.lock_modules();
            if modules.iter().any(|r| Arc::ptr_eq(&r.module, &module)) {
                debug!(worker = %self.config.thread_name, "module already registered");
                return false;
            }
            modules.push(Registration {
                module,
                next_run: None,
            });
        }
        // Worker may be asleep on a long timeout.
        let _ = self.control_tx.send(ControlMessage::Wake);
        true
    }

    /// Remove a module. Blocks while the worker is ticking.
    ///
    /// Returns `false` if the module was not registered.
    pub fn deregister_module(&self, module: &Arc<dyn Module>) -> bool {
        let mut modules = self.lock_modules();
        let before = modules.len();
        modules.retain(|r| !Arc::ptr_eq(&r.module, module));
        let removed = modules.len() != before;
        if !removed {
            debug!(worker = %self.config.thread_name, "deregistering unknown module");
        }
        removed
    }

    pub fn module_count(&self) -> usize {
        self.lock_modules().len()
    }

    /// Spawn the tick thread. A worker can be started once.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        if self.started {
            return Err(WorkerError::AlreadyStarted(self.config.thread_name.clone()));
        }
        let modules = self.modules.clone();
        let control_rx = self.control_rx.clone();
        let max_idle = self.config.max_idle;

        let handle = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || run_worker(modules, control_rx, max_idle))?;

        self.started = true;
        self.handle = Some(handle);
        info!(worker = %self.config.thread_name, "worker started");
        Ok(())
    }

    /// Stop ticking and join the thread. Idempotent.
    ///
    /// When this returns no module will be ticked again by this worker.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.control_tx.send(ControlMessage::Shutdown);
            if handle.join().is_err() {
                warn!(worker = %self.config.thread_name, "worker thread panicked");
            }
            info!(worker = %self.config.thread_name, "worker stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    fn lock_modules(&self) -> std::sync::MutexGuard<'_, Vec<Registration>> {
        self.modules.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(modules: Registrations, control_rx: Receiver<ControlMessage>, max_idle: Duration) {
    let clock = Clock::new();
    loop {
        let wait = process_due(&clock, &modules, max_idle);
        match control_rx.recv_timeout(wait) {
            Ok(ControlMessage::Wake) | Err(RecvTimeoutError::Timeout) => {}
            Ok(ControlMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Tick every module that is due and return how long to sleep.
fn process_due(clock: &Clock, modules: &Registrations, max_idle: Duration) -> Duration {
    let mut modules = modules.lock().unwrap_or_else(|e| e.into_inner());
    let now = clock.now();
    let mut next_wake = now + max_idle;

    for reg in modules.iter_mut() {
        let mut due = match reg.next_run {
            Some(at) => at,
            None => now + reg.module.time_until_next_process(),
        };
        if due <= now {
            reg.module.process();
            due = clock.now() + reg.module.time_until_next_process();
        }
        reg.next_run = Some(due);
        next_wake = next_wake.min(due);
    }

    next_wake.duration_since(clock.now())
}
