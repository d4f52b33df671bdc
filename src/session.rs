//! Background run invocation.
//!
//! A [`ProbeSession`] owns the device for its lifetime and runs probe
//! selections on a dedicated worker thread so the caller never blocks on a
//! sweep. Only one run may be active; a second start request is rejected.
//! While a run holds the device, direct device access and rescans fail fast
//! instead of waiting.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tracing::{info, warn};

use crate::aggregator::{ResultAggregator, RunSummary};
use crate::classifier::{CameraDescriptor, Classifier};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::ports::{ImageSink, ProcessInfo};
use crate::probes::ProbeKind;
use crate::result::ProbeResult;
use crate::runner::{panic_message, parse_probes, CancelToken, ProbeRunner};
use crate::traits::{CameraBackend, CameraDevice};

/// Lifecycle of the session's run slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    /// No run active.
    Idle,
    /// A run is executing probes.
    Running,
    /// Cancellation was requested and the worker is winding down.
    Cancelling,
}

type Listener = Box<dyn Fn(&ProbeResult) + Send + Sync>;

struct Shared {
    state: Mutex<RunState>,
    aggregator: Mutex<ResultAggregator>,
    listeners: Mutex<Vec<Listener>>,
    cancel: Mutex<CancelToken>,
}

/// Lock, recovering the value if a listener panicked while holding it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns the run slot to idle when the worker exits, including by panic.
struct IdleOnExit(Arc<Shared>);

impl Drop for IdleOnExit {
    fn drop(&mut self) {
        *lock(&self.0.state) = RunState::Idle;
    }
}

/// Handle to a run started by [`ProbeSession::start_run`].
pub struct RunHandle {
    worker: JoinHandle<RunSummary>,
}

impl RunHandle {
    /// Block until the run ends and return its summary.
    pub fn wait(self) -> Result<RunSummary> {
        self.worker
            .join()
            .map_err(|_| Error::Worker("probe worker panicked".to_owned()))
    }

    /// Whether the worker has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
}

/// Owns a device and runs probe selections against it in the background.
pub struct ProbeSession<D> {
    device: Arc<Mutex<D>>,
    shared: Arc<Shared>,
    config: Arc<EngineConfig>,
    image_sink: Option<Arc<dyn ImageSink>>,
    process_info: Option<Arc<dyn ProcessInfo>>,
}

impl<D: CameraDevice + Send + 'static> ProbeSession<D> {
    /// Session over an already opened `device`.
    pub fn new(device: D, config: EngineConfig) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
            shared: Arc::new(Shared {
                state: Mutex::new(RunState::Idle),
                aggregator: Mutex::new(ResultAggregator::new()),
                listeners: Mutex::new(Vec::new()),
                cancel: Mutex::new(CancelToken::new()),
            }),
            config: Arc::new(config),
            image_sink: None,
            process_info: None,
        }
    }

    /// Sink for "Capture Test Image".
    #[must_use]
    pub fn with_image_sink(mut self, sink: Arc<dyn ImageSink>) -> Self {
        self.image_sink = Some(sink);
        self
    }

    /// Host listing for "USB Interface".
    #[must_use]
    pub fn with_process_info(mut self, info: Arc<dyn ProcessInfo>) -> Self {
        self.process_info = Some(info);
        self
    }

    /// Register a callback invoked on the worker thread after each probe.
    ///
    /// Callbacks must not register further callbacks.
    pub fn on_probe_completed<F>(&self, callback: F)
    where
        F: Fn(&ProbeResult) + Send + Sync + 'static,
    {
        lock(&self.shared.listeners).push(Box::new(callback));
    }

    /// Current run state.
    #[must_use]
    pub fn state(&self) -> RunState {
        *lock(&self.shared.state)
    }

    /// Whether a run is active or winding down.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() != RunState::Idle
    }

    /// Start a run of the named probes. See [`ProbeSession::start_probes`].
    pub fn start_run<S: AsRef<str>>(&self, probe_names: &[S]) -> Result<RunHandle> {
        let probes = parse_probes(probe_names)?;
        self.start_probes(probes)
    }

    /// Start a run on a worker thread and return immediately.
    ///
    /// Results from the previous run are cleared. Fails with
    /// [`Error::RunInProgress`] while another run is active.
    pub fn start_probes(&self, probes: Vec<ProbeKind>) -> Result<RunHandle> {
        if probes.is_empty() {
            return Err(Error::NoProbesSelected);
        }
        let cancel = CancelToken::new();
        {
            // The token is installed before the state lock is released so a
            // concurrent cancel_run always reaches this run's token.
            let mut state = lock(&self.shared.state);
            if *state != RunState::Idle {
                return Err(Error::RunInProgress);
            }
            *state = RunState::Running;
            *lock(&self.shared.cancel) = cancel.clone();
            lock(&self.shared.aggregator).begin_run();
        }

        let device = Arc::clone(&self.device);
        let shared = Arc::clone(&self.shared);
        let config = Arc::clone(&self.config);
        let image_sink = self.image_sink.clone();
        let process_info = self.process_info.clone();

        info!(probes = probes.len(), "starting probe run");
        let spawned = thread::Builder::new()
            .name("probe-runner".to_owned())
            .spawn(move || {
                let _idle = IdleOnExit(Arc::clone(&shared));
                let mut device = lock(&device);
                let runner = ProbeRunner::new(&config)
                    .with_image_sink(image_sink.as_deref())
                    .with_process_info(process_info.as_deref());

                runner.run(&mut *device, &probes, &cancel, |result| {
                    lock(&shared.aggregator).record(result.clone());
                    for listener in lock(&shared.listeners).iter() {
                        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(result))) {
                            warn!(panic = %panic_message(payload.as_ref()), "result listener panicked");
                        }
                    }
                });
                drop(device);

                let summary = lock(&shared.aggregator).summary();
                info!(status = %summary.status_line(), "probe run finished");
                summary
            });

        match spawned {
            Ok(worker) => Ok(RunHandle { worker }),
            Err(err) => {
                *lock(&self.shared.state) = RunState::Idle;
                Err(Error::Io(err))
            }
        }
    }

    /// Ask the active run to stop. Returns whether a run was active.
    pub fn cancel_run(&self) -> bool {
        let mut state = lock(&self.shared.state);
        if *state == RunState::Idle {
            return false;
        }
        *state = RunState::Cancelling;
        lock(&self.shared.cancel).cancel();
        info!("cancellation requested");
        true
    }

    /// Tallies and results of the current or most recent run.
    #[must_use]
    pub fn current_summary(&self) -> RunSummary {
        lock(&self.shared.aggregator).summary()
    }

    /// One-line tally for display.
    #[must_use]
    pub fn status_line(&self) -> String {
        lock(&self.shared.aggregator).status_line()
    }

    /// Run `f` with exclusive device access. Fails fast with
    /// [`Error::RunInProgress`] while a run owns the device.
    pub fn with_device<R, F: FnOnce(&mut D) -> R>(&self, f: F) -> Result<R> {
        if self.is_running() {
            return Err(Error::RunInProgress);
        }
        let mut device = match self.device.try_lock() {
            Ok(device) => device,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(Error::RunInProgress),
        };
        Ok(f(&mut device))
    }

    /// Enumerate cameras through `backend`. Refused while a run is active so
    /// the classifier never opens a handle next to the runner's.
    pub fn rescan<B: CameraBackend>(&self, classifier: &Classifier, backend: &B) -> Result<Vec<CameraDescriptor>> {
        if self.is_running() {
            warn!("rescan refused during an active run");
            return Err(Error::RunInProgress);
        }
        Ok(classifier.enumerate(backend, classifier.config().max_index))
    }
}
