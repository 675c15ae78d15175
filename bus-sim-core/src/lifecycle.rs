//! Start/stop lifecycle shared by both channel engines
//!
//! A channel hands [`Workers::start`] a setup closure that acquires whatever
//! the channel needs and returns the worker bodies to run. `Workers` owns the
//! running flag and the join handles. Start and stop are serialized on one
//! mutex, so any interleaving of concurrent calls leaves the channel either
//! fully running or fully idle, and `stop` only returns once every worker
//! thread has been joined.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::HealthThresholds;
use crate::events::{ChannelEvent, EventBus};
use crate::state::ChannelState;
use crate::types::{ChannelKind, Result};

/// Longest uninterrupted sleep a worker takes between flag checks
pub const MAX_SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Control surface every simulated channel exposes
pub trait Channel: Send + Sync {
    /// Which bus this channel simulates
    fn kind(&self) -> ChannelKind;

    /// Spawn the workers. No-op if already running; setup failures are
    /// returned and leave the channel idle.
    fn start(&self) -> Result<()>;

    /// Clear the running flag and join every worker. No-op if idle.
    fn stop(&self);

    /// Snapshot of the running flag
    fn is_running(&self) -> bool;
}

/// Cloneable view of a channel's running flag, handed to each worker
#[derive(Debug, Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    /// True while the owning channel has not been stopped
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in short slices, waking early on stop.
    ///
    /// Returns false if the flag cleared before the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        self.sleep_for(Instant::now(), || duration)
    }

    /// Sleep until `period()` has elapsed since `since`, re-reading the
    /// period on every slice so a runtime change applies to the wait in
    /// progress.
    pub fn sleep_for<F>(&self, since: Instant, period: F) -> bool
    where
        F: Fn() -> Duration,
    {
        loop {
            if !self.is_set() {
                return false;
            }
            let elapsed = since.elapsed();
            let period = period();
            if elapsed >= period {
                return true;
            }
            thread::sleep((period - elapsed).min(MAX_SLEEP_SLICE));
        }
    }
}

/// A named worker body waiting to be spawned
pub struct Worker {
    name: String,
    body: Box<dyn FnOnce(RunFlag) + Send + 'static>,
}

impl Worker {
    pub fn new(name: impl Into<String>, body: impl FnOnce(RunFlag) + Send + 'static) -> Self {
        Self {
            name: name.into(),
            body: Box::new(body),
        }
    }
}

/// RNG for a generating worker: reproducible when seeded, else from entropy
pub(crate) fn worker_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Health monitor body shared by both channels.
///
/// Every `interval` it classifies the time since the last valid receive,
/// stores the level and publishes it, until the flag clears.
pub(crate) fn run_health_monitor(
    kind: ChannelKind,
    thresholds: HealthThresholds,
    interval: Duration,
    state: &ChannelState,
    events: &EventBus,
    flag: &RunFlag,
) {
    while flag.sleep(interval) {
        let since = state.since_last_receive(Instant::now());
        let level = thresholds.classify(since);
        let previous = state.set_health(level);

        if previous != level {
            log::info!("[{}] health {} -> {}", kind, previous, level);
        } else {
            log::debug!("[{}] health {}", kind, level);
        }
        events.emit(ChannelEvent::health(
            kind,
            level,
            since.map(|d| d.as_millis() as u64),
        ));
    }
}

/// Decrements the live count when a worker returns or unwinds
struct ExitGuard {
    live: Arc<AtomicUsize>,
    exited: Arc<AtomicUsize>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.exited.fetch_add(1, Ordering::SeqCst);
    }
}

/// Owner of a channel's worker threads
#[derive(Debug)]
pub struct Workers {
    label: &'static str,
    running: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    live: Arc<AtomicUsize>,
    exited: Arc<AtomicUsize>,
}

impl Workers {
    /// Create an idle worker set; `label` prefixes thread names and logs
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            running: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
            live: Arc::new(AtomicUsize::new(0)),
            exited: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Worker threads currently executing
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Worker threads that have exited since construction
    pub fn exited(&self) -> usize {
        self.exited.load(Ordering::SeqCst)
    }

    /// Run `setup` and spawn the workers it returns.
    ///
    /// Does nothing if already running. If `setup` fails the error is
    /// returned and no worker is spawned.
    pub fn start<S>(&self, setup: S) -> Result<()>
    where
        S: FnOnce() -> Result<Vec<Worker>>,
    {
        let mut handles = self.lock();
        if self.is_running() {
            log::debug!("{}: start ignored, already running", self.label);
            return Ok(());
        }

        let workers = setup()?;

        self.running.store(true, Ordering::SeqCst);
        for worker in workers {
            match self.spawn(worker) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    log::error!("{}: failed to spawn worker: {}", self.label, e);
                    self.running.store(false, Ordering::SeqCst);
                    Self::join_all(self.label, &mut handles);
                    return Err(e.into());
                }
            }
        }

        log::info!("{}: started {} workers", self.label, handles.len());
        Ok(())
    }

    /// Clear the running flag and join every worker. No-op if idle.
    ///
    /// Must not be called from one of this set's own workers.
    pub fn stop(&self) {
        let mut handles = self.lock();
        if !self.is_running() {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        Self::join_all(self.label, &mut handles);
        log::info!("{}: stopped", self.label);
    }

    fn spawn(&self, worker: Worker) -> std::io::Result<JoinHandle<()>> {
        let flag = RunFlag(Arc::clone(&self.running));
        let guard = ExitGuard {
            live: Arc::clone(&self.live),
            exited: Arc::clone(&self.exited),
        };
        let body = worker.body;

        self.live.fetch_add(1, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.label, worker.name))
            .spawn(move || {
                let _guard = guard;
                body(flag);
            });

        if spawned.is_err() {
            // The closure (and its guard) was dropped without running
            log::warn!("{}: worker {} never started", self.label, worker.name);
        }
        spawned
    }

    fn join_all(label: &str, handles: &mut Vec<JoinHandle<()>>) {
        for handle in handles.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                log::error!("{}: worker {} panicked", label, name);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        self.stop();
    }
}
