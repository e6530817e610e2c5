//! Interval scheduling with at most one run in flight.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often the timer loop wakes to check for shutdown.
const POLL: Duration = Duration::from_millis(50);

/// A lock that is only ever tried, never waited on.
#[derive(Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

/// Held for the duration of one run; releases the flight on drop.
pub struct FlightGuard {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` if a run is already in flight.
    pub fn try_enter(&self) -> Option<FlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub started: usize,
    pub dropped: usize,
}

/// Fires a job every `interval`, starting immediately. Each run gets its own
/// worker thread; a tick that fires while the previous run is still going is
/// dropped rather than queued.
pub struct TickScheduler {
    interval: Duration,
    flight: SingleFlight,
    shutdown: Arc<AtomicBool>,
}

impl TickScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            flight: SingleFlight::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting the returned flag stops [`TickScheduler::run`] after the
    /// in-flight run finishes.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run `job` once under the guard. `None` if another run is in flight.
    pub fn run_once<T>(&self, job: impl FnOnce() -> Result<T>) -> Option<Result<T>> {
        let _guard = self.flight.try_enter()?;
        Some(job())
    }

    /// Block until shutdown, firing `job` on every tick.
    pub fn run<F>(&self, job: F) -> SchedulerStats
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        let job = Arc::new(job);
        let mut stats = SchedulerStats::default();
        let mut worker: Option<JoinHandle<()>> = None;
        let mut next = Instant::now();

        tracing::info!(interval_secs = self.interval.as_secs_f64(), "Scheduler started");

        while !self.shutdown.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= next {
                next += self.interval;
                if next <= now {
                    next = now + self.interval;
                }

                match self.flight.try_enter() {
                    Some(guard) => {
                        stats.started += 1;
                        let job = Arc::clone(&job);
                        let tick = stats.started;
                        // The previous worker has released the guard, so it is done.
                        if let Some(prev) = worker.take() {
                            join_worker(prev);
                        }
                        worker = Some(thread::spawn(move || {
                            let _guard = guard;
                            let started = Instant::now();
                            match (*job)() {
                                Ok(()) => {
                                    let elapsed_ms = started.elapsed().as_millis() as u64;
                                    tracing::debug!(tick, elapsed_ms, "Tick finished");
                                }
                                Err(e) => tracing::error!(tick, error = %e, "Tick failed"),
                            }
                        }));
                    }
                    None => {
                        stats.dropped += 1;
                        tracing::warn!("Previous tick still running, dropping this one");
                    }
                }
            }

            let wait = next.saturating_duration_since(Instant::now());
            thread::sleep(wait.min(POLL));
        }

        if let Some(worker) = worker {
            join_worker(worker);
        }
        tracing::info!(started = stats.started, dropped = stats.dropped, "Scheduler stopped");
        stats
    }
}

/// Join a finished worker, reporting a panicked tick. Returns whether it
/// panicked.
fn join_worker(worker: JoinHandle<()>) -> bool {
    match worker.join() {
        Ok(()) => false,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(panic = %message, "Tick panicked");
            true
        }
    }
}
