//! Shared lifecycle for periodic tasks: one named worker thread, cooperative stop.
//!
//! A worker sleeps on its stop channel with `recv_timeout`, so a stop request
//! wakes it immediately. A cycle is never interrupted; the stop request is
//! observed at the loop head and right after each cycle, which is after any
//! storage lock the cycle took has been released. `stop()` joins the thread.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use parking_lot::Mutex;

use crate::core::errors::{Result, SdcError};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// The task was already running; its parameters were left unchanged.
    AlreadyRunning,
}

/// Work done once per period by a task's worker thread.
pub trait TaskCycle: Send + 'static {
    /// Runs on the starting thread, under the worker slot, once a new worker
    /// is certain to be spawned. Never runs for a start that finds the task
    /// already running.
    fn admit(&mut self) {}

    /// Runs on the worker thread before the first sleep.
    fn prepare(&mut self) {}

    fn run_cycle(&mut self);
}

struct Worker {
    stop_tx: Sender<()>,
    join: thread::JoinHandle<()>,
}

/// State machine `Stopped <-> Running` for one periodic task.
pub struct PeriodicTask {
    name: &'static str,
    thread_name: &'static str,
    interval_ms: Arc<AtomicU64>,
    worker: Mutex<Option<Worker>>,
    logger: ActivityLoggerHandle,
}

impl PeriodicTask {
    pub fn new(
        name: &'static str,
        thread_name: &'static str,
        interval: Duration,
        logger: ActivityLoggerHandle,
    ) -> Result<Self> {
        let interval_ms = interval_to_ms(name, interval)?;
        Ok(Self {
            name,
            thread_name,
            interval_ms: Arc::new(AtomicU64::new(interval_ms)),
            worker: Mutex::new(None),
            logger,
        })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    /// Change the period. A running worker picks it up at its next sleep.
    pub fn set_interval(&self, interval: Duration) -> Result<()> {
        let ms = interval_to_ms(self.name, interval)?;
        self.interval_ms.store(ms, Ordering::Relaxed);
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.join.is_finished())
    }

    /// Start the worker with `interval` unless it is already running.
    ///
    /// `cycle` is only consumed when a new worker is spawned.
    pub fn start<C: TaskCycle>(&self, interval: Duration, mut cycle: C) -> Result<StartOutcome> {
        let interval_ms = interval_to_ms(self.name, interval)?;
        let mut slot = self.worker.lock();
        if let Some(worker) = slot.as_ref() {
            if !worker.join.is_finished() {
                return Ok(StartOutcome::AlreadyRunning);
            }
            // A worker that exited on its own is reaped before restarting.
            if let Some(dead) = slot.take() {
                let _ = dead.join.join();
            }
        }

        self.interval_ms.store(interval_ms, Ordering::Relaxed);
        cycle.admit();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let shared_interval = Arc::clone(&self.interval_ms);
        let join = thread::Builder::new()
            .name(self.thread_name.to_string())
            .spawn(move || worker_main(&stop_rx, &shared_interval, cycle))
            .map_err(|source| SdcError::Runtime {
                details: format!("failed to spawn {} thread: {source}", self.thread_name),
            })?;
        *slot = Some(Worker { stop_tx, join });
        drop(slot);

        eprintln!("[SDC-TASK] {} started (interval={interval_ms}ms)", self.name);
        self.logger.send(ActivityEvent::TaskStarted {
            task: self.name,
            interval_ms,
        });
        Ok(StartOutcome::Started)
    }

    /// Stop the worker and wait for it. Returns whether a worker was running.
    ///
    /// After this returns the task holds no storage lock and runs no more cycles.
    pub fn stop(&self) -> bool {
        let Some(worker) = self.worker.lock().take() else {
            return false;
        };
        let _ = worker.stop_tx.send(());
        if worker.join.join().is_err() {
            eprintln!("[SDC-TASK] {} worker panicked", self.name);
        }
        eprintln!("[SDC-TASK] {} stopped", self.name);
        self.logger.send(ActivityEvent::TaskStopped { task: self.name });
        true
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

fn interval_to_ms(name: &str, interval: Duration) -> Result<u64> {
    let ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    if ms == 0 {
        return Err(SdcError::invalid_argument(format!(
            "{name} interval must be at least 1 ms"
        )));
    }
    Ok(ms)
}

fn worker_main<C: TaskCycle>(stop_rx: &Receiver<()>, interval_ms: &AtomicU64, mut cycle: C) {
    cycle.prepare();
    loop {
        let wait = Duration::from_millis(interval_ms.load(Ordering::Relaxed));
        match stop_rx.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        cycle.run_cycle();
        match stop_rx.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Disconnected) => break,
        }
    }
}
