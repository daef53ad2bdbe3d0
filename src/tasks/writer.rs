//! Synthetic record writer used for bench testing without a sensor.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::core::errors::{Result, SdcError};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::storage::gateway::StorageGateway;
use crate::tasks::lifecycle::{PeriodicTask, StartOutcome, TaskCycle};

pub const TASK_NAME: &str = "writer";

/// Record text used when none is given.
pub const DEFAULT_LINE_TEXT: &str = "Test entry.";

/// Appends `"<ms since epoch>, <text>"` to a record file every period.
pub struct SyntheticWriter {
    task: PeriodicTask,
    gateway: StorageGateway,
    epoch: Instant,
    appended: Arc<AtomicU64>,
    logger: ActivityLoggerHandle,
}

impl SyntheticWriter {
    /// `epoch` is the runtime start; timestamps count milliseconds from it.
    pub fn new(
        gateway: StorageGateway,
        epoch: Instant,
        interval: Duration,
        logger: ActivityLoggerHandle,
    ) -> Result<Self> {
        Ok(Self {
            task: PeriodicTask::new(TASK_NAME, "sdc-writer", interval, logger.clone())?,
            gateway,
            epoch,
            appended: Arc::new(AtomicU64::new(0)),
            logger,
        })
    }

    pub fn start(
        &self,
        path: PathBuf,
        interval: Duration,
        text: Option<String>,
    ) -> Result<StartOutcome> {
        if self.task.is_running() {
            return Ok(StartOutcome::AlreadyRunning);
        }
        let text = text.unwrap_or_else(|| DEFAULT_LINE_TEXT.to_string());
        if text.contains(['\n', '\r']) {
            return Err(SdcError::invalid_argument(format!(
                "writer text must be a single line: {text:?}"
            )));
        }
        let cycle = WriterCycle {
            gateway: self.gateway.clone(),
            path,
            text,
            epoch: self.epoch,
            appended: Arc::clone(&self.appended),
            logger: self.logger.clone(),
        };
        self.task.start(interval, cycle)
    }

    pub fn stop(&self) -> bool {
        self.task.stop()
    }

    pub fn set_interval(&self, interval: Duration) -> Result<()> {
        self.task.set_interval(interval)
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.task.interval()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Records appended across all runs.
    #[must_use]
    pub fn appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }
}

struct WriterCycle {
    gateway: StorageGateway,
    path: PathBuf,
    text: String,
    epoch: Instant,
    appended: Arc<AtomicU64>,
    logger: ActivityLoggerHandle,
}

impl TaskCycle for WriterCycle {
    fn run_cycle(&mut self) {
        let millis = self.epoch.elapsed().as_millis();
        let line = format!("{millis}, {}", self.text);
        match self.gateway.append_line(&self.path, &line) {
            Ok(bytes) => {
                self.appended.fetch_add(1, Ordering::Relaxed);
                self.logger.send(ActivityEvent::RecordAppended {
                    path: self.path.display().to_string(),
                    bytes,
                });
            }
            Err(err) => {
                eprintln!("[SDC-WRITER] append to {} skipped: {err}", self.path.display());
                self.logger.send(ActivityEvent::CycleSkipped {
                    task: TASK_NAME,
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
            }
        }
    }
}
