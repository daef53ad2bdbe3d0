//! Compression worker: periodically re-encodes the record file.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::compress::{self, Algorithm, EncodeStats};
use crate::core::errors::Result;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::storage::gateway::StorageGateway;
use crate::tasks::lifecycle::{PeriodicTask, StartOutcome, TaskCycle};

pub const TASK_NAME: &str = "compression";

/// Parameters for one run of the compression worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionJob {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub interval: Duration,
    pub algorithm: Algorithm,
}

/// One compression pass under a single storage lock acquisition.
pub fn compress_once(
    gateway: &StorageGateway,
    source: &Path,
    destination: &Path,
    algorithm: Algorithm,
    max_fields: usize,
) -> Result<EncodeStats> {
    gateway.transform(source, destination, |reader, writer| {
        compress::encode(algorithm, max_fields, reader, writer)
    })
}

pub struct CompressionWorker {
    task: PeriodicTask,
    gateway: StorageGateway,
    algorithm: Arc<AtomicU8>,
    max_fields: usize,
    passes: Arc<AtomicU64>,
    logger: ActivityLoggerHandle,
}

impl CompressionWorker {
    pub fn new(
        gateway: StorageGateway,
        interval: Duration,
        algorithm: Algorithm,
        max_fields: usize,
        logger: ActivityLoggerHandle,
    ) -> Result<Self> {
        Ok(Self {
            task: PeriodicTask::new(TASK_NAME, "sdc-compress", interval, logger.clone())?,
            gateway,
            algorithm: Arc::new(AtomicU8::new(algorithm.as_u8())),
            max_fields,
            passes: Arc::new(AtomicU64::new(0)),
            logger,
        })
    }

    /// Start compressing `job.source` into `job.destination`.
    ///
    /// A running worker keeps its paths, interval and algorithm.
    pub fn start(&self, job: CompressionJob) -> Result<StartOutcome> {
        let cycle = CompressionCycle {
            gateway: self.gateway.clone(),
            source: job.source,
            destination: job.destination,
            initial_algorithm: job.algorithm,
            algorithm: Arc::clone(&self.algorithm),
            max_fields: self.max_fields,
            passes: Arc::clone(&self.passes),
            logger: self.logger.clone(),
        };
        self.task.start(job.interval, cycle)
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

    /// Takes effect at the top of the next cycle.
    pub fn set_algorithm(&self, algorithm: Algorithm) {
        self.algorithm.store(algorithm.as_u8(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        Algorithm::from_u8(self.algorithm.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Completed passes across all runs.
    #[must_use]
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }
}

struct CompressionCycle {
    gateway: StorageGateway,
    source: PathBuf,
    destination: PathBuf,
    initial_algorithm: Algorithm,
    algorithm: Arc<AtomicU8>,
    max_fields: usize,
    passes: Arc<AtomicU64>,
    logger: ActivityLoggerHandle,
}

impl TaskCycle for CompressionCycle {
    fn admit(&mut self) {
        self.algorithm.store(self.initial_algorithm.as_u8(), Ordering::Relaxed);
    }

    fn run_cycle(&mut self) {
        let algorithm = Algorithm::from_u8(self.algorithm.load(Ordering::Relaxed));
        let started = Instant::now();
        match compress_once(
            &self.gateway,
            &self.source,
            &self.destination,
            algorithm,
            self.max_fields,
        ) {
            Ok(stats) => {
                self.passes.fetch_add(1, Ordering::Relaxed);
                if stats.truncated_rows > 0 {
                    eprintln!(
                        "[SDC-COMPRESS] {} rows exceeded {} fields and were truncated",
                        stats.truncated_rows, self.max_fields
                    );
                }
                eprintln!(
                    "[SDC-COMPRESS] {algorithm}: {} -> {} ({} -> {} lines); upload not configured",
                    self.source.display(),
                    self.destination.display(),
                    stats.lines_in,
                    stats.lines_out
                );
                self.logger.send(ActivityEvent::CompressionCompleted {
                    source: self.source.display().to_string(),
                    destination: self.destination.display().to_string(),
                    algorithm: algorithm.to_string(),
                    lines_in: stats.lines_in,
                    lines_out: stats.lines_out,
                    truncated_rows: stats.truncated_rows,
                    duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
            }
            Err(err) => {
                eprintln!("[SDC-COMPRESS] cycle skipped: {err}");
                self.logger.send(ActivityEvent::CycleSkipped {
                    task: TASK_NAME,
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
            }
        }
    }
}
