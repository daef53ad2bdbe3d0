//! Liveness monitor: pulses a digital output whenever the record file grows.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crate::core::config::LivenessConfig;
use crate::core::errors::{Result, SdcError};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::platform::pal::{DigitalOutput, Level};
use crate::storage::gateway::StorageGateway;
use crate::tasks::lifecycle::{PeriodicTask, StartOutcome, TaskCycle};

pub const TASK_NAME: &str = "liveness";

/// Watches the record file's line count and signals growth on a pin.
pub struct LivenessMonitor {
    task: PeriodicTask,
    gateway: StorageGateway,
    output: Arc<dyn DigitalOutput>,
    pulse: Duration,
    last_known: Arc<AtomicU64>,
    pulses: Arc<AtomicU64>,
    logger: ActivityLoggerHandle,
}

impl LivenessMonitor {
    pub fn new(
        gateway: StorageGateway,
        output: Arc<dyn DigitalOutput>,
        period: Duration,
        pulse: Duration,
        logger: ActivityLoggerHandle,
    ) -> Result<Self> {
        Ok(Self {
            task: PeriodicTask::new(TASK_NAME, "sdc-liveness", period, logger.clone())?,
            gateway,
            output,
            pulse,
            last_known: Arc::new(AtomicU64::new(0)),
            pulses: Arc::new(AtomicU64::new(0)),
            logger,
        })
    }

    pub fn from_config(
        gateway: StorageGateway,
        output: Arc<dyn DigitalOutput>,
        config: &LivenessConfig,
        logger: ActivityLoggerHandle,
    ) -> Result<Self> {
        Self::new(
            gateway,
            output,
            Duration::from_millis(config.period_ms),
            Duration::from_millis(config.pulse_ms),
            logger,
        )
    }

    /// Begin watching `path`. A running monitor keeps its current target.
    pub fn start(&self, path: PathBuf, pin: u32, period: Duration) -> Result<StartOutcome> {
        let cycle = LivenessCycle {
            gateway: self.gateway.clone(),
            output: Arc::clone(&self.output),
            path,
            pin,
            pulse: self.pulse,
            last_known: Arc::clone(&self.last_known),
            pulses: Arc::clone(&self.pulses),
            logger: self.logger.clone(),
        };
        self.task.start(period, cycle)
    }

    pub fn stop(&self) -> bool {
        self.task.stop()
    }

    pub fn set_period(&self, period: Duration) -> Result<()> {
        self.task.set_interval(period)
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.task.interval()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Highest line count observed by the current (or last) run.
    #[must_use]
    pub fn last_known(&self) -> u64 {
        self.last_known.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn pulses(&self) -> u64 {
        self.pulses.load(Ordering::Relaxed)
    }
}

struct LivenessCycle {
    gateway: StorageGateway,
    output: Arc<dyn DigitalOutput>,
    path: PathBuf,
    pin: u32,
    pulse: Duration,
    last_known: Arc<AtomicU64>,
    pulses: Arc<AtomicU64>,
    logger: ActivityLoggerHandle,
}

impl LivenessCycle {
    fn drive(&self, level: Level) {
        if let Err(err) = self.output.set_output(self.pin, level) {
            eprintln!("[SDC-LIVENESS] {err}");
            self.logger.send(ActivityEvent::error(&err));
        }
    }

    fn skipped(&self, err: &SdcError) {
        eprintln!(
            "[SDC-LIVENESS] cannot read {}: {err}",
            self.path.display()
        );
        self.logger.send(ActivityEvent::CycleSkipped {
            task: TASK_NAME,
            code: err.code().to_string(),
            message: err.to_string(),
        });
    }
}

impl TaskCycle for LivenessCycle {
    fn prepare(&mut self) {
        // An unreadable file starts from zero, so the first non-empty read pulses.
        let baseline = match self.gateway.line_count(&self.path) {
            Ok(count) => count,
            Err(err) => {
                self.skipped(&err);
                0
            }
        };
        self.last_known.store(baseline, Ordering::Release);
    }

    fn run_cycle(&mut self) {
        let count = match self.gateway.line_count(&self.path) {
            Ok(count) => count,
            Err(err) => {
                self.skipped(&err);
                return;
            }
        };
        if count <= self.last_known.load(Ordering::Acquire) {
            return;
        }
        self.drive(Level::High);
        thread::sleep(self.pulse);
        self.drive(Level::Low);
        self.last_known.store(count, Ordering::Release);
        self.pulses.fetch_add(1, Ordering::Relaxed);
        self.logger.send(ActivityEvent::LivenessPulse {
            path: self.path.display().to_string(),
            line_count: count,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::pal::MockPlatform;
    use crate::storage::lock::StorageLock;
    use crate::storage::volumes::VolumeSet;
    use std::fs;
    use std::time::Instant;

    fn setup() -> (tempfile::TempDir, PathBuf, Arc<MockPlatform>, LivenessMonitor) {
        let dir = tempfile::tempdir().unwrap();
        let flash = dir.path().join("flash");
        fs::create_dir_all(&flash).unwrap();
        let mock = Arc::new(MockPlatform::new());
        let volumes = VolumeSet::new(
            Arc::clone(&mock) as Arc<dyn crate::platform::pal::Platform>,
            flash.clone(),
            dir.path().join("sd"),
            true,
        );
        let lock = Arc::new(StorageLock::new(Duration::from_millis(200)).unwrap());
        let gateway = StorageGateway::new(lock, Arc::new(volumes));
        let monitor = LivenessMonitor::new(
            gateway,
            Arc::clone(&mock) as Arc<dyn DigitalOutput>,
            Duration::from_millis(10),
            Duration::from_millis(1),
            ActivityLoggerHandle::detached(),
        )
        .unwrap();
        (dir, flash.join("sensor_data.csv"), mock, monitor)
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !done() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn pulses_once_per_growth() {
        let (_dir, path, mock, monitor) = setup();
        fs::write(&path, "a\nb\n").unwrap();
        monitor.start(path.clone(), 2, Duration::from_millis(10)).unwrap();
        wait_for(|| monitor.last_known() == 2);

        // No growth: no pulse.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(mock.pulse_count(), 0);

        fs::write(&path, "a\nb\nc\n").unwrap();
        wait_for(|| mock.pulse_count() == 1);
        monitor.stop();
        assert_eq!(mock.pulse_count(), 1);
        assert_eq!(monitor.last_known(), 3);
        assert!(mock.levels().iter().all(|(pin, _)| *pin == 2));
    }

    #[test]
    fn missing_file_then_first_records_pulse() {
        let (_dir, path, mock, monitor) = setup();
        monitor.start(path.clone(), 4, Duration::from_millis(10)).unwrap();
        thread::sleep(Duration::from_millis(40));
        assert_eq!(mock.pulse_count(), 0);
        fs::write(&path, "1, Test entry.\n").unwrap();
        wait_for(|| mock.pulse_count() == 1);
        monitor.stop();
        assert_eq!(monitor.last_known(), 1);
    }

    #[test]
    fn shrinking_file_never_moves_baseline_back() {
        let (_dir, path, mock, monitor) = setup();
        fs::write(&path, "a\nb\nc\n").unwrap();
        monitor.start(path.clone(), 2, Duration::from_millis(10)).unwrap();
        wait_for(|| monitor.last_known() == 3);
        fs::write(&path, "a\n").unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(monitor.last_known(), 3);
        assert_eq!(mock.pulse_count(), 0);
        monitor.stop();
    }

    #[test]
    fn output_failure_does_not_stop_task() {
        let (_dir, path, mock, monitor) = setup();
        mock.fail_output(true);
        monitor.start(path.clone(), 2, Duration::from_millis(10)).unwrap();
        fs::write(&path, "a\n").unwrap();
        wait_for(|| monitor.pulses() >= 1);
        assert!(monitor.is_running());
        monitor.stop();
        assert_eq!(monitor.last_known(), 1);
    }

    #[test]
    fn start_twice_keeps_running_target() {
        let (_dir, path, _mock, monitor) = setup();
        assert_eq!(
            monitor.start(path.clone(), 2, Duration::from_millis(10)).unwrap(),
            StartOutcome::Started
        );
        assert_eq!(
            monitor.start(path.with_extension("other"), 9, Duration::from_millis(99)).unwrap(),
            StartOutcome::AlreadyRunning
        );
        assert_eq!(monitor.period(), Duration::from_millis(10));
        monitor.set_period(Duration::from_millis(20)).unwrap();
        assert_eq!(monitor.period(), Duration::from_millis(20));
        assert!(monitor.stop());
        assert!(!monitor.stop());
    }
}
