//! Activity logger thread.
//!
//! A dedicated thread owns the [`JsonlWriter`]. Storage tasks send
//! [`ActivityEvent`]s through a bounded crossbeam channel with `try_send`, so
//! a task holding the storage lock never waits on logging.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};

use crate::core::errors::{Result, SdcError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 1024;
/// How often a degraded writer retries its primary path.
const RECOVERY_INTERVAL: Duration = Duration::from_secs(30);

/// Everything the runtime reports to the activity log.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        config_hash: String,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    TaskStarted {
        task: &'static str,
        interval_ms: u64,
    },
    TaskStopped {
        task: &'static str,
    },
    /// A periodic cycle failed and was skipped.
    CycleSkipped {
        task: &'static str,
        code: String,
        message: String,
    },
    LivenessPulse {
        path: String,
        line_count: u64,
    },
    CompressionCompleted {
        source: String,
        destination: String,
        algorithm: String,
        lines_in: u64,
        lines_out: u64,
        truncated_rows: u64,
        duration_ms: u64,
    },
    RecordAppended {
        path: String,
        bytes: u64,
    },
    TransferCompleted {
        source: String,
        destination: String,
        bytes: u64,
        slices: u64,
        source_removed: bool,
    },
    TransferFailed {
        source: String,
        destination: String,
        code: String,
        message: String,
    },
    ScriptApplied {
        path: String,
        commands: usize,
        warnings: usize,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

impl ActivityEvent {
    /// Build an `Error` event from a runtime error.
    #[must_use]
    pub fn error(err: &SdcError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Cloneable, non-blocking handle to the logger thread.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl std::fmt::Debug for ActivityLoggerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLoggerHandle")
            .field("dropped_events", &self.dropped_events())
            .finish_non_exhaustive()
    }
}

impl ActivityLoggerHandle {
    /// A handle with no logger thread behind it. Events are discarded.
    #[must_use]
    pub fn detached() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue an event. Drops it and bumps the counter if the channel is full.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is expected during shutdown and for detached handles.
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

/// Options for the logger thread.
#[derive(Debug, Clone)]
pub struct ActivityLoggerConfig {
    pub jsonl: JsonlConfig,
    pub channel_capacity: usize,
    pub recovery_interval: Duration,
}

impl ActivityLoggerConfig {
    #[must_use]
    pub fn new(jsonl: JsonlConfig) -> Self {
        Self {
            jsonl,
            channel_capacity: CHANNEL_CAPACITY,
            recovery_interval: RECOVERY_INTERVAL,
        }
    }
}

/// Spawn the logger thread and return its handle.
///
/// The thread runs until [`ActivityLoggerHandle::shutdown`] is called or every
/// handle has been dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let jsonl = config.jsonl;
    let recovery_interval = config.recovery_interval.max(Duration::from_millis(1));
    let join = thread::Builder::new()
        .name("sdc-logger".to_string())
        .spawn(move || logger_thread_main(&rx, jsonl, &dropped, recovery_interval))
        .map_err(|e| SdcError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(
    rx: &Receiver<ActivityEvent>,
    config: JsonlConfig,
    dropped: &AtomicU64,
    recovery_interval: Duration,
) {
    let mut jsonl = JsonlWriter::open(config);
    let mut last_recovery = Instant::now();

    loop {
        let received = match rx.recv_timeout(recovery_interval) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        // A busy channel never times out, so recovery runs on elapsed time.
        if last_recovery.elapsed() >= recovery_interval {
            jsonl.try_recover();
            last_recovery = Instant::now();
        }
        let Some(event) = received else {
            continue;
        };

        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&event_to_log_entry(event));
    }

    jsonl.flush();
    jsonl.fsync();
}

#[allow(clippy::too_many_lines)]
fn event_to_log_entry(event: ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::DaemonStarted {
            version,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStart, Severity::Info);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStop, Severity::Info);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::TaskStarted { task, interval_ms } => {
            let mut e = LogEntry::new(EventType::TaskStart, Severity::Info);
            e.task = Some(task.to_string());
            e.interval_ms = Some(interval_ms);
            e
        }
        ActivityEvent::TaskStopped { task } => {
            let mut e = LogEntry::new(EventType::TaskStop, Severity::Info);
            e.task = Some(task.to_string());
            e
        }
        ActivityEvent::CycleSkipped {
            task,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::CycleSkipped, Severity::Warning);
            e.task = Some(task.to_string());
            e.ok = Some(false);
            e.error_code = Some(code);
            e.error_message = Some(message);
            e
        }
        ActivityEvent::LivenessPulse { path, line_count } => {
            let mut e = LogEntry::new(EventType::LivenessPulse, Severity::Info);
            e.task = Some("liveness".to_string());
            e.path = Some(path);
            e.lines = Some(line_count);
            e
        }
        ActivityEvent::CompressionCompleted {
            source,
            destination,
            algorithm,
            lines_in,
            lines_out,
            truncated_rows,
            duration_ms,
        } => {
            let severity = if truncated_rows > 0 {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::CompressionComplete, severity);
            e.task = Some("compression".to_string());
            e.path = Some(source);
            e.destination = Some(destination);
            e.algorithm = Some(algorithm);
            e.lines = Some(lines_out);
            e.duration_ms = Some(duration_ms);
            e.details = Some(format!(
                "lines_in={lines_in} truncated_rows={truncated_rows}"
            ));
            e.ok = Some(true);
            e
        }
        ActivityEvent::RecordAppended { path, bytes } => {
            let mut e = LogEntry::new(EventType::RecordAppend, Severity::Info);
            e.task = Some("writer".to_string());
            e.path = Some(path);
            e.bytes = Some(bytes);
            e
        }
        ActivityEvent::TransferCompleted {
            source,
            destination,
            bytes,
            slices,
            source_removed,
        } => {
            let mut e = LogEntry::new(EventType::Transfer, Severity::Info);
            e.path = Some(source);
            e.destination = Some(destination);
            e.bytes = Some(bytes);
            e.details = Some(format!("slices={slices} source_removed={source_removed}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::TransferFailed {
            source,
            destination,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::Transfer, Severity::Warning);
            e.path = Some(source);
            e.destination = Some(destination);
            e.ok = Some(false);
            e.error_code = Some(code);
            e.error_message = Some(message);
            e
        }
        ActivityEvent::ScriptApplied {
            path,
            commands,
            warnings,
        } => {
            let severity = if warnings > 0 {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::ScriptApplied, severity);
            e.path = Some(path);
            e.details = Some(format!("commands={commands} warnings={warnings}"));
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.ok = Some(false);
            e.error_code = Some(code);
            e.error_message = Some(message);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::DaemonStop, Severity::Info),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path, capacity: usize) -> ActivityLoggerConfig {
        ActivityLoggerConfig {
            jsonl: JsonlConfig {
                path: dir.join("activity.jsonl"),
                fallback_path: None,
                max_size_bytes: 10 * 1024 * 1024,
                max_rotated_files: 3,
                fsync_interval_secs: 60,
            },
            channel_capacity: capacity,
            recovery_interval: RECOVERY_INTERVAL,
        }
    }

    #[test]
    fn degraded_log_returns_to_primary_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("log");
        std::fs::write(&blocker, b"x").unwrap();
        let primary = blocker.join("activity.jsonl");
        let fallback = dir.path().join("fallback.jsonl");
        let mut config = test_config(dir.path(), 64);
        config.jsonl.path = primary.clone();
        config.jsonl.fallback_path = Some(fallback.clone());
        config.recovery_interval = Duration::from_millis(20);

        let (handle, join) = spawn_logger(config).unwrap();
        handle.send(ActivityEvent::TaskStarted {
            task: "writer",
            interval_ms: 1000,
        });
        thread::sleep(Duration::from_millis(100));
        std::fs::remove_file(&blocker).unwrap();
        thread::sleep(Duration::from_millis(200));
        handle.send(ActivityEvent::TaskStopped { task: "writer" });
        handle.shutdown();
        join.join().unwrap();

        assert!(std::fs::read_to_string(&fallback).unwrap().contains("task_start"));
        let recovered = std::fs::read_to_string(&primary).unwrap();
        assert!(recovered.contains("task_stop"));
        assert!(!recovered.contains("task_start"));
    }

    #[test]
    fn spawn_log_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path(), 64)).unwrap();
        handle.send(ActivityEvent::DaemonStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc".to_string(),
        });
        handle.send(ActivityEvent::CompressionCompleted {
            source: "/flash/sensor_data.csv".to_string(),
            destination: "/flash/compressed_output.csv".to_string(),
            algorithm: "delta".to_string(),
            lines_in: 10,
            lines_out: 10,
            truncated_rows: 1,
            duration_ms: 3,
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("activity.jsonl")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("daemon_start"));
        let compression: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(compression["event"], "compression_complete");
        assert_eq!(compression["severity"], "warning");
        assert_eq!(compression["algorithm"], "delta");
    }

    #[test]
    fn clones_share_the_thread() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path(), 64)).unwrap();
        let other = handle.clone();
        handle.send(ActivityEvent::TaskStarted {
            task: "writer",
            interval_ms: 5000,
        });
        other.send(ActivityEvent::Error {
            code: "SDC-2001".to_string(),
            message: "lock timeout".to_string(),
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("activity.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("SDC-2001"));
    }

    #[test]
    fn detached_handle_discards_silently() {
        let handle = ActivityLoggerHandle::detached();
        for _ in 0..10 {
            handle.send(ActivityEvent::TaskStopped { task: "liveness" });
        }
        handle.shutdown();
        assert_eq!(handle.dropped_events(), 0);
    }

    #[test]
    fn error_event_carries_code() {
        let err = SdcError::invalid_argument("._data.csv");
        match ActivityEvent::error(&err) {
            ActivityEvent::Error { code, message } => {
                assert_eq!(code, "SDC-1101");
                assert!(message.contains("._data.csv"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
