//! Field logger daemon: startup sequence, script application, signal loop, shutdown.
//!
//! Threads:
//! - **Main thread**: startup, then polls signal flags.
//! - **sdc-liveness / sdc-writer / sdc-compress**: periodic tasks, started and
//!   stopped by the command script.
//! - **sdc-logger**: writes the JSONL activity log.
//!
//! The periodic tasks only meet at the storage gateway's lock.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::{Result, SdcError};
use crate::daemon::script::{ParsedScript, ScriptCommand, ScriptParser, ScriptWarning, TaskKind};
use crate::daemon::signals::{ShutdownCoordinator, SignalHandler};
use crate::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger,
};
use crate::logger::jsonl::JsonlConfig;
use crate::platform::pal::{DigitalOutput, Platform, VolumeKind};
use crate::storage::gateway::StorageGateway;
use crate::storage::lock::StorageLock;
use crate::storage::transfer::{TransferAdmission, TransferRequest};
use crate::storage::volumes::VolumeSet;
use crate::tasks::compression::{CompressionJob, CompressionWorker};
use crate::tasks::lifecycle::StartOutcome;
use crate::tasks::liveness::LivenessMonitor;
use crate::tasks::writer::SyntheticWriter;

const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What happened to the record file at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SeedOutcome {
    /// The record file already existed.
    AlreadyPresent,
    /// Seeding is disabled in the config.
    Disabled,
    /// Copied from the removable seed file.
    Seeded { bytes: u64 },
    /// The seed transfer failed; an empty record file was created instead.
    CreatedEmpty { reason: String },
}

/// A parsed command whose lifecycle call returned an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedCommand {
    pub command: ScriptCommand,
    pub error: String,
}

/// Outcome of applying a command script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScriptReport {
    pub applied: Vec<ScriptCommand>,
    /// Lines that did not parse.
    pub warnings: Vec<ScriptWarning>,
    pub failed: Vec<FailedCommand>,
}

/// The field logger runtime.
pub struct FieldLoggerDaemon {
    config: Config,
    epoch: Instant,
    signals: SignalHandler,
    logger: ActivityLoggerHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    gateway: StorageGateway,
    transfer: TransferAdmission,
    parser: ScriptParser,
    liveness: LivenessMonitor,
    compression: CompressionWorker,
    writer: SyntheticWriter,
}

impl FieldLoggerDaemon {
    /// Build the runtime: logger, lock, persistent volume, tasks.
    ///
    /// Fails when the config is unusable or the persistent volume cannot be
    /// mounted.
    pub fn init(
        config: Config,
        platform: Arc<dyn Platform>,
        output: Arc<dyn DigitalOutput>,
        signals: SignalHandler,
    ) -> Result<Self> {
        let epoch = Instant::now();

        // 1. Activity logger.
        let (logger, logger_join) = spawn_logger(ActivityLoggerConfig::new(JsonlConfig::at(
            config.paths.jsonl_log.clone(),
        )))?;

        match Self::assemble(config, epoch, platform, output, signals, logger.clone()) {
            Ok(mut daemon) => {
                daemon.logger_join = Some(logger_join);
                Ok(daemon)
            }
            Err(err) => {
                eprintln!("[SDC-DAEMON] startup failed: {err}");
                logger.send(ActivityEvent::error(&err));
                logger.shutdown();
                let _ = logger_join.join();
                Err(err)
            }
        }
    }

    fn assemble(
        config: Config,
        epoch: Instant,
        platform: Arc<dyn Platform>,
        output: Arc<dyn DigitalOutput>,
        signals: SignalHandler,
        logger: ActivityLoggerHandle,
    ) -> Result<Self> {
        // 2. Signals are registered by the caller before anything else runs.
        // 3. Storage lock.
        let lock = Arc::new(StorageLock::new(config.storage.lock_timeout())?);

        // 4. Persistent volume must mount.
        let volumes = Arc::new(VolumeSet::from_config(&config.storage, platform));
        volumes.ensure_mounted(VolumeKind::Persistent)?;
        let gateway = StorageGateway::new(lock, volumes);
        log_listing(&gateway, &config.storage.persistent_root);

        let transfer =
            TransferAdmission::from_config(gateway.clone(), &config.storage, logger.clone())?;
        let liveness = LivenessMonitor::from_config(
            gateway.clone(),
            output,
            &config.liveness,
            logger.clone(),
        )?;
        let compression = CompressionWorker::new(
            gateway.clone(),
            Duration::from_millis(config.compression.interval_ms),
            config.compression.algorithm,
            config.compression.max_fields,
            logger.clone(),
        )?;
        let writer = SyntheticWriter::new(
            gateway.clone(),
            epoch,
            Duration::from_millis(config.writer.interval_ms),
            logger.clone(),
        )?;

        let config_hash = config.stable_hash()?;
        logger.send(ActivityEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash,
        });

        Ok(Self {
            config,
            epoch,
            signals,
            logger,
            logger_join: None,
            gateway,
            transfer,
            parser: ScriptParser::new()?,
            liveness,
            compression,
            writer,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn gateway(&self) -> &StorageGateway {
        &self.gateway
    }

    #[must_use]
    pub fn liveness(&self) -> &LivenessMonitor {
        &self.liveness
    }

    #[must_use]
    pub fn compression(&self) -> &CompressionWorker {
        &self.compression
    }

    #[must_use]
    pub fn writer(&self) -> &SyntheticWriter {
        &self.writer
    }

    #[must_use]
    pub fn signals(&self) -> &SignalHandler {
        &self.signals
    }

    /// Run startup steps 5-7 and then serve until a shutdown signal.
    pub fn run(&mut self) -> Result<()> {
        self.bootstrap()?;
        self.serve();
        self.shutdown("signal");
        Ok(())
    }

    /// Seed the record file, apply the script, start the synthetic writer.
    pub fn bootstrap(&self) -> Result<ScriptReport> {
        let seed = self.seed_records();
        eprintln!("[SDC-DAEMON] record file: {seed:?}");
        log_listing(&self.gateway, &self.config.storage.removable_root);

        let report = self.apply_script_file();

        if self.config.writer.enabled {
            self.writer.start(
                self.config.data_file_path(),
                self.writer.interval(),
                Some(self.config.writer.text.clone()),
            )?;
        }

        log_listing(&self.gateway, &self.config.storage.persistent_root);

        if let Err(err) = self.gateway.release(VolumeKind::Removable) {
            eprintln!("[SDC-DAEMON] could not release removable volume: {err}");
        }
        Ok(report)
    }

    /// Make sure the record file exists, seeding it from removable storage.
    pub fn seed_records(&self) -> SeedOutcome {
        let data = self.config.data_file_path();
        match self.gateway.exists(&data) {
            Ok(true) => return SeedOutcome::AlreadyPresent,
            Ok(false) => {}
            Err(err) => eprintln!("[SDC-DAEMON] cannot check {}: {err}", data.display()),
        }
        if !self.config.bootstrap.seed_on_start {
            return SeedOutcome::Disabled;
        }

        let request =
            TransferRequest::copy(self.config.seed_file_path(), data.clone()).overwrite(true);
        match self.transfer.transfer(&request) {
            Ok(report) => SeedOutcome::Seeded {
                bytes: report.bytes_copied,
            },
            Err(err) => {
                eprintln!("[SDC-DAEMON] seed failed, creating empty record file: {err}");
                match self.gateway.write_all(&data, b"", false) {
                    Ok(()) | Err(SdcError::AlreadyExists { .. }) => {}
                    Err(create_err) => {
                        eprintln!(
                            "[SDC-DAEMON] could not create {}: {create_err}",
                            data.display()
                        );
                        self.logger.send(ActivityEvent::error(&create_err));
                    }
                }
                SeedOutcome::CreatedEmpty {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Read and apply the command script from removable storage.
    ///
    /// A missing or unreadable script is a warning, not an error.
    pub fn apply_script_file(&self) -> ScriptReport {
        let path = self.config.script_file_path();
        let text = match self.gateway.read_all(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => {
                eprintln!(
                    "[SDC-SCRIPT] no command script at {} (skipping): {err}",
                    path.display()
                );
                return ScriptReport::default();
            }
        };
        let report = self.apply_script(&self.parser.parse(&text));
        self.logger.send(ActivityEvent::ScriptApplied {
            path: path.display().to_string(),
            commands: report.applied.len(),
            warnings: report.warnings.len() + report.failed.len(),
        });
        report
    }

    /// Apply parsed commands in order. Each maps onto one lifecycle call.
    pub fn apply_script(&self, script: &ParsedScript) -> ScriptReport {
        let mut report = ScriptReport {
            applied: Vec::with_capacity(script.commands.len()),
            warnings: script.warnings.clone(),
            failed: Vec::new(),
        };
        for warning in &script.warnings {
            eprintln!("[SDC-SCRIPT] ignored {warning}");
        }
        for command in &script.commands {
            match self.apply_command(*command) {
                Ok(()) => {
                    eprintln!("[SDC-SCRIPT] {command}");
                    report.applied.push(*command);
                }
                Err(err) => {
                    eprintln!("[SDC-SCRIPT] {command} failed: {err}");
                    report.failed.push(FailedCommand {
                        command: *command,
                        error: err.to_string(),
                    });
                }
            }
        }
        report
    }

    pub fn apply_command(&self, command: ScriptCommand) -> Result<()> {
        match command {
            ScriptCommand::Start(TaskKind::Liveness) => self
                .liveness
                .start(
                    self.config.data_file_path(),
                    self.config.liveness.pin,
                    self.liveness.period(),
                )
                .map(log_already_running),
            ScriptCommand::Start(TaskKind::Compression) => self
                .compression
                .start(CompressionJob {
                    source: self.config.data_file_path(),
                    destination: self.config.compressed_file_path(),
                    interval: self.compression.interval(),
                    algorithm: self.compression.algorithm(),
                })
                .map(log_already_running),
            ScriptCommand::Start(TaskKind::Writer) => self
                .writer
                .start(
                    self.config.data_file_path(),
                    self.writer.interval(),
                    Some(self.config.writer.text.clone()),
                )
                .map(log_already_running),
            ScriptCommand::Stop(TaskKind::Liveness) => {
                self.liveness.stop();
                Ok(())
            }
            ScriptCommand::Stop(TaskKind::Compression) => {
                self.compression.stop();
                Ok(())
            }
            ScriptCommand::Stop(TaskKind::Writer) => {
                self.writer.stop();
                Ok(())
            }
            ScriptCommand::SetInterval(TaskKind::Liveness, period) => {
                self.liveness.set_period(period)
            }
            ScriptCommand::SetInterval(TaskKind::Compression, interval) => {
                self.compression.set_interval(interval)
            }
            ScriptCommand::SetInterval(TaskKind::Writer, interval) => {
                self.writer.set_interval(interval)
            }
            ScriptCommand::SetAlgorithm(algorithm) => {
                self.compression.set_algorithm(algorithm);
                Ok(())
            }
        }
    }

    /// Poll signals until shutdown. SIGHUP replays the command script.
    pub fn serve(&self) {
        while !self.signals.should_shutdown() {
            if self.signals.should_replay_script() {
                eprintln!("[SDC-DAEMON] replaying command script");
                self.apply_script_file();
            }
            thread::sleep(SIGNAL_POLL_INTERVAL);
        }
    }

    /// Stop every task, log the stop, and shut the logger down.
    pub fn shutdown(&mut self, reason: &str) {
        let uptime_secs = self.epoch.elapsed().as_secs();
        let coordinator = ShutdownCoordinator::default();
        let stop_writer = || {
            self.writer.stop();
            true
        };
        let stop_liveness = || {
            self.liveness.stop();
            true
        };
        let stop_compression = || {
            self.compression.stop();
            true
        };
        let steps: [(&str, &dyn Fn() -> bool); 3] = [
            ("stop writer", &stop_writer),
            ("stop liveness", &stop_liveness),
            ("stop compression", &stop_compression),
        ];
        coordinator.execute(&steps);

        self.logger.send(ActivityEvent::DaemonStopped {
            reason: reason.to_string(),
            uptime_secs,
        });
        self.logger.shutdown();
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }
        eprintln!("[SDC-DAEMON] shutdown complete (uptime={uptime_secs}s)");
    }
}

fn log_already_running(outcome: StartOutcome) {
    if outcome == StartOutcome::AlreadyRunning {
        eprintln!("[SDC-SCRIPT] task already running; parameters unchanged");
    }
}

fn log_listing(gateway: &StorageGateway, dir: &std::path::Path) {
    match gateway.list_dir(dir) {
        Ok(entries) => {
            eprintln!("[SDC-DAEMON] {} ({} entries)", dir.display(), entries.len());
            for entry in entries {
                let kind = if entry.is_dir { "dir " } else { "file" };
                eprintln!("[SDC-DAEMON]   {kind} {:>10} {}", entry.size, entry.name);
            }
        }
        Err(err) => eprintln!("[SDC-DAEMON] cannot list {}: {err}", dir.display()),
    }
}
