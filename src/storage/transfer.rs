//! Admission-controlled streaming transfer from removable to persistent storage.
//!
//! Checks run in a fixed order and each one gates the next: name, source
//! volume and file, destination volume, free space, overwrite policy. The copy
//! itself takes the storage lock one slice at a time so that periodic tasks
//! keep running during a large transfer.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

use crate::core::config::StorageConfig;
use crate::core::errors::{Result, SdcError};
use crate::core::paths::{is_resource_fork, refers_to_same_file};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::platform::pal::VolumeKind;
use crate::storage::gateway::{SliceSpec, StorageGateway, WriteMode};

/// One transfer, consumed synchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub overwrite: bool,
    pub move_source: bool,
}

impl TransferRequest {
    /// Copy without overwriting and without removing the source.
    #[must_use]
    pub fn copy(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            overwrite: false,
            move_source: false,
        }
    }

    #[must_use]
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    #[must_use]
    pub fn move_source(mut self, move_source: bool) -> Self {
        self.move_source = move_source;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub bytes_copied: u64,
    /// Lock acquisitions used by the copy.
    pub slices: u64,
    /// False when free space could not be read and the check was skipped.
    pub capacity_checked: bool,
    pub source_removed: bool,
    /// Why the source could not be removed after a successful copy.
    pub removal_error: Option<String>,
}

/// Runs transfers through a [`StorageGateway`].
#[derive(Debug, Clone)]
pub struct TransferAdmission {
    gateway: StorageGateway,
    chunk_bytes: usize,
    slice_chunks: usize,
    logger: ActivityLoggerHandle,
}

impl TransferAdmission {
    pub fn new(
        gateway: StorageGateway,
        chunk_bytes: usize,
        slice_chunks: usize,
        logger: ActivityLoggerHandle,
    ) -> Result<Self> {
        if chunk_bytes == 0 || slice_chunks == 0 {
            return Err(SdcError::InvalidConfig {
                details: "transfer chunk size and slice length must be > 0".to_string(),
            });
        }
        Ok(Self {
            gateway,
            chunk_bytes,
            slice_chunks,
            logger,
        })
    }

    pub fn from_config(
        gateway: StorageGateway,
        config: &StorageConfig,
        logger: ActivityLoggerHandle,
    ) -> Result<Self> {
        Self::new(
            gateway,
            config.copy_chunk_bytes,
            config.copy_slice_chunks,
            logger,
        )
    }

    /// Run one transfer and log its outcome.
    pub fn transfer(&self, request: &TransferRequest) -> Result<TransferReport> {
        let started = Instant::now();
        match self.run(request) {
            Ok(report) => {
                eprintln!(
                    "[SDC-TRANSFER] {} -> {}: {} bytes in {} slices ({} ms)",
                    request.source.display(),
                    request.destination.display(),
                    report.bytes_copied,
                    report.slices,
                    started.elapsed().as_millis()
                );
                self.logger.send(ActivityEvent::TransferCompleted {
                    source: request.source.display().to_string(),
                    destination: request.destination.display().to_string(),
                    bytes: report.bytes_copied,
                    slices: report.slices,
                    source_removed: report.source_removed,
                });
                Ok(report)
            }
            Err(err) => {
                eprintln!(
                    "[SDC-TRANSFER] {} -> {} failed: {err}",
                    request.source.display(),
                    request.destination.display()
                );
                self.logger.send(ActivityEvent::TransferFailed {
                    source: request.source.display().to_string(),
                    destination: request.destination.display().to_string(),
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn run(&self, request: &TransferRequest) -> Result<TransferReport> {
        let source = request.source.as_path();
        let destination = request.destination.as_path();

        for path in [source, destination] {
            if is_resource_fork(path) {
                return Err(SdcError::invalid_argument(format!(
                    "refusing resource-fork file {}",
                    path.display()
                )));
            }
        }
        if refers_to_same_file(source, destination) {
            return Err(SdcError::invalid_argument(format!(
                "source and destination are the same file: {}",
                source.display()
            )));
        }

        let volumes = self.gateway.volumes();
        volumes.ensure_mounted(VolumeKind::Removable)?;
        let size = self.gateway.file_size(source)?;

        let destination_volume = volumes
            .volume_for(destination)
            .unwrap_or(VolumeKind::Persistent);
        volumes.ensure_mounted(destination_volume)?;

        let capacity_checked = match volumes.usage_for(destination) {
            Ok(usage) => {
                if size > usage.available_bytes {
                    return Err(SdcError::InsufficientSpace {
                        path: destination.to_path_buf(),
                        needed: size,
                        available: usage.available_bytes,
                    });
                }
                true
            }
            Err(err) => {
                eprintln!(
                    "[SDC-TRANSFER] free space unknown for {}, continuing: {err}",
                    destination.display()
                );
                false
            }
        };

        if !request.overwrite && self.gateway.exists(destination)? {
            return Err(SdcError::AlreadyExists {
                path: destination.to_path_buf(),
            });
        }

        let (bytes_copied, slices) =
            self.copy_in_slices(source, destination, size, request.overwrite)?;

        let mut report = TransferReport {
            bytes_copied,
            slices,
            capacity_checked,
            source_removed: false,
            removal_error: None,
        };

        if request.move_source {
            match self.gateway.remove(source) {
                Ok(()) => report.source_removed = true,
                Err(err) => {
                    eprintln!(
                        "[SDC-TRANSFER] copied but could not remove {}: {err}",
                        source.display()
                    );
                    report.removal_error = Some(err.to_string());
                }
            }
        }
        Ok(report)
    }

    fn copy_in_slices(
        &self,
        source: &Path,
        destination: &Path,
        expected: u64,
        overwrite: bool,
    ) -> Result<(u64, u64)> {
        let slice_bytes = (self.chunk_bytes as u64).saturating_mul(self.slice_chunks as u64);
        let mut mode = if overwrite {
            WriteMode::Truncate
        } else {
            WriteMode::CreateNew
        };
        let mut offset = 0_u64;
        let mut slices = 0_u64;
        loop {
            let outcome = self
                .gateway
                .copy_slice(
                    source,
                    destination,
                    SliceSpec {
                        offset,
                        max_bytes: slice_bytes,
                        chunk_bytes: self.chunk_bytes,
                        mode,
                    },
                )
                .inspect_err(|err| {
                    if offset > 0 || matches!(err, SdcError::IoShort { .. }) {
                        eprintln!(
                            "[SDC-TRANSFER] partial destination left at {} ({offset} bytes committed)",
                            destination.display()
                        );
                    }
                })?;
            slices += 1;
            offset += outcome.copied;
            mode = WriteMode::Append;
            if outcome.reached_eof || outcome.copied < slice_bytes {
                break;
            }
        }
        if offset < expected {
            return Err(SdcError::IoShort {
                path: source.to_path_buf(),
                expected,
                actual: offset,
            });
        }
        Ok((offset, slices))
    }
}
