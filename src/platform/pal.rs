//! PAL traits and implementations: volume mount/usage and digital output shims.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::config::{OutputBackend, OutputConfig};
use crate::core::errors::{Result, SdcError};

/// Usage figures for a mounted volume.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
}

impl VolumeUsage {
    #[must_use]
    pub fn free_pct(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            (self.available_bytes as f64 * 100.0) / self.total_bytes as f64
        }
    }
}

/// The two storage media the logger knows about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VolumeKind {
    /// Always-present flash-backed store.
    Persistent,
    /// Possibly-ejected external medium.
    Removable,
}

impl VolumeKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Persistent => "persistent",
            Self::Removable => "removable",
        }
    }
}

impl fmt::Display for VolumeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A mountable volume rooted at a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub kind: VolumeKind,
    pub root: PathBuf,
    /// Create the root on mount when it is missing (format-on-mount-failure).
    pub create_if_missing: bool,
}

/// Logic level of a digital output pin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    const fn sysfs_value(self) -> &'static str {
        match self {
            Self::Low => "0",
            Self::High => "1",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => f.write_str("low"),
            Self::High => f.write_str("high"),
        }
    }
}

/// Volume mount and usage surface.
pub trait Platform: Send + Sync {
    fn mount(&self, volume: &Volume) -> Result<()>;
    fn unmount(&self, volume: &Volume) -> Result<()>;
    fn volume_usage(&self, root: &Path) -> Result<VolumeUsage>;
}

/// Digital output surface used by the liveness monitor.
pub trait DigitalOutput: Send + Sync {
    fn set_output(&self, pin: u32, level: Level) -> Result<()>;
}

/// Linux host implementation: volumes are directory roots, usage via `statvfs`.
#[derive(Debug, Default)]
pub struct LinuxPlatform;

impl LinuxPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Platform for LinuxPlatform {
    fn mount(&self, volume: &Volume) -> Result<()> {
        if volume.root.is_dir() {
            return Ok(());
        }
        if volume.create_if_missing {
            fs::create_dir_all(&volume.root).map_err(|e| SdcError::io(&volume.root, e))?;
            eprintln!(
                "[SDC-PAL] created {} volume root {}",
                volume.kind,
                volume.root.display()
            );
            return Ok(());
        }
        Err(SdcError::NotMounted {
            volume: volume.kind.label(),
            details: format!("{} is not a directory", volume.root.display()),
        })
    }

    fn unmount(&self, volume: &Volume) -> Result<()> {
        // Host volumes are owned by the OS; release is bookkeeping only.
        let _ = volume;
        Ok(())
    }

    #[cfg(unix)]
    fn volume_usage(&self, root: &Path) -> Result<VolumeUsage> {
        let stat = nix::sys::statvfs::statvfs(root).map_err(|error| SdcError::VolumeUsage {
            path: root.to_path_buf(),
            details: error.to_string(),
        })?;
        let fragment = stat.fragment_size();
        let total = stat.blocks().saturating_mul(fragment);
        let free = stat.blocks_free().saturating_mul(fragment);
        Ok(VolumeUsage {
            total_bytes: total,
            used_bytes: total.saturating_sub(free),
            available_bytes: stat.blocks_available().saturating_mul(fragment),
        })
    }

    #[cfg(not(unix))]
    fn volume_usage(&self, root: &Path) -> Result<VolumeUsage> {
        Err(SdcError::VolumeUsage {
            path: root.to_path_buf(),
            details: "volume usage is only implemented for unix hosts".to_string(),
        })
    }
}

/// Linux sysfs GPIO output (`/sys/class/gpio`).
///
/// Pins are exported and switched to output direction on first use.
#[derive(Debug)]
pub struct SysfsGpioOutput {
    root: PathBuf,
    configured: Mutex<HashSet<u32>>,
}

impl SysfsGpioOutput {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            configured: Mutex::new(HashSet::new()),
        }
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn ensure_output(&self, pin: u32) -> Result<()> {
        let mut configured = self.configured.lock();
        if configured.contains(&pin) {
            return Ok(());
        }
        let pin_dir = self.pin_dir(pin);
        if !pin_dir.exists() {
            write_sysfs(pin, &self.root.join("export"), &pin.to_string())?;
        }
        write_sysfs(pin, &pin_dir.join("direction"), "out")?;
        configured.insert(pin);
        Ok(())
    }
}

impl DigitalOutput for SysfsGpioOutput {
    fn set_output(&self, pin: u32, level: Level) -> Result<()> {
        self.ensure_output(pin)?;
        write_sysfs(pin, &self.pin_dir(pin).join("value"), level.sysfs_value())
    }
}

fn write_sysfs(pin: u32, path: &Path, value: &str) -> Result<()> {
    fs::write(path, value).map_err(|e| SdcError::Output {
        pin,
        details: format!("write {value:?} to {}: {e}", path.display()),
    })
}

/// Output shim for hosts without GPIO: pulses are reported on stderr.
#[derive(Debug, Default)]
pub struct LoggedOutput;

impl DigitalOutput for LoggedOutput {
    fn set_output(&self, pin: u32, level: Level) -> Result<()> {
        eprintln!("[SDC-OUTPUT] pin {pin} -> {level}");
        Ok(())
    }
}

/// Build the configured output shim.
pub fn output_from_config(config: &OutputConfig) -> Arc<dyn DigitalOutput> {
    match config.backend {
        OutputBackend::Sysfs => Arc::new(SysfsGpioOutput::new(config.sysfs_root.clone())),
        OutputBackend::Log => Arc::new(LoggedOutput),
    }
}

/// In-memory mock implementation for deterministic tests.
///
/// Mounting delegates to the directory-root behaviour of [`LinuxPlatform`]
/// unless a failure has been injected for that volume kind.
#[derive(Debug, Default)]
pub struct MockPlatform {
    usage: Mutex<Option<VolumeUsage>>,
    failing_mounts: Mutex<HashSet<VolumeKind>>,
    mount_calls: AtomicUsize,
    unmount_calls: AtomicUsize,
    levels: Mutex<Vec<(u32, Level)>>,
    failing_output: Mutex<bool>,
}

impl MockPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report fixed usage figures for every volume.
    #[must_use]
    pub fn with_usage(self, usage: VolumeUsage) -> Self {
        *self.usage.lock() = Some(usage);
        self
    }

    /// Report `available_bytes` free out of a larger total.
    #[must_use]
    pub fn with_available(self, available_bytes: u64) -> Self {
        self.with_usage(VolumeUsage {
            total_bytes: available_bytes.saturating_mul(2),
            used_bytes: available_bytes,
            available_bytes,
        })
    }

    pub fn fail_mount(&self, kind: VolumeKind) {
        self.failing_mounts.lock().insert(kind);
    }

    pub fn fail_output(&self, failing: bool) {
        *self.failing_output.lock() = failing;
    }

    pub fn mount_calls(&self) -> usize {
        self.mount_calls.load(Ordering::SeqCst)
    }

    pub fn unmount_calls(&self) -> usize {
        self.unmount_calls.load(Ordering::SeqCst)
    }

    /// Every level written so far, in order.
    pub fn levels(&self) -> Vec<(u32, Level)> {
        self.levels.lock().clone()
    }

    /// Number of completed high→low pulses.
    pub fn pulse_count(&self) -> usize {
        self.levels
            .lock()
            .windows(2)
            .filter(|pair| pair[0].1 == Level::High && pair[1].1 == Level::Low)
            .count()
    }
}

impl Platform for MockPlatform {
    fn mount(&self, volume: &Volume) -> Result<()> {
        self.mount_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_mounts.lock().contains(&volume.kind) {
            return Err(SdcError::NotMounted {
                volume: volume.kind.label(),
                details: "mock mount failure".to_string(),
            });
        }
        LinuxPlatform.mount(volume)
    }

    fn unmount(&self, _volume: &Volume) -> Result<()> {
        self.unmount_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn volume_usage(&self, root: &Path) -> Result<VolumeUsage> {
        (*self.usage.lock()).ok_or_else(|| SdcError::VolumeUsage {
            path: root.to_path_buf(),
            details: "mock usage not configured".to_string(),
        })
    }
}

impl DigitalOutput for MockPlatform {
    fn set_output(&self, pin: u32, level: Level) -> Result<()> {
        if *self.failing_output.lock() {
            return Err(SdcError::Output {
                pin,
                details: "mock output failure".to_string(),
            });
        }
        self.levels.lock().push((pin, level));
        Ok(())
    }
}
