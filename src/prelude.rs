//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use sdcloud::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, SdcError};

// Platform
pub use crate::platform::pal::{
    DigitalOutput, Level, LinuxPlatform, Platform, Volume, VolumeKind, VolumeUsage,
    output_from_config,
};

// Compression
pub use crate::compress::{Algorithm, EncodeStats, encode, encode_bytes};

// Storage
pub use crate::storage::gateway::StorageGateway;
pub use crate::storage::lock::StorageLock;
pub use crate::storage::transfer::{TransferAdmission, TransferReport, TransferRequest};
pub use crate::storage::volumes::VolumeSet;

// Tasks
pub use crate::tasks::compression::{CompressionJob, CompressionWorker};
pub use crate::tasks::lifecycle::StartOutcome;
pub use crate::tasks::liveness::LivenessMonitor;
pub use crate::tasks::writer::SyntheticWriter;

// Daemon
pub use crate::daemon::script::{ScriptCommand, ScriptParser, TaskKind};
#[cfg(feature = "daemon")]
pub use crate::daemon::loop_main::FieldLoggerDaemon;
