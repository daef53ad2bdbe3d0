//! SDC-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, SdcError>;

/// Top-level error type for the field logger runtime.
#[derive(Debug, Error)]
pub enum SdcError {
    #[error("[SDC-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[SDC-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[SDC-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[SDC-1101] invalid argument: {details}")]
    InvalidArgument { details: String },

    #[error("[SDC-2001] storage lock not acquired within {waited:?} for {operation}")]
    LockTimeout {
        operation: &'static str,
        waited: Duration,
    },

    #[error("[SDC-2002] already exists: {path}")]
    AlreadyExists { path: PathBuf },

    #[error("[SDC-2003] short transfer at {path}: {actual} of {expected} bytes")]
    IoShort {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("[SDC-2004] insufficient space at {path}: need {needed} bytes, have {available}")]
    InsufficientSpace {
        path: PathBuf,
        needed: u64,
        available: u64,
    },

    #[error("[SDC-2005] out of memory reading {path} ({requested} bytes)")]
    OutOfMemory { path: PathBuf, requested: u64 },

    #[error("[SDC-2101] volume {volume} not mounted: {details}")]
    NotMounted {
        volume: &'static str,
        details: String,
    },

    #[error("[SDC-2102] volume usage unavailable for {path}: {details}")]
    VolumeUsage { path: PathBuf, details: String },

    #[error("[SDC-2201] digital output failure on pin {pin}: {details}")]
    Output { pin: u32, details: String },

    #[error("[SDC-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[SDC-3101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[SDC-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl SdcError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "SDC-1001",
            Self::MissingConfig { .. } => "SDC-1002",
            Self::ConfigParse { .. } => "SDC-1003",
            Self::InvalidArgument { .. } => "SDC-1101",
            Self::LockTimeout { .. } => "SDC-2001",
            Self::AlreadyExists { .. } => "SDC-2002",
            Self::IoShort { .. } => "SDC-2003",
            Self::InsufficientSpace { .. } => "SDC-2004",
            Self::OutOfMemory { .. } => "SDC-2005",
            Self::NotMounted { .. } => "SDC-2101",
            Self::VolumeUsage { .. } => "SDC-2102",
            Self::Output { .. } => "SDC-2201",
            Self::Io { .. } => "SDC-3002",
            Self::Serialization { .. } => "SDC-3101",
            Self::Runtime { .. } => "SDC-3900",
        }
    }

    /// Whether retrying on a later cycle might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. }
                | Self::IoShort { .. }
                | Self::InsufficientSpace { .. }
                | Self::OutOfMemory { .. }
                | Self::NotMounted { .. }
                | Self::VolumeUsage { .. }
                | Self::Output { .. }
                | Self::Io { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for argument validation failures.
    #[must_use]
    pub fn invalid_argument(details: impl Into<String>) -> Self {
        Self::InvalidArgument {
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for SdcError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for SdcError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
