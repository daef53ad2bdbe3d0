//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compress::Algorithm;
use crate::core::errors::{Result, SdcError};

/// Upper bound accepted for `compression.max_fields`.
pub const MAX_FIELDS_LIMIT: usize = 1024;

/// Full runtime configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub records: RecordsConfig,
    pub bootstrap: BootstrapConfig,
    pub liveness: LivenessConfig,
    pub compression: CompressionConfig,
    pub writer: WriterConfig,
    pub output: OutputConfig,
    pub paths: PathsConfig,
}

/// Volume roots, lock discipline, and streaming-copy sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the always-present flash-backed volume.
    pub persistent_root: PathBuf,
    /// Root of the removable medium holding freshly captured records.
    pub removable_root: PathBuf,
    /// Bounded wait for every storage lock acquisition.
    pub lock_timeout_ms: u64,
    /// Chunk size for stream copies.
    pub copy_chunk_bytes: usize,
    /// Chunks copied per lock acquisition during a transfer.
    pub copy_slice_chunks: usize,
    /// Create the persistent root when mounting finds it missing.
    pub format_if_missing: bool,
}

/// Record file names, relative to the persistent root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RecordsConfig {
    pub data_file: PathBuf,
    pub compressed_file: PathBuf,
}

/// Startup seeding and command script, relative to the removable root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BootstrapConfig {
    pub seed_on_start: bool,
    pub seed_file: PathBuf,
    pub script_file: PathBuf,
}

/// Liveness monitor defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LivenessConfig {
    pub period_ms: u64,
    pub pulse_ms: u64,
    pub pin: u32,
}

/// Compression worker defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompressionConfig {
    pub interval_ms: u64,
    pub algorithm: Algorithm,
    /// Field cap for delta encoding; extra fields are dropped with a warning.
    pub max_fields: usize,
}

/// Synthetic writer defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WriterConfig {
    /// Start the writer after the command script has been applied.
    pub enabled: bool,
    pub interval_ms: u64,
    pub text: String,
}

/// Which digital output shim drives the liveness pin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputBackend {
    /// Linux sysfs GPIO (`/sys/class/gpio`).
    Sysfs,
    /// Log pulses to stderr only.
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    pub backend: OutputBackend,
    pub sysfs_root: PathBuf,
}

/// Files owned by the runtime itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            persistent_root: PathBuf::from("/var/lib/sdcloud/flash"),
            removable_root: PathBuf::from("/media/sd"),
            lock_timeout_ms: 5_000,
            copy_chunk_bytes: 4_096,
            copy_slice_chunks: 64,
            format_if_missing: true,
        }
    }
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("sensor_data.csv"),
            compressed_file: PathBuf::from("compressed_output.csv"),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            seed_on_start: true,
            seed_file: PathBuf::from("Lucas_Sample_Data.csv"),
            script_file: PathBuf::from("config.txt"),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            period_ms: 1_000,
            pulse_ms: 100,
            pin: 2,
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            algorithm: Algorithm::RunLength,
            max_fields: crate::compress::delta::MAX_DELTA_FIELDS,
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5_000,
            text: crate::tasks::writer::DEFAULT_LINE_TEXT.to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            backend: OutputBackend::Sysfs,
            sysfs_root: PathBuf::from("/sys/class/gpio"),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[SDC-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        Self {
            config_file: home_dir.join(".config").join("sdcloud").join("config.toml"),
            jsonl_log: home_dir
                .join(".local")
                .join("share")
                .join("sdcloud")
                .join("activity.jsonl"),
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| SdcError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(SdcError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Absolute path of the record file on persistent storage.
    #[must_use]
    pub fn data_file_path(&self) -> PathBuf {
        self.storage.persistent_root.join(&self.records.data_file)
    }

    /// Absolute path of the compressed output on persistent storage.
    #[must_use]
    pub fn compressed_file_path(&self) -> PathBuf {
        self.storage
            .persistent_root
            .join(&self.records.compressed_file)
    }

    /// Absolute path of the seed file on removable storage.
    #[must_use]
    pub fn seed_file_path(&self) -> PathBuf {
        self.storage.removable_root.join(&self.bootstrap.seed_file)
    }

    /// Absolute path of the command script on removable storage.
    #[must_use]
    pub fn script_file_path(&self) -> PathBuf {
        self.storage
            .removable_root
            .join(&self.bootstrap.script_file)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON so the value is stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // storage
        if let Some(raw) = lookup("SDC_STORAGE_PERSISTENT_ROOT") {
            self.storage.persistent_root = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("SDC_STORAGE_REMOVABLE_ROOT") {
            self.storage.removable_root = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("SDC_STORAGE_LOCK_TIMEOUT_MS") {
            self.storage.lock_timeout_ms = parse_env("SDC_STORAGE_LOCK_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("SDC_STORAGE_COPY_CHUNK_BYTES") {
            self.storage.copy_chunk_bytes = parse_env("SDC_STORAGE_COPY_CHUNK_BYTES", &raw)?;
        }
        if let Some(raw) = lookup("SDC_STORAGE_COPY_SLICE_CHUNKS") {
            self.storage.copy_slice_chunks = parse_env("SDC_STORAGE_COPY_SLICE_CHUNKS", &raw)?;
        }
        if let Some(raw) = lookup("SDC_STORAGE_FORMAT_IF_MISSING") {
            self.storage.format_if_missing = parse_env("SDC_STORAGE_FORMAT_IF_MISSING", &raw)?;
        }

        // bootstrap
        if let Some(raw) = lookup("SDC_BOOTSTRAP_SEED_ON_START") {
            self.bootstrap.seed_on_start = parse_env("SDC_BOOTSTRAP_SEED_ON_START", &raw)?;
        }

        // liveness
        if let Some(raw) = lookup("SDC_LIVENESS_PERIOD_MS") {
            self.liveness.period_ms = parse_env("SDC_LIVENESS_PERIOD_MS", &raw)?;
        }
        if let Some(raw) = lookup("SDC_LIVENESS_PULSE_MS") {
            self.liveness.pulse_ms = parse_env("SDC_LIVENESS_PULSE_MS", &raw)?;
        }
        if let Some(raw) = lookup("SDC_LIVENESS_PIN") {
            self.liveness.pin = parse_env("SDC_LIVENESS_PIN", &raw)?;
        }

        // compression
        if let Some(raw) = lookup("SDC_COMPRESSION_INTERVAL_MS") {
            self.compression.interval_ms = parse_env("SDC_COMPRESSION_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = lookup("SDC_COMPRESSION_ALGORITHM") {
            self.compression.algorithm =
                raw.parse::<Algorithm>()
                    .map_err(|details| SdcError::ConfigParse {
                        context: "env",
                        details: format!("SDC_COMPRESSION_ALGORITHM={raw:?}: {details}"),
                    })?;
        }
        if let Some(raw) = lookup("SDC_COMPRESSION_MAX_FIELDS") {
            self.compression.max_fields = parse_env("SDC_COMPRESSION_MAX_FIELDS", &raw)?;
        }

        // writer
        if let Some(raw) = lookup("SDC_WRITER_ENABLED") {
            self.writer.enabled = parse_env("SDC_WRITER_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("SDC_WRITER_INTERVAL_MS") {
            self.writer.interval_ms = parse_env("SDC_WRITER_INTERVAL_MS", &raw)?;
        }

        // paths
        if let Some(raw) = lookup("SDC_PATHS_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }

        Ok(())
    }

    /// Strip trailing slashes from volume roots so prefix matching is consistent.
    fn normalize_paths(&mut self) {
        for root in [
            &mut self.storage.persistent_root,
            &mut self.storage.removable_root,
        ] {
            let s = root.to_string_lossy();
            if s.len() > 1
                && let Some(stripped) = s.strip_suffix('/')
            {
                *root = PathBuf::from(stripped);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, val) in [
            ("storage.lock_timeout_ms", self.storage.lock_timeout_ms),
            ("liveness.period_ms", self.liveness.period_ms),
            ("liveness.pulse_ms", self.liveness.pulse_ms),
            ("compression.interval_ms", self.compression.interval_ms),
            ("writer.interval_ms", self.writer.interval_ms),
        ] {
            if val == 0 {
                return Err(SdcError::InvalidConfig {
                    details: format!("{name} must be > 0"),
                });
            }
        }

        if self.storage.copy_chunk_bytes == 0 || self.storage.copy_slice_chunks == 0 {
            return Err(SdcError::InvalidConfig {
                details: "storage.copy_chunk_bytes and storage.copy_slice_chunks must be > 0"
                    .to_string(),
            });
        }

        if self.storage.persistent_root == self.storage.removable_root {
            return Err(SdcError::InvalidConfig {
                details: "storage.persistent_root and storage.removable_root must differ"
                    .to_string(),
            });
        }

        if !(1..=MAX_FIELDS_LIMIT).contains(&self.compression.max_fields) {
            return Err(SdcError::InvalidConfig {
                details: format!(
                    "compression.max_fields must be in [1, {MAX_FIELDS_LIMIT}], got {}",
                    self.compression.max_fields
                ),
            });
        }

        if self.liveness.pulse_ms >= self.liveness.period_ms {
            return Err(SdcError::InvalidConfig {
                details: format!(
                    "liveness.pulse_ms ({}) must be shorter than liveness.period_ms ({})",
                    self.liveness.pulse_ms, self.liveness.period_ms
                ),
            });
        }

        if self.writer.text.contains(['\n', '\r']) {
            return Err(SdcError::InvalidConfig {
                details: "writer.text must be a single line".to_string(),
            });
        }

        for (name, path) in [
            ("records.data_file", &self.records.data_file),
            ("records.compressed_file", &self.records.compressed_file),
            ("bootstrap.seed_file", &self.bootstrap.seed_file),
            ("bootstrap.script_file", &self.bootstrap.script_file),
        ] {
            if path.as_os_str().is_empty() || path.is_absolute() {
                return Err(SdcError::InvalidConfig {
                    details: format!("{name} must be a non-empty path relative to its volume"),
                });
            }
        }

        if self.records.data_file == self.records.compressed_file {
            return Err(SdcError::InvalidConfig {
                details: "records.data_file and records.compressed_file must differ".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| SdcError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

#[cfg(test)]
mod tests {
    use super::{Algorithm, Config, SdcError};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_lock_timeout_rejected() {
        let mut cfg = Config::default();
        cfg.storage.lock_timeout_ms = 0;
        let err = cfg.validate().expect_err("expected invalid timeout");
        assert!(err.to_string().contains("lock_timeout_ms"));
    }

    #[test]
    fn zero_intervals_rejected() {
        let mut cfg = Config::default();
        cfg.compression.interval_ms = 0;
        let err = cfg.validate().expect_err("expected invalid interval");
        match err {
            SdcError::InvalidConfig { details } => {
                assert!(details.contains("compression.interval_ms"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn max_fields_bounds_enforced() {
        let mut cfg = Config::default();
        cfg.compression.max_fields = 0;
        assert!(cfg.validate().is_err());
        cfg.compression.max_fields = super::MAX_FIELDS_LIMIT + 1;
        assert!(cfg.validate().is_err());
        cfg.compression.max_fields = 8;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn pulse_must_fit_inside_period() {
        let mut cfg = Config::default();
        cfg.liveness.pulse_ms = cfg.liveness.period_ms;
        let err = cfg.validate().expect_err("expected pulse error");
        assert!(err.to_string().contains("pulse_ms"));
    }

    #[test]
    fn multiline_writer_text_rejected() {
        let mut cfg = Config::default();
        cfg.writer.text = "a\nb".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn record_files_must_be_relative() {
        let mut cfg = Config::default();
        cfg.records.data_file = PathBuf::from("/abs/data.csv");
        let err = cfg.validate().expect_err("expected relative path error");
        assert!(err.to_string().contains("records.data_file"));
    }

    #[test]
    fn identical_volume_roots_rejected() {
        let mut cfg = Config::default();
        cfg.storage.removable_root = cfg.storage.persistent_root.clone();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn toml_sections_parse_with_defaults() {
        let raw = r#"
            [storage]
            persistent_root = "/flash"
            removable_root = "/sd"

            [compression]
            algorithm = "delta"
            interval_ms = 1000
        "#;
        let cfg: Config = toml::from_str(raw).expect("config should parse");
        assert_eq!(cfg.storage.persistent_root, PathBuf::from("/flash"));
        assert_eq!(cfg.compression.algorithm, Algorithm::Delta);
        assert_eq!(cfg.compression.interval_ms, 1_000);
        assert_eq!(cfg.storage.lock_timeout_ms, 5_000);
        assert_eq!(cfg.data_file_path(), PathBuf::from("/flash/sensor_data.csv"));
        assert_eq!(cfg.seed_file_path(), PathBuf::from("/sd/Lucas_Sample_Data.csv"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("SDC_STORAGE_LOCK_TIMEOUT_MS", "250"),
            ("SDC_COMPRESSION_ALGORITHM", "DELTA"),
            ("SDC_WRITER_ENABLED", "false"),
            ("SDC_LIVENESS_PIN", "17"),
        ]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("env overrides should parse");
        assert_eq!(cfg.storage.lock_timeout_ms, 250);
        assert_eq!(cfg.compression.algorithm, Algorithm::Delta);
        assert!(!cfg.writer.enabled);
        assert_eq!(cfg.liveness.pin, 17);
    }

    #[test]
    fn env_invalid_number_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("SDC_LIVENESS_PERIOD_MS", "soon")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("invalid number should fail");
        match err {
            SdcError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("SDC_LIVENESS_PERIOD_MS"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn normalize_paths_trims_trailing_slashes_and_keeps_root() {
        let mut cfg = Config::default();
        cfg.storage.persistent_root = PathBuf::from("/flash/");
        cfg.storage.removable_root = PathBuf::from("/");
        cfg.normalize_paths();
        assert_eq!(cfg.storage.persistent_root, PathBuf::from("/flash"));
        assert_eq!(cfg.storage.removable_root, PathBuf::from("/"));
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/sdcloud/config.toml")));
        assert!(matches!(result, Err(SdcError::MissingConfig { .. })));
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let before = cfg.stable_hash().expect("hash should compute");
        let mut modified = Config::default();
        modified.liveness.pin += 1;
        let after = modified.stable_hash().expect("hash should compute");
        assert_ne!(before, after);
        assert_eq!(before, cfg.stable_hash().expect("hash"));
    }
}
