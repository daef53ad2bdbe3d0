#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sdcloud::core::config::Config;
use sdcloud::logger::activity::ActivityLoggerHandle;
use sdcloud::platform::pal::{MockPlatform, Platform};
use sdcloud::storage::gateway::StorageGateway;
use sdcloud::storage::lock::StorageLock;
use sdcloud::storage::transfer::TransferAdmission;
use sdcloud::storage::volumes::VolumeSet;
use tempfile::TempDir;

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_sdcloud") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "sdcloud.exe" } else { "sdcloud" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve sdcloud binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("sdcloud-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("SDC_OUTPUT_FORMAT", "json")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute sdcloud command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Two volume roots under one temp dir, with the removable root present.
pub struct VolumeFixture {
    pub dir: TempDir,
    pub persistent: PathBuf,
    pub removable: PathBuf,
}

impl VolumeFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let persistent = dir.path().join("flash");
        let removable = dir.path().join("sd");
        fs::create_dir_all(&removable).expect("create removable root");
        Self {
            dir,
            persistent,
            removable,
        }
    }

    /// Config whose volumes and activity log live in this fixture.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.storage.persistent_root = self.persistent.clone();
        config.storage.removable_root = self.removable.clone();
        config.paths.jsonl_log = self.dir.path().join("log/activity.jsonl");
        config
    }

    pub fn write_config_file(&self, config: &Config) -> PathBuf {
        let path = self.dir.path().join("sdcloud.toml");
        let raw = toml::to_string_pretty(config).expect("serialize config");
        fs::write(&path, raw).expect("write config");
        path
    }

    pub fn gateway(&self, platform: &Arc<MockPlatform>, lock_timeout: Duration) -> StorageGateway {
        let lock = Arc::new(StorageLock::new(lock_timeout).expect("lock"));
        let volumes = Arc::new(VolumeSet::new(
            Arc::clone(platform) as Arc<dyn Platform>,
            self.persistent.clone(),
            self.removable.clone(),
            true,
        ));
        StorageGateway::new(lock, volumes)
    }

    pub fn admission(&self, gateway: &StorageGateway, chunk_bytes: usize) -> TransferAdmission {
        TransferAdmission::new(
            gateway.clone(),
            chunk_bytes,
            2,
            ActivityLoggerHandle::detached(),
        )
        .expect("admission")
    }

    pub fn on_card(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.removable.join(name);
        fs::write(&path, contents).expect("write card file");
        path
    }

    pub fn on_flash(&self, name: &str) -> PathBuf {
        self.persistent.join(name)
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

pub fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .expect("read file")
        .lines()
        .map(str::to_string)
        .collect()
}
