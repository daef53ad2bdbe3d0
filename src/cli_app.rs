//! Top-level CLI definition and dispatch.

use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use thiserror::Error;

use sdcloud::compress::Algorithm;
use sdcloud::core::config::Config;
use sdcloud::core::errors::SdcError;
use sdcloud::daemon::loop_main::FieldLoggerDaemon;
use sdcloud::daemon::script::parse_script;
use sdcloud::daemon::signals::SignalHandler;
use sdcloud::logger::activity::ActivityLoggerHandle;
use sdcloud::platform::pal::{LinuxPlatform, Platform, output_from_config};
use sdcloud::storage::gateway::StorageGateway;
use sdcloud::storage::lock::StorageLock;
use sdcloud::storage::transfer::{TransferAdmission, TransferRequest};
use sdcloud::storage::volumes::VolumeSet;
use sdcloud::tasks::compression::compress_once;

/// sdcloud: field data logger runtime.
#[derive(Debug, Parser)]
#[command(
    name = "sdcloud",
    author,
    version,
    about = "Field data logger: card-to-flash transfer, liveness pulses, record compression",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the field logger daemon until SIGTERM/SIGINT.
    Run,
    /// Copy one file between volumes under the storage lock.
    Transfer(TransferArgs),
    /// Compress a record file once.
    Compress(CompressArgs),
    /// Parse a command script and report what it would do.
    CheckScript(CheckScriptArgs),
    /// View configuration state.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args)]
struct TransferArgs {
    /// Source file, normally on the removable volume.
    source: PathBuf,
    /// Destination file, normally on the persistent volume.
    destination: PathBuf,
    /// Replace the destination if it exists.
    #[arg(long)]
    overwrite: bool,
    /// Remove the source after a complete copy.
    #[arg(long = "move")]
    move_source: bool,
}

#[derive(Debug, Clone, Args)]
struct CompressArgs {
    /// Record file to read.
    source: PathBuf,
    /// Compressed output to create or replace.
    destination: PathBuf,
    /// Encoding (rle or delta). Defaults to the configured algorithm.
    #[arg(long, value_name = "ALGORITHM")]
    algorithm: Option<Algorithm>,
}

#[derive(Debug, Clone, Args)]
struct CheckScriptArgs {
    /// Script file to parse.
    path: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path in use.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration and print its hash.
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl From<SdcError> for CliError {
    fn from(value: SdcError) -> Self {
        match value {
            SdcError::InvalidConfig { .. }
            | SdcError::MissingConfig { .. }
            | SdcError::ConfigParse { .. }
            | SdcError::InvalidArgument { .. }
            | SdcError::AlreadyExists { .. } => Self::User(value.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

pub fn run(cli: &Cli) -> Result<(), CliError> {
    match &cli.command {
        Command::Run => run_daemon(cli),
        Command::Transfer(args) => run_transfer(cli, args),
        Command::Compress(args) => run_compress(cli, args),
        Command::CheckScript(args) => run_check_script(cli, args),
        Command::Config(args) => run_config(cli, args),
    }
}

fn run_daemon(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let output = output_from_config(&config.output);
    let mut daemon = FieldLoggerDaemon::init(
        config,
        Arc::new(LinuxPlatform::new()),
        output,
        SignalHandler::new(),
    )?;
    daemon.run()?;
    Ok(())
}

/// Gateway for one-shot commands: same lock and volumes the daemon builds.
fn one_shot_gateway(config: &Config) -> Result<StorageGateway, CliError> {
    let platform: Arc<dyn Platform> = Arc::new(LinuxPlatform::new());
    let lock = Arc::new(StorageLock::new(config.storage.lock_timeout())?);
    let volumes = Arc::new(VolumeSet::from_config(&config.storage, platform));
    Ok(StorageGateway::new(lock, volumes))
}

fn run_transfer(cli: &Cli, args: &TransferArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let admission = TransferAdmission::from_config(
        one_shot_gateway(&config)?,
        &config.storage,
        ActivityLoggerHandle::detached(),
    )?;
    let request = TransferRequest::copy(&args.source, &args.destination)
        .overwrite(args.overwrite)
        .move_source(args.move_source);
    let report = admission.transfer(&request)?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "Copied {} bytes: {} -> {}",
                report.bytes_copied,
                args.source.display(),
                args.destination.display()
            );
            println!("  Slices: {}", report.slices);
            if !report.capacity_checked {
                println!("  Capacity check skipped (free space unavailable)");
            }
            if report.source_removed {
                println!("  Source removed");
            }
            if let Some(reason) = &report.removal_error {
                println!("  Source kept: {reason}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "transfer",
                "source": args.source.to_string_lossy(),
                "destination": args.destination.to_string_lossy(),
                "report": serde_json::to_value(&report)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_compress(cli: &Cli, args: &CompressArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let algorithm = args.algorithm.unwrap_or(config.compression.algorithm);
    let gateway = one_shot_gateway(&config)?;

    let started = Instant::now();
    let stats = compress_once(
        &gateway,
        &args.source,
        &args.destination,
        algorithm,
        config.compression.max_fields,
    )?;
    let elapsed = started.elapsed();

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "Compressed {} -> {} ({algorithm})",
                args.source.display(),
                args.destination.display()
            );
            println!("  Lines: {} in, {} out", stats.lines_in, stats.lines_out);
            if stats.truncated_rows > 0 {
                println!(
                    "  Rows truncated to {} fields: {}",
                    config.compression.max_fields, stats.truncated_rows
                );
            }
            println!("  Elapsed: {elapsed:?}");
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "compress",
                "source": args.source.to_string_lossy(),
                "destination": args.destination.to_string_lossy(),
                "algorithm": algorithm.as_str(),
                "stats": serde_json::to_value(stats)?,
                "duration_ms": u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

/// Exits non-zero when any line was skipped so scripts can be checked before
/// they are copied to a card.
fn run_check_script(cli: &Cli, args: &CheckScriptArgs) -> Result<(), CliError> {
    let raw = fs::read(&args.path).map_err(|e| SdcError::io(&args.path, e))?;
    let script = parse_script(&String::from_utf8_lossy(&raw))?;

    match output_mode(cli) {
        OutputMode::Human => {
            for command in &script.commands {
                println!("{command}");
            }
            for warning in &script.warnings {
                eprintln!("warning: {warning}");
            }
            println!(
                "{} command(s), {} warning(s)",
                script.commands.len(),
                script.warnings.len()
            );
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "check-script",
                "path": args.path.to_string_lossy(),
                "commands": script.commands.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": serde_json::to_value(&script.warnings)?,
            });
            write_json_line(&payload)?;
        }
    }

    if script.warnings.is_empty() {
        Ok(())
    } else {
        Err(CliError::User(format!(
            "{} line(s) in {} were not understood",
            script.warnings.len(),
            args.path.display()
        )))
    }
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("SDC_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from(["sdcloud", "--config", "/tmp/sdc.toml", "--json", "run"]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["sdcloud", "run", "--json", "--config", "/tmp/sdc.toml"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_all_subcommands() {
        let cases = [
            vec!["sdcloud", "run"],
            vec!["sdcloud", "transfer", "/sd/a.csv", "/flash/a.csv"],
            vec!["sdcloud", "transfer", "/sd/a.csv", "/flash/a.csv", "--overwrite", "--move"],
            vec!["sdcloud", "compress", "/flash/a.csv", "/flash/a.rle"],
            vec!["sdcloud", "compress", "/flash/a.csv", "/flash/a.d", "--algorithm", "DELTA"],
            vec!["sdcloud", "check-script", "/sd/config.txt"],
            vec!["sdcloud", "config", "validate"],
            vec!["sdcloud", "config"],
        ];

        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn compress_rejects_unknown_algorithm() {
        assert!(
            Cli::try_parse_from(["sdcloud", "compress", "a", "b", "--algorithm", "zstd"]).is_err()
        );
    }

    #[test]
    fn transfer_requires_both_paths() {
        assert!(Cli::try_parse_from(["sdcloud", "transfer", "/sd/a.csv"]).is_err());
    }

    #[test]
    fn move_flag_maps_to_move_source() {
        let cli =
            Cli::try_parse_from(["sdcloud", "transfer", "a", "b", "--move"]).expect("parse");
        match cli.command {
            Command::Transfer(args) => {
                assert!(args.move_source);
                assert!(!args.overwrite);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(
            resolve_output_mode(false, Some("auto"), true),
            OutputMode::Human
        );
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn storage_errors_map_to_cli_categories() {
        let user: CliError = SdcError::invalid_argument("._x").into();
        assert!(matches!(user, CliError::User(_)));
        let runtime: CliError = SdcError::Runtime {
            details: "spawn".to_string(),
        }
        .into();
        assert!(matches!(runtime, CliError::Runtime(_)));
    }
}
