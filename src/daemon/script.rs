//! Command script: a closed, typed set of runtime commands read from removable storage.
//!
//! ```text
//! # heartbeat every 2 s
//! sdcloud.set_expected_write_frequency(2000)
//! sdcloud.run_heartbeat
//! sdcloud.set_compression_algorithm(DELTA)
//! sdcloud.run_compression
//! ```
//!
//! Blank lines and `#` comments are ignored. Anything else that does not parse
//! is reported as a warning and skipped.

#![allow(missing_docs)]

use std::fmt;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::compress::Algorithm;
use crate::core::errors::{Result, SdcError};

/// Periodic task addressed by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Liveness,
    Writer,
    Compression,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Liveness => "liveness",
            Self::Writer => "writer",
            Self::Compression => "compression",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScriptCommand {
    Start(TaskKind),
    Stop(TaskKind),
    SetInterval(TaskKind, Duration),
    SetAlgorithm(Algorithm),
}

impl fmt::Display for ScriptCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start(task) => write!(f, "start {task}"),
            Self::Stop(task) => write!(f, "stop {task}"),
            Self::SetInterval(task, interval) => {
                write!(f, "set {task} interval {}ms", interval.as_millis())
            }
            Self::SetAlgorithm(algorithm) => write!(f, "set compression algorithm {algorithm}"),
        }
    }
}

/// A skipped line and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptWarning {
    /// 1-based line number.
    pub line: usize,
    pub text: String,
    pub reason: String,
}

impl fmt::Display for ScriptWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} ({:?})", self.line, self.reason, self.text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedScript {
    pub commands: Vec<ScriptCommand>,
    pub warnings: Vec<ScriptWarning>,
}

/// Line parser for command scripts.
#[derive(Debug, Clone)]
pub struct ScriptParser {
    command: Regex,
}

impl ScriptParser {
    pub fn new() -> Result<Self> {
        let command = Regex::new(r"^sdcloud\.([a-z_]+)\s*(?:\(\s*([^()]*?)\s*\))?\s*;?$").map_err(
            |err| SdcError::Runtime {
                details: format!("script grammar failed to compile: {err}"),
            },
        )?;
        Ok(Self { command })
    }

    /// Parse a whole script. Never fails; bad lines become warnings.
    #[must_use]
    pub fn parse(&self, text: &str) -> ParsedScript {
        let mut parsed = ParsedScript::default();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match self.parse_line(line) {
                Ok(command) => parsed.commands.push(command),
                Err(reason) => parsed.warnings.push(ScriptWarning {
                    line: index + 1,
                    text: line.to_string(),
                    reason,
                }),
            }
        }
        parsed
    }

    /// Parse one non-blank, non-comment line.
    pub fn parse_line(&self, line: &str) -> std::result::Result<ScriptCommand, String> {
        let captures = self
            .command
            .captures(line)
            .ok_or_else(|| "unrecognized command".to_string())?;
        let name = captures.get(1).map_or("", |m| m.as_str());
        let arg = captures.get(2).map(|m| m.as_str()).filter(|a| !a.is_empty());

        let command = match name {
            "run_heartbeat" => ScriptCommand::Start(TaskKind::Liveness),
            "stop_heartbeat" => ScriptCommand::Stop(TaskKind::Liveness),
            "set_expected_write_frequency" => {
                ScriptCommand::SetInterval(TaskKind::Liveness, interval_arg(arg)?)
            }
            "run_compression" => ScriptCommand::Start(TaskKind::Compression),
            "stop_compression" => ScriptCommand::Stop(TaskKind::Compression),
            "set_compression_frequency" => {
                ScriptCommand::SetInterval(TaskKind::Compression, interval_arg(arg)?)
            }
            "set_compression_algorithm" => {
                let raw = arg.ok_or_else(|| "missing algorithm".to_string())?;
                ScriptCommand::SetAlgorithm(raw.parse::<Algorithm>()?)
            }
            "run_test_writer" => ScriptCommand::Start(TaskKind::Writer),
            "stop_test_writer" => ScriptCommand::Stop(TaskKind::Writer),
            "set_test_writer_frequency" => {
                ScriptCommand::SetInterval(TaskKind::Writer, interval_arg(arg)?)
            }
            other => return Err(format!("unknown command sdcloud.{other}")),
        };

        if matches!(command, ScriptCommand::Start(_) | ScriptCommand::Stop(_)) && arg.is_some() {
            return Err(format!("sdcloud.{name} takes no argument"));
        }
        Ok(command)
    }
}

fn interval_arg(arg: Option<&str>) -> std::result::Result<Duration, String> {
    let raw = arg.ok_or_else(|| "missing interval in milliseconds".to_string())?;
    let ms: i64 = raw
        .parse()
        .map_err(|_| format!("interval {raw:?} is not an integer"))?;
    let ms = u64::try_from(ms)
        .ok()
        .filter(|ms| *ms > 0)
        .ok_or_else(|| format!("interval must be positive, got {ms}"))?;
    Ok(Duration::from_millis(ms))
}

/// Parse `text` with a fresh parser.
pub fn parse_script(text: &str) -> Result<ParsedScript> {
    Ok(ScriptParser::new()?.parse(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ParsedScript {
        parse_script(text).unwrap()
    }

    #[test]
    fn parses_every_command() {
        let script = "\
sdcloud.run_heartbeat
sdcloud.stop_heartbeat
sdcloud.set_expected_write_frequency(2000)
sdcloud.run_compression
sdcloud.stop_compression
sdcloud.set_compression_frequency(15000)
sdcloud.set_compression_algorithm(delta)
sdcloud.run_test_writer
sdcloud.stop_test_writer
sdcloud.set_test_writer_frequency(250)
";
        let parsed = parse(script);
        assert!(parsed.warnings.is_empty(), "{:?}", parsed.warnings);
        assert_eq!(
            parsed.commands,
            vec![
                ScriptCommand::Start(TaskKind::Liveness),
                ScriptCommand::Stop(TaskKind::Liveness),
                ScriptCommand::SetInterval(TaskKind::Liveness, Duration::from_millis(2000)),
                ScriptCommand::Start(TaskKind::Compression),
                ScriptCommand::Stop(TaskKind::Compression),
                ScriptCommand::SetInterval(TaskKind::Compression, Duration::from_millis(15000)),
                ScriptCommand::SetAlgorithm(Algorithm::Delta),
                ScriptCommand::Start(TaskKind::Writer),
                ScriptCommand::Stop(TaskKind::Writer),
                ScriptCommand::SetInterval(TaskKind::Writer, Duration::from_millis(250)),
            ]
        );
    }

    #[test]
    fn skips_blank_lines_and_comments() {
        let parsed = parse("\n# comment\n   \n  # indented\nsdcloud.run_heartbeat\n");
        assert_eq!(parsed.commands, vec![ScriptCommand::Start(TaskKind::Liveness)]);
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn tolerates_whitespace_and_empty_parens() {
        let parsed = parse("  sdcloud.run_compression()  \nsdcloud.set_compression_frequency( 500 );\r\n");
        assert_eq!(
            parsed.commands,
            vec![
                ScriptCommand::Start(TaskKind::Compression),
                ScriptCommand::SetInterval(TaskKind::Compression, Duration::from_millis(500)),
            ]
        );
    }

    #[test]
    fn algorithm_is_case_insensitive() {
        let parsed = parse("sdcloud.set_compression_algorithm(RLE)\nsdcloud.set_compression_algorithm(Delta)\n");
        assert_eq!(
            parsed.commands,
            vec![
                ScriptCommand::SetAlgorithm(Algorithm::RunLength),
                ScriptCommand::SetAlgorithm(Algorithm::Delta),
            ]
        );
    }

    #[test]
    fn bad_lines_become_warnings() {
        let parsed = parse(
            "sdcloud.launch_rocket\n\
             sdcloud.set_compression_frequency(0)\n\
             sdcloud.set_expected_write_frequency(-5)\n\
             sdcloud.set_test_writer_frequency(abc)\n\
             sdcloud.set_compression_algorithm(zstd)\n\
             sdcloud.set_compression_frequency((100)\n\
             sdcloud.run_heartbeat(1)\n\
             echo hello\n\
             sdcloud.run_heartbeat\n",
        );
        assert_eq!(parsed.commands, vec![ScriptCommand::Start(TaskKind::Liveness)]);
        let lines: Vec<usize> = parsed.warnings.iter().map(|w| w.line).collect();
        assert_eq!(lines, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(parsed.warnings[1].reason.contains("positive"));
        assert!(parsed.warnings[4].reason.contains("zstd"));
    }

    #[test]
    fn display_is_readable() {
        let cmd = ScriptCommand::SetInterval(TaskKind::Writer, Duration::from_millis(100));
        assert_eq!(cmd.to_string(), "set writer interval 100ms");
        let warning = ScriptWarning {
            line: 3,
            text: "x".to_string(),
            reason: "unrecognized command".to_string(),
        };
        assert_eq!(warning.to_string(), "line 3: unrecognized command (\"x\")");
    }
}
