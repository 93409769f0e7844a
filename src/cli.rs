// src/cli.rs

//! CLI argument parsing using `clap`.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};

use crate::dag::RunId;

/// Command-line arguments for `pipetick`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pipetick",
    version,
    about = "Run a task DAG on a fixed interval, with retries and run history.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Pipetick.toml` in the current working directory.
    #[arg(long, global = true, value_name = "PATH", default_value = "Pipetick.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PIPETICK_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the scheduler (default).
    Run {
        /// Execute one run immediately and exit, without the interval clock.
        #[arg(long)]
        once: bool,
    },
    /// Parse + validate, print schedule and task order, execute nothing.
    Validate,
    /// List recorded runs.
    Runs {
        /// Only runs triggered at or after this RFC 3339 timestamp.
        #[arg(long, value_name = "TIMESTAMP")]
        since: Option<DateTime<Utc>>,
    },
    /// Show one recorded run with its task executions.
    Show {
        run_id: RunId,
    },
    /// Re-execute a recorded run under a new run id, then exit.
    Retrigger {
        run_id: RunId,
    },
}

impl CliArgs {
    /// The subcommand, defaulting to `run`.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run { once: false })
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_run() {
        let args = CliArgs::try_parse_from(["pipetick"]).unwrap();
        assert_eq!(args.config, "Pipetick.toml");
        assert!(matches!(args.command(), Command::Run { once: false }));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let args = CliArgs::try_parse_from([
            "pipetick",
            "runs",
            "--since",
            "2024-01-01T00:00:00Z",
            "--config",
            "demos/traffic_pipeline.toml",
        ])
        .unwrap();
        assert_eq!(args.config, "demos/traffic_pipeline.toml");
        match args.command() {
            Command::Runs { since: Some(since) } => {
                assert_eq!(since.to_rfc3339(), "2024-01-01T00:00:00+00:00");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn show_requires_numeric_id() {
        assert!(CliArgs::try_parse_from(["pipetick", "show", "abc"]).is_err());
        let args = CliArgs::try_parse_from(["pipetick", "show", "7"]).unwrap();
        assert!(matches!(args.command(), Command::Show { run_id: 7 }));
    }
}
