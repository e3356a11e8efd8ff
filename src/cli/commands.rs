//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// topoplan - validate a service topology and plan ordered changesets.
#[derive(Parser, Debug)]
#[command(name = "topoplan")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the declaration file.
    #[arg(short, long, global = true, env = "TOPOPLAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json). Logs go to stderr.
    #[arg(long, global = true, default_value = "text", env = "TOPOPLAN_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Build and validate the resource graph.
    Validate,

    /// Show the changeset needed to reach the declared topology.
    Plan {
        /// Show dependencies and changed attributes per operation.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Plan and apply the changeset.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Maximum operations in flight (overrides the declaration).
        #[arg(long)]
        max_parallel: Option<usize>,
    },

    /// Tear down every recorded resource.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Only show the teardown changeset.
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect or repair the state snapshot.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum StateCommands {
    /// Show the recorded snapshot.
    Show,

    /// Remove the state lock.
    Unlock {
        /// Lock ID to release.
        #[arg(long, required_unless_present = "force")]
        lock_id: Option<String>,

        /// Remove the lock whoever holds it.
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply_with_globals() {
        let cli = Cli::try_parse_from([
            "topoplan",
            "apply",
            "--yes",
            "--max-parallel",
            "8",
            "--output",
            "json",
            "-c",
            "stack/topoplan.yaml",
        ])
        .expect("arguments parse");

        assert_eq!(
            cli.command,
            Commands::Apply {
                yes: true,
                max_parallel: Some(8)
            }
        );
        assert_eq!(cli.output, OutputFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("stack/topoplan.yaml")));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_parse_state_unlock() {
        let cli = Cli::try_parse_from(["topoplan", "state", "unlock", "--force", "--verbose"])
            .expect("arguments parse");

        assert_eq!(
            cli.command,
            Commands::State {
                command: StateCommands::Unlock {
                    lock_id: None,
                    force: true
                }
            }
        );
        assert!(cli.verbose);
    }

    #[test]
    fn test_destroy_dry_run() {
        let cli = Cli::try_parse_from(["topoplan", "destroy", "--dry-run"]).expect("arguments parse");
        assert_eq!(
            cli.command,
            Commands::Destroy {
                yes: false,
                dry_run: true
            }
        );
    }

    #[test]
    fn test_unlock_needs_lock_id_or_force() {
        assert!(Cli::try_parse_from(["topoplan", "state", "unlock"]).is_err());
    }

    #[test]
    fn test_unknown_output_format_rejected() {
        assert!(Cli::try_parse_from(["topoplan", "plan", "--output", "yaml"]).is_err());
    }
}
