//! CLI module for the topoplan tool.
//!
//! This module provides the command-line interface: argument parsing and
//! rendering of changesets, run reports and snapshots.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, StateCommands};
pub use output::OutputFormatter;
