//! CLI module for Meshbook
//!
//! This module provides the command-line interface for Meshbook,
//! including argument parsing and the run command.

pub mod commands;
pub mod output;

use clap::Parser;
use std::path::PathBuf;

/// Meshbook - run declarative task books against MeshCentral devices
///
/// Resolves the meshbook's targets against the server's device listing and
/// runs every task, in order, on all of them.
#[derive(Parser, Debug, Clone)]
#[command(name = "meshbook")]
#[command(author = "Meshbook Contributors")]
#[command(version)]
#[command(about = "Run meshbooks against MeshCentral-managed devices", long_about = None)]
pub struct Cli {
    /// Path to the meshbook YAML file
    #[arg(short = 'm', long)]
    pub meshbook: PathBuf,

    /// Path to the OS categorisation JSON file
    #[arg(short = 'o', long, default_value = "./os_categories.json")]
    pub oscategories: PathBuf,

    /// Path to the API configuration file
    #[arg(long, default_value = meshbook::config::DEFAULT_CONFIG_PATH)]
    pub conf: PathBuf,

    /// Skip the grace period before running the meshbook
    #[arg(long)]
    pub nograce: bool,

    /// Override the meshbook's targets with a single group
    #[arg(short = 'g', long, conflicts_with = "device")]
    pub group: Option<String>,

    /// Override the meshbook's targets with a single device
    #[arg(short = 'd', long)]
    pub device: Option<String>,

    /// Indent the JSON result by four spaces
    #[arg(short = 'i', long)]
    pub indent: bool,

    /// Print the raw result instead of splitting it into lines
    #[arg(short = 'r', long)]
    pub raw_result: bool,

    /// Suppress progress output
    #[arg(short = 's', long)]
    pub silent: bool,

    /// Split each output line into shell tokens
    #[arg(long)]
    pub shlex: bool,

    /// Resolve and print the targets without running anything
    #[arg(long)]
    pub dry_run: bool,

    /// Save the run log to the history directory
    #[arg(long)]
    pub history: bool,

    /// Remove existing history entries before the run
    #[arg(long)]
    pub flush_history: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// True when the result should be split into lines
    pub fn normalize_result(&self) -> bool {
        !self.raw_result
    }

    /// True when history is touched at all
    pub fn uses_history(&self) -> bool {
        self.history || self.flush_history
    }
}
