//! Commands module for Meshbook CLI

pub mod run;

use crate::cli::output::OutputFormatter;
use crate::cli::Cli;

/// Common context shared by the run steps
pub struct CommandContext {
    /// Parsed command line
    pub cli: Cli,
    /// Output formatter
    pub output: OutputFormatter,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &Cli) -> Self {
        let output = OutputFormatter::new(!cli.no_color, cli.silent, cli.verbosity());

        Self {
            cli: cli.clone(),
            output,
        }
    }

    /// Report a library error and return its exit code
    pub fn fail(&self, error: &meshbook::Error) -> i32 {
        self.output.error(&error.to_string());
        if error.is_aborted() {
            self.output
                .hint("Check the devices before re-running, commands may still be executing.");
        }
        error.exit_code()
    }
}
