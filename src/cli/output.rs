//! Output formatting module for Meshbook
//!
//! Progress goes to stdout and can be silenced; warnings and errors go to
//! stderr and are always shown. The final JSON result
//! ([`OutputFormatter::result`]) and the dry-run target lists
//! ([`OutputFormatter::list`]) are printed regardless of `--silent`.

use async_trait::async_trait;
use colored::Colorize;

use meshbook::book::Task;
use meshbook::executor::{ExecutionCallback, RunLog, TaskEntry};

/// Width of the separator rule
const RULE_WIDTH: usize = 40;

/// Output formatter for console output
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    /// Use colored output
    use_color: bool,
    /// Suppress progress output
    silent: bool,
    /// Verbosity level
    verbosity: u8,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, silent: bool, verbosity: u8) -> Self {
        // Respect NO_COLOR environment variable
        let use_color = use_color && std::env::var("NO_COLOR").is_err();
        colored::control::set_override(use_color);

        Self {
            use_color,
            silent,
            verbosity,
        }
    }

    /// True when progress output is suppressed
    pub fn is_silent(&self) -> bool {
        self.silent
    }

    /// Print a separator rule
    pub fn rule(&self) {
        if self.silent {
            return;
        }
        println!("{}", "-".repeat(RULE_WIDTH));
    }

    /// Print a labelled run parameter
    pub fn param(&self, label: &str, value: &str) {
        if self.silent {
            return;
        }

        if self.use_color {
            println!("{}: {}.", label, value.yellow());
        } else {
            println!("{}: {}.", label, value);
        }
    }

    /// Print a step description
    pub fn step(&self, message: &str) {
        if self.silent {
            return;
        }

        if self.use_color {
            println!("{}", message.italic());
        } else {
            println!("{}", message);
        }
    }

    /// Print a highlighted notice
    pub fn notice(&self, message: &str) {
        if self.silent {
            return;
        }

        if self.use_color {
            println!("{}\n{}\n{}", "!!!!".red(), message.yellow(), "!!!!".red());
        } else {
            println!("!!!!\n{}\n!!!!", message);
        }
    }

    /// Print a task header
    pub fn task_header(&self, ordinal: usize, task_name: &str) {
        if self.silent {
            return;
        }

        let header = format!("{}. Running: {}", ordinal, task_name);
        if self.use_color {
            println!("{}", header.green());
        } else {
            println!("{}", header);
        }
    }

    /// Print one step of the grace countdown
    pub fn countdown(&self, step: u64) {
        if self.silent {
            return;
        }

        let text = format!("{}...", step);
        if self.use_color {
            println!("{}", text.yellow());
        } else {
            println!("{}", text);
        }
    }

    /// Print a message that is shown even in silent mode
    pub fn final_message(&self, message: &str) {
        if self.use_color {
            println!("{}", message.red());
        } else {
            println!("{}", message);
        }
    }

    /// Print the run result
    pub fn result(&self, json: &str) {
        println!("{}", json);
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.use_color {
            eprintln!("{} {}", "ERROR:".red().bold(), message);
        } else {
            eprintln!("ERROR: {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.use_color {
            eprintln!("{} {}", "WARNING:".yellow().bold(), message);
        } else {
            eprintln!("WARNING: {}", message);
        }
    }

    /// Print a hint message
    pub fn hint(&self, message: &str) {
        if self.silent {
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "HINT:".cyan().bold(), message);
        } else {
            eprintln!("HINT: {}", message);
        }
    }

    /// Print an info message (respects verbosity)
    pub fn info(&self, message: &str) {
        if self.silent || self.verbosity < 1 {
            return;
        }

        if self.use_color {
            println!("{} {}", "INFO:".blue(), message);
        } else {
            println!("INFO: {}", message);
        }
    }

    /// Print a list of items, even in silent mode
    pub fn list(&self, title: &str, items: &[String]) {
        if self.use_color {
            println!("{}", title.cyan().bold());
        } else {
            println!("{}", title);
        }
        if items.is_empty() {
            println!("  (none)");
        }
        for item in items {
            println!("  - {}", item);
        }
    }
}

/// Prints task progress as the executor reports it
pub struct ConsoleCallback {
    output: OutputFormatter,
}

impl ConsoleCallback {
    /// Create a callback printing through `output`
    pub fn new(output: OutputFormatter) -> Self {
        Self { output }
    }
}

#[async_trait]
impl ExecutionCallback for ConsoleCallback {
    async fn on_task_start(&self, ordinal: usize, task: &Task) {
        self.output.task_header(ordinal, &task.name);
    }

    async fn on_task_complete(&self, ordinal: usize, entry: &TaskEntry) {
        self.output.info(&format!(
            "Task {} answered by {} device(s)",
            ordinal,
            entry.data.len()
        ));
    }

    async fn on_run_end(&self, log: &RunLog) {
        if !log.offline().is_empty() {
            self.output.info(&format!(
                "{} targeted device(s) offline",
                log.offline().len()
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_formatter() {
        let output = OutputFormatter::new(false, true, 0);
        assert!(output.is_silent());
        output.list("Targets", &[]);
        output.param("Grace", "true");
    }
}
