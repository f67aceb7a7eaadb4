//! Meshbook - run declarative task books against MeshCentral devices
//!
//! This is the main entry point for the Meshbook CLI.

mod cli;

use anyhow::Result;
use cli::commands::{run, CommandContext};
use cli::Cli;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    if cli.verbosity() >= 2 {
        eprintln!("Meshbook v{}", meshbook::VERSION);
    }

    let ctx = CommandContext::new(&cli);

    // Ctrl-C cancels the run; the executor closes the session on its way out
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, aborting");
            signal_token.cancel();
        }
    });

    let exit_code = run::execute(&ctx, cancel).await;

    std::process::exit(exit_code);
}

/// Initialize logging based on verbosity level
fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity >= 3),
        )
        .with(env_filter)
        .init();
}
