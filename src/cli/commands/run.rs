//! Run command - execute a meshbook
//!
//! Loads the inputs, connects, resolves targets and drives the executor.
//! Library errors are reported through the formatter and mapped to exit
//! codes here.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use meshbook::book::{self, Meshbook};
use meshbook::categories::OsCategories;
use meshbook::config::Config;
use meshbook::executor::{Executor, RunLog, RunOutcome};
use meshbook::history::History;
use meshbook::inventory::Inventory;
use meshbook::normalize::normalize;
use meshbook::session::meshcentral::MeshCentralSession;
use meshbook::session::{cancellable, Session};
use meshbook::targeting::{resolve_targets, Resolution};
use meshbook::Result;

use super::CommandContext;
use crate::cli::output::ConsoleCallback;

/// Printed when resolution leaves nothing to run against
pub const NO_TARGETS_MESSAGE: &str = "No targets found or targets unreachable, quitting.";

/// Execute the run command and return the process exit code
pub async fn execute(ctx: &CommandContext, cancel: CancellationToken) -> i32 {
    match run(ctx, cancel).await {
        Ok(code) => code,
        Err(e) => ctx.fail(&e),
    }
}

async fn run(ctx: &CommandContext, cancel: CancellationToken) -> Result<i32> {
    let cli = &ctx.cli;

    ctx.output.step("Loading the MeshCentral account configuration...");
    let config = Config::load(&cli.conf)?;

    ctx.output.step("Loading the meshbook...");
    let meshbook = load_meshbook(ctx)?;

    ctx.output.step("Loading the OS categorisation file...");
    let categories = OsCategories::from_file(&cli.oscategories)?;

    print_parameters(ctx, &meshbook);

    let history = if cli.uses_history() {
        Some(History::open(&config.run.history_dir, cli.flush_history)?)
    } else {
        None
    };

    ctx.output.step("Connecting to MeshCentral...");
    let session = cancellable(&cancel, MeshCentralSession::connect(&config.account)).await?;

    let result = drive(
        ctx,
        &config,
        &session,
        &meshbook,
        &categories,
        history.as_ref(),
        &cancel,
    )
    .await;

    if let Err(e) = session.close().await {
        debug!(error = %e, "Closing the session failed");
    }
    result
}

async fn drive(
    ctx: &CommandContext,
    config: &Config,
    session: &MeshCentralSession,
    meshbook: &Meshbook,
    categories: &OsCategories,
    history: Option<&History>,
    cancel: &CancellationToken,
) -> Result<i32> {
    ctx.output.step("Fetching the device listing...");
    let devices = cancellable(cancel, session.list_devices(config.run.list_timeout())).await?;
    let inventory = Inventory::from_remote(devices);
    info!(
        groups = inventory.group_count(),
        devices = inventory.device_count(),
        "Inventory loaded"
    );

    let resolution = resolve_targets(meshbook, &inventory, categories);
    for warning in &resolution.warnings {
        ctx.output.warning(&warning.to_string());
    }

    if ctx.cli.dry_run {
        print_targets(ctx, &resolution, &inventory);
        return Ok(0);
    }

    if resolution.has_no_targets() {
        ctx.output.final_message(NO_TARGETS_MESSAGE);
        ctx.output.rule();
        return Ok(0);
    }

    ctx.output.rule();
    let target_name = meshbook
        .target
        .target()
        .map(|t| t.describe())
        .unwrap_or_default();
    ctx.output
        .param("Executing meshbook on the target(s)", &target_name);

    if !ctx.cli.nograce {
        grace_period(ctx, config.run.grace_period(), cancel).await?;
    }
    ctx.output.rule();

    let executor = Executor::new(config.executor_config())
        .with_callback(Arc::new(ConsoleCallback::new(ctx.output.clone())));
    let outcome = executor
        .run(session, &resolution, meshbook, &inventory, cancel)
        .await?;

    let RunOutcome::Completed(log) = outcome else {
        ctx.output.final_message(NO_TARGETS_MESSAGE);
        return Ok(0);
    };
    let log = finish_log(ctx, log);
    ctx.output.result(&log.to_json(ctx.cli.indent)?);

    if let (Some(history), true) = (history, ctx.cli.history) {
        let path = history.write(&log)?;
        ctx.output.info(&format!("Run saved to {}", path.display()));
    }
    Ok(0)
}

fn load_meshbook(ctx: &CommandContext) -> Result<Meshbook> {
    let mut meshbook = book::expand(Meshbook::from_file(&ctx.cli.meshbook)?);
    if let Some(group) = &ctx.cli.group {
        meshbook.override_group(group.clone());
    } else if let Some(device) = &ctx.cli.device {
        meshbook.override_device(device.clone());
    }
    Ok(meshbook)
}

fn finish_log(ctx: &CommandContext, log: RunLog) -> RunLog {
    if ctx.cli.normalize_result() {
        normalize(ctx.cli.shlex, log)
    } else {
        log
    }
}

fn print_parameters(ctx: &CommandContext, meshbook: &Meshbook) {
    let output = &ctx.output;
    let cli = &ctx.cli;

    output.rule();
    output.param("meshbook", &cli.meshbook.display().to_string());
    output.param(
        "Operating System Categorisation file",
        &cli.oscategories.display().to_string(),
    );
    output.param("Configuration file", &cli.conf.display().to_string());
    output.param(
        "Target Operating System category given",
        meshbook.target_os.as_deref().unwrap_or("All"),
    );
    output.param(
        "Ignore the OS Categorisation file",
        &meshbook.ignore_categorisation.to_string(),
    );
    if meshbook.ignore_categorisation {
        output.notice(
            "Ignore categorisation is True.\nThe target OS is matched as a substring of the reported device OS.",
        );
    }
    output.param(
        "Target Device tag given",
        meshbook.target_tag.as_deref().unwrap_or("All"),
    );
    if let Some(target) = meshbook.target.target() {
        output.param(&format!("Target {}", target.key()), &target.describe());
    }
    output.param("Grace", &(!cli.nograce).to_string());
    output.param("Silent", "false");
    output.rule();
}

fn print_targets(ctx: &CommandContext, resolution: &Resolution, inventory: &Inventory) {
    let names = |ids: &[String]| -> Vec<String> {
        ids.iter()
            .map(|id| match inventory.device_name(id) {
                Some(name) => format!("{name} ({id})"),
                None => id.clone(),
            })
            .collect()
    };
    ctx.output.list("Targets:", &names(&resolution.target_list));
    ctx.output.list("Offline:", &names(&resolution.offline_list));
}

async fn grace_period(ctx: &CommandContext, period: Duration, cancel: &CancellationToken) -> Result<()> {
    ctx.output.step("Initiating grace-period...");
    for step in 1..=period.as_secs() {
        ctx.output.countdown(step);
        tokio::select! {
            _ = cancel.cancelled() => return Err(meshbook::Error::Aborted),
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }
    Ok(())
}
