//! Task execution engine for meshbook runs
//!
//! This module drives a resolved meshbook against the remote service:
//! - One batched remote call per task, covering every resolved target
//! - Strictly sequential tasks with a pacing delay in between
//! - Per-device replies re-associated with inventory names
//! - Cooperative cancellation that releases the session on the way out

pub mod run_log;

pub use run_log::{DeviceResponse, RunLog, TaskEntry, TaskOutput, OFFLINE_KEY};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::book::{Meshbook, Task};
use crate::categories::OsCategories;
use crate::error::{Error, Result};
use crate::inventory::Inventory;
use crate::session::{CommandOptions, CommandResponse, Session};
use crate::targeting::{resolve_targets, Resolution};

/// Boilerplate the agent appends to every command result
pub const COMPLETION_TRAILER: &str = "Run commands completed.";

/// Configuration for the executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Pause between consecutive tasks
    pub intertask_delay: Duration,
    /// How long each batched command may take
    pub command_timeout: Duration,
    /// Force PowerShell even when the meshbook does not ask for it
    pub powershell: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            intertask_delay: Duration::from_secs(1),
            command_timeout: Duration::from_secs(1800),
            powershell: false,
        }
    }
}

impl ExecutorConfig {
    /// Set the inter-task delay
    pub fn with_intertask_delay(mut self, delay: Duration) -> Self {
        self.intertask_delay = delay;
        self
    }

    /// Set the per-command timeout
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// Receives progress events while a run is executing.
///
/// All methods default to no-ops.
#[async_trait]
pub trait ExecutionCallback: Send + Sync {
    /// Called once before the first task, with the number of targets.
    async fn on_run_start(&self, name: Option<&str>, targets: usize) {
        let _ = (name, targets);
    }

    /// Called before a task's command is dispatched.
    async fn on_task_start(&self, ordinal: usize, task: &Task) {
        let _ = (ordinal, task);
    }

    /// Called once a task's replies have been collected.
    async fn on_task_complete(&self, ordinal: usize, entry: &TaskEntry) {
        let _ = (ordinal, entry);
    }

    /// Called after the last task.
    async fn on_run_end(&self, log: &RunLog) {
        let _ = log;
    }
}

/// Callback that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCallback;

#[async_trait]
impl ExecutionCallback for NullCallback {}

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every task was dispatched
    Completed(RunLog),
    /// Resolution produced no reachable target; nothing was sent
    NoTargets,
}

impl RunOutcome {
    /// The run log, if tasks were executed
    pub fn log(&self) -> Option<&RunLog> {
        match self {
            Self::Completed(log) => Some(log),
            Self::NoTargets => None,
        }
    }

    /// Consume the outcome and return the run log, if any
    pub fn into_log(self) -> Option<RunLog> {
        match self {
            Self::Completed(log) => Some(log),
            Self::NoTargets => None,
        }
    }
}

/// The main executor
pub struct Executor {
    config: ExecutorConfig,
    callback: Arc<dyn ExecutionCallback>,
}

impl Executor {
    /// Create a new executor with the given configuration
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            callback: Arc::new(NullCallback),
        }
    }

    /// Attach a progress callback
    pub fn with_callback(mut self, callback: Arc<dyn ExecutionCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Current configuration
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute every task of an (already expanded) meshbook against the
    /// resolved targets.
    ///
    /// Transport failures abort the run and are returned as-is. Individual
    /// device failures are captured in the log.
    #[instrument(skip_all, fields(tasks = meshbook.tasks.len()))]
    pub async fn execute(
        &self,
        session: &dyn Session,
        resolution: &Resolution,
        meshbook: &Meshbook,
        inventory: &Inventory,
    ) -> Result<RunOutcome> {
        if resolution.has_no_targets() {
            info!("No reachable targets, skipping execution");
            return Ok(RunOutcome::NoTargets);
        }

        let options = CommandOptions::new()
            .with_powershell(meshbook.powershell || self.config.powershell)
            .with_timeout(self.config.command_timeout);

        self.callback
            .on_run_start(meshbook.name.as_deref(), resolution.target_list.len())
            .await;

        let mut log = RunLog::new();
        for (index, task) in meshbook.tasks.iter().enumerate() {
            let ordinal = index + 1;
            self.callback.on_task_start(ordinal, task).await;
            info!(ordinal, task = %task.name, "Dispatching task");

            let replies = session
                .run_command(&resolution.target_list, &task.command, &options)
                .await?;
            if replies.len() < resolution.target_list.len() {
                debug!(
                    expected = resolution.target_list.len(),
                    received = replies.len(),
                    "Not every target replied"
                );
            }

            let entry = TaskEntry {
                task_name: task.name.clone(),
                data: replies
                    .into_iter()
                    .map(|(id, reply)| device_response(id, reply, inventory))
                    .collect(),
            };
            self.callback.on_task_complete(ordinal, &entry).await;
            log.push_task(entry);

            if ordinal < meshbook.tasks.len() && !self.config.intertask_delay.is_zero() {
                tokio::time::sleep(self.config.intertask_delay).await;
            }
        }

        log.set_offline(
            resolution
                .offline_list
                .iter()
                .map(|id| inventory.device_name_or_empty(id))
                .collect(),
        );
        self.callback.on_run_end(&log).await;
        Ok(RunOutcome::Completed(log))
    }

    /// Like [`Executor::execute`], but stops when `cancel` fires.
    ///
    /// On cancellation the session is closed and [`Error::Aborted`] is
    /// returned. A command already dispatched keeps running remotely.
    pub async fn run(
        &self,
        session: &dyn Session,
        resolution: &Resolution,
        meshbook: &Meshbook,
        inventory: &Inventory,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Run cancelled, closing session");
                if let Err(e) = session.close().await {
                    debug!(error = %e, "Session close after cancellation failed");
                }
                Err(Error::Aborted)
            }
            outcome = self.execute(session, resolution, meshbook, inventory) => outcome,
        }
    }

    /// Resolve targets and run a meshbook in one step.
    ///
    /// Placeholders are expanded before anything is sent.
    pub async fn run_meshbook(
        &self,
        session: &dyn Session,
        meshbook: Meshbook,
        inventory: &Inventory,
        categories: &OsCategories,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let meshbook = crate::book::expand(meshbook);
        let resolution = resolve_targets(&meshbook, inventory, categories);
        self.run(session, &resolution, &meshbook, inventory, cancel)
            .await
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

/// Remove every occurrence of the agent's completion trailer
pub fn strip_trailer(text: &str) -> String {
    text.replace(COMPLETION_TRAILER, "")
}

fn device_response(id: String, reply: CommandResponse, inventory: &Inventory) -> DeviceResponse {
    DeviceResponse {
        result: TaskOutput::Raw(strip_trailer(&reply.result)),
        device_name: inventory.device_name_or_empty(&id),
        device_id: id,
        extra: reply.extra,
    }
}
