//! Execution engine tests
//!
//! Runs meshbooks against the scripted [`MockSession`] with tokio's clock
//! paused, so pacing delays and timeouts complete instantly.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::*;
use meshbook::book::{Meshbook, Task, Variable};
use meshbook::executor::{
    ExecutionCallback, Executor, ExecutorConfig, RunOutcome, TaskEntry, TaskOutput,
};
use meshbook::inventory::{Device, Inventory};
use meshbook::normalize::normalize;
use meshbook::session::{Session, SessionError};
use meshbook::targeting::{resolve_targets, Target};
use meshbook::Error;

fn executor() -> Executor {
    Executor::new(ExecutorConfig::default())
}

async fn run_book(session: &MockSession, book: Meshbook) -> meshbook::Result<RunOutcome> {
    let inventory = session.inventory();
    executor()
        .run_meshbook(session, book, &inventory, &categories(), &CancellationToken::new())
        .await
}

// ============================================================================
// Basic Execution
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_single_task_run_log() {
    let session = MockSession::new()
        .with_device("Sales", Device::new("n1", "PC1", "Windows 10"));
    let mut book = meshbook(Target::Group("Sales".into()), &[("Ping", "ping -c1 localhost")]);
    book.target_os = Some("Windows".into());

    let log = run_book(&session, book).await.unwrap().into_log().unwrap();

    assert_eq!(
        serde_json::to_value(&log).unwrap(),
        json!({
            "task_1": {
                "task_name": "Ping",
                "data": [{ "result": "ok\n", "device_id": "n1", "device_name": "PC1" }]
            },
            "Offline": []
        })
    );
    assert_eq!(session.command_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_targets_makes_no_remote_calls() {
    let session = MockSession::new().with_device(
        "Sales",
        Device::new("n1", "PC1", "Windows 10").with_reachable(false),
    );
    let book = meshbook(Target::Group("Sales".into()), &[("Ping", "ping")]);

    let outcome = run_book(&session, book).await.unwrap();
    assert_eq!(outcome, RunOutcome::NoTargets);
    assert_eq!(session.command_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tasks_run_in_order_as_one_batch_each() {
    let session = office_session();
    let book = meshbook(
        Target::AllGroups,
        &[("First", "echo 1"), ("Second", "echo 2"), ("Third", "echo 3")],
    );

    let log = run_book(&session, book).await.unwrap().into_log().unwrap();

    let commands = session.commands();
    assert_eq!(
        commands.iter().map(|c| c.command.as_str()).collect::<Vec<_>>(),
        vec!["echo 1", "echo 2", "echo 3"]
    );
    for command in &commands {
        assert_eq!(command.device_ids, vec!["n1", "n3", "n4"]);
    }

    let labels: Vec<_> = log.tasks().map(|(label, entry)| (label, entry.task_name.as_str())).collect();
    assert_eq!(
        labels,
        vec![("task_1", "First"), ("task_2", "Second"), ("task_3", "Third")]
    );
    assert_eq!(log.offline(), &["PC2".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_placeholders_are_expanded_before_dispatch() {
    let session = office_session();
    let mut book = meshbook(
        Target::Device("SRV1".into()),
        &[("Install {{ pkg }}", "apt install -y {{ pkg }}")],
    );
    book.variables = Some(vec![Variable::new("pkg", "curl")]);

    let log = run_book(&session, book).await.unwrap().into_log().unwrap();
    assert_eq!(session.commands()[0].command, "apt install -y curl");
    assert_eq!(log.task("task_1").unwrap().task_name, "Install curl");
}

#[tokio::test(start_paused = true)]
async fn test_powershell_flag_is_forwarded() {
    let session = office_session();
    let mut book = meshbook(Target::Device("PC1".into()), &[("Dir", "Get-ChildItem")]);
    book.powershell = true;

    run_book(&session, book).await.unwrap();
    assert!(session.commands()[0].powershell);
}

// ============================================================================
// Reply Handling
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_trailer_is_stripped() {
    let session = office_session();
    session.set_output("uptime", "up 3 days\nRun commands completed.");
    let book = meshbook(Target::Device("SRV1".into()), &[("Uptime", "uptime")]);

    let log = run_book(&session, book).await.unwrap().into_log().unwrap();
    let reply = &log.task("task_1").unwrap().data[0];
    assert_eq!(reply.result, TaskOutput::Raw("up 3 days\n".into()));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_reply_id_gets_empty_name() {
    // The session lists a device the caller's inventory does not know
    let session = office_session().with_device("Lab", Device::new("n9", "LAB1", "Windows 10"));
    let listed = session.inventory();
    let book = meshbook(Target::Group("Lab".into()), &[("Ping", "ping")]);
    let resolution = resolve_targets(&book, &listed, &categories());

    let log = executor()
        .execute(&session, &resolution, &book, &office_inventory())
        .await
        .unwrap()
        .into_log()
        .unwrap();

    let reply = &log.task("task_1").unwrap().data[0];
    assert_eq!(reply.device_id, "n9");
    assert_eq!(reply.device_name, "");
}

#[tokio::test(start_paused = true)]
async fn test_missing_replies_do_not_fail_the_task() {
    let session = office_session();
    session.set_silent("n3");
    let book = meshbook(Target::Group("Servers".into()), &[("Ping", "ping"), ("Pong", "pong")]);

    let log = run_book(&session, book).await.unwrap().into_log().unwrap();
    for (_, entry) in log.tasks() {
        let ids: Vec<_> = entry.data.iter().map(|r| r.device_id.as_str()).collect();
        assert_eq!(ids, vec!["n4"]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_aborts_the_run() {
    let session = office_session();
    session.fail_after(1);
    let book = meshbook(Target::AllGroups, &[("One", "echo 1"), ("Two", "echo 2")]);

    let err = run_book(&session, book).await.unwrap_err();
    assert!(matches!(err, Error::Session(SessionError::WebSocket(_))));
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_normalized_log_splits_lines() {
    let session = office_session();
    session.set_default_output("eth0 \"Wired connection 1\"\n\nlo loopback\nRun commands completed.");
    let book = meshbook(Target::Device("SRV1".into()), &[("Links", "nmcli")]);

    let log = run_book(&session, book).await.unwrap().into_log().unwrap();
    let lines = normalize(false, log.clone());
    assert_eq!(
        lines.task("task_1").unwrap().data[0].result,
        TaskOutput::Lines(vec!["eth0 \"Wired connection 1\"".into(), "lo loopback".into()])
    );

    let tokens = normalize(true, log);
    assert_eq!(
        tokens.task("task_1").unwrap().data[0].result,
        TaskOutput::Tokens(vec![
            vec!["eth0".into(), "Wired connection 1".into()],
            vec!["lo".into(), "loopback".into()],
        ])
    );
}

// ============================================================================
// Pacing and Cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_intertask_delay_is_applied_between_tasks() {
    let session = office_session();
    let book = meshbook(Target::Device("PC1".into()), &[("a", "a"), ("b", "b"), ("c", "c")]);
    let inventory = session.inventory();
    let config = ExecutorConfig::default().with_intertask_delay(Duration::from_secs(5));

    let start = tokio::time::Instant::now();
    Executor::new(config)
        .run_meshbook(&session, book, &inventory, &categories(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_closes_the_session() {
    let session = Arc::new(office_session());
    session.set_command_delay(Duration::from_secs(600));
    let book = meshbook(Target::AllGroups, &[("Slow", "sleep 600")]);
    let inventory = session.inventory();
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let err = executor()
        .run_meshbook(session.as_ref(), book, &inventory, &categories(), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_aborted());
    assert!(session.is_closed());
    assert_eq!(session.command_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_already_cancelled_token_sends_nothing() {
    let session = office_session();
    let book = meshbook(Target::AllGroups, &[("Ping", "ping")]);
    let inventory = session.inventory();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = executor()
        .run_meshbook(&session, book, &inventory, &categories(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Aborted));
    assert_eq!(session.command_count(), 0);
    assert!(session.list_devices(Duration::from_secs(1)).await.is_err());
}

// ============================================================================
// Callbacks
// ============================================================================

#[derive(Default)]
struct RecordingCallback {
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl ExecutionCallback for RecordingCallback {
    async fn on_run_start(&self, _name: Option<&str>, targets: usize) {
        self.events.lock().push(format!("start:{targets}"));
    }

    async fn on_task_start(&self, ordinal: usize, task: &Task) {
        self.events.lock().push(format!("task:{ordinal}:{}", task.name));
    }

    async fn on_task_complete(&self, ordinal: usize, entry: &TaskEntry) {
        self.events.lock().push(format!("done:{ordinal}:{}", entry.data.len()));
    }

    async fn on_run_end(&self, log: &meshbook::executor::RunLog) {
        self.events.lock().push(format!("end:{}", log.task_count()));
    }
}

#[tokio::test(start_paused = true)]
async fn test_callback_sees_every_event() {
    let session = office_session();
    let callback = Arc::new(RecordingCallback::default());
    let book = meshbook(Target::Group("Servers".into()), &[("A", "a"), ("B", "b")]);
    let inventory: Inventory = session.inventory();

    Executor::new(ExecutorConfig::default())
        .with_callback(callback.clone())
        .run_meshbook(&session, book, &inventory, &categories(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        *callback.events.lock(),
        vec!["start:2", "task:1:A", "done:1:2", "task:2:B", "done:2:2", "end:2"]
    );
}
