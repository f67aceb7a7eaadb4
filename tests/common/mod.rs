//! Shared test utilities and fixtures for the Meshbook test suite.
//!
//! This module provides:
//! - A scripted in-memory [`Session`] implementation
//! - A local MeshCentral control channel ([`server::FakeMeshServer`])
//! - Inventory, category and meshbook fixtures
//! - Temporary file helpers
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

pub mod server;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use tempfile::TempDir;

use meshbook::book::{Meshbook, Task};
use meshbook::categories::OsCategories;
use meshbook::inventory::{Device, Inventory};
use meshbook::session::{
    CommandOptions, CommandResponse, RemoteDevice, Session, SessionError, SessionResult,
};
use meshbook::targeting::Target;

// ============================================================================
// Mock Session Implementation
// ============================================================================

/// One recorded `run_command` call
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommand {
    pub device_ids: Vec<String>,
    pub command: String,
    pub powershell: bool,
}

/// A session that answers from scripted data and records every call.
pub struct MockSession {
    devices: RwLock<Vec<RemoteDevice>>,
    outputs: RwLock<HashMap<String, String>>,
    default_output: RwLock<String>,
    silent_devices: RwLock<Vec<String>>,
    commands: RwLock<Vec<RecordedCommand>>,
    command_delay: RwLock<Option<Duration>>,
    fail_after_n: AtomicU32,
    command_count: AtomicU32,
    closed: AtomicBool,
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSession {
    /// Create a new mock session with an empty listing.
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(Vec::new()),
            outputs: RwLock::new(HashMap::new()),
            default_output: RwLock::new("ok\nRun commands completed.".to_string()),
            silent_devices: RwLock::new(Vec::new()),
            commands: RwLock::new(Vec::new()),
            command_delay: RwLock::new(None),
            fail_after_n: AtomicU32::new(u32::MAX),
            command_count: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Add a device to the listing.
    pub fn with_device(self, group: &str, device: Device) -> Self {
        self.devices.write().push(RemoteDevice {
            id: device.id,
            name: device.name,
            group: group.to_string(),
            os_description: device.os_description,
            tags: device.tags,
            connected: device.reachable,
        });
        self
    }

    /// Set the output returned for a specific command.
    pub fn set_output(&self, command: impl Into<String>, output: impl Into<String>) {
        self.outputs.write().insert(command.into(), output.into());
    }

    /// Set the output for commands not explicitly configured.
    pub fn set_default_output(&self, output: impl Into<String>) {
        *self.default_output.write() = output.into();
    }

    /// Make a device never answer.
    pub fn set_silent(&self, device_id: impl Into<String>) {
        self.silent_devices.write().push(device_id.into());
    }

    /// Delay every command by `delay`.
    pub fn set_command_delay(&self, delay: Duration) {
        *self.command_delay.write() = Some(delay);
    }

    /// Fail with a transport error after N successful commands.
    pub fn fail_after(&self, n: u32) {
        self.fail_after_n.store(n, Ordering::SeqCst);
    }

    /// Number of `run_command` calls.
    pub fn command_count(&self) -> u32 {
        self.command_count.load(Ordering::SeqCst)
    }

    /// Every recorded `run_command` call.
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.commands.read().clone()
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The inventory this session's listing produces.
    pub fn inventory(&self) -> Inventory {
        Inventory::from_remote(self.devices.read().clone())
    }
}

#[async_trait]
impl Session for MockSession {
    async fn list_devices(&self, _timeout: Duration) -> SessionResult<Vec<RemoteDevice>> {
        if self.is_closed() {
            return Err(SessionError::ConnectionClosed);
        }
        Ok(self.devices.read().clone())
    }

    async fn run_command(
        &self,
        device_ids: &[String],
        command: &str,
        options: &CommandOptions,
    ) -> SessionResult<IndexMap<String, CommandResponse>> {
        if self.is_closed() {
            return Err(SessionError::ConnectionClosed);
        }

        let count = self.command_count.fetch_add(1, Ordering::SeqCst);
        if count >= self.fail_after_n.load(Ordering::SeqCst) {
            return Err(SessionError::WebSocket("connection reset".to_string()));
        }

        self.commands.write().push(RecordedCommand {
            device_ids: device_ids.to_vec(),
            command: command.to_string(),
            powershell: options.powershell,
        });

        let delay = *self.command_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let output = self
            .outputs
            .read()
            .get(command)
            .cloned()
            .unwrap_or_else(|| self.default_output.read().clone());
        let silent = self.silent_devices.read().clone();

        Ok(device_ids
            .iter()
            .filter(|id| !silent.contains(id))
            .map(|id| (id.clone(), CommandResponse::new(output.clone())))
            .collect())
    }

    async fn close(&self) -> SessionResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Category document used across the suite
pub const CATEGORIES_JSON: &str = r#"{
    "Windows": ["Windows 10", "Windows 11"],
    "Linux": {
        "Debian": ["Debian GNU/Linux 12 (bookworm)", "Debian GNU/Linux 11 (bullseye)"],
        "Ubuntu": ["Ubuntu 22.04.4 LTS", "Ubuntu 24.04 LTS"]
    }
}"#;

/// Parsed [`CATEGORIES_JSON`]
pub fn categories() -> OsCategories {
    OsCategories::from_json_str(CATEGORIES_JSON).unwrap()
}

/// An inventory with two groups and a mix of systems and states
pub fn office_inventory() -> Inventory {
    Inventory::new()
        .with_device(
            "Sales",
            Device::new("n1", "PC1", "Windows 10").with_tags(["prod"]),
        )
        .with_device(
            "Sales",
            Device::new("n2", "PC2", "Windows 11")
                .with_tags(["prod", "critical"])
                .with_reachable(false),
        )
        .with_device("Servers", Device::new("n3", "SRV1", "Debian GNU/Linux 12 (bookworm)"))
        .with_device(
            "Servers",
            Device::new("n4", "SRV2", "Ubuntu 22.04.4 LTS").with_tags(["critical"]),
        )
}

/// A mock session listing the same devices as [`office_inventory`]
pub fn office_session() -> MockSession {
    let mut session = MockSession::new();
    for (group, devices) in office_inventory().groups() {
        for device in devices {
            session = session.with_device(group, device.clone());
        }
    }
    session
}

/// A meshbook targeting `target` with the given tasks
pub fn meshbook(target: Target, tasks: &[(&str, &str)]) -> Meshbook {
    tasks
        .iter()
        .fold(Meshbook::default().with_target(target), |book, (name, command)| {
            book.with_task(Task::new(*name, *command))
        })
}

// ============================================================================
// Temporary Files
// ============================================================================

/// A temporary directory holding input files
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    /// Create an empty workspace.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    /// Write a file and return its path.
    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}
