//! Session layer for talking to the management server.
//!
//! The execution engine only depends on the [`Session`] trait: list the
//! devices visible to the account, run one command on a batch of devices, and
//! close. [`meshcentral::MeshCentralSession`] implements it over the
//! MeshCentral WebSocket control channel; tests use in-memory fakes.
//!
//! # Example
//!
//! ```rust,ignore
//! use meshbook::session::{CommandOptions, Session};
//! use meshbook::session::meshcentral::{Credentials, MeshCentralSession};
//!
//! let session = MeshCentralSession::connect(&credentials).await?;
//! let devices = session.list_devices(Duration::from_secs(10)).await?;
//! let replies = session
//!     .run_command(&ids, "uptime", &CommandOptions::default())
//!     .await?;
//! session.close().await?;
//! ```

pub mod meshcentral;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::inventory::Device;

/// Errors raised by the transport or protocol layer.
///
/// All of them are fatal to a run.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Failed to establish the connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The server rejected the credentials.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The configured TOTP secret is not valid base32.
    #[error("TOTP secret is not valid base32")]
    InvalidTotpSecret,

    /// The server address could not be turned into a control URL.
    #[error("Invalid server address '{0}'")]
    InvalidAddress(String),

    /// A request did not complete in time.
    #[error("Request '{action}' timed out after {} seconds", .timeout.as_secs())]
    Timeout {
        /// Protocol action that timed out
        action: String,
        /// Budget that was exceeded
        timeout: Duration,
    },

    /// The server refused a command request.
    #[error("Command rejected by server: {0}")]
    CommandRejected(String),

    /// A message could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error from the WebSocket layer.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// One device as listed by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDevice {
    /// Server-side node id
    pub id: String,
    /// Device name
    pub name: String,
    /// Name of the group the device belongs to
    pub group: String,
    /// OS description reported by the agent
    pub os_description: String,
    /// Device tags
    pub tags: Vec<String>,
    /// Whether the agent is currently connected
    pub connected: bool,
}

impl RemoteDevice {
    /// Convert into an inventory device, dropping the group name
    pub fn into_device(self) -> Device {
        Device {
            id: self.id,
            name: self.name,
            os_description: self.os_description,
            tags: self.tags,
            reachable: self.connected,
        }
    }
}

/// Options for a batched command
#[derive(Debug, Clone)]
pub struct CommandOptions {
    /// Use PowerShell instead of the default shell on Windows agents
    pub powershell: bool,
    /// How long to wait for every device to answer
    pub timeout: Duration,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            powershell: false,
            timeout: Duration::from_secs(1800),
        }
    }
}

impl CommandOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the PowerShell flag
    pub fn with_powershell(mut self, powershell: bool) -> Self {
        self.powershell = powershell;
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Reply of a single device to a batched command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Raw command output
    #[serde(default)]
    pub result: String,
    /// Any further fields the server attached
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CommandResponse {
    /// Create a response carrying only output text
    pub fn new(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// A persistent session with the management server.
///
/// Calls are issued strictly one at a time by the engine.
#[async_trait]
pub trait Session: Send + Sync {
    /// Fetch the current device listing.
    async fn list_devices(&self, timeout: Duration) -> SessionResult<Vec<RemoteDevice>>;

    /// Run `command` on every device in `device_ids` and wait for the replies.
    ///
    /// The returned map is keyed by device id. Devices that did not reply are
    /// absent.
    async fn run_command(
        &self,
        device_ids: &[String],
        command: &str,
        options: &CommandOptions,
    ) -> SessionResult<IndexMap<String, CommandResponse>>;

    /// Close the session.
    async fn close(&self) -> SessionResult<()>;
}

/// Await a session call unless `cancel` fires first.
///
/// The call is dropped on cancellation; the caller still owns any open
/// session and must close it.
pub async fn cancellable<T, F>(cancel: &CancellationToken, call: F) -> crate::Result<T>
where
    F: Future<Output = SessionResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(crate::Error::Aborted),
        result = call => Ok(result?),
    }
}
