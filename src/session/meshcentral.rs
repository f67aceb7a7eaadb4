//! MeshCentral control channel.
//!
//! Speaks the JSON action protocol of `control.ashx` over a WebSocket:
//!
//! - login with the `x-meshauth` header (base64 user, password and optional
//!   one-time code, generated from `totp_secret` when one is configured)
//! - `meshes` and `nodes` for the device listing
//! - `runcommands` with `reply: true`; every device answers with a
//!   `msg` / `runcommands` message carrying its output
//!
//! A background task reads the socket and forwards decoded messages to a
//! channel. Requests are issued one at a time and pick their replies off that
//! channel, skipping unrelated notifications.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::USER_AGENT;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use super::{CommandOptions, CommandResponse, RemoteDevice, Session, SessionError, SessionResult};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLIENT_AGENT: &str = concat!("meshbook/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// RFC 6238 parameters used by MeshCentral authenticator apps
const TOTP_DIGITS: usize = 6;
const TOTP_STEP_SECS: u64 = 30;

/// Shell type for `runcommands`
const SHELL_DEFAULT: u8 = 0;
const SHELL_POWERSHELL: u8 = 2;

/// Account used to open the control channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// Server host name, or a full `ws://` / `wss://` URL
    pub hostname: String,
    /// Account name
    pub username: String,
    /// Account password
    pub password: String,
    /// Pre-generated one-time login token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Base32 TOTP secret; a fresh code is derived from it on every login
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totp_secret: Option<String>,
}

/// Build the control channel URL from a host name or URL
pub fn control_url(hostname: &str) -> SessionResult<Url> {
    let raw = if hostname.starts_with("ws://") || hostname.starts_with("wss://") {
        hostname.to_string()
    } else {
        format!("wss://{}/control.ashx", hostname.trim_end_matches('/'))
    };
    Url::parse(&raw).map_err(|_| SessionError::InvalidAddress(hostname.to_string()))
}

/// Second factor to send at `unix_time`.
///
/// A configured `totp_secret` wins over a static `token`.
pub fn login_token(credentials: &Credentials, unix_time: u64) -> SessionResult<Option<String>> {
    match credentials.totp_secret.as_deref().map(str::trim) {
        Some(secret) if !secret.is_empty() => totp_code(secret, unix_time).map(Some),
        _ => Ok(credentials
            .token
            .clone()
            .filter(|token| !token.is_empty())),
    }
}

/// Current TOTP code for a base32 secret
pub fn totp_code(secret: &str, unix_time: u64) -> SessionResult<String> {
    // Authenticator apps print secrets in lowercase groups with padding.
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let bytes = Secret::Encoded(normalized)
        .to_bytes()
        .map_err(|_| SessionError::InvalidTotpSecret)?;

    let totp = TOTP::new_unchecked(Algorithm::SHA1, TOTP_DIGITS, 1, TOTP_STEP_SECS, bytes);
    Ok(totp.generate(unix_time))
}

/// Build the `x-meshauth` header value
pub fn auth_header(credentials: &Credentials, token: Option<&str>) -> String {
    let mut parts = vec![
        STANDARD.encode(&credentials.username),
        STANDARD.encode(&credentials.password),
    ];
    if let Some(token) = token {
        parts.push(STANDARD.encode(token));
    }
    parts.join(",")
}

/// Combine the `meshes` and `nodes` replies into a flat device listing.
///
/// Nodes whose mesh is unknown are grouped under the raw mesh id.
pub fn parse_device_listing(meshes: &Value, nodes: &Value) -> SessionResult<Vec<RemoteDevice>> {
    let mesh_names: IndexMap<&str, &str> = meshes
        .as_array()
        .ok_or_else(|| SessionError::Protocol("'meshes' reply is not a list".to_string()))?
        .iter()
        .filter_map(|mesh| Some((mesh.get("_id")?.as_str()?, mesh.get("name")?.as_str()?)))
        .collect();

    let by_mesh = nodes
        .as_object()
        .ok_or_else(|| SessionError::Protocol("'nodes' reply is not an object".to_string()))?;

    let mut devices = Vec::new();
    for (mesh_id, mesh_nodes) in by_mesh {
        let group = mesh_names.get(mesh_id.as_str()).copied().unwrap_or(mesh_id.as_str());
        let Some(mesh_nodes) = mesh_nodes.as_array() else {
            warn!("Skipping malformed node list for mesh {}", mesh_id);
            continue;
        };

        for node in mesh_nodes {
            let Some(id) = node.get("_id").and_then(Value::as_str) else {
                warn!("Skipping node without id in mesh {}", mesh_id);
                continue;
            };
            devices.push(RemoteDevice {
                id: id.to_string(),
                name: str_field(node, "name"),
                group: group.to_string(),
                os_description: str_field(node, "osdesc"),
                tags: node
                    .get("tags")
                    .and_then(Value::as_array)
                    .map(|tags| {
                        tags.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                connected: node.get("conn").and_then(Value::as_u64).unwrap_or(0) & 1 == 1,
            });
        }
    }

    Ok(devices)
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Session over the MeshCentral WebSocket control channel
pub struct MeshCentralSession {
    sink: Mutex<SplitSink<Socket, Message>>,
    inbox: Mutex<mpsc::UnboundedReceiver<Value>>,
    reader: JoinHandle<()>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for MeshCentralSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshCentralSession")
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl Drop for MeshCentralSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl MeshCentralSession {
    /// Open and authenticate a control channel
    #[instrument(skip(credentials), fields(host = %credentials.hostname))]
    pub async fn connect(credentials: &Credentials) -> SessionResult<Self> {
        let url = control_url(&credentials.hostname)?;
        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        let token = login_token(credentials, now)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;

        let headers = request.headers_mut();
        headers.insert(
            "x-meshauth",
            HeaderValue::from_str(&auth_header(credentials, token.as_deref()))
                .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?,
        );
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_AGENT));

        debug!("Opening control channel to {}", url);
        let connecting = tokio_tungstenite::connect_async(request);
        let (socket, _) = tokio::time::timeout(CONNECT_TIMEOUT, connecting)
            .await
            .map_err(|_| SessionError::Timeout {
                action: "connect".to_string(),
                timeout: CONNECT_TIMEOUT,
            })?
            .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;

        let (sink, stream) = socket.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(stream, tx));

        let session = Self {
            sink: Mutex::new(sink),
            inbox: Mutex::new(rx),
            reader,
            next_id: AtomicU64::new(1),
        };
        session.await_login().await?;
        info!("Session established");
        Ok(session)
    }

    async fn await_login(&self) -> SessionResult<()> {
        tokio::time::timeout(LOGIN_TIMEOUT, self.login_handshake())
            .await
            .map_err(|_| SessionError::Timeout {
                action: "login".to_string(),
                timeout: LOGIN_TIMEOUT,
            })?
    }

    async fn login_handshake(&self) -> SessionResult<()> {
        loop {
            let message = self.recv().await?;
            match action_of(&message) {
                Some("userinfo") => return Ok(()),
                Some("close") => {
                    let cause = message
                        .get("cause")
                        .or_else(|| message.get("msg"))
                        .and_then(Value::as_str)
                        .unwrap_or("login rejected");
                    return Err(SessionError::AuthenticationFailed(cause.to_string()));
                }
                other => trace!("Ignoring {:?} while waiting for login", other),
            }
        }
    }

    fn response_id(&self) -> String {
        format!("meshbook-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn send(&self, message: Value) -> SessionResult<()> {
        trace!("-> {}", message);
        self.sink
            .lock()
            .await
            .send(Message::Text(message.to_string()))
            .await
            .map_err(|e| SessionError::WebSocket(e.to_string()))
    }

    async fn recv(&self) -> SessionResult<Value> {
        self.inbox
            .lock()
            .await
            .recv()
            .await
            .ok_or(SessionError::ConnectionClosed)
    }

    async fn collect_listing(&self, meshes_id: &str, nodes_id: &str) -> SessionResult<Vec<RemoteDevice>> {
        let mut meshes = None;
        let mut nodes = None;

        while meshes.is_none() || nodes.is_none() {
            let message = self.recv().await?;
            let matches = |id: &str| message.get("responseid").and_then(Value::as_str) == Some(id);
            match action_of(&message) {
                Some("meshes") if matches(meshes_id) => {
                    meshes = Some(message.get("meshes").cloned().unwrap_or_default());
                }
                Some("nodes") if matches(nodes_id) => {
                    nodes = Some(message.get("nodes").cloned().unwrap_or_default());
                }
                Some("close") => return Err(SessionError::ConnectionClosed),
                other => trace!("Ignoring {:?} while listing devices", other),
            }
        }

        parse_device_listing(&meshes.unwrap_or_default(), &nodes.unwrap_or_default())
    }

    async fn collect_replies(
        &self,
        response_id: &str,
        device_ids: &[String],
        timeout: Duration,
    ) -> SessionResult<IndexMap<String, CommandResponse>> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut pending: HashSet<&str> = device_ids.iter().map(String::as_str).collect();
        let mut replies: IndexMap<String, CommandResponse> = IndexMap::new();

        while !pending.is_empty() {
            let Ok(message) = tokio::time::timeout_at(deadline, self.recv()).await else {
                warn!(
                    missing = pending.len(),
                    "No reply from every device after {} seconds",
                    timeout.as_secs()
                );
                break;
            };
            let message = message?;
            match (action_of(&message), message.get("type").and_then(Value::as_str)) {
                (Some("msg"), Some("runcommands")) => {
                    if message.get("responseid").and_then(Value::as_str) != Some(response_id) {
                        debug!(
                            node = ?message.get("nodeid"),
                            "Skipping reply to an earlier command"
                        );
                        continue;
                    }
                    let Some(node_id) = message.get("nodeid").and_then(Value::as_str) else {
                        warn!("Command reply without node id");
                        continue;
                    };
                    if !pending.remove(node_id) {
                        debug!("Unexpected command reply from {}", node_id);
                        continue;
                    }
                    let mut response: CommandResponse = serde_json::from_value(message.clone())
                        .map_err(|e| SessionError::Protocol(e.to_string()))?;
                    response.extra.retain(|key, _| {
                        !matches!(key.as_str(), "action" | "type" | "nodeid" | "responseid")
                    });
                    replies.insert(node_id.to_string(), response);
                }
                (Some("runcommands"), _)
                    if message.get("responseid").and_then(Value::as_str) == Some(response_id) =>
                {
                    match message.get("result").and_then(Value::as_str) {
                        Some("ok") | None => trace!("Command accepted"),
                        Some(other) => return Err(SessionError::CommandRejected(other.to_string())),
                    }
                }
                (Some("close"), _) => return Err(SessionError::ConnectionClosed),
                (other, _) => trace!("Ignoring {:?} while waiting for command replies", other),
            }
        }

        // Keep the order in which devices were addressed.
        let mut ordered = IndexMap::with_capacity(replies.len());
        for id in device_ids {
            if let Some(response) = replies.swap_remove(id) {
                ordered.insert(id.clone(), response);
            }
        }
        Ok(ordered)
    }
}

#[async_trait]
impl Session for MeshCentralSession {
    async fn list_devices(&self, timeout: Duration) -> SessionResult<Vec<RemoteDevice>> {
        let meshes_id = self.response_id();
        let nodes_id = self.response_id();
        self.send(json!({ "action": "meshes", "responseid": meshes_id }))
            .await?;
        self.send(json!({ "action": "nodes", "responseid": nodes_id }))
            .await?;

        let devices = tokio::time::timeout(timeout, self.collect_listing(&meshes_id, &nodes_id))
            .await
            .map_err(|_| SessionError::Timeout {
                action: "nodes".to_string(),
                timeout,
            })??;
        debug!("Server listed {} devices", devices.len());
        Ok(devices)
    }

    async fn run_command(
        &self,
        device_ids: &[String],
        command: &str,
        options: &CommandOptions,
    ) -> SessionResult<IndexMap<String, CommandResponse>> {
        if device_ids.is_empty() {
            return Ok(IndexMap::new());
        }

        let response_id = self.response_id();
        self.send(json!({
            "action": "runcommands",
            "nodeids": device_ids,
            "type": if options.powershell { SHELL_POWERSHELL } else { SHELL_DEFAULT },
            "cmds": command,
            "runAsUser": 0,
            "reply": true,
            "responseid": response_id,
        }))
        .await?;

        self.collect_replies(&response_id, device_ids, options.timeout)
            .await
    }

    async fn close(&self) -> SessionResult<()> {
        let result = self.sink.lock().await.close().await;
        self.reader.abort();
        result.map_err(|e| SessionError::WebSocket(e.to_string()))
    }
}

async fn read_loop(
    mut stream: futures::stream::SplitStream<Socket>,
    tx: mpsc::UnboundedSender<Value>,
) {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("Control channel read failed: {}", e);
                break;
            }
        };

        match serde_json::from_str::<Value>(&text) {
            Ok(message) => {
                trace!("<- {}", message);
                if tx.send(message).is_err() {
                    break;
                }
            }
            Err(e) => warn!("Dropping undecodable message: {}", e),
        }
    }
    debug!("Control channel reader finished");
}

fn action_of(message: &Value) -> Option<&str> {
    message.get("action").and_then(Value::as_str)
}
