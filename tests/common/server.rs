//! In-process MeshCentral control channel.
//!
//! Speaks just enough of the `control.ashx` protocol for the session and CLI
//! tests: login, the `meshes`/`nodes` listing and `runcommands` with per-node
//! replies. Every reply to the N-th command reads `OUTPUT OF TASK N`.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// How the server behaves
#[derive(Debug, Clone, Default)]
pub struct ServerScript {
    /// Answer the login with `close` instead of `userinfo`
    pub reject_login: bool,
    /// Accept TCP connections but never finish the WebSocket handshake
    pub stall_handshake: bool,
    /// Pause before the node replies of each command, by command order
    pub reply_delays: Vec<Duration>,
}

/// A running server bound to a random local port
pub struct FakeMeshServer {
    /// Control channel URL, usable as the configured host name
    pub url: String,
    auth_headers: Arc<Mutex<Vec<String>>>,
    commands: Arc<Mutex<Vec<Value>>>,
}

impl FakeMeshServer {
    /// Bind and start serving on the current runtime.
    pub async fn start(script: ServerScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/control.ashx", listener.local_addr().unwrap());
        let auth_headers = Arc::new(Mutex::new(Vec::new()));
        let commands = Arc::new(Mutex::new(Vec::new()));

        tokio::spawn(accept_loop(
            listener,
            script,
            auth_headers.clone(),
            commands.clone(),
        ));

        Self {
            url,
            auth_headers,
            commands,
        }
    }

    /// `x-meshauth` header of every completed handshake
    pub fn auth_headers(&self) -> Vec<String> {
        self.auth_headers.lock().clone()
    }

    /// Every `runcommands` request received
    pub fn commands(&self) -> Vec<Value> {
        self.commands.lock().clone()
    }
}

async fn accept_loop(
    listener: TcpListener,
    script: ServerScript,
    auth_headers: Arc<Mutex<Vec<String>>>,
    commands: Arc<Mutex<Vec<Value>>>,
) {
    while let Ok((stream, _)) = listener.accept().await {
        let script = script.clone();
        let auth_headers = auth_headers.clone();
        let commands = commands.clone();
        tokio::spawn(async move {
            if script.stall_handshake {
                let _held = stream;
                std::future::pending::<()>().await;
            } else {
                serve(stream, script, auth_headers, commands).await;
            }
        });
    }
}

async fn serve(
    stream: TcpStream,
    script: ServerScript,
    auth_headers: Arc<Mutex<Vec<String>>>,
    commands: Arc<Mutex<Vec<Value>>>,
) {
    let record = auth_headers.clone();
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let header = request
            .headers()
            .get("x-meshauth")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        record.lock().push(header);
        Ok(response)
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };

    if script.reject_login {
        let _ = send(&mut ws, json!({ "action": "close", "cause": "noauth" })).await;
        while ws.next().await.is_some() {}
        return;
    }
    if send(&mut ws, json!({ "action": "userinfo", "userinfo": { "name": "admin" } }))
        .await
        .is_err()
    {
        return;
    }

    let mut command_count = 0;
    while let Some(Ok(frame)) = ws.next().await {
        let Message::Text(text) = frame else {
            continue;
        };
        let Ok(request) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let id = request["responseid"].clone();

        let sent = match request["action"].as_str() {
            Some("meshes") => {
                send(
                    &mut ws,
                    json!({
                        "action": "meshes",
                        "responseid": id,
                        "meshes": [{ "_id": "mesh//sales", "name": "Sales" }]
                    }),
                )
                .await
            }
            Some("nodes") => {
                send(
                    &mut ws,
                    json!({
                        "action": "nodes",
                        "responseid": id,
                        "nodes": { "mesh//sales": [
                            { "_id": "n1", "name": "PC1", "osdesc": "Windows 10", "tags": ["prod"], "conn": 1 },
                            { "_id": "n2", "name": "PC2", "osdesc": "Windows 11", "conn": 0 }
                        ]}
                    }),
                )
                .await
            }
            Some("runcommands") => {
                commands.lock().push(request.clone());
                command_count += 1;
                answer_command(&mut ws, &script, &request, command_count).await
            }
            _ => Ok(()),
        };
        if sent.is_err() {
            return;
        }
    }
}

async fn answer_command(
    ws: &mut WebSocketStream<TcpStream>,
    script: &ServerScript,
    request: &Value,
    ordinal: usize,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let id = request["responseid"].clone();
    send(ws, json!({ "action": "runcommands", "responseid": id, "result": "ok" })).await?;
    // Unrelated traffic the client has to skip
    send(ws, json!({ "action": "event", "event": { "action": "heartbeat" } })).await?;

    let delay = script
        .reply_delays
        .get(ordinal - 1)
        .copied()
        .unwrap_or_default();
    tokio::time::sleep(delay).await;

    let node_ids = request["nodeids"].as_array().cloned().unwrap_or_default();
    for node_id in node_ids {
        send(
            ws,
            json!({
                "action": "msg",
                "type": "runcommands",
                "nodeid": node_id,
                "responseid": id,
                "result": format!("OUTPUT OF TASK {ordinal}\nRun commands completed.")
            }),
        )
        .await?;
    }
    Ok(())
}

async fn send(
    ws: &mut WebSocketStream<TcpStream>,
    message: Value,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    ws.send(Message::Text(message.to_string())).await
}
