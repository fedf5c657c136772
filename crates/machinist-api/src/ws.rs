use std::io::{Read, Write};
use std::time::Duration;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::PeerUid;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecParams {
    pub name: String,
    pub command: String,
}

#[derive(Debug, Deserialize)]
pub struct ShellParams {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlMessage {
    Resize { cols: u16, rows: u16 },
}

/// `GET /stream/exec?name=X&command=<json-array>` (§4.9). Opens a pty,
/// spawns the given argv inside the container's shell, and streams it
/// bidirectionally over the socket.
pub async fn stream_exec(
    State(_state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<PeerUid>,
    Query(params): Query<ExecParams>,
    ws: WebSocketUpgrade,
) -> Response {
    // stream_exec is unconditionally privileged (§4.9).
    if !peer.is_root() {
        return (StatusCode::FORBIDDEN, "root privileges required").into_response();
    }
    let argv: Vec<String> = match serde_json::from_str(&params.command) {
        Ok(argv) => argv,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("invalid command array: {e}")).into_response()
        }
    };
    ws.on_upgrade(move |socket| run_pty_session(socket, params.name, Some(argv)))
}

/// `GET /stream/shell?name=X` (§4.9). Same session machinery as
/// [`stream_exec`] but drops into the container's interactive default shell.
pub async fn stream_shell(
    State(_state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<PeerUid>,
    Query(params): Query<ShellParams>,
    ws: WebSocketUpgrade,
) -> Response {
    // stream_shell is unconditionally privileged (§4.9).
    if !peer.is_root() {
        return (StatusCode::FORBIDDEN, "root privileges required").into_response();
    }
    ws.on_upgrade(move |socket| run_pty_session(socket, params.name, None))
}

/// One pty session per connection: no broadcast fan-out, no history buffer,
/// no named session registry — the narrower single-client contract of §4.9
/// rather than a multi-viewer terminal service.
async fn run_pty_session(socket: WebSocket, container_name: String, argv: Option<Vec<String>>) {
    let pty_system = native_pty_system();
    let pair = match pty_system.openpty(PtySize::default()) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(container = %container_name, error = %e, "failed to allocate pty");
            return;
        }
    };

    let mut cmd = CommandBuilder::new("machinectl");
    cmd.arg("shell");
    cmd.arg(&container_name);
    if let Some(argv) = argv {
        let joined = argv
            .iter()
            .map(|a| shell_escape::escape(std::borrow::Cow::from(a.as_str())).into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        cmd.arg("/bin/bash");
        cmd.arg("-c");
        cmd.arg(joined);
    }

    let mut child = match pair.slave.spawn_command(cmd) {
        Ok(child) => child,
        Err(e) => {
            warn!(container = %container_name, error = %e, "failed to spawn shell into container");
            return;
        }
    };
    // Drop our copy of the slave fd so EOF on the master side tracks the
    // child's own lifetime rather than this process holding it open too.
    drop(pair.slave);

    let mut reader = match pair.master.try_clone_reader() {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "failed to clone pty reader");
            let _ = child.kill();
            return;
        }
    };
    let mut writer = match pair.master.take_writer() {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "failed to take pty writer");
            let _ = child.kill();
            return;
        }
    };
    let master = pair.master;

    let cancel = CancellationToken::new();
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);

    let read_cancel = cancel.clone();
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if out_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "pty read error");
                    break;
                }
            }
        }
        read_cancel.cancel();
    });

    let wait_cancel = cancel.clone();
    let wait_handle = tokio::task::spawn_blocking(move || {
        loop {
            if wait_cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                break;
            }
            match child.try_wait() {
                Ok(None) => std::thread::sleep(Duration::from_millis(200)),
                Ok(Some(_)) => break,
                Err(_) => break,
            }
        }
        wait_cancel.cancel();
    });

    let (in_tx, mut in_rx) = mpsc::channel::<Vec<u8>>(256);
    tokio::task::spawn_blocking(move || {
        while let Some(bytes) = in_rx.blocking_recv() {
            if writer.write_all(&bytes).is_err() {
                break;
            }
        }
    });

    let (mut ws_tx, mut ws_rx) = socket.split();

    let output_cancel = cancel.clone();
    let output_task = tokio::spawn(async move {
        while let Some(bytes) = out_rx.recv().await {
            if ws_tx.send(Message::Binary(bytes.into())).await.is_err() {
                break;
            }
        }
        output_cancel.cancel();
    });

    let input_cancel = cancel.clone();
    let input_task = tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            let Ok(msg) = msg else { break };
            match msg {
                Message::Binary(bytes) => {
                    if in_tx.send(bytes.to_vec()).await.is_err() {
                        break;
                    }
                }
                Message::Text(text) => match serde_json::from_str::<ControlMessage>(&text) {
                    Ok(ControlMessage::Resize { cols, rows }) => {
                        if let Err(e) = master.resize(PtySize { cols, rows, pixel_width: 0, pixel_height: 0 }) {
                            debug!(error = %e, "pty resize failed");
                        }
                    }
                    Err(e) => debug!(error = %e, "ignoring malformed control message"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        input_cancel.cancel();
    });

    cancel.cancelled().await;
    output_task.abort();
    input_task.abort();
    let _ = wait_handle.await;
}
