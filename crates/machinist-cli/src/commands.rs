use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use machinist_api::build_app;
use machinist_api::serve::{serve_tcp, serve_unix};
use machinist_driver::SystemdHostDriver;
use machinist_providers::ProviderRegistry;
use machinist_reconciler::Reconciler;
use machinist_store::SpecStore;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::output;

/// Where the client sends commands (§6): either the local control socket or
/// an `http(s)://` base URL for the optional TCP listener.
#[derive(Debug, Clone)]
pub enum Target {
    Unix(PathBuf),
    Http(String),
}

/// Resolves `--server`/`MACHINIST_SERVER` into a [`Target`], defaulting to
/// the agent's default control socket when unset.
pub fn resolve_target(server: Option<String>) -> Target {
    match server {
        Some(s) if s.starts_with("unix://") => Target::Unix(PathBuf::from(s.trim_start_matches("unix://"))),
        Some(s) if s.starts_with("http://") || s.starts_with("https://") => Target::Http(s.trim_end_matches('/').to_string()),
        Some(s) => Target::Unix(PathBuf::from(s)),
        None => Target::Unix(PathBuf::from("./state/machinist-agent.sock")),
    }
}

/// Boots the agent in this process: loads config, wires the reconciler and
/// control server, and runs the periodic reconciliation and config-watch
/// loops until a shutdown signal arrives.
pub async fn agent_run(config_path: PathBuf) -> Result<()> {
    let config = machinist_config::load_agent_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    info!(
        state_dir = %config.state_dir.display(),
        desired_state_dir = %config.desired_state_dir.display(),
        log_level = %config.log_level,
        "agent starting"
    );

    tokio::fs::create_dir_all(&config.state_dir)
        .await
        .with_context(|| format!("failed to create state dir {}", config.state_dir.display()))?;

    let store = Arc::new(SpecStore::new(config.desired_state_dir.clone()));
    store
        .load()
        .await
        .with_context(|| format!("failed to load desired state from {}", config.desired_state_dir.display()))?;

    let driver = Arc::new(SystemdHostDriver::connect().await);
    let registry = Arc::new(ProviderRegistry::build(driver, &config.host_paths, &config.proxy));
    let reconciler = Arc::new(Reconciler::new(store.clone(), registry));

    let app = build_app(store.clone(), reconciler.clone());
    let shutdown = CancellationToken::new();

    let socket_path = if config.socket_path.is_absolute() {
        config.socket_path.clone()
    } else {
        config.state_dir.join(&config.socket_path)
    };

    let mut server_tasks = Vec::new();
    {
        let app = app.clone();
        let shutdown = shutdown.clone();
        let socket_path = socket_path.clone();
        server_tasks.push(tokio::spawn(async move {
            if let Err(e) = serve_unix(&socket_path, app, shutdown).await {
                error!(error = %e, "control socket server exited with error");
            }
        }));
    }
    if let Some(bind) = config.tcp_bind.clone() {
        let app = app.clone();
        let shutdown = shutdown.clone();
        server_tasks.push(tokio::spawn(async move {
            if let Err(e) = serve_tcp(&bind, app, shutdown).await {
                error!(error = %e, "tcp control server exited with error");
            }
        }));
    }

    let reconcile_task = {
        let reconciler = reconciler.clone();
        let shutdown = shutdown.clone();
        let interval = Duration::from_secs(config.reconciliation_interval_secs);
        tokio::spawn(async move { periodic_reconcile_loop(reconciler, interval, shutdown).await })
    };

    let watch_task = {
        let store = store.clone();
        let reconciler = reconciler.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { config_watch_loop(store, reconciler, shutdown).await })
    };

    wait_for_shutdown_signal().await;
    info!("shutdown requested, stopping agent");
    shutdown.cancel();

    let _ = reconcile_task.await;
    let _ = watch_task.await;
    for task in server_tasks {
        let _ = task.await;
    }

    Ok(())
}

/// Reconciles on a fixed cadence, waiting `min(interval, shutdown)` each
/// cycle the way the original agent's scheduler loop does.
async fn periodic_reconcile_loop(reconciler: Arc<Reconciler>, interval: Duration, shutdown: CancellationToken) {
    loop {
        if let Err(e) = reconciler.reconcile().await {
            warn!(error = %e, "reconciliation cycle failed");
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => break,
        }
    }
}

/// Polls the desired-state directory's change digest instead of a
/// filesystem-notify crate, reloading and scheduling an out-of-cycle
/// reconcile whenever it moves.
async fn config_watch_loop(store: Arc<SpecStore>, reconciler: Arc<Reconciler>, shutdown: CancellationToken) {
    const POLL_INTERVAL: Duration = Duration::from_secs(5);
    let mut last = store.change_token().ok();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = shutdown.cancelled() => break,
        }
        let current = match store.change_token() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "failed to compute desired-state change token");
                continue;
            }
        };
        if last.as_deref() != Some(current.as_str()) {
            info!("desired-state directory changed, reloading");
            match store.load().await {
                Ok(()) => {
                    last = Some(current);
                    let reconciler = reconciler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = reconciler.reconcile().await {
                            warn!(error = %e, "out-of-cycle reconciliation failed");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "failed to reload desired state, keeping prior generation"),
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Sends `{"command": command, "args": args}` to `/command` and returns the
/// parsed `{success, data?, error?}` envelope.
async fn dispatch_command(target: &Target, command: &str, args: Value) -> Result<Value> {
    let body = json!({ "command": command, "args": args });
    match target {
        Target::Unix(path) => unix_post_command(path, &body).await,
        Target::Http(base) => http_post_command(base, &body).await,
    }
}

async fn unix_post_command(path: &Path, body: &Value) -> Result<Value> {
    let mut stream = UnixStream::connect(path)
        .await
        .with_context(|| format!("failed to connect to {}", path.display()))?;
    let payload = body.to_string();
    let request = format!(
        "POST /command HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        payload.len(),
        payload
    );
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;
    let text = String::from_utf8_lossy(&raw);
    let body_start = text
        .find("\r\n\r\n")
        .map(|i| i + 4)
        .ok_or_else(|| anyhow::anyhow!("malformed HTTP response from control socket"))?;
    serde_json::from_str(&text[body_start..]).context("failed to parse control socket response")
}

async fn http_post_command(base: &str, body: &Value) -> Result<Value> {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/command"))
        .json(body)
        .send()
        .await
        .with_context(|| format!("request to {base} failed"))?;
    resp.json().await.context("failed to parse control server response")
}

fn unwrap_envelope(envelope: Value) -> Result<Value> {
    if envelope.get("success").and_then(Value::as_bool) == Some(true) {
        Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
    } else {
        let message = envelope
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("command failed")
            .to_string();
        bail!(message)
    }
}

pub async fn status(target: &Target) -> Result<()> {
    let envelope = dispatch_command(target, "status", json!({})).await?;
    output::print_status(&unwrap_envelope(envelope)?);
    Ok(())
}

pub async fn reload(target: &Target) -> Result<()> {
    let envelope = dispatch_command(target, "reload", json!({})).await?;
    unwrap_envelope(envelope)?;
    println!("desired state reloaded");
    Ok(())
}

pub async fn validate(target: &Target) -> Result<()> {
    let envelope = dispatch_command(target, "validate", json!({})).await?;
    output::print_validate(&unwrap_envelope(envelope)?);
    Ok(())
}

pub async fn list(target: &Target) -> Result<()> {
    let envelope = dispatch_command(target, "list", json!({})).await?;
    output::print_list(&unwrap_envelope(envelope)?);
    Ok(())
}

pub async fn list_typed(target: &Target, kind: &str) -> Result<()> {
    let envelope = dispatch_command(target, "list", json!({ "type": kind })).await?;
    output::print_list(&unwrap_envelope(envelope)?);
    Ok(())
}

pub async fn spawn(target: &Target, name: Option<String>, all: bool) -> Result<()> {
    if !all && name.is_none() {
        bail!("either a container name or --all is required");
    }
    let args = if all {
        json!({ "all": true })
    } else {
        json!({ "name": name })
    };
    let envelope = dispatch_command(target, "spawn", args).await?;
    let data = unwrap_envelope(envelope)?;
    output::print_spawn(&data);
    Ok(())
}

pub async fn lifecycle(target: &Target, verb: &str, name: &str) -> Result<()> {
    let envelope = dispatch_command(target, verb, json!({ "name": name })).await?;
    unwrap_envelope(envelope)?;
    println!("{name}: {verb} ok");
    Ok(())
}

pub async fn remove(target: &Target, name: &str, force: bool) -> Result<()> {
    if !force {
        eprint!("remove container '{name}'? [y/N] ");
        use std::io::Write as _;
        std::io::stderr().flush().ok();
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            println!("aborted");
            return Ok(());
        }
    }
    let envelope = dispatch_command(target, "remove", json!({ "name": name })).await?;
    unwrap_envelope(envelope)?;
    println!("{name}: removed");
    Ok(())
}

pub async fn image_pull(target: &Target, name: &str) -> Result<()> {
    let envelope = dispatch_command(target, "image_pull", json!({ "name": name })).await?;
    unwrap_envelope(envelope)?;
    println!("{name}: pulled");
    Ok(())
}

/// Opens the interactive default shell inside a container over the
/// `/stream/shell` websocket.
pub async fn shell(target: &Target, name: &str) -> Result<()> {
    let url = stream_url(target, "shell", name, None)?;
    run_interactive_session(target, &url).await
}

/// Runs a command inside a container over the `/stream/exec` websocket
/// (§6: the CLI's `exec` opens the streaming endpoint, not the REST
/// non-interactive `exec` command that other control-plane clients use).
pub async fn exec(target: &Target, name: &str, argv: Vec<String>) -> Result<()> {
    let command = serde_json::to_string(&argv)?;
    let url = stream_url(target, "exec", name, Some(&command))?;
    run_interactive_session(target, &url).await
}

fn stream_url(target: &Target, kind: &str, name: &str, command: Option<&str>) -> Result<String> {
    let base = match target {
        Target::Unix(_) => "ws://localhost".to_string(),
        Target::Http(base) => {
            if let Some(rest) = base.strip_prefix("https://") {
                format!("wss://{rest}")
            } else if let Some(rest) = base.strip_prefix("http://") {
                format!("ws://{rest}")
            } else {
                bail!("unsupported server URL: {base}");
            }
        }
    };
    let mut url = format!("{base}/stream/{kind}?name={}", urlencode(name));
    if let Some(command) = command {
        url.push_str("&command=");
        url.push_str(&urlencode(command));
    }
    Ok(url)
}

fn urlencode(value: &str) -> String {
    let mut out = String::new();
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Pumps stdin to the websocket as binary frames and writes received binary
/// frames to stdout. No raw-mode terminal handling: a scoped simplification
/// of the full pty client, not a reimplementation of a terminal emulator.
async fn run_interactive_session(target: &Target, url: &str) -> Result<()> {
    match target {
        Target::Unix(path) => {
            let stream = UnixStream::connect(path)
                .await
                .with_context(|| format!("failed to connect to {}", path.display()))?;
            let (ws, _) = tokio_tungstenite::client_async(url, stream).await?;
            pump(ws).await
        }
        Target::Http(_) => {
            let (ws, _) = tokio_tungstenite::connect_async(url).await?;
            pump(ws).await
        }
    }
}

/// Generic over the underlying transport so the unix-socket and TCP dial
/// paths in [`run_interactive_session`] can each produce their own concrete
/// `WebSocketStream` type without needing to unify them.
async fn pump<S>(mut ws: tokio_tungstenite::WebSocketStream<S>) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    eprintln!("connected; press Ctrl-D to end the session");

    let (mut stdin_tx, mut stdin_rx) = tokio::sync::mpsc::channel::<Vec<u8>>(64);
    tokio::task::spawn_blocking(move || {
        use std::io::Read;
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stdin_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        tokio::select! {
            incoming = ws.next() => {
                match incoming {
                    Some(Ok(Message::Binary(bytes))) => {
                        use std::io::Write as _;
                        std::io::stdout().write_all(&bytes).ok();
                        std::io::stdout().flush().ok();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        eprintln!("session error: {e}");
                        break;
                    }
                }
            }
            outgoing = stdin_rx.recv() => {
                match outgoing {
                    Some(bytes) => {
                        if ws.send(Message::Binary(bytes)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = ws.close(None).await;
                        break;
                    }
                }
            }
        }
    }

    eprintln!("session closed");
    Ok(())
}

