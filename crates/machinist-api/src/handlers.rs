use axum::extract::connect_info::ConnectInfo;
use axum::extract::State;
use axum::Json;
use machinist_domain::{ContainerName, ImageName};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::auth::{is_privileged, PeerUid};
use crate::error::{ApiError, CommandResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub args: Value,
}

pub async fn health() -> &'static str {
    "ok"
}

/// `POST /command` (§4.9, §6): the single REST entry point. Always returns
/// HTTP 200 with a `{success, data?, error?}` envelope — malformed JSON
/// bodies never reach this handler, axum's `Json` extractor rejects those
/// with its own 4xx before the body is parsed.
pub async fn post_command(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<PeerUid>,
    Json(body): Json<CommandRequest>,
) -> Json<CommandResponse> {
    debug!(command = %body.command, "dispatching command");

    if is_privileged(&body.command) && !peer.is_root() {
        warn!(command = %body.command, "denied privileged command for non-root peer");
        return Json(ApiError::PermissionDenied.into());
    }

    match dispatch(&state, &body.command, &body.args).await {
        Ok(data) => Json(CommandResponse::ok(data)),
        Err(e) => {
            warn!(command = %body.command, error = %e, "command failed");
            Json(e.into())
        }
    }
}

async fn dispatch(state: &AppState, command: &str, args: &Value) -> Result<Value, ApiError> {
    match command {
        "status" => handle_status(state, args).await,
        "list" => handle_list(state, args).await,
        "spawn" => handle_spawn(state, args).await,
        "stop" => handle_lifecycle(state, args, Lifecycle::Stop).await,
        "start" => handle_lifecycle(state, args, Lifecycle::Start).await,
        "restart" => handle_lifecycle(state, args, Lifecycle::Restart).await,
        "remove" => handle_lifecycle(state, args, Lifecycle::Remove).await,
        "exec" => handle_exec(state, args).await,
        "reconcile" => handle_reconcile(state).await,
        "reload" => handle_reload(state).await,
        "image_pull" => handle_image_pull(state, args).await,
        "validate" => handle_validate(state).await,
        other => Err(ApiError::UnknownCommand(other.to_string())),
    }
}

fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, ApiError> {
    args.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadArgument(field.to_string()))
}

async fn handle_status(state: &AppState, args: &Value) -> Result<Value, ApiError> {
    if let Some(name) = args.get("name").and_then(Value::as_str) {
        let status = state
            .reconciler
            .get_container_status(&ContainerName::new(name))
            .await?;
        let mut containers = serde_json::Map::new();
        containers.insert(name.to_string(), serde_json::to_value(status).unwrap());
        return Ok(json!({ "containers": containers }));
    }

    let statuses = state.reconciler.get_all_container_statuses().await;
    let containers: serde_json::Map<String, Value> = statuses
        .into_iter()
        .map(|(name, status)| (name.as_str().to_string(), serde_json::to_value(status).unwrap()))
        .collect();
    Ok(json!({
        "agent": { "running": true, "last_reconciliation": state.reconciler.last_pass_at().await },
        "containers": containers,
    }))
}

async fn handle_list(state: &AppState, args: &Value) -> Result<Value, ApiError> {
    let resource_type = args.get("type").and_then(Value::as_str).unwrap_or("all");
    let mut result = serde_json::Map::new();

    if matches!(resource_type, "all" | "images") {
        let images = state.store.list_images().await;
        let map: serde_json::Map<String, Value> = images
            .into_iter()
            .map(|image| (image.name.as_str().to_string(), serde_json::to_value(image).unwrap()))
            .collect();
        result.insert("images".to_string(), Value::Object(map));
    }

    if matches!(resource_type, "all" | "containers") {
        let statuses = state.reconciler.get_all_container_statuses().await;
        let map: serde_json::Map<String, Value> = statuses
            .into_iter()
            .map(|(name, status)| (name.as_str().to_string(), serde_json::to_value(status).unwrap()))
            .collect();
        result.insert("containers".to_string(), Value::Object(map));
    }

    if matches!(resource_type, "all" | "profiles") {
        let profiles = state.store.list_profiles().await;
        let map: serde_json::Map<String, Value> = profiles
            .into_iter()
            .map(|profile| {
                (
                    profile.name.as_str().to_string(),
                    json!({ "name": profile.name.as_str(), "usable": profile.is_usable() }),
                )
            })
            .collect();
        result.insert("profiles".to_string(), Value::Object(map));
    }

    Ok(Value::Object(result))
}

async fn handle_spawn(state: &AppState, args: &Value) -> Result<Value, ApiError> {
    let all = args.get("all").and_then(Value::as_bool).unwrap_or(false);

    if all {
        let mut results = serde_json::Map::new();
        for container in state.store.list_containers().await {
            let name = container.name.clone();
            let outcome = async {
                state.reconciler.create_container(&name).await?;
                state.reconciler.start_container(&name).await?;
                Ok::<(), machinist_reconciler::ReconcileError>(())
            }
            .await;
            let entry = match outcome {
                Ok(()) => json!({ "success": true }),
                Err(e) => json!({ "success": false, "error": e.to_string() }),
            };
            results.insert(name.as_str().to_string(), entry);
        }
        return Ok(json!({ "results": results }));
    }

    let name = ContainerName::new(required_str(args, "name")?);
    state.reconciler.create_container(&name).await?;
    state.reconciler.start_container(&name).await?;
    Ok(json!({ "container": name.as_str(), "created": true }))
}

enum Lifecycle {
    Stop,
    Start,
    Restart,
    Remove,
}

async fn handle_lifecycle(state: &AppState, args: &Value, op: Lifecycle) -> Result<Value, ApiError> {
    let name = ContainerName::new(required_str(args, "name")?);
    let verb = match op {
        Lifecycle::Stop => {
            state.reconciler.stop_container(&name).await?;
            "stopped"
        }
        Lifecycle::Start => {
            state.reconciler.start_container(&name).await?;
            "started"
        }
        Lifecycle::Restart => {
            state.reconciler.restart_container(&name).await?;
            "restarted"
        }
        Lifecycle::Remove => {
            state.reconciler.remove_container(&name).await?;
            "removed"
        }
    };
    let mut result = serde_json::Map::new();
    result.insert("container".to_string(), json!(name.as_str()));
    result.insert(verb.to_string(), json!(true));
    Ok(Value::Object(result))
}

async fn handle_exec(state: &AppState, args: &Value) -> Result<Value, ApiError> {
    let name = ContainerName::new(required_str(args, "name")?);
    let argv: Vec<String> = args
        .get("command")
        .and_then(Value::as_array)
        .ok_or_else(|| ApiError::BadArgument("command".to_string()))?
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    if argv.is_empty() {
        return Err(ApiError::BadArgument("command".to_string()));
    }

    let output = state.reconciler.execute_in_container(&name, &argv).await?;
    Ok(json!({ "exit": output.exit, "stdout": output.stdout, "stderr": output.stderr }))
}

async fn handle_reconcile(state: &AppState) -> Result<Value, ApiError> {
    state.reconciler.reconcile().await?;
    Ok(json!({ "reconciled": true }))
}

async fn handle_reload(state: &AppState) -> Result<Value, ApiError> {
    state.store.load().await?;
    Ok(json!({ "reloaded": true }))
}

async fn handle_image_pull(state: &AppState, args: &Value) -> Result<Value, ApiError> {
    let name = required_str(args, "name")?;
    let image = state
        .store
        .get_image(&ImageName::new(name))
        .await
        .ok_or_else(|| ApiError::BadArgument(format!("image '{name}' not declared")))?;
    state.reconciler.pull_image(&image).await?;
    Ok(json!({ "image": name, "pulled": true }))
}

async fn handle_validate(state: &AppState) -> Result<Value, ApiError> {
    match state.store.load().await {
        Ok(()) => {
            let images = state.store.list_images().await.len();
            let containers = state.store.list_containers().await.len();
            Ok(json!({ "valid": true, "images": images, "containers": containers }))
        }
        Err(e) => Ok(json!({ "valid": false, "error": e.to_string() })),
    }
}
