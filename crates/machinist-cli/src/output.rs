use serde_json::Value;

/// Render a `status` command's data payload as human-readable text.
pub fn print_status(data: &Value) {
    if let Some(agent) = data.get("agent") {
        let running = agent.get("running").and_then(Value::as_bool).unwrap_or(false);
        let last = agent
            .get("last_reconciliation")
            .and_then(Value::as_str)
            .unwrap_or("never");
        println!("agent: running={running} last_reconciliation={last}");
    }
    print_containers(data.get("containers"));
}

fn print_containers(containers: Option<&Value>) {
    let Some(Value::Object(map)) = containers else { return };
    if map.is_empty() {
        println!("no containers declared");
        return;
    }
    for (name, status) in map {
        println!("{name}: {}", render_status(status));
    }
}

fn render_status(status: &Value) -> String {
    match status {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render a `list` command's data payload.
pub fn print_list(data: &Value) {
    if let Some(Value::Object(images)) = data.get("images") {
        println!("images:");
        for (name, image) in images {
            let tag = image.get("tag").and_then(Value::as_str).unwrap_or("?");
            println!("  {name}:{tag}");
        }
    }
    if let Some(Value::Object(containers)) = data.get("containers") {
        println!("containers:");
        for (name, status) in containers {
            println!("  {name}: {}", render_status(status));
        }
    }
    if let Some(Value::Object(profiles)) = data.get("profiles") {
        println!("profiles:");
        for (name, profile) in profiles {
            let usable = profile.get("usable").and_then(Value::as_bool).unwrap_or(false);
            println!("  {name} (usable={usable})");
        }
    }
}

/// Render a `spawn` command's data payload, either the single-container or
/// `all=true` fan-out shape.
pub fn print_spawn(data: &Value) {
    if let Some(Value::Object(results)) = data.get("results") {
        for (name, outcome) in results {
            let success = outcome.get("success").and_then(Value::as_bool).unwrap_or(false);
            if success {
                println!("{name}: spawned");
            } else {
                let error = outcome.get("error").and_then(Value::as_str).unwrap_or("unknown error");
                println!("{name}: failed ({error})");
            }
        }
        return;
    }
    if let Some(name) = data.get("container").and_then(Value::as_str) {
        println!("{name}: spawned");
    }
}

/// Render a `config validate` command's data payload.
pub fn print_validate(data: &Value) {
    let valid = data.get("valid").and_then(Value::as_bool).unwrap_or(false);
    if valid {
        let images = data.get("images").and_then(Value::as_u64).unwrap_or(0);
        let containers = data.get("containers").and_then(Value::as_u64).unwrap_or(0);
        println!("valid: {images} image(s), {containers} container(s) declared");
    } else {
        let error = data.get("error").and_then(Value::as_str).unwrap_or("unknown error");
        println!("invalid: {error}");
    }
}
