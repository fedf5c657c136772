use serde::Serialize;

/// The flat command envelope returned by `POST /command` (§6): HTTP status is
/// always 200 for any envelope the server managed to produce, success or not.
/// A 500/4xx only escapes this type when axum itself rejects the request
/// before a handler runs (malformed JSON body, wrong content type).
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        CommandResponse { success: true, data: Some(data), error: None }
    }

    pub fn ok_empty() -> Self {
        CommandResponse { success: true, data: None, error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        CommandResponse { success: false, data: None, error: Some(message.into()) }
    }
}

/// Errors arising during command dispatch, before they are flattened into a
/// [`CommandResponse`]. Kept separate from [`machinist_reconciler::ReconcileError`]
/// so this layer can add dispatch-only failure modes (unknown command, bad
/// argument shape, permission denied) without reaching back into the engine's
/// error enum.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("missing or invalid argument '{0}'")]
    BadArgument(String),

    #[error("permission denied: root privileges required for this command")]
    PermissionDenied,

    #[error(transparent)]
    Reconcile(#[from] machinist_reconciler::ReconcileError),

    #[error(transparent)]
    Store(#[from] machinist_store::StoreError),
}

impl From<ApiError> for CommandResponse {
    fn from(e: ApiError) -> Self {
        CommandResponse::err(e.to_string())
    }
}
