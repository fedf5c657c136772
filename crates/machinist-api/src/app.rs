use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use machinist_reconciler::Reconciler;
use machinist_store::SpecStore;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Builds the shared router served over both transports (§4.9): the same
/// handler set answers requests whether they arrived on the local control
/// socket or the optional TCP listener, with authorisation keyed off the
/// peer-credential `ConnectInfo` each transport's accept loop supplies.
pub fn build_app(store: Arc<SpecStore>, reconciler: Arc<Reconciler>) -> Router {
    let state = AppState { store, reconciler };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/command", post(handlers::post_command))
        .route("/stream/exec", get(ws::stream_exec))
        .route("/stream/shell", get(ws::stream_shell))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Request, StatusCode};
    use machinist_config::{HostPaths, ProxyConfig};
    use machinist_driver::{CommandOutput, DriverError, HostDriver, MachineInfo, RunOptions};
    use machinist_providers::ProviderRegistry;
    use tower::util::ServiceExt;

    use crate::auth::PeerUid;

    struct NoopDriver;

    #[async_trait::async_trait]
    impl HostDriver for NoopDriver {
        async fn run(&self, _cmd: &[&str], _opts: RunOptions) -> Result<CommandOutput, DriverError> {
            Ok(CommandOutput { exit: 0, stdout: String::new(), stderr: String::new() })
        }
        async fn reload_daemon(&self) -> Result<(), DriverError> {
            Ok(())
        }
        async fn start_unit(&self, _name: &str) -> Result<(), DriverError> {
            Ok(())
        }
        async fn stop_unit(&self, _name: &str) -> Result<(), DriverError> {
            Ok(())
        }
        async fn enable_unit(&self, _name: &str) -> Result<(), DriverError> {
            Ok(())
        }
        async fn disable_unit(&self, _name: &str) -> Result<(), DriverError> {
            Ok(())
        }
        async fn unit_state(&self, _name: &str) -> Result<String, DriverError> {
            Ok("active".to_string())
        }
        async fn list_machines(&self) -> Result<Vec<MachineInfo>, DriverError> {
            Ok(Vec::new())
        }
    }

    fn test_app(root: bool) -> Router {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(SpecStore::new(tmp.path()));
        let registry = Arc::new(ProviderRegistry::build(
            Arc::new(NoopDriver),
            &HostPaths {
                machines_dir: tmp.path().join("machines"),
                nspawn_dir: tmp.path().join("nspawn"),
                system_dir: tmp.path().join("system"),
            },
            &ProxyConfig::default(),
        ));
        let reconciler = Arc::new(Reconciler::new(store.clone(), registry));
        let app = build_app(store, reconciler);
        let uid = if root { Some(0) } else { Some(1000) };
        app.layer(MockConnectInfo(PeerUid(uid)))
    }

    #[tokio::test]
    async fn health_is_always_reachable() {
        let app = test_app(false);
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_command_does_not_require_root() {
        let app = test_app(false);
        let body = serde_json::json!({ "command": "status", "args": {} }).to_string();
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/command")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn privileged_command_denied_for_non_root_peer() {
        let app = test_app(false);
        let body = serde_json::json!({ "command": "reconcile", "args": {} }).to_string();
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/command")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn privileged_command_allowed_for_root_peer() {
        let app = test_app(true);
        let body = serde_json::json!({ "command": "reconcile", "args": {} }).to_string();
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/command")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["success"], true);
    }

    #[tokio::test]
    async fn unknown_command_reports_failure_with_200() {
        let app = test_app(false);
        let body = serde_json::json!({ "command": "bogus", "args": {} }).to_string();
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/command")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["success"], false);
    }
}
