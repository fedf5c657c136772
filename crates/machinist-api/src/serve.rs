use std::io;
use std::path::Path;

use axum::Router;
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::auth::PeerUid;

/// Serves `app` on the local control socket (§4.9, §6): parent directory
/// mode `0o666` at creation, peer credentials surfaced to handlers via
/// [`PeerUid`]'s `Connected` impl, socket unlinked on shutdown.
pub async fn serve_unix(socket_path: &Path, app: Router, shutdown: CancellationToken) -> io::Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
        set_world_rw(parent)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    info!(path = %socket_path.display(), "control socket listening");

    let result = axum::serve(listener, app.into_make_service_with_connect_info::<PeerUid>())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await;

    let _ = std::fs::remove_file(socket_path);
    info!(path = %socket_path.display(), "control socket unlinked");
    result
}

/// Serves `app` on an optional TCP listener (§4.9). Every connection accepted
/// here resolves to an unprivileged [`PeerUid`] — authentication over TCP is
/// the deliberate, documented gap the spec calls out, not something this
/// implementation papers over with an invented scheme.
pub async fn serve_tcp(bind: &str, app: Router, shutdown: CancellationToken) -> io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %bind, "tcp control listener (unauthenticated — see configuration docs)");
    axum::serve(listener, app.into_make_service_with_connect_info::<PeerUid>())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

#[cfg(unix)]
fn set_world_rw(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o666))
}

#[cfg(not(unix))]
fn set_world_rw(_dir: &Path) -> io::Result<()> {
    Ok(())
}
