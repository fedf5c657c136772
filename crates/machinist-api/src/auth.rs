use axum::serve::IncomingStream;
use axum::extract::connect_info::Connected;
use tokio::net::{TcpListener, UnixListener};

/// Commands that require the calling peer to be uid 0 (§4.9). Applies to both
/// the `POST /command` dispatch table and, by name, the two streaming
/// endpoints (`stream_exec`, `stream_shell`) even though those never reach
/// the `command` dispatcher.
pub const PRIVILEGED_COMMANDS: &[&str] = &[
    "spawn",
    "stop",
    "start",
    "restart",
    "remove",
    "exec",
    "reconcile",
    "reload",
    "image_pull",
    "stream_exec",
    "stream_shell",
];

pub fn is_privileged(command: &str) -> bool {
    PRIVILEGED_COMMANDS.contains(&command)
}

/// The credentials of the peer that opened the connection, derived by axum's
/// `ConnectInfo` machinery at accept time. `None` both when the connection
/// arrived over TCP (the spec treats every TCP peer as unprivileged — §4.9's
/// documented security gap) and when `SO_PEERCRED` could not be read on the
/// local socket; both cases collapse to the same unprivileged outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerUid(pub Option<u32>);

impl PeerUid {
    pub fn is_root(&self) -> bool {
        self.0 == Some(0)
    }
}

impl Connected<IncomingStream<'_, TcpListener>> for PeerUid {
    fn connect_info(_target: IncomingStream<'_, TcpListener>) -> Self {
        PeerUid(None)
    }
}

impl Connected<IncomingStream<'_, UnixListener>> for PeerUid {
    fn connect_info(target: IncomingStream<'_, UnixListener>) -> Self {
        PeerUid(target.io().peer_cred().ok().map(|cred| cred.uid()))
    }
}
