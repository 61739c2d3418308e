//! `intake-service`: client-intake form lifecycle service.
//!
//! Practitioners create form templates and send clients tokenized links; the
//! client saves drafts and submits once. The [`lifecycle::LifecycleController`]
//! owns those transitions. [`ipc`] exposes them as JSON-RPC-lite over a Unix
//! domain socket at `$XDG_RUNTIME_DIR/intake.sock`.

pub mod config;
pub mod errors;
pub mod ipc;
pub mod lifecycle;
pub mod notify;
pub mod protocol;

/// Protocol version spoken over the socket.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Default socket filename.
pub const SOCKET_FILENAME: &str = "intake.sock";

/// Get the default socket path using XDG_RUNTIME_DIR.
///
/// Falls back to `/tmp/intake-<username>.sock` if XDG_RUNTIME_DIR is not set.
pub fn default_socket_path() -> std::path::PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        std::path::PathBuf::from(runtime_dir).join(SOCKET_FILENAME)
    } else {
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        std::path::PathBuf::from(format!("/tmp/intake-{user}.sock"))
    }
}
