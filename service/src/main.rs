//! `intake-service` entry point.
//!
//! ## Modes
//!
//! - **Service mode** (default): open the database, bind the socket and
//!   serve until Ctrl-C.
//! - **`--ping`**: connect to the running service, send a `hello`
//!   handshake, verify the response, then exit.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use intake_engine::{SchemaValidator, SystemClock};
use intake_service::config::ServiceConfig;
use intake_service::ipc::{IntakeService, bind_listener, serve};
use intake_service::lifecycle::LifecycleController;
use intake_service::notify::LogNotifier;
use intake_store::SqliteFormStore;

fn ping(socket_path: &Path) -> anyhow::Result<()> {
    let mut stream = std::os::unix::net::UnixStream::connect(socket_path)
        .with_context(|| format!("ping: cannot connect to {}", socket_path.display()))?;
    stream.set_read_timeout(Some(std::time::Duration::from_secs(10)))?;
    stream.set_write_timeout(Some(std::time::Duration::from_secs(5)))?;

    let hello = serde_json::json!({
        "id": 0,
        "method": "hello",
        "params": {
            "protocolVersion": intake_service::PROTOCOL_VERSION,
            "clientVersion": "ping",
        }
    });
    stream.write_all(hello.to_string().as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = std::io::BufReader::new(&stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;

    let resp: serde_json::Value =
        serde_json::from_str(line.trim()).context("ping: invalid response JSON")?;
    if resp.get("result").is_some() {
        eprintln!("ping: service is alive");
        Ok(())
    } else {
        let msg = resp
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        anyhow::bail!("ping: hello failed: {msg}")
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ServiceConfig::load().inspect_err(|e| {
        tracing::error!(category = e.category().as_str(), error = %e, "invalid service config");
    })?;

    if std::env::args().nth(1).as_deref() == Some("--ping") {
        return ping(&config.socket_path());
    }

    run_service(config)
}

#[tokio::main]
async fn run_service(config: ServiceConfig) -> anyhow::Result<()> {
    tracing::info!("intake-service v{} starting", env!("CARGO_PKG_VERSION"));

    let db_path = Path::new(&config.db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = SqliteFormStore::open(db_path, config.pool_size)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(db_path = %db_path.display(), pool_size = config.pool_size, "database ready");

    let controller = LifecycleController::new(
        Arc::new(store),
        Arc::new(SchemaValidator),
        Arc::new(SystemClock),
        config.lifecycle_settings(),
    );
    let service = Arc::new(IntakeService::new(controller, Arc::new(LogNotifier)));

    let socket_path = config.socket_path();
    let listener = bind_listener(&socket_path)
        .with_context(|| format!("failed to bind {}", socket_path.display()))?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("signal received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    serve(service, listener, shutdown_rx).await;

    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::debug!(error = %e, "socket file already gone");
    }
    tracing::info!("intake-service exiting cleanly");
    Ok(())
}
