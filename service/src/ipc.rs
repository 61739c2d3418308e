//! Unix domain socket IPC listener.
//!
//! Reads newline-delimited JSON-RPC-lite requests, dispatches them to the
//! [`LifecycleController`], and writes one response line per request.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use intake_store::FormStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

use crate::PROTOCOL_VERSION;
use crate::errors::{LifecycleError, Resource};
use crate::lifecycle::LifecycleController;
use crate::notify::Notifier;
use crate::protocol::*;

/// Longest request line, newline included, before the connection is dropped.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

const METHODS: &[&str] = &[
    "form.create",
    "form.open",
    "form.draft.get",
    "form.draft.save",
    "form.submit",
    "form.audit",
    "template.create",
    "template.update",
    "template.deactivate",
    "template.get",
    "service.status",
];

/// Everything a connection handler needs.
pub struct IntakeService<S> {
    controller: LifecycleController<S>,
    notifier: Arc<dyn Notifier>,
    started_at: Instant,
}

impl<S: FormStore> IntakeService<S> {
    pub fn new(controller: LifecycleController<S>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            controller,
            notifier,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_s(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// A failed call as it goes on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl From<LifecycleError> for RpcError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Internal { .. } => {
                tracing::error!(
                    category = err.category().as_str(),
                    error = %err,
                    source = ?std::error::Error::source(&err),
                    "internal fault"
                );
                RpcError::new(ERR_INTERNAL, "internal error")
            }
            LifecycleError::ValidationFailed { ref errors, .. } => RpcError {
                code: ERR_VALIDATION_FAILED,
                message: err.to_string(),
                data: Some(json!({ "errors": errors })),
            },
            LifecycleError::NotFound { .. } => RpcError::new(ERR_NOT_FOUND, err.to_string()),
            LifecycleError::Unauthenticated => RpcError::new(ERR_UNAUTHENTICATED, err.to_string()),
            LifecycleError::Expired
            | LifecycleError::AlreadySubmitted
            | LifecycleError::InvalidRequest { .. } => {
                RpcError::new(ERR_BAD_REQUEST, err.to_string())
            }
        }
    }
}

/// Bind the service socket, replacing a stale socket file.
pub fn bind_listener(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(path)?;
    tracing::info!(path = %path.display(), "intake service listening");
    Ok(listener)
}

/// Accept connections until `shutdown` flips to `true` or its sender drops.
pub async fn serve<S: FormStore>(
    service: Arc<IntakeService<S>>,
    listener: UnixListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let service = Arc::clone(&service);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(&service, stream).await {
                            tracing::warn!(error = %e, "connection error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept error");
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("listener shutting down");
                    break;
                }
            }
        }
    }
}

async fn handle_connection<S: FormStore>(
    service: &IntakeService<S>,
    stream: UnixStream,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = (&mut reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if n == 0 {
            break;
        }
        if n == MAX_LINE_BYTES && line.last() != Some(&b'\n') {
            tracing::warn!(limit = MAX_LINE_BYTES, "request line too long, closing connection");
            let response = protocol_error(ERR_INVALID_REQUEST, "Request too large".to_string());
            write_response(&mut writer, &response).await?;
            break;
        }

        let response = match std::str::from_utf8(&line) {
            Ok(text) if text.trim().is_empty() => continue,
            Ok(text) => dispatch_message(service, text.trim()).await,
            Err(_) => protocol_error(
                ERR_INVALID_REQUEST,
                "Invalid JSON-RPC: request is not UTF-8".to_string(),
            ),
        };
        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Value,
) -> std::io::Result<()> {
    let mut bytes = serde_json::to_vec(response).unwrap_or_else(|_| b"{}".to_vec());
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// Error for a line that never became a request, so there is no id to echo.
fn protocol_error(code: i64, message: String) -> Value {
    serde_json::to_value(JsonRpcError {
        id: RequestId::Integer(0),
        error: JsonRpcErrorBody {
            code,
            message,
            data: None,
        },
    })
    .unwrap_or_default()
}

/// Parse one request line and produce its response object.
pub async fn dispatch_message<S: FormStore>(service: &IntakeService<S>, raw: &str) -> Value {
    let request: JsonRpcRequest = match serde_json::from_str(raw) {
        Ok(req) => req,
        Err(e) => return protocol_error(ERR_INVALID_REQUEST, format!("Invalid JSON-RPC: {e}")),
    };

    let id = request.id;
    tracing::debug!(method = %request.method, "dispatching request");
    match dispatch_method(service, &request.method, request.params).await {
        Ok(result) => serde_json::to_value(JsonRpcResponse { id, result }).unwrap_or_default(),
        Err(err) => serde_json::to_value(JsonRpcError {
            id,
            error: JsonRpcErrorBody {
                code: err.code,
                message: err.message,
                data: err.data,
            },
        })
        .unwrap_or_default(),
    }
}

async fn dispatch_method<S: FormStore>(
    service: &IntakeService<S>,
    method: &str,
    params: Option<Value>,
) -> Result<Value, RpcError> {
    let controller = &service.controller;
    match method {
        "hello" => handle_hello(params),
        "form.create" => handle_form_create(service, params).await,
        "form.open" => {
            let p: TokenParams = parse_params(method, params)?;
            to_result(controller.open_form(&p.token).await?)
        }
        "form.draft.get" => {
            let p: TokenParams = parse_params(method, params)?;
            to_result(controller.get_draft(&p.token).await?)
        }
        "form.draft.save" => {
            let p: TokenDataParams = parse_params(method, params)?;
            to_result(controller.save_draft(&p.token, p.data).await?)
        }
        "form.submit" => handle_form_submit(service, params).await,
        "form.audit" => {
            let p: FormAuditParams = parse_params(method, params)?;
            let entries = controller.audit_trail(&p.owner_id, &p.instance_id).await?;
            Ok(json!({ "entries": entries }))
        }
        "template.create" => {
            let p: TemplateCreateParams = parse_params(method, params)?;
            to_result(controller.create_template(&p.owner_id, p.template).await?)
        }
        "template.update" => {
            let p: TemplateUpdateParams = parse_params(method, params)?;
            to_result(
                controller
                    .update_template(&p.owner_id, &p.template_id, p.changes)
                    .await?,
            )
        }
        "template.deactivate" => {
            let p: TemplateRefParams = parse_params(method, params)?;
            to_result(
                controller
                    .deactivate_template(&p.owner_id, &p.template_id)
                    .await?,
            )
        }
        "template.get" => {
            let p: TemplateRefParams = parse_params(method, params)?;
            to_result(controller.get_template(&p.owner_id, &p.template_id).await?)
        }
        "service.status" => to_result(ServiceStatusResult {
            uptime_s: service.uptime_s(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
        _ => Err(RpcError::new(
            ERR_METHOD_NOT_FOUND,
            format!("Unknown method: {method}"),
        )),
    }
}

fn handle_hello(params: Option<Value>) -> Result<Value, RpcError> {
    let hello: HelloParams = parse_params("hello", params)?;
    if hello.protocol_version != PROTOCOL_VERSION {
        return Err(RpcError::new(
            ERR_BAD_REQUEST,
            format!(
                "Incompatible protocol version: client={}, service={PROTOCOL_VERSION}",
                hello.protocol_version
            ),
        ));
    }

    to_result(HelloResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        service_version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: METHODS.iter().map(|m| (*m).to_string()).collect(),
    })
}

async fn handle_form_create<S: FormStore>(
    service: &IntakeService<S>,
    params: Option<Value>,
) -> Result<Value, RpcError> {
    let p: FormCreateParams = parse_params("form.create", params)?;
    let created = service
        .controller
        .create_instance(&p.owner_id, p.request)
        .await
        .map_err(|err| match err {
            // An unknown template is a bad request from the owner's side.
            LifecycleError::NotFound {
                resource: Resource::Template,
            } => RpcError::new(ERR_BAD_REQUEST, err.to_string()),
            other => other.into(),
        })?;

    let warning = match service
        .notifier
        .invitation_created(&created.form_instance, &created.form_url)
        .await
    {
        Ok(()) => None,
        Err(e) => {
            tracing::warn!(
                instance_id = %created.form_instance.id,
                error = %e,
                "invitation notification failed"
            );
            Some(e.to_string())
        }
    };

    Ok(with_warning(to_result(created)?, warning))
}

async fn handle_form_submit<S: FormStore>(
    service: &IntakeService<S>,
    params: Option<Value>,
) -> Result<Value, RpcError> {
    let p: TokenDataParams = parse_params("form.submit", params)?;
    let receipt = service.controller.submit_form(&p.token, p.data).await?;

    let warning = match service.notifier.submission_received(&receipt).await {
        Ok(()) => None,
        Err(e) => {
            tracing::warn!(
                instance_id = %receipt.instance_id,
                error = %e,
                "submission notification failed"
            );
            Some(e.to_string())
        }
    };

    Ok(with_warning(to_result(receipt)?, warning))
}

fn parse_params<T: DeserializeOwned>(method: &str, params: Option<Value>) -> Result<T, RpcError> {
    let value = params.ok_or_else(|| RpcError::new(ERR_INVALID_PARAMS, "Missing params"))?;
    serde_json::from_value(value)
        .map_err(|e| RpcError::new(ERR_INVALID_PARAMS, format!("Invalid {method} params: {e}")))
}

fn to_result<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, "failed to serialize result");
        RpcError::new(ERR_INTERNAL, "internal error")
    })
}

fn with_warning(mut result: Value, warning: Option<String>) -> Value {
    if let (Some(warning), Some(obj)) = (warning, result.as_object_mut()) {
        obj.insert("warning".to_string(), Value::String(warning));
    }
    result
}
