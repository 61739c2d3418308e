//! Wire types for the intake service protocol.
//!
//! JSON-RPC-lite: one JSON object per line, no `jsonrpc` version field.
//! Requests carry `id`, `method` and optional `params`; replies carry the same
//! `id` and either `result` or `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::lifecycle::{CreateInstanceRequest, NewTemplate, TemplateChanges};

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub id: RequestId,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub id: RequestId,
    pub error: JsonRpcErrorBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Error codes (JSON-RPC error.code)
// ─────────────────────────────────────────────────────────────────────────────

/// Standard JSON-RPC errors.
pub const ERR_INVALID_REQUEST: i64 = -32600;
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INVALID_PARAMS: i64 = -32602;

/// Domain errors reuse the matching HTTP status.
pub const ERR_BAD_REQUEST: i64 = 400;
pub const ERR_UNAUTHENTICATED: i64 = 401;
pub const ERR_NOT_FOUND: i64 = 404;
pub const ERR_VALIDATION_FAILED: i64 = 422;
pub const ERR_INTERNAL: i64 = 500;

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloParams {
    pub protocol_version: String,
    pub client_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloResult {
    pub protocol_version: String,
    pub service_version: String,
    pub capabilities: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// form.*
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormCreateParams {
    #[serde(default)]
    pub owner_id: String,
    #[serde(flatten)]
    pub request: CreateInstanceRequest,
}

/// `form.open` and `form.draft.get`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenParams {
    pub token: String,
}

/// `form.draft.save` and `form.submit`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenDataParams {
    pub token: String,
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormAuditParams {
    #[serde(default)]
    pub owner_id: String,
    pub instance_id: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// template.*
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateCreateParams {
    #[serde(default)]
    pub owner_id: String,
    #[serde(flatten)]
    pub template: NewTemplate,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateUpdateParams {
    #[serde(default)]
    pub owner_id: String,
    pub template_id: String,
    #[serde(flatten)]
    pub changes: TemplateChanges,
}

/// `template.get` and `template.deactivate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRefParams {
    #[serde(default)]
    pub owner_id: String,
    pub template_id: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// service.status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatusResult {
    pub uptime_s: u64,
    pub version: String,
}
