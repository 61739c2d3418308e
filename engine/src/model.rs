//! Domain records for templates, form instances, responses and the audit log.

use crate::schema::FormSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Fresh opaque identifier for templates and instances.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Stored lifecycle state of a form instance.
///
/// `COMPLETED` is terminal. Expiry is never stored; see [`EffectiveStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FormStatus {
    Sent,
    InProgress,
    Completed,
}

impl FormStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
        }
    }

    /// Parse from string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SENT" => Some(Self::Sent),
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Status as observed at a given instant: the stored status, unless an open
/// instance has passed its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectiveStatus {
    Sent,
    InProgress,
    Completed,
    Expired,
}

impl EffectiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl From<FormStatus> for EffectiveStatus {
    fn from(status: FormStatus) -> Self {
        match status {
            FormStatus::Sent => Self::Sent,
            FormStatus::InProgress => Self::InProgress,
            FormStatus::Completed => Self::Completed,
        }
    }
}

/// Reusable form definition owned by a practitioner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormTemplate {
    pub id: String,
    pub owner_id: String,
    pub slug: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: FormSchema,
    /// Rendering hints (section order, help text). Opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presentation: Option<Map<String, Value>>,
    pub version: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One invitation sent to one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormInstance {
    pub id: String,
    pub token: String,
    pub template_id: String,
    pub template_version: i64,
    /// Copy of the template schema taken when the instance was created.
    pub schema: FormSchema,
    pub owner_id: String,
    pub client_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_message: Option<String>,
    pub status: FormStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl FormInstance {
    /// An open instance is expired strictly after `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status != FormStatus::Completed && now > self.expires_at
    }

    pub fn effective_status(&self, now: DateTime<Utc>) -> EffectiveStatus {
        if self.is_expired(now) {
            EffectiveStatus::Expired
        } else {
            self.status.into()
        }
    }
}

/// Client answers for an instance. Created lazily on the first write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormResponse {
    pub instance_id: String,
    pub draft_data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_saved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorType {
    Owner,
    Client,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "OWNER",
            Self::Client => "CLIENT",
            Self::System => "SYSTEM",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OWNER" => Some(Self::Owner),
            "CLIENT" => Some(Self::Client),
            "SYSTEM" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    FormTemplate,
    FormInstance,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FormTemplate => "form_template",
            Self::FormInstance => "form_instance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "form_template" => Some(Self::FormTemplate),
            "form_instance" => Some(Self::FormInstance),
            _ => None,
        }
    }
}

/// Audit action names as written to the log.
pub mod actions {
    pub const CREATED: &str = "created";
    pub const OPENED: &str = "OPENED";
    pub const AUTO_SAVE: &str = "AUTO_SAVE";
    pub const SUBMITTED: &str = "SUBMITTED";
    pub const TEMPLATE_CREATED: &str = "template_created";
    pub const TEMPLATE_UPDATED: &str = "template_updated";
    pub const TEMPLATE_DEACTIVATED: &str = "template_deactivated";
}

/// Append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: i64,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action: String,
    pub actor_type: ActorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Audit record before the store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action: &'static str,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Number of top-level answers in a payload. Audit metadata records this
/// instead of the payload itself.
pub fn field_count(data: &Value) -> usize {
    data.as_object().map_or(0, Map::len)
}
