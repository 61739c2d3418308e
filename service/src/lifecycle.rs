//! Form lifecycle controller.
//!
//! Owns the state machine of a form instance:
//!
//! | Stored state | save_draft      | submit_form (valid) | submit_form (invalid) |
//! |--------------|-----------------|---------------------|-----------------------|
//! | SENT         | -> IN_PROGRESS  | -> COMPLETED        | stays SENT            |
//! | IN_PROGRESS  | stays           | -> COMPLETED        | stays IN_PROGRESS     |
//! | COMPLETED    | AlreadySubmitted| AlreadySubmitted    | AlreadySubmitted      |
//! | expired      | Expired         | Expired             | Expired               |
//!
//! Every operation runs its read-check-write sequence inside one
//! [`FormStore::atomically`] call, so concurrent requests on the same token
//! observe the table above. Expiry is derived from the clock on every call and
//! never written back.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use intake_engine::{
    ActorType, AuditLogEntry, Clock, EffectiveStatus, EntityType, FieldError, FormInstance,
    FormSchema, FormStatus, FormTemplate, NewAuditEntry, PayloadValidator, actions, field_count,
    generate_submission_id, generate_token, is_valid_email, looks_like_token, new_id,
};
use intake_store::{FormStore, Submission, UnitOfWork};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::errors::{LifecycleError, Resource, Result};

pub const MIN_EXPIRY_DAYS: f64 = 0.5;
pub const MAX_EXPIRY_DAYS: f64 = 30.0;
pub const DEFAULT_EXPIRY_DAYS: f64 = 7.0;

const MAX_SLUG_LEN: usize = 64;

/// Deployment-level policy for the controller.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Public form links are `<public_base_url>/forms/<token>`.
    pub public_base_url: String,
    pub default_expiry_days: f64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            public_base_url: "http://localhost:3000".to_string(),
            default_expiry_days: DEFAULT_EXPIRY_DAYS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    pub template_id: String,
    pub client_email: String,
    #[serde(default)]
    pub personal_message: Option<String>,
    /// Days until the link expires, within `[0.5, 30]`.
    #[serde(default)]
    pub expiry_days: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedInstance {
    pub form_instance: FormInstance,
    pub form_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTemplate {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub schema: Value,
    #[serde(default)]
    pub presentation: Option<Map<String, Value>>,
}

/// Partial template edit. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateChanges {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub schema: Option<Value>,
    #[serde(default)]
    pub presentation: Option<Map<String, Value>>,
}

/// What the client sees when opening a form link.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormView {
    pub status: EffectiveStatus,
    pub template_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: FormSchema,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presentation: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_message: Option<String>,
    pub draft: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_saved_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftView {
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_saved_at: Option<DateTime<Utc>>,
    pub status: EffectiveStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSaved {
    pub saved_at: DateTime<Utc>,
    pub status: FormStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub submission_id: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip)]
    pub instance_id: String,
    #[serde(skip)]
    pub owner_id: String,
}

/// Drives form templates and instances through their lifecycle.
pub struct LifecycleController<S> {
    store: Arc<S>,
    validator: Arc<dyn PayloadValidator>,
    clock: Arc<dyn Clock>,
    settings: LifecycleSettings,
}

impl<S: FormStore> LifecycleController<S> {
    pub fn new(
        store: Arc<S>,
        validator: Arc<dyn PayloadValidator>,
        clock: Arc<dyn Clock>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store,
            validator,
            clock,
            settings,
        }
    }

    pub fn form_url(&self, token: &str) -> String {
        format!(
            "{}/forms/{token}",
            self.settings.public_base_url.trim_end_matches('/')
        )
    }

    /// Stored timestamps carry millisecond precision; so does everything we hand out.
    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(3)
    }

    // ── Templates ───────────────────────────────────────────────────────

    pub async fn create_template(
        &self,
        owner_id: &str,
        request: NewTemplate,
    ) -> Result<FormTemplate> {
        let owner_id = require_owner(owner_id)?;
        let slug = request.slug.trim().to_string();
        validate_slug(&slug)?;
        let name = required_text(&request.name, "name")?;
        let schema = parse_schema(request.schema)?;
        let now = self.now();

        let template = FormTemplate {
            id: new_id(),
            owner_id,
            slug,
            name,
            description: optional_text(request.description),
            schema,
            presentation: request.presentation,
            version: 1,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let template = self
            .store
            .atomically(move |uow| {
                if uow.find_template_by_slug(&template.slug)?.is_some() {
                    return Err(LifecycleError::invalid(format!(
                        "Template slug `{}` is already in use",
                        template.slug
                    )));
                }
                uow.insert_template(&template)?;
                uow.append(&audit_entry(
                    EntityType::FormTemplate,
                    &template.id,
                    actions::TEMPLATE_CREATED,
                    ActorType::Owner,
                    Some(&template.owner_id),
                    json!({ "slug": template.slug, "version": template.version }),
                    now,
                ))?;
                Ok(template)
            })
            .await?;

        tracing::info!(template_id = %template.id, slug = %template.slug, "template created");
        Ok(template)
    }

    /// Applies `changes` and bumps the version. Existing instances keep the
    /// schema they were created with.
    pub async fn update_template(
        &self,
        owner_id: &str,
        template_id: &str,
        changes: TemplateChanges,
    ) -> Result<FormTemplate> {
        let owner_id = require_owner(owner_id)?;
        let name = changes
            .name
            .as_deref()
            .map(|name| required_text(name, "name"))
            .transpose()?;
        let schema = changes.schema.map(parse_schema).transpose()?;
        if name.is_none()
            && changes.description.is_none()
            && schema.is_none()
            && changes.presentation.is_none()
        {
            return Err(LifecycleError::invalid("No template changes supplied"));
        }

        let now = self.now();
        let template_id = template_id.to_string();
        let description = changes.description;
        let presentation = changes.presentation;

        let template = self
            .store
            .atomically(move |uow| {
                let mut template = owned_template(uow, &owner_id, &template_id)?;
                if !template.is_active {
                    return Err(LifecycleError::invalid("Template is inactive"));
                }

                let mut changed = Vec::new();
                if let Some(name) = name {
                    template.name = name;
                    changed.push("name");
                }
                if let Some(description) = description {
                    template.description = optional_text(Some(description));
                    changed.push("description");
                }
                if let Some(schema) = schema {
                    template.schema = schema;
                    changed.push("schema");
                }
                if let Some(presentation) = presentation {
                    template.presentation = Some(presentation);
                    changed.push("presentation");
                }
                template.version += 1;
                template.updated_at = now;

                uow.update_template(&template)?;
                uow.append(&audit_entry(
                    EntityType::FormTemplate,
                    &template.id,
                    actions::TEMPLATE_UPDATED,
                    ActorType::Owner,
                    Some(&owner_id),
                    json!({ "version": template.version, "changed": changed }),
                    now,
                ))?;
                Ok(template)
            })
            .await?;

        tracing::info!(template_id = %template.id, version = template.version, "template updated");
        Ok(template)
    }

    /// Soft delete. Deactivating an inactive template is a no-op.
    pub async fn deactivate_template(
        &self,
        owner_id: &str,
        template_id: &str,
    ) -> Result<FormTemplate> {
        let owner_id = require_owner(owner_id)?;
        let template_id = template_id.to_string();
        let now = self.now();

        self.store
            .atomically(move |uow| {
                let mut template = owned_template(uow, &owner_id, &template_id)?;
                if !template.is_active {
                    return Ok(template);
                }

                template.is_active = false;
                template.updated_at = now;
                uow.update_template(&template)?;
                uow.append(&audit_entry(
                    EntityType::FormTemplate,
                    &template.id,
                    actions::TEMPLATE_DEACTIVATED,
                    ActorType::Owner,
                    Some(&owner_id),
                    json!({ "version": template.version }),
                    now,
                ))?;
                tracing::info!(template_id = %template.id, "template deactivated");
                Ok(template)
            })
            .await
    }

    pub async fn get_template(&self, owner_id: &str, template_id: &str) -> Result<FormTemplate> {
        let owner_id = require_owner(owner_id)?;
        let template_id = template_id.to_string();
        self.store
            .read(move |uow| owned_template(uow, &owner_id, &template_id))
            .await
    }

    // ── Instances ───────────────────────────────────────────────────────

    /// Creates a SENT instance with a fresh token and a snapshot of the
    /// template schema. Does not send anything.
    pub async fn create_instance(
        &self,
        owner_id: &str,
        request: CreateInstanceRequest,
    ) -> Result<CreatedInstance> {
        let owner_id = require_owner(owner_id)?;
        let client_email = normalize_email(&request.client_email)?;
        let expiry_days = request
            .expiry_days
            .unwrap_or(self.settings.default_expiry_days);
        if !(MIN_EXPIRY_DAYS..=MAX_EXPIRY_DAYS).contains(&expiry_days) {
            return Err(LifecycleError::invalid(format!(
                "expiryDays must be between {MIN_EXPIRY_DAYS} and {MAX_EXPIRY_DAYS}"
            )));
        }

        let now = self.now();
        let expires_at = now + expiry_duration(expiry_days);
        let token = generate_token();
        let form_url = self.form_url(&token);
        let template_id = request.template_id;
        let personal_message = optional_text(request.personal_message);

        let instance = self
            .store
            .atomically(move |uow| {
                let template = uow
                    .find_template(&template_id)?
                    .filter(|t| t.is_active && t.owner_id == owner_id)
                    .ok_or(LifecycleError::not_found(Resource::Template))?;

                let instance = FormInstance {
                    id: new_id(),
                    token,
                    template_id: template.id,
                    template_version: template.version,
                    schema: template.schema,
                    owner_id,
                    client_email,
                    personal_message,
                    status: FormStatus::Sent,
                    created_at: now,
                    expires_at,
                    opened_at: None,
                    submitted_at: None,
                };
                uow.insert_instance(&instance)?;
                uow.append(&audit_entry(
                    EntityType::FormInstance,
                    &instance.id,
                    actions::CREATED,
                    ActorType::Owner,
                    Some(&instance.owner_id),
                    json!({
                        "templateId": instance.template_id,
                        "templateVersion": instance.template_version,
                        "expiresAt": instance
                            .expires_at
                            .to_rfc3339_opts(SecondsFormat::Millis, true),
                    }),
                    now,
                ))?;
                Ok::<_, LifecycleError>(instance)
            })
            .await?;

        tracing::info!(
            instance_id = %instance.id,
            template_id = %instance.template_id,
            expires_at = %instance.expires_at,
            "form instance created"
        );
        Ok(CreatedInstance {
            form_instance: instance,
            form_url,
        })
    }

    /// Public view of a form. The first open of a live instance stamps
    /// `opened_at` and is audited.
    pub async fn open_form(&self, token: &str) -> Result<FormView> {
        let token = token.to_string();
        let now = self.now();

        self.store
            .atomically(move |uow| {
                let mut instance = find_by_token(uow, &token)?;
                let status = instance.effective_status(now);
                let live = matches!(status, EffectiveStatus::Sent | EffectiveStatus::InProgress);

                if live && instance.opened_at.is_none() && uow.mark_opened(&instance.id, now)? {
                    instance.opened_at = Some(now);
                    uow.append(&audit_entry(
                        EntityType::FormInstance,
                        &instance.id,
                        actions::OPENED,
                        ActorType::Client,
                        None,
                        json!({}),
                        now,
                    ))?;
                }

                let template = uow
                    .find_template(&instance.template_id)?
                    .ok_or_else(|| {
                        LifecycleError::internal("instance references a missing template")
                    })?;
                let draft = uow.get_draft(&instance.id)?;
                let (draft, last_saved_at) = match draft {
                    Some(draft) if status != EffectiveStatus::Completed => {
                        (draft.data, draft.last_saved_at)
                    }
                    _ => (empty_object(), None),
                };

                Ok(FormView {
                    status,
                    template_name: template.name,
                    description: template.description,
                    schema: instance.schema,
                    presentation: template.presentation,
                    personal_message: instance.personal_message,
                    draft,
                    last_saved_at,
                    expires_at: instance.expires_at,
                    submitted_at: instance.submitted_at,
                })
            })
            .await
    }

    pub async fn get_draft(&self, token: &str) -> Result<DraftView> {
        let token = token.to_string();
        let now = self.now();

        self.store
            .read(move |uow| {
                let instance = load_open_instance(uow, &token, now)?;
                let draft = uow.get_draft(&instance.id)?;
                let (data, last_saved_at) = match draft {
                    Some(draft) => (draft.data, draft.last_saved_at),
                    None => (empty_object(), None),
                };
                Ok(DraftView {
                    data,
                    last_saved_at,
                    status: instance.effective_status(now),
                })
            })
            .await
    }

    /// Replaces the draft with `data` (no merge, no schema validation).
    pub async fn save_draft(&self, token: &str, data: Value) -> Result<DraftSaved> {
        let token = token.to_string();
        let now = self.now();

        let (instance_id, saved) = self
            .store
            .atomically(move |uow| {
                let instance = load_open_instance(uow, &token, now)?;
                if !data.is_object() {
                    return Err(LifecycleError::invalid("Draft data must be a JSON object"));
                }

                uow.set_draft(&instance.id, &data, now)?;
                let status = if instance.status == FormStatus::Sent {
                    uow.mark_in_progress(&instance.id)?;
                    FormStatus::InProgress
                } else {
                    instance.status
                };
                uow.append(&audit_entry(
                    EntityType::FormInstance,
                    &instance.id,
                    actions::AUTO_SAVE,
                    ActorType::Client,
                    None,
                    json!({ "fieldCount": field_count(&data) }),
                    now,
                ))?;
                Ok((
                    instance.id,
                    DraftSaved {
                        saved_at: now,
                        status,
                    },
                ))
            })
            .await?;

        tracing::debug!(instance_id = %instance_id, status = saved.status.as_str(), "draft saved");
        Ok(saved)
    }

    /// Validates `data` against the instance's schema snapshot and, if it
    /// passes, completes the instance.
    pub async fn submit_form(&self, token: &str, data: Value) -> Result<SubmissionReceipt> {
        let token = token.to_string();
        let now = self.now();
        let validator = Arc::clone(&self.validator);

        let result = self
            .store
            .atomically(move |uow| {
                let instance = load_open_instance(uow, &token, now)?;

                let outcome = validator.validate(&instance.schema, &data);
                if !outcome.is_valid {
                    let message = outcome
                        .first_error()
                        .map(FieldError::qualified_message)
                        .unwrap_or_else(|| "submission is invalid".to_string());
                    return Err(LifecycleError::ValidationFailed {
                        message,
                        errors: outcome.errors,
                    });
                }

                let submission_id = generate_submission_id(now);
                let fields = field_count(&data);
                uow.record_submission(
                    &instance.id,
                    &Submission {
                        submission_id: submission_id.clone(),
                        data,
                        submitted_at: now,
                    },
                )?;
                uow.mark_completed(&instance.id, now)?;
                uow.append(&audit_entry(
                    EntityType::FormInstance,
                    &instance.id,
                    actions::SUBMITTED,
                    ActorType::Client,
                    None,
                    json!({ "submissionId": submission_id, "fieldCount": fields }),
                    now,
                ))?;

                Ok(SubmissionReceipt {
                    submission_id,
                    submitted_at: now,
                    instance_id: instance.id,
                    owner_id: instance.owner_id,
                })
            })
            .await;

        match &result {
            Ok(receipt) => tracing::info!(
                instance_id = %receipt.instance_id,
                submission_id = %receipt.submission_id,
                "form submitted"
            ),
            Err(LifecycleError::ValidationFailed { errors, .. }) => {
                tracing::debug!(error_count = errors.len(), "submission rejected by validation");
            }
            Err(_) => {}
        }
        result
    }

    /// Audit entries for one of the owner's instances, oldest first.
    pub async fn audit_trail(
        &self,
        owner_id: &str,
        instance_id: &str,
    ) -> Result<Vec<AuditLogEntry>> {
        let owner_id = require_owner(owner_id)?;
        let instance_id = instance_id.to_string();

        self.store
            .read(move |uow| {
                let instance = uow
                    .find_instance(&instance_id)?
                    .filter(|i| i.owner_id == owner_id)
                    .ok_or(LifecycleError::not_found(Resource::Instance))?;
                uow.entries_for(EntityType::FormInstance, &instance.id)
                    .map_err(LifecycleError::from)
            })
            .await
    }
}

/// Tokens that cannot have been issued are reported as unknown without a lookup.
fn find_by_token(uow: &dyn UnitOfWork, token: &str) -> Result<FormInstance> {
    if !looks_like_token(token) {
        return Err(LifecycleError::not_found(Resource::Form));
    }
    uow.find_instance_by_token(token)?
        .ok_or(LifecycleError::not_found(Resource::Form))
}

/// Looks up a live instance by token. Checks run in a fixed order: unknown
/// token, then terminal state, then expiry.
fn load_open_instance(
    uow: &dyn UnitOfWork,
    token: &str,
    now: DateTime<Utc>,
) -> Result<FormInstance> {
    let instance = find_by_token(uow, token)?;
    if instance.status == FormStatus::Completed {
        return Err(LifecycleError::AlreadySubmitted);
    }
    if instance.is_expired(now) {
        return Err(LifecycleError::Expired);
    }
    Ok(instance)
}

/// Other owners' templates are reported as missing.
fn owned_template(uow: &dyn UnitOfWork, owner_id: &str, template_id: &str) -> Result<FormTemplate> {
    uow.find_template(template_id)?
        .filter(|t| t.owner_id == owner_id)
        .ok_or(LifecycleError::not_found(Resource::Template))
}

fn audit_entry(
    entity_type: EntityType,
    entity_id: &str,
    action: &'static str,
    actor_type: ActorType,
    actor_id: Option<&str>,
    metadata: Value,
    created_at: DateTime<Utc>,
) -> NewAuditEntry {
    NewAuditEntry {
        entity_type,
        entity_id: entity_id.to_string(),
        action,
        actor_type,
        actor_id: actor_id.map(str::to_string),
        metadata,
        created_at,
    }
}

fn require_owner(owner_id: &str) -> Result<String> {
    let owner_id = owner_id.trim();
    if owner_id.is_empty() {
        return Err(LifecycleError::Unauthenticated);
    }
    Ok(owner_id.to_string())
}

/// Trim and lowercase, then require `local@domain.tld`.
pub fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(LifecycleError::invalid("clientEmail must be a valid email address"));
    }
    Ok(email)
}

fn validate_slug(slug: &str) -> Result<()> {
    let well_formed = !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if well_formed {
        Ok(())
    } else {
        Err(LifecycleError::invalid(format!(
            "slug must be 1-{MAX_SLUG_LEN} lowercase letters, digits or hyphens"
        )))
    }
}

fn required_text(value: &str, field: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(LifecycleError::invalid(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_schema(value: Value) -> Result<FormSchema> {
    FormSchema::from_value(value)
        .map_err(|e| LifecycleError::invalid(format!("Invalid form schema: {e}")))
}

fn expiry_duration(days: f64) -> Duration {
    Duration::milliseconds((days * 86_400_000.0).round() as i64)
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}
