#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Lifecycle controller against a real on-disk store and a mock clock.

use std::sync::Arc;

use chrono::Duration;
use intake_engine::{
    ActorType, Clock, EffectiveStatus, FormInstance, FormResponse, FormStatus, MockClock,
    SchemaValidator, generate_token, is_submission_id,
};
use intake_service::errors::{LifecycleError, Resource};
use intake_service::lifecycle::{
    CreateInstanceRequest, CreatedInstance, LifecycleController, LifecycleSettings, NewTemplate,
    TemplateChanges,
};
use intake_store::{DbError, FormStore, SqliteFormStore};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;

const OWNER: &str = "owner-1";

struct Harness {
    _dir: TempDir,
    clock: Arc<MockClock>,
    store: Arc<SqliteFormStore>,
    controller: Arc<LifecycleController<SqliteFormStore>>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteFormStore::open(&dir.path().join("intake.db"), 4).unwrap());
    let clock = Arc::new(MockClock::fixed());
    let controller = Arc::new(LifecycleController::new(
        Arc::clone(&store),
        Arc::new(SchemaValidator),
        clock.clone(),
        LifecycleSettings::default(),
    ));
    Harness {
        _dir: dir,
        clock,
        store,
        controller,
    }
}

fn intake_schema() -> Value {
    json!({
        "type": "object",
        "required": ["name"],
        "properties": {
            "name": { "type": "string" },
            "age": { "type": "number", "minimum": 0 }
        }
    })
}

impl Harness {
    async fn template(&self, slug: &str, schema: Value) -> String {
        self.controller
            .create_template(
                OWNER,
                NewTemplate {
                    slug: slug.to_string(),
                    name: "New client intake".to_string(),
                    description: None,
                    schema,
                    presentation: None,
                },
            )
            .await
            .unwrap()
            .id
    }

    async fn send(&self, template_id: &str) -> CreatedInstance {
        self.controller
            .create_instance(OWNER, request(template_id))
            .await
            .unwrap()
    }

    /// A template plus one SENT instance; returns the instance.
    async fn sent_form(&self) -> FormInstance {
        let template_id = self.template("intake", intake_schema()).await;
        self.send(&template_id).await.form_instance
    }

    async fn response(&self, instance_id: &str) -> FormResponse {
        let id = instance_id.to_string();
        self.store
            .read(move |uow| uow.find_response(&id))
            .await
            .unwrap()
            .unwrap()
    }

    async fn stored(&self, instance_id: &str) -> FormInstance {
        let id = instance_id.to_string();
        self.store
            .read(move |uow| uow.find_instance(&id))
            .await
            .unwrap()
            .unwrap()
    }
}

fn request(template_id: &str) -> CreateInstanceRequest {
    CreateInstanceRequest {
        template_id: template_id.to_string(),
        client_email: "client@example.com".to_string(),
        personal_message: None,
        expiry_days: None,
    }
}

#[tokio::test]
async fn created_instance_is_sent_with_seven_day_expiry() {
    let h = harness();
    let template_id = h.template("intake", intake_schema()).await;
    let created = h.send(&template_id).await;
    let instance = created.form_instance;

    assert_eq!(instance.status, FormStatus::Sent);
    assert_eq!(instance.template_version, 1);
    assert_eq!(instance.expires_at - instance.created_at, Duration::days(7));
    assert_eq!(instance.token.len(), 43);
    assert_eq!(
        created.form_url,
        format!("http://localhost:3000/forms/{}", instance.token)
    );
}

#[tokio::test]
async fn submit_from_sent_goes_straight_to_completed() {
    let h = harness();
    let instance = h.sent_form().await;

    let receipt = h
        .controller
        .submit_form(&instance.token, json!({ "name": "Ada", "age": 36 }))
        .await
        .unwrap();
    assert!(is_submission_id(&receipt.submission_id), "{}", receipt.submission_id);
    assert_eq!(receipt.submitted_at, h.clock.now());

    let stored = h.stored(&instance.id).await;
    assert_eq!(stored.status, FormStatus::Completed);
    assert_eq!(stored.submitted_at, Some(receipt.submitted_at));
}

#[tokio::test]
async fn second_submit_is_already_submitted() {
    let h = harness();
    let instance = h.sent_form().await;
    let data = json!({ "name": "Ada" });

    h.controller.submit_form(&instance.token, data.clone()).await.unwrap();
    let before = h.response(&instance.id).await;

    for _ in 0..2 {
        let err = h
            .controller
            .submit_form(&instance.token, json!({ "name": "second" }))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadySubmitted), "{err}");
    }

    let err = h
        .controller
        .save_draft(&instance.token, json!({ "name": "late" }))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadySubmitted), "{err}");

    let after = h.response(&instance.id).await;
    assert_eq!(after.submitted_data, Some(data));
    assert_eq!(after.submitted_data, before.submitted_data);
    assert_eq!(after.submission_id, before.submission_id);
    assert_eq!(after.submitted_at, before.submitted_at);
}

#[tokio::test]
async fn unknown_token_is_not_found() {
    let h = harness();
    let err = h
        .controller
        .submit_form("no-such-token", json!({}))
        .await
        .unwrap_err();
    assert!(
        matches!(err, LifecycleError::NotFound { resource: Resource::Form }),
        "{err}"
    );
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn malformed_and_unissued_tokens_read_as_unknown_forms() {
    let h = harness();
    h.sent_form().await;

    for token in ["abc".to_string(), "x".repeat(43), generate_token()] {
        let results = [
            h.controller.open_form(&token).await.map(|_| ()),
            h.controller.get_draft(&token).await.map(|_| ()),
            h.controller
                .save_draft(&token, json!({ "name": "Ada" }))
                .await
                .map(|_| ()),
        ];
        for result in results {
            let err = result.unwrap_err();
            assert!(
                matches!(err, LifecycleError::NotFound { resource: Resource::Form }),
                "{token}: {err}"
            );
        }
    }
}

#[tokio::test]
async fn expired_sent_form_rejects_writes_and_stays_sent() {
    let h = harness();
    let instance = h.sent_form().await;
    h.clock.advance(Duration::days(7) + Duration::seconds(1));

    let err = h
        .controller
        .submit_form(&instance.token, json!({ "name": "Ada" }))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Expired), "{err}");
    let err = h
        .controller
        .save_draft(&instance.token, json!({ "name": "Ada" }))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Expired), "{err}");

    let stored = h.stored(&instance.id).await;
    assert_eq!(stored.status, FormStatus::Sent);
    assert!(stored.submitted_at.is_none());
}

#[tokio::test]
async fn expiry_is_strictly_after_expires_at() {
    let h = harness();
    let instance = h.sent_form().await;

    h.clock.advance(Duration::days(7));
    h.controller
        .save_draft(&instance.token, json!({ "name": "Ada" }))
        .await
        .expect("still open at exactly expires_at");

    h.clock.advance(Duration::seconds(1));
    for err in [
        h.controller
            .save_draft(&instance.token, json!({ "name": "Ada" }))
            .await
            .unwrap_err(),
        h.controller
            .submit_form(&instance.token, json!({ "name": "Ada" }))
            .await
            .unwrap_err(),
        h.controller.get_draft(&instance.token).await.unwrap_err(),
    ] {
        assert!(matches!(err, LifecycleError::Expired), "{err}");
        assert_eq!(err.to_string(), "This form has expired");
    }

    // Expiry is derived, never written back.
    assert_eq!(h.stored(&instance.id).await.status, FormStatus::InProgress);
    let view = h.controller.open_form(&instance.token).await.unwrap();
    assert_eq!(view.status, EffectiveStatus::Expired);
}

#[tokio::test]
async fn completed_and_expired_reports_already_submitted() {
    let h = harness();
    let instance = h.sent_form().await;
    h.controller
        .submit_form(&instance.token, json!({ "name": "Ada" }))
        .await
        .unwrap();

    h.clock.advance(Duration::days(30));
    let err = h
        .controller
        .submit_form(&instance.token, json!({ "name": "Ada" }))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadySubmitted), "{err}");

    let view = h.controller.open_form(&instance.token).await.unwrap();
    assert_eq!(view.status, EffectiveStatus::Completed);
}

#[tokio::test]
async fn invalid_submission_reports_first_field_and_changes_nothing() {
    let h = harness();
    let instance = h.sent_form().await;

    let err = h
        .controller
        .submit_form(&instance.token, json!({ "name": "", "age": -1 }))
        .await
        .unwrap_err();
    let LifecycleError::ValidationFailed { message, errors } = &err else {
        panic!("expected validation failure, got {err}");
    };
    assert_eq!(message, "name: name is required");
    assert_eq!(err.to_string(), "Validation failed: name: name is required");
    assert_eq!(err.status_code(), 422);
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[1].path, "age");

    let stored = h.stored(&instance.id).await;
    assert_eq!(stored.status, FormStatus::Sent);
    assert!(stored.submitted_at.is_none());
}

#[tokio::test]
async fn draft_save_replaces_the_whole_document() {
    let h = harness();
    let instance = h.sent_form().await;

    let first = h
        .controller
        .save_draft(&instance.token, json!({ "name": "Ada", "age": 36 }))
        .await
        .unwrap();
    assert_eq!(first.status, FormStatus::InProgress);

    h.clock.advance(Duration::minutes(5));
    let second = h
        .controller
        .save_draft(&instance.token, json!({ "age": 37 }))
        .await
        .unwrap();
    assert_eq!(second.status, FormStatus::InProgress);

    let draft = h.controller.get_draft(&instance.token).await.unwrap();
    assert_eq!(draft.data, json!({ "age": 37 }));
    assert_eq!(draft.last_saved_at, Some(second.saved_at));
    assert_eq!(draft.status, EffectiveStatus::InProgress);
}

#[tokio::test]
async fn draft_must_be_an_object() {
    let h = harness();
    let instance = h.sent_form().await;
    let err = h
        .controller
        .save_draft(&instance.token, json!(["not", "an", "object"]))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidRequest { .. }), "{err}");
    assert_eq!(h.stored(&instance.id).await.status, FormStatus::Sent);
}

#[tokio::test]
async fn draft_is_not_validated_against_the_schema() {
    let h = harness();
    let instance = h.sent_form().await;
    h.controller
        .save_draft(&instance.token, json!({ "age": "not a number" }))
        .await
        .unwrap();
}

#[tokio::test]
async fn empty_draft_reads_as_empty_object() {
    let h = harness();
    let instance = h.sent_form().await;
    let draft = h.controller.get_draft(&instance.token).await.unwrap();
    assert_eq!(draft.data, json!({}));
    assert!(draft.last_saved_at.is_none());
    assert_eq!(draft.status, EffectiveStatus::Sent);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submits_yield_exactly_one_success() {
    let h = harness();
    let instance = h.sent_form().await;

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let controller = Arc::clone(&h.controller);
            let token = instance.token.clone();
            tokio::spawn(async move {
                controller
                    .submit_form(&token, json!({ "name": format!("attempt {i}") }))
                    .await
            })
        })
        .collect();

    let mut successes = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(LifecycleError::AlreadySubmitted) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(successes, 1);

    let id = instance.id.clone();
    let response = h
        .store
        .read(move |uow| uow.find_response(&id))
        .await
        .unwrap()
        .unwrap();
    assert!(response.submission_id.is_some());
}

#[tokio::test]
async fn every_action_leaves_one_audit_entry() {
    let h = harness();
    let instance = h.sent_form().await;

    h.controller.open_form(&instance.token).await.unwrap();
    h.controller.open_form(&instance.token).await.unwrap();
    h.controller
        .save_draft(&instance.token, json!({ "name": "Ada" }))
        .await
        .unwrap();
    h.controller
        .submit_form(&instance.token, json!({ "name": "Ada", "age": 36 }))
        .await
        .unwrap();

    let entries = h.controller.audit_trail(OWNER, &instance.id).await.unwrap();
    let seen: Vec<(&str, ActorType)> = entries
        .iter()
        .map(|e| (e.action.as_str(), e.actor_type))
        .collect();
    assert_eq!(
        seen,
        vec![
            ("created", ActorType::Owner),
            ("OPENED", ActorType::Client),
            ("AUTO_SAVE", ActorType::Client),
            ("SUBMITTED", ActorType::Client),
        ]
    );
    assert_eq!(entries[0].actor_id.as_deref(), Some(OWNER));
    assert_eq!(entries[2].metadata, json!({ "fieldCount": 1 }));
    assert_eq!(entries[3].metadata["fieldCount"], 2);
    assert!(entries.iter().all(|e| !e.metadata.to_string().contains("Ada")));
}

#[tokio::test]
async fn audit_trail_is_owner_scoped() {
    let h = harness();
    let instance = h.sent_form().await;
    let err = h
        .controller
        .audit_trail("someone-else", &instance.id)
        .await
        .unwrap_err();
    assert!(
        matches!(err, LifecycleError::NotFound { resource: Resource::Instance }),
        "{err}"
    );
}

#[tokio::test]
async fn open_form_stamps_opened_at_once() {
    let h = harness();
    let instance = h.sent_form().await;
    let first_open = h.clock.now();

    let view = h.controller.open_form(&instance.token).await.unwrap();
    assert_eq!(view.status, EffectiveStatus::Sent);
    assert_eq!(view.template_name, "New client intake");
    assert_eq!(view.draft, json!({}));

    h.clock.advance(Duration::hours(1));
    h.controller.open_form(&instance.token).await.unwrap();
    assert_eq!(h.stored(&instance.id).await.opened_at, Some(first_open));
}

#[tokio::test]
async fn open_form_after_expiry_does_not_stamp() {
    let h = harness();
    let instance = h.sent_form().await;
    h.clock.advance(Duration::days(8));

    let view = h.controller.open_form(&instance.token).await.unwrap();
    assert_eq!(view.status, EffectiveStatus::Expired);
    assert!(h.stored(&instance.id).await.opened_at.is_none());
}

#[tokio::test]
async fn instance_keeps_its_schema_snapshot() {
    let h = harness();
    let template_id = h.template("intake", intake_schema()).await;
    let old = h.send(&template_id).await.form_instance;

    let updated = h
        .controller
        .update_template(
            OWNER,
            &template_id,
            TemplateChanges {
                schema: Some(json!({
                    "type": "object",
                    "required": ["name", "phone"],
                    "properties": {
                        "name": { "type": "string" },
                        "phone": { "type": "string" }
                    }
                })),
                ..TemplateChanges::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.version, 2);

    let new = h.send(&template_id).await.form_instance;
    assert_eq!(new.template_version, 2);

    h.controller
        .submit_form(&old.token, json!({ "name": "Ada" }))
        .await
        .expect("old instance validates against its snapshot");
    let err = h
        .controller
        .submit_form(&new.token, json!({ "name": "Ada" }))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Validation failed: phone: phone is required");
}

#[tokio::test]
async fn create_rejects_bad_email_and_expiry() {
    let h = harness();
    let template_id = h.template("intake", intake_schema()).await;

    let mut bad_email = request(&template_id);
    bad_email.client_email = "not-an-email".to_string();
    let err = h.controller.create_instance(OWNER, bad_email).await.unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidRequest { .. }), "{err}");

    for days in [0.25, 31.0] {
        let mut req = request(&template_id);
        req.expiry_days = Some(days);
        let err = h.controller.create_instance(OWNER, req).await.unwrap_err();
        assert_eq!(err.status_code(), 400, "{days}: {err}");
    }

    let mut half_day = request(&template_id);
    half_day.expiry_days = Some(0.5);
    let created = h.controller.create_instance(OWNER, half_day).await.unwrap();
    let instance = created.form_instance;
    assert_eq!(instance.expires_at - instance.created_at, Duration::hours(12));
}

#[tokio::test]
async fn create_normalizes_email_and_message() {
    let h = harness();
    let template_id = h.template("intake", intake_schema()).await;
    let mut req = request(&template_id);
    req.client_email = "  Client@Example.COM ".to_string();
    req.personal_message = Some("   ".to_string());

    let instance = h.controller.create_instance(OWNER, req).await.unwrap().form_instance;
    assert_eq!(instance.client_email, "client@example.com");
    assert!(instance.personal_message.is_none());
}

#[tokio::test]
async fn missing_owner_is_unauthenticated() {
    let h = harness();
    let template_id = h.template("intake", intake_schema()).await;
    let err = h
        .controller
        .create_instance("  ", request(&template_id))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Unauthenticated), "{err}");
    assert_eq!(err.status_code(), 401);

    let err = h.controller.get_template("", &template_id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Unauthenticated), "{err}");
}

#[tokio::test]
async fn unknown_or_foreign_template_cannot_be_sent() {
    let h = harness();
    let err = h
        .controller
        .create_instance(OWNER, request("missing"))
        .await
        .unwrap_err();
    assert!(
        matches!(err, LifecycleError::NotFound { resource: Resource::Template }),
        "{err}"
    );

    let template_id = h.template("intake", intake_schema()).await;
    let err = h
        .controller
        .create_instance("owner-2", request(&template_id))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::NotFound { .. }), "{err}");
}

#[tokio::test]
async fn template_lifecycle() {
    let h = harness();
    let template_id = h.template("intake", intake_schema()).await;

    let dup = h
        .controller
        .create_template(
            OWNER,
            NewTemplate {
                slug: "intake".to_string(),
                name: "Again".to_string(),
                description: None,
                schema: intake_schema(),
                presentation: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(dup, LifecycleError::InvalidRequest { .. }), "{dup}");

    let renamed = h
        .controller
        .update_template(
            OWNER,
            &template_id,
            TemplateChanges {
                name: Some("Returning client".to_string()),
                ..TemplateChanges::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.name, "Returning client");
    assert_eq!(renamed.version, 2);

    let no_changes = h
        .controller
        .update_template(OWNER, &template_id, TemplateChanges::default())
        .await
        .unwrap_err();
    assert!(matches!(no_changes, LifecycleError::InvalidRequest { .. }));

    let deactivated = h.controller.deactivate_template(OWNER, &template_id).await.unwrap();
    assert!(!deactivated.is_active);
    let again = h.controller.deactivate_template(OWNER, &template_id).await.unwrap();
    assert_eq!(again, deactivated);

    let err = h
        .controller
        .create_instance(OWNER, request(&template_id))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::NotFound { .. }), "{err}");

    let err = h
        .controller
        .update_template(
            OWNER,
            &template_id,
            TemplateChanges {
                name: Some("Too late".to_string()),
                ..TemplateChanges::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidRequest { .. }), "{err}");

    let fetched = h.controller.get_template(OWNER, &template_id).await.unwrap();
    assert_eq!(fetched, deactivated);
    let err = h
        .controller
        .get_template("owner-2", &template_id)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::NotFound { .. }), "{err}");

    let id = template_id.clone();
    let actions: Vec<String> = h
        .store
        .read(move |uow| {
            Ok::<_, DbError>(
                uow.entries_for(intake_engine::EntityType::FormTemplate, &id)?
                    .into_iter()
                    .map(|e| e.action)
                    .collect(),
            )
        })
        .await
        .unwrap();
    assert_eq!(
        actions,
        vec!["template_created", "template_updated", "template_deactivated"]
    );
}

#[tokio::test]
async fn template_schema_and_slug_are_checked() {
    let h = harness();
    let bad_schema = h
        .controller
        .create_template(
            OWNER,
            NewTemplate {
                slug: "bad".to_string(),
                name: "Bad".to_string(),
                description: None,
                schema: json!({ "type": "string" }),
                presentation: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(bad_schema, LifecycleError::InvalidRequest { .. }), "{bad_schema}");

    let bad_slug = h
        .controller
        .create_template(
            OWNER,
            NewTemplate {
                slug: "Not A Slug".to_string(),
                name: "Bad".to_string(),
                description: None,
                schema: intake_schema(),
                presentation: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(bad_slug, LifecycleError::InvalidRequest { .. }), "{bad_slug}");
}
