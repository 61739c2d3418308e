//! SQLite-backed [`FormStore`].

use crate::async_wrapper::with_connection;
use crate::connection::initialize_pool;
use crate::migrations::migrate_to_latest;
use crate::repository::{
    AuditSink, Draft, DraftStore, FormStore, InstanceRepository, ResponseRepository, Submission,
    TemplateRepository, UnitOfWork,
};
use crate::transactions::execute_in_transaction;
use crate::{DbError, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use intake_engine::{
    ActorType, AuditLogEntry, EntityType, FormInstance, FormResponse, FormStatus, FormTemplate,
    NewAuditEntry,
};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;

const TEMPLATE_COLUMNS: &str = "id, owner_id, slug, name, description, schema_json, \
     presentation_json, version, is_active, created_at, updated_at";

const INSTANCE_COLUMNS: &str = "id, token, template_id, template_version, schema_json, owner_id, \
     client_email, personal_message, status, created_at, expires_at, opened_at, submitted_at";

const RESPONSE_COLUMNS: &str =
    "instance_id, draft_data, submitted_data, submission_id, last_saved_at, submitted_at";

const AUDIT_COLUMNS: &str =
    "id, entity_type, entity_id, action, actor_type, actor_id, metadata, created_at";

/// Form storage over a pooled SQLite database.
#[derive(Clone)]
pub struct SqliteFormStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteFormStore {
    /// Open (or create) the database at `db_path` and migrate it.
    pub fn open(db_path: &Path, pool_size: u32) -> Result<Self> {
        let pool = initialize_pool(db_path, pool_size)?;
        let mut conn = pool
            .get()
            .map_err(|e| DbError::Pool(format!("Failed to get connection: {e}")))?;
        migrate_to_latest(&mut conn)?;
        drop(conn);

        tracing::info!(path = %db_path.display(), "form store ready");
        Ok(Self { pool })
    }

    async fn run<T, E, F>(&self, behavior: TransactionBehavior, op: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&dyn UnitOfWork) -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<DbError> + Send + 'static,
    {
        with_connection(&self.pool, move |conn| {
            execute_in_transaction(conn, behavior, |tx| op(&SqliteUnitOfWork { conn: tx }))
        })
        .await
    }
}

#[async_trait]
impl FormStore for SqliteFormStore {
    async fn atomically<T, E, F>(&self, op: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&dyn UnitOfWork) -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<DbError> + Send + 'static,
    {
        self.run(TransactionBehavior::Immediate, op).await
    }

    async fn read<T, E, F>(&self, op: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&dyn UnitOfWork) -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<DbError> + Send + 'static,
    {
        self.run(TransactionBehavior::Deferred, op).await
    }
}

/// Repository view over one open transaction.
struct SqliteUnitOfWork<'a> {
    conn: &'a Connection,
}

impl TemplateRepository for SqliteUnitOfWork<'_> {
    fn insert_template(&self, template: &FormTemplate) -> Result<()> {
        self.conn.execute(
            "INSERT INTO form_templates
             (id, owner_id, slug, name, description, schema_json, presentation_json,
              version, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                template.id,
                template.owner_id,
                template.slug,
                template.name,
                template.description,
                serde_json::to_string(&template.schema)?,
                template
                    .presentation
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                template.version,
                template.is_active,
                timestamp(template.created_at),
                timestamp(template.updated_at),
            ],
        )?;
        Ok(())
    }

    fn update_template(&self, template: &FormTemplate) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE form_templates
             SET name = ?2, description = ?3, schema_json = ?4, presentation_json = ?5,
                 version = ?6, is_active = ?7, updated_at = ?8
             WHERE id = ?1",
            params![
                template.id,
                template.name,
                template.description,
                serde_json::to_string(&template.schema)?,
                template
                    .presentation
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                template.version,
                template.is_active,
                timestamp(template.updated_at),
            ],
        )?;
        expect_one_row(updated, "form_templates", &template.id)
    }

    fn find_template(&self, id: &str) -> Result<Option<FormTemplate>> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM form_templates WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], template_from_row)
            .optional()?)
    }

    fn find_template_by_slug(&self, slug: &str) -> Result<Option<FormTemplate>> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM form_templates WHERE slug = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![slug], template_from_row)
            .optional()?)
    }
}

impl InstanceRepository for SqliteUnitOfWork<'_> {
    fn insert_instance(&self, instance: &FormInstance) -> Result<()> {
        self.conn.execute(
            "INSERT INTO form_instances
             (id, token, template_id, template_version, schema_json, owner_id, client_email,
              personal_message, status, created_at, expires_at, opened_at, submitted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                instance.id,
                instance.token,
                instance.template_id,
                instance.template_version,
                serde_json::to_string(&instance.schema)?,
                instance.owner_id,
                instance.client_email,
                instance.personal_message,
                instance.status.as_str(),
                timestamp(instance.created_at),
                timestamp(instance.expires_at),
                instance.opened_at.map(timestamp),
                instance.submitted_at.map(timestamp),
            ],
        )?;
        Ok(())
    }

    fn find_instance(&self, id: &str) -> Result<Option<FormInstance>> {
        let sql = format!("SELECT {INSTANCE_COLUMNS} FROM form_instances WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], instance_from_row)
            .optional()?)
    }

    fn find_instance_by_token(&self, token: &str) -> Result<Option<FormInstance>> {
        let sql = format!("SELECT {INSTANCE_COLUMNS} FROM form_instances WHERE token = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![token], instance_from_row)
            .optional()?)
    }

    fn mark_in_progress(&self, instance_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE form_instances SET status = ?2 WHERE id = ?1 AND status = ?3",
            params![
                instance_id,
                FormStatus::InProgress.as_str(),
                FormStatus::Sent.as_str()
            ],
        )?;
        Ok(())
    }

    fn mark_completed(&self, instance_id: &str, submitted_at: DateTime<Utc>) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE form_instances SET status = ?2, submitted_at = ?3 WHERE id = ?1",
            params![
                instance_id,
                FormStatus::Completed.as_str(),
                timestamp(submitted_at)
            ],
        )?;
        expect_one_row(updated, "form_instances", instance_id)
    }

    fn mark_opened(&self, instance_id: &str, opened_at: DateTime<Utc>) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE form_instances SET opened_at = ?2 WHERE id = ?1 AND opened_at IS NULL",
            params![instance_id, timestamp(opened_at)],
        )?;
        Ok(updated == 1)
    }
}

impl ResponseRepository for SqliteUnitOfWork<'_> {
    fn find_response(&self, instance_id: &str) -> Result<Option<FormResponse>> {
        let sql = format!("SELECT {RESPONSE_COLUMNS} FROM form_responses WHERE instance_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![instance_id], response_from_row)
            .optional()?)
    }

    fn record_submission(&self, instance_id: &str, submission: &Submission) -> Result<()> {
        self.conn.execute(
            "INSERT INTO form_responses
             (instance_id, draft_data, submitted_data, submission_id, submitted_at)
             VALUES (?1, '{}', ?2, ?3, ?4)
             ON CONFLICT(instance_id) DO UPDATE SET
                draft_data = '{}',
                submitted_data = excluded.submitted_data,
                submission_id = excluded.submission_id,
                submitted_at = excluded.submitted_at",
            params![
                instance_id,
                serde_json::to_string(&submission.data)?,
                submission.submission_id,
                timestamp(submission.submitted_at),
            ],
        )?;
        Ok(())
    }
}

impl DraftStore for SqliteUnitOfWork<'_> {
    fn get_draft(&self, instance_id: &str) -> Result<Option<Draft>> {
        Ok(self
            .conn
            .query_row(
                "SELECT draft_data, last_saved_at FROM form_responses WHERE instance_id = ?1",
                params![instance_id],
                |row| {
                    Ok(Draft {
                        data: json_column(row, 0)?,
                        last_saved_at: optional_timestamp_column(row, 1)?,
                    })
                },
            )
            .optional()?)
    }

    fn set_draft(&self, instance_id: &str, data: &Value, saved_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO form_responses (instance_id, draft_data, last_saved_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(instance_id) DO UPDATE SET
                draft_data = excluded.draft_data,
                last_saved_at = excluded.last_saved_at",
            params![instance_id, serde_json::to_string(data)?, timestamp(saved_at)],
        )?;
        Ok(())
    }
}

impl AuditSink for SqliteUnitOfWork<'_> {
    fn append(&self, entry: &NewAuditEntry) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO audit_log
             (entity_type, entity_id, action, actor_type, actor_id, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.entity_type.as_str(),
                entry.entity_id,
                entry.action,
                entry.actor_type.as_str(),
                entry.actor_id,
                serde_json::to_string(&entry.metadata)?,
                timestamp(entry.created_at),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn entries_for(&self, entity_type: EntityType, entity_id: &str) -> Result<Vec<AuditLogEntry>> {
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_log
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![entity_type.as_str(), entity_id], audit_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn expect_one_row(updated: usize, table: &str, id: &str) -> Result<()> {
    if updated == 1 {
        Ok(())
    } else {
        Err(DbError::Transaction(format!(
            "expected to update one row in {table} for {id}, updated {updated}"
        )))
    }
}

/// Stored timestamp format: RFC3339, UTC, millisecond precision.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn optional_timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|text| {
        DateTime::parse_from_rfc3339(&text)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, e))
}

fn optional_json_column<T: DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|text| serde_json::from_str(&text).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn template_from_row(row: &Row<'_>) -> rusqlite::Result<FormTemplate> {
    Ok(FormTemplate {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        slug: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        schema: json_column(row, 5)?,
        presentation: optional_json_column(row, 6)?,
        version: row.get(7)?,
        is_active: row.get(8)?,
        created_at: timestamp_column(row, 9)?,
        updated_at: timestamp_column(row, 10)?,
    })
}

fn instance_from_row(row: &Row<'_>) -> rusqlite::Result<FormInstance> {
    let status: String = row.get(8)?;
    let status = FormStatus::parse(&status)
        .ok_or_else(|| conversion_error(8, format!("unknown form status `{status}`")))?;

    Ok(FormInstance {
        id: row.get(0)?,
        token: row.get(1)?,
        template_id: row.get(2)?,
        template_version: row.get(3)?,
        schema: json_column(row, 4)?,
        owner_id: row.get(5)?,
        client_email: row.get(6)?,
        personal_message: row.get(7)?,
        status,
        created_at: timestamp_column(row, 9)?,
        expires_at: timestamp_column(row, 10)?,
        opened_at: optional_timestamp_column(row, 11)?,
        submitted_at: optional_timestamp_column(row, 12)?,
    })
}

fn response_from_row(row: &Row<'_>) -> rusqlite::Result<FormResponse> {
    Ok(FormResponse {
        instance_id: row.get(0)?,
        draft_data: json_column(row, 1)?,
        submitted_data: optional_json_column(row, 2)?,
        submission_id: row.get(3)?,
        last_saved_at: optional_timestamp_column(row, 4)?,
        submitted_at: optional_timestamp_column(row, 5)?,
    })
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<AuditLogEntry> {
    let entity_type: String = row.get(1)?;
    let entity_type = EntityType::parse(&entity_type)
        .ok_or_else(|| conversion_error(1, format!("unknown entity type `{entity_type}`")))?;
    let actor_type: String = row.get(4)?;
    let actor_type = ActorType::parse(&actor_type)
        .ok_or_else(|| conversion_error(4, format!("unknown actor type `{actor_type}`")))?;

    Ok(AuditLogEntry {
        id: row.get(0)?,
        entity_type,
        entity_id: row.get(2)?,
        action: row.get(3)?,
        actor_type,
        actor_id: row.get(5)?,
        metadata: json_column(row, 6)?,
        created_at: timestamp_column(row, 7)?,
    })
}
