//! Storage seams for the lifecycle controller.
//!
//! The controller never talks to SQLite directly. It hands a closure to
//! [`FormStore::atomically`], which runs it against a [`UnitOfWork`] inside a
//! single write-locking transaction: either every write in the closure
//! commits or none does.

use crate::{DbError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use intake_engine::{
    AuditLogEntry, EntityType, FormInstance, FormResponse, FormTemplate, NewAuditEntry,
};
use serde_json::Value;

/// Current draft snapshot of an instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub data: Value,
    pub last_saved_at: Option<DateTime<Utc>>,
}

/// A validated final submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub submission_id: String,
    pub data: Value,
    pub submitted_at: DateTime<Utc>,
}

pub trait TemplateRepository {
    fn insert_template(&self, template: &FormTemplate) -> Result<()>;

    /// Overwrites every mutable column of an existing template.
    fn update_template(&self, template: &FormTemplate) -> Result<()>;

    fn find_template(&self, id: &str) -> Result<Option<FormTemplate>>;

    fn find_template_by_slug(&self, slug: &str) -> Result<Option<FormTemplate>>;
}

pub trait InstanceRepository {
    fn insert_instance(&self, instance: &FormInstance) -> Result<()>;

    fn find_instance(&self, id: &str) -> Result<Option<FormInstance>>;

    fn find_instance_by_token(&self, token: &str) -> Result<Option<FormInstance>>;

    fn mark_in_progress(&self, instance_id: &str) -> Result<()>;

    fn mark_completed(&self, instance_id: &str, submitted_at: DateTime<Utc>) -> Result<()>;

    /// Stamps `opened_at` unless already set. Returns whether it was stamped.
    fn mark_opened(&self, instance_id: &str, opened_at: DateTime<Utc>) -> Result<bool>;
}

pub trait ResponseRepository {
    fn find_response(&self, instance_id: &str) -> Result<Option<FormResponse>>;

    /// Stores the submitted payload and resets the draft to `{}`.
    fn record_submission(&self, instance_id: &str, submission: &Submission) -> Result<()>;
}

/// Whole-document draft persistence.
///
/// `set_draft` replaces the stored draft with exactly `data`; keys absent from
/// `data` are dropped. There is no merge.
pub trait DraftStore {
    fn get_draft(&self, instance_id: &str) -> Result<Option<Draft>>;

    fn set_draft(&self, instance_id: &str, data: &Value, saved_at: DateTime<Utc>) -> Result<()>;
}

/// Append-only audit log.
pub trait AuditSink {
    /// Appends one entry and returns its id.
    fn append(&self, entry: &NewAuditEntry) -> Result<i64>;

    /// Entries for one entity in insertion order.
    fn entries_for(&self, entity_type: EntityType, entity_id: &str) -> Result<Vec<AuditLogEntry>>;
}

/// Everything a lifecycle operation may read or write within one transaction.
pub trait UnitOfWork:
    TemplateRepository + InstanceRepository + ResponseRepository + DraftStore + AuditSink
{
}

impl<T> UnitOfWork for T where
    T: TemplateRepository + InstanceRepository + ResponseRepository + DraftStore + AuditSink
{
}

/// Transactional access to form storage.
#[async_trait]
pub trait FormStore: Send + Sync + 'static {
    /// Runs `op` inside one write-locking transaction. Commits when `op`
    /// returns `Ok`, rolls back otherwise.
    ///
    /// Concurrent calls touching the same rows are serialized by the store.
    async fn atomically<T, E, F>(&self, op: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&dyn UnitOfWork) -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<DbError> + Send + 'static;

    /// Runs a read-only `op` against a consistent snapshot.
    async fn read<T, E, F>(&self, op: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&dyn UnitOfWork) -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<DbError> + Send + 'static;
}
