//! Domain core for client intake forms.
//!
//! Everything in this crate is pure: schemas and their validator, the
//! lifecycle records, identifier generation and an injectable clock. Storage
//! lives in `intake-store`; the lifecycle controller and IPC boundary live in
//! `intake-service`.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod clock;
pub mod model;
pub mod schema;
pub mod submission_id;
pub mod token;
pub mod validation;

pub use clock::{Clock, MockClock, SystemClock};
pub use model::{
    ActorType, AuditLogEntry, EffectiveStatus, EntityType, FormInstance, FormResponse,
    FormStatus, FormTemplate, NewAuditEntry, actions, field_count, new_id,
};
pub use schema::{FieldSchema, FormSchema, SchemaError};
pub use submission_id::{generate_submission_id, is_submission_id};
pub use token::{generate_token, looks_like_token};
pub use validation::{
    ErrorKind, FieldError, PayloadValidator, SchemaValidator, ValidationResult, is_valid_email,
    validate,
};
