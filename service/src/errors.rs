//! Service error types
//!
//! Expected business-rule failures (`NotFound`, `Expired`, `AlreadySubmitted`,
//! `ValidationFailed`, `InvalidRequest`, `Unauthenticated`) are ordinary `Err`
//! values with a single-line, user-presentable message. `Internal` covers
//! storage and other unexpected faults; the boundary logs it and reports a
//! generic message.

use intake_engine::FieldError;
use intake_store::DbError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Error category for structured logging and status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    Expired,
    AlreadySubmitted,
    ValidationFailed,
    InvalidRequest,
    Unauthenticated,
    /// `service.toml` or env misconfigured
    ConfigError,
    InternalError,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Expired => "EXPIRED",
            Self::AlreadySubmitted => "ALREADY_SUBMITTED",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::ConfigError => "CONFIG_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// What a `NotFound` failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Public form looked up by token.
    Form,
    Template,
    /// Instance looked up by id on the owner side.
    Instance,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Form => "Form",
            Self::Template => "Template",
            Self::Instance => "Form instance",
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{} not found", .resource.as_str())]
    NotFound { resource: Resource },

    #[error("This form has expired")]
    Expired,

    #[error("This form has already been submitted")]
    AlreadySubmitted,

    /// `message` is `"<path>: <message>"` of the first field error.
    #[error("Validation failed: {message}")]
    ValidationFailed {
        message: String,
        errors: Vec<FieldError>,
    },

    #[error("{message}")]
    InvalidRequest { message: String },

    #[error("Authentication required")]
    Unauthenticated,

    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl LifecycleError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Expired => ErrorCategory::Expired,
            Self::AlreadySubmitted => ErrorCategory::AlreadySubmitted,
            Self::ValidationFailed { .. } => ErrorCategory::ValidationFailed,
            Self::InvalidRequest { .. } => ErrorCategory::InvalidRequest,
            Self::Unauthenticated => ErrorCategory::Unauthenticated,
            Self::Internal { .. } => ErrorCategory::InternalError,
        }
    }

    /// HTTP-equivalent status, also used as the RPC error code.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Expired | Self::AlreadySubmitted | Self::InvalidRequest { .. } => 400,
            Self::ValidationFailed { .. } => 422,
            Self::Unauthenticated => 401,
            Self::Internal { .. } => 500,
        }
    }

    /// False only for faults the caller could not have caused.
    pub fn is_expected(&self) -> bool {
        !matches!(self, Self::Internal { .. })
    }

    pub fn not_found(resource: Resource) -> Self {
        Self::NotFound { resource }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<DbError> for LifecycleError {
    fn from(err: DbError) -> Self {
        Self::internal_with_source("storage failure", err)
    }
}

/// Configuration loading failure.
#[derive(Debug, Error)]
#[error("config error: {message}")]
pub struct ConfigError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::ConfigError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_category() {
        assert_eq!(LifecycleError::not_found(Resource::Form).status_code(), 404);
        assert_eq!(LifecycleError::Expired.status_code(), 400);
        assert_eq!(LifecycleError::AlreadySubmitted.status_code(), 400);
        assert_eq!(LifecycleError::Unauthenticated.status_code(), 401);
        assert_eq!(LifecycleError::internal("boom").status_code(), 500);
        assert_eq!(
            LifecycleError::ValidationFailed {
                message: "name: name is required".to_string(),
                errors: Vec::new(),
            }
            .status_code(),
            422
        );
    }

    #[test]
    fn validation_message_is_prefixed() {
        let err = LifecycleError::ValidationFailed {
            message: "name: name is required".to_string(),
            errors: Vec::new(),
        };
        assert_eq!(err.to_string(), "Validation failed: name: name is required");
        assert_eq!(err.category().as_str(), "VALIDATION_FAILED");
    }

    #[test]
    fn storage_errors_are_unexpected() {
        let err: LifecycleError = DbError::Pool("exhausted".to_string()).into();
        assert!(!err.is_expected());
        assert_eq!(err.category(), ErrorCategory::InternalError);
        assert!(LifecycleError::Expired.is_expected());
    }
}
