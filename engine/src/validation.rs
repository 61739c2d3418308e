//! Payload validation against a [`FormSchema`].
//!
//! The validator is pure: it never performs I/O and identical inputs always
//! yield identical error lists. Errors accumulate (no short-circuit) and are
//! ordered deterministically: for each object node the `required` pass runs
//! first, then every declared property is checked in declaration order.
//!
//! Payload keys that the schema does not declare are ignored.

use crate::schema::{
    ArraySchema, FieldSchema, FormSchema, NumberSchema, ObjectSchema, StringFormat, StringSchema,
};
use chrono::NaiveDate;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::OnceLock;

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

/// Category of a field-level validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Required,
    Type,
    Format,
    MinLength,
    MaxLength,
    Pattern,
    Enum,
    Minimum,
    Maximum,
    MinItems,
    MaxItems,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Type => "type",
            Self::Format => "format",
            Self::MinLength => "minLength",
            Self::MaxLength => "maxLength",
            Self::Pattern => "pattern",
            Self::Enum => "enum",
            Self::Minimum => "minimum",
            Self::Maximum => "maximum",
            Self::MinItems => "minItems",
            Self::MaxItems => "maxItems",
        }
    }
}

/// One field-level validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    /// Dotted path to the offending value (`address.city`, `children[1]`).
    pub path: String,
    pub message: String,
    pub kind: ErrorKind,
    /// The numeric limit that was violated, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
}

impl FieldError {
    fn new(path: &str, kind: ErrorKind, message: String) -> Self {
        Self {
            path: path.to_string(),
            message,
            kind,
            constraint: None,
            allowed_values: None,
        }
    }

    fn with_constraint(mut self, constraint: Value) -> Self {
        self.constraint = Some(constraint);
        self
    }

    /// `"<path>: <message>"`, the form shown to end users.
    pub fn qualified_message(&self) -> String {
        if self.path.is_empty() {
            self.message.clone()
        } else {
            format!("{}: {}", self.path, self.message)
        }
    }
}

/// Outcome of validating one payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<FieldError>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<FieldError>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    pub fn first_error(&self) -> Option<&FieldError> {
        self.errors.first()
    }
}

/// Injection seam for payload validation.
pub trait PayloadValidator: Send + Sync {
    fn validate(&self, schema: &FormSchema, data: &Value) -> ValidationResult;
}

/// The built-in validator for the supported schema subset.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl PayloadValidator for SchemaValidator {
    fn validate(&self, schema: &FormSchema, data: &Value) -> ValidationResult {
        validate(schema, data)
    }
}

/// Validate `data` against `schema`.
pub fn validate(schema: &FormSchema, data: &Value) -> ValidationResult {
    let mut errors = Vec::new();
    match data {
        Value::Object(map) => validate_object(schema.root(), map, "", &mut errors),
        _ => errors.push(FieldError::new(
            "",
            ErrorKind::Type,
            "Form data must be an object".to_string(),
        )),
    }
    ValidationResult::from_errors(errors)
}

/// `local@domain.tld` check shared with request normalization. Any Unicode
/// whitespace rejects the address; the pattern's `\s` only covers ASCII.
pub fn is_valid_email(candidate: &str) -> bool {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    if candidate.chars().any(char::is_whitespace) {
        return false;
    }
    EMAIL
        .get_or_init(|| Regex::new(EMAIL_PATTERN).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(candidate))
}

/// Missing, `null` and `""` all count as "no answer".
fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

fn validate_object(
    node: &ObjectSchema,
    map: &Map<String, Value>,
    path: &str,
    errors: &mut Vec<FieldError>,
) {
    for name in &node.required {
        if is_blank(map.get(name)) {
            let label = node
                .properties
                .get(name)
                .and_then(FieldSchema::title)
                .unwrap_or(name);
            errors.push(FieldError::new(
                &child_path(path, name),
                ErrorKind::Required,
                format!("{label} is required"),
            ));
        }
    }

    for (name, field) in node.properties.iter() {
        let value = map.get(name);
        if is_blank(value) {
            continue;
        }
        if let Some(value) = value {
            let label = field.title().unwrap_or(name);
            validate_value(field, label, value, &child_path(path, name), errors);
        }
    }
}

fn validate_value(
    field: &FieldSchema,
    label: &str,
    value: &Value,
    path: &str,
    errors: &mut Vec<FieldError>,
) {
    match field {
        FieldSchema::String(schema) => check_string(schema, label, value, path, errors),
        FieldSchema::Number(schema) => check_number(schema, label, value, path, errors),
        FieldSchema::Boolean(_) => {
            if !value.is_boolean() {
                errors.push(FieldError::new(
                    path,
                    ErrorKind::Type,
                    format!("{label} must be true or false"),
                ));
            }
        }
        FieldSchema::Object(schema) => match value {
            Value::Object(map) => validate_object(schema, map, path, errors),
            _ => errors.push(FieldError::new(
                path,
                ErrorKind::Type,
                format!("{label} must be an object"),
            )),
        },
        FieldSchema::Array(schema) => check_array(schema, label, value, path, errors),
    }
}

fn check_string(
    schema: &StringSchema,
    label: &str,
    value: &Value,
    path: &str,
    errors: &mut Vec<FieldError>,
) {
    let Some(text) = value.as_str() else {
        errors.push(FieldError::new(
            path,
            ErrorKind::Type,
            format!("{label} must be a string"),
        ));
        return;
    };

    if let Some(format) = schema.format {
        let (ok, message) = match format {
            StringFormat::Email => (
                is_valid_email(text),
                format!("{label} must be a valid email address"),
            ),
            StringFormat::Uri => (
                url::Url::parse(text).is_ok(),
                format!("{label} must be a valid URL"),
            ),
            StringFormat::Date => (
                NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok(),
                format!("{label} must be a valid date (YYYY-MM-DD)"),
            ),
        };
        if !ok {
            errors.push(FieldError::new(path, ErrorKind::Format, message));
        }
    }

    let length = text.chars().count();
    if let Some(min) = schema.min_length
        && length < min
    {
        errors.push(
            FieldError::new(
                path,
                ErrorKind::MinLength,
                format!("{label} must be at least {min} characters"),
            )
            .with_constraint(json!(min)),
        );
    }
    if let Some(max) = schema.max_length
        && length > max
    {
        errors.push(
            FieldError::new(
                path,
                ErrorKind::MaxLength,
                format!("{label} must be at most {max} characters"),
            )
            .with_constraint(json!(max)),
        );
    }

    if let Some(pattern) = &schema.pattern
        && !pattern.is_match(text)
    {
        let message = schema
            .pattern_message
            .clone()
            .unwrap_or_else(|| format!("{label} format is invalid"));
        errors.push(FieldError::new(path, ErrorKind::Pattern, message));
    }

    if let Some(allowed) = &schema.allowed
        && !allowed.iter().any(|candidate| candidate == text)
    {
        let mut error = FieldError::new(
            path,
            ErrorKind::Enum,
            format!("{label} must be one of: {}", allowed.join(", ")),
        );
        error.allowed_values = Some(allowed.clone());
        errors.push(error);
    }
}

fn check_number(
    schema: &NumberSchema,
    label: &str,
    value: &Value,
    path: &str,
    errors: &mut Vec<FieldError>,
) {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    };
    let Some(number) = number else {
        errors.push(FieldError::new(
            path,
            ErrorKind::Type,
            format!("{label} must be a number"),
        ));
        return;
    };

    if let Some(min) = schema.minimum
        && number < min
    {
        errors.push(
            FieldError::new(path, ErrorKind::Minimum, format!("{label} must be at least {min}"))
                .with_constraint(json!(min)),
        );
    }
    if let Some(max) = schema.maximum
        && number > max
    {
        errors.push(
            FieldError::new(path, ErrorKind::Maximum, format!("{label} must be at most {max}"))
                .with_constraint(json!(max)),
        );
    }
}

fn check_array(
    schema: &ArraySchema,
    label: &str,
    value: &Value,
    path: &str,
    errors: &mut Vec<FieldError>,
) {
    let Some(items) = value.as_array() else {
        errors.push(FieldError::new(
            path,
            ErrorKind::Type,
            format!("{label} must be a list"),
        ));
        return;
    };

    if let Some(min) = schema.min_items
        && items.len() < min
    {
        errors.push(
            FieldError::new(
                path,
                ErrorKind::MinItems,
                format!("{label} must have at least {min} items"),
            )
            .with_constraint(json!(min)),
        );
    }
    if let Some(max) = schema.max_items
        && items.len() > max
    {
        errors.push(
            FieldError::new(
                path,
                ErrorKind::MaxItems,
                format!("{label} must have at most {max} items"),
            )
            .with_constraint(json!(max)),
        );
    }

    if let Some(item_schema) = &schema.items {
        let item_label = item_schema.title().unwrap_or(label);
        for (index, item) in items.iter().enumerate() {
            validate_value(item_schema, item_label, item, &format!("{path}[{index}]"), errors);
        }
    }
}
