//! Declarative field schemas for intake forms.
//!
//! A schema is a small, typed subset of JSON Schema. Every node is tagged by
//! its `type` key so the validator can match exhaustively:
//!
//! ```json
//! {
//!   "type": "object",
//!   "required": ["name"],
//!   "properties": {
//!     "name":  { "type": "string", "title": "Full name", "minLength": 2 },
//!     "age":   { "type": "number", "minimum": 0 },
//!     "email": { "type": "string", "format": "email" }
//!   }
//! }
//! ```
//!
//! Property declaration order is preserved; validation errors are reported in
//! that order.

use regex_lite::Regex;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Errors raised while parsing a schema document.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid schema: {0}")]
    Invalid(#[from] serde_json::Error),

    #[error("form schema root must be an object, found {found}")]
    RootNotObject { found: &'static str },
}

/// A single schema node, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldSchema {
    String(StringSchema),
    Number(NumberSchema),
    Boolean(BooleanSchema),
    Object(ObjectSchema),
    Array(ArraySchema),
}

impl FieldSchema {
    /// Human-readable title, if the schema declares one.
    pub fn title(&self) -> Option<&str> {
        match self {
            FieldSchema::String(s) => s.title.as_deref(),
            FieldSchema::Number(n) => n.title.as_deref(),
            FieldSchema::Boolean(b) => b.title.as_deref(),
            FieldSchema::Object(o) => o.title.as_deref(),
            FieldSchema::Array(a) => a.title.as_deref(),
        }
    }

    /// The `type` tag as written in the schema document.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldSchema::String(_) => "string",
            FieldSchema::Number(_) => "number",
            FieldSchema::Boolean(_) => "boolean",
            FieldSchema::Object(_) => "object",
            FieldSchema::Array(_) => "array",
        }
    }
}

/// Formats understood by `string` nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StringFormat {
    /// `local@domain.tld`
    Email,
    /// Anything that parses as an absolute URL.
    #[serde(alias = "url")]
    Uri,
    /// Calendar date, `YYYY-MM-DD`.
    Date,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StringSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<StringFormat>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Pattern>,

    /// Message reported instead of the generic one when `pattern` fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_message: Option<String>,

    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BooleanSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default)]
    pub properties: Properties,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArraySchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<FieldSchema>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

/// Ordered property map of an `object` node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties(Vec<(String, FieldSchema)>);

impl Properties {
    pub fn get(&self, name: &str) -> Option<&FieldSchema> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, schema)| schema)
    }

    /// Iterate in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSchema)> {
        self.0.iter().map(|(key, schema)| (key.as_str(), schema))
    }
}

impl FromIterator<(String, FieldSchema)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, FieldSchema)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for Properties {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, schema) in &self.0 {
            map.serialize_entry(key, schema)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Properties {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PropertiesVisitor;

        impl<'de> Visitor<'de> for PropertiesVisitor {
            type Value = Properties;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of property names to field schemas")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Properties, A::Error> {
                let mut entries: Vec<(String, FieldSchema)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, schema)) = access.next_entry::<String, FieldSchema>()? {
                    if entries.iter().any(|(existing, _)| *existing == key) {
                        return Err(de::Error::custom(format!("duplicate property `{key}`")));
                    }
                    entries.push((key, schema));
                }
                Ok(Properties(entries))
            }
        }

        deserializer.deserialize_map(PropertiesVisitor)
    }
}

/// A compiled `pattern` constraint. Compared and serialized by source text.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: impl Into<String>) -> Result<Self, regex_lite::Error> {
        let source = source.into();
        let regex = Regex::new(&source)?;
        Ok(Self { source, regex })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Unanchored search, like `RegExp.prototype.test`.
    pub fn is_match(&self, haystack: &str) -> bool {
        self.regex.is_match(haystack)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Pattern::new(source.as_str())
            .map_err(|e| de::Error::custom(format!("invalid pattern `{source}`: {e}")))
    }
}

/// Root schema of a form: always an `object` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FieldSchema", into = "FieldSchema")]
pub struct FormSchema(ObjectSchema);

impl FormSchema {
    /// Parse a schema document, rejecting anything but an `object` root.
    pub fn from_value(value: Value) -> Result<Self, SchemaError> {
        let field: FieldSchema = serde_json::from_value(value)?;
        Self::try_from(field)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn root(&self) -> &ObjectSchema {
        &self.0
    }
}

impl TryFrom<FieldSchema> for FormSchema {
    type Error = SchemaError;

    fn try_from(field: FieldSchema) -> Result<Self, Self::Error> {
        match field {
            FieldSchema::Object(root) => Ok(Self(root)),
            other => Err(SchemaError::RootNotObject {
                found: other.type_name(),
            }),
        }
    }
}

impl From<FormSchema> for FieldSchema {
    fn from(schema: FormSchema) -> Self {
        FieldSchema::Object(schema.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parses_nested_schema_in_declaration_order() {
        let schema = FormSchema::from_value(json!({
            "type": "object",
            "required": ["zeta", "alpha"],
            "properties": {
                "zeta": { "type": "string" },
                "alpha": { "type": "number", "minimum": 1 },
                "address": {
                    "type": "object",
                    "required": ["city"],
                    "properties": { "city": { "type": "string" } }
                }
            }
        }))
        .expect("schema parses");

        let names: Vec<&str> = schema.root().properties.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["zeta", "alpha", "address"]);
        assert_eq!(schema.root().required, vec!["zeta", "alpha"]);

        match schema.root().properties.get("address") {
            Some(FieldSchema::Object(address)) => assert_eq!(address.required, vec!["city"]),
            other => panic!("expected object schema, got {other:?}"),
        }
    }

    #[test]
    fn string_constraints_use_camel_case_keys() {
        let field: FieldSchema = serde_json::from_value(json!({
            "type": "string",
            "title": "Postcode",
            "minLength": 3,
            "maxLength": 8,
            "pattern": "^[A-Z0-9 ]+$",
            "patternMessage": "Use capitals and digits",
            "enum": ["AB1", "CD2"],
            "format": "url"
        }))
        .unwrap();

        let FieldSchema::String(s) = field else {
            panic!("expected string schema");
        };
        assert_eq!(s.title.as_deref(), Some("Postcode"));
        assert_eq!(s.min_length, Some(3));
        assert_eq!(s.max_length, Some(8));
        assert_eq!(s.format, Some(StringFormat::Uri));
        assert_eq!(s.pattern_message.as_deref(), Some("Use capitals and digits"));
        assert_eq!(s.allowed, Some(vec!["AB1".to_string(), "CD2".to_string()]));
        assert!(s.pattern.as_ref().is_some_and(|p| p.is_match("AB1 2CD")));
    }

    #[test]
    fn rejects_invalid_pattern() {
        let err = FormSchema::from_value(json!({
            "type": "object",
            "properties": { "code": { "type": "string", "pattern": "([a-z" } }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("invalid pattern"), "{err}");
    }

    #[test]
    fn rejects_unknown_type_tag() {
        let err = FormSchema::from_value(json!({
            "type": "object",
            "properties": { "when": { "type": "datetime" } }
        }));
        assert!(err.is_err());
    }

    #[test]
    fn rejects_non_object_root() {
        let err = FormSchema::from_value(json!({ "type": "string" })).unwrap_err();
        assert!(matches!(err, SchemaError::RootNotObject { found: "string" }));
    }

    #[test]
    fn serializes_back_with_type_tag_and_order() {
        let original = json!({
            "type": "object",
            "properties": {
                "b": { "type": "boolean", "title": "Consent" },
                "a": { "type": "array", "items": { "type": "string" }, "minItems": 1 }
            },
            "required": ["b"]
        });
        let schema = FormSchema::from_value(original.clone()).unwrap();
        let value = schema.to_value().unwrap();
        assert_eq!(value, original);

        let text = serde_json::to_string(&schema).unwrap();
        let b = text.find("\"b\"").unwrap();
        let a = text.find("\"a\"").unwrap();
        assert!(b < a, "declaration order must survive serialization: {text}");
    }
}
