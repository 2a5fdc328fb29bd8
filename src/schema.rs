//! Schema registry: the canonical PII output contract, held as data.
//!
//! The contract is a static table of field names. The wire-level JSON Schema
//! sent to the model and the validation rules applied by the parser are both
//! derived from the same [`OutputSchema`] value, so the request constraint
//! and the local check can never drift apart.
//!
//! The registry is built once, on first use, and shared read-only for the
//! lifetime of the process via [`pii_schema`].

use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};

/// Name under which the schema is registered with the model service.
pub const PII_SCHEMA_NAME: &str = "PIIExtraction";

/// The eight PII fields, in declaration order.
pub const PII_FIELDS: [&str; 8] = [
    "name",
    "company_email",
    "personal_email",
    "personal_phone_number",
    "company_phone_number",
    "personal_address",
    "company_ship_to_address",
    "company_ship_from_address",
];

static PII_SCHEMA: Lazy<OutputSchema> = Lazy::new(|| {
    OutputSchema::closed_object(
        PII_SCHEMA_NAME,
        PII_FIELDS.iter().map(|f| SchemaProperty::string(*f)),
    )
});

/// The process-wide PII output schema.
pub fn pii_schema() -> &'static OutputSchema {
    &PII_SCHEMA
}

/// JSON type of a schema property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    String,
}

impl PropertyType {
    fn as_json_type(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
        }
    }

    /// Whether `value` has this type. `null` is handled by the caller.
    fn accepts(&self, value: &Value) -> bool {
        match self {
            PropertyType::String => value.is_string(),
        }
    }
}

/// One named property of an object schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaProperty {
    pub name: String,
    pub kind: PropertyType,
}

impl SchemaProperty {
    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyType::String,
        }
    }
}

/// A versionless description of a flat JSON object.
///
/// Immutable after construction; only the registry and tests build one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSchema {
    name: String,
    properties: Vec<SchemaProperty>,
    required: Vec<String>,
    additional_properties: bool,
    strict: bool,
}

/// A single reason an object fails [`OutputSchema::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    NotAnObject,
    MissingKey(String),
    UnknownKey(String),
    WrongType { key: String, expected: &'static str },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::NotAnObject => write!(f, "top-level value is not a JSON object"),
            Violation::MissingKey(k) => write!(f, "missing required key '{k}'"),
            Violation::UnknownKey(k) => write!(f, "unexpected key '{k}'"),
            Violation::WrongType { key, expected } => {
                write!(f, "key '{key}' must be a {expected} or null")
            }
        }
    }
}

impl OutputSchema {
    /// A closed-world object: every property required, no extras, strict mode.
    pub fn closed_object(
        name: impl Into<String>,
        properties: impl IntoIterator<Item = SchemaProperty>,
    ) -> Self {
        let properties: Vec<SchemaProperty> = properties.into_iter().collect();
        let required = properties.iter().map(|p| p.name.clone()).collect();
        Self {
            name: name.into(),
            properties,
            required,
            additional_properties: false,
            strict: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &[SchemaProperty] {
        &self.properties
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub fn additional_properties(&self) -> bool {
        self.additional_properties
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    fn property(&self, key: &str) -> Option<&SchemaProperty> {
        self.properties.iter().find(|p| p.name == key)
    }

    /// The JSON Schema object (`type`, `properties`, `required`, `additionalProperties`).
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|p| (p.name.clone(), json!({ "type": p.kind.as_json_type() })))
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
            "additionalProperties": self.additional_properties,
        })
    }

    /// The `response_format` request parameter for chat-completion APIs.
    pub fn response_format(&self) -> Value {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": self.name,
                "schema": self.to_json_schema(),
                "strict": self.strict,
            }
        })
    }

    /// Check a decoded value against the schema.
    ///
    /// Returns every violation found, in a stable order: unknown keys (when
    /// the schema is closed), then missing keys, then type mismatches.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<Violation>> {
        let Some(obj) = value.as_object() else {
            return Err(vec![Violation::NotAnObject]);
        };

        let mut violations = Vec::new();

        if !self.additional_properties {
            for key in obj.keys() {
                if self.property(key).is_none() {
                    violations.push(Violation::UnknownKey(key.clone()));
                }
            }
        }

        for key in &self.required {
            if !obj.contains_key(key) {
                violations.push(Violation::MissingKey(key.clone()));
            }
        }

        for prop in &self.properties {
            if let Some(v) = obj.get(&prop.name) {
                if !v.is_null() && !prop.kind.accepts(v) {
                    violations.push(Violation::WrongType {
                        key: prop.name.clone(),
                        expected: prop.kind.as_json_type(),
                    });
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_declares_all_eight_fields_required() {
        let schema = pii_schema();
        assert_eq!(schema.name(), "PIIExtraction");
        assert_eq!(schema.properties().len(), 8);
        assert_eq!(schema.required(), PII_FIELDS.map(String::from).as_slice());
        assert!(!schema.additional_properties());
        assert!(schema.is_strict());
    }

    #[test]
    fn json_schema_shape() {
        let js = pii_schema().to_json_schema();
        assert_eq!(js["type"], "object");
        assert_eq!(js["additionalProperties"], false);
        assert_eq!(js["properties"]["company_ship_from_address"]["type"], "string");
        assert_eq!(js["required"].as_array().map(Vec::len), Some(8));
    }

    #[test]
    fn response_format_is_strict_json_schema() {
        let rf = pii_schema().response_format();
        assert_eq!(rf["type"], "json_schema");
        assert_eq!(rf["json_schema"]["name"], "PIIExtraction");
        assert_eq!(rf["json_schema"]["strict"], true);
        assert_eq!(rf["json_schema"]["schema"]["type"], "object");
    }

    #[test]
    fn validate_reports_each_problem() {
        let schema = OutputSchema::closed_object(
            "Tiny",
            [SchemaProperty::string("a"), SchemaProperty::string("b")],
        );

        assert!(schema.validate(&json!({ "a": "x", "b": null })).is_ok());
        assert_eq!(
            schema.validate(&json!([1, 2])),
            Err(vec![Violation::NotAnObject])
        );
        assert_eq!(
            schema.validate(&json!({ "a": "x", "b": 3, "c": "extra" })),
            Err(vec![
                Violation::UnknownKey("c".into()),
                Violation::WrongType {
                    key: "b".into(),
                    expected: "string"
                },
            ])
        );
        assert_eq!(
            schema.validate(&json!({ "a": "x" })),
            Err(vec![Violation::MissingKey("b".into())])
        );
    }

    #[test]
    fn shared_instance_is_the_same_allocation() {
        assert!(std::ptr::eq(pii_schema(), pii_schema()));
    }
}
