//! Email templates and their variable schema.

use super::Metadata;
use crate::error::{FieldCode, MultiError};
use crate::pulid::Pulid;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A stored template with subject, HTML and optional text bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailTemplate {
    #[serde(default)]
    pub id: Pulid,
    #[serde(default)]
    pub organization_id: Pulid,
    #[serde(default)]
    pub business_unit_id: Pulid,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: String,
    pub subject_template: String,
    pub html_template: String,
    #[serde(default)]
    pub text_template: Option<String>,
    #[serde(default)]
    pub variables_schema: Option<VariablesSchema>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

fn default_true() -> bool {
    true
}

impl EmailTemplate {
    pub fn new(organization_id: Pulid, slug: &str, subject: &str, html: &str) -> Self {
        Self {
            id: Pulid::nil(),
            organization_id,
            business_unit_id: Pulid::nil(),
            name: slug.to_string(),
            slug: slug.to_string(),
            description: String::new(),
            subject_template: subject.to_string(),
            html_template: html.to_string(),
            text_template: None,
            variables_schema: None,
            is_system: false,
            is_active: true,
            metadata: Metadata::new(),
            version: 0,
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn check(&self) -> MultiError {
        let mut errs = MultiError::new();
        if self.organization_id.is_nil() {
            errs.add("organizationId", FieldCode::Required, "Organization ID is required");
        }
        if self.name.trim().is_empty() {
            errs.add("name", FieldCode::Required, "Name is required");
        }
        if self.slug.trim().is_empty() {
            errs.add("slug", FieldCode::Required, "Slug is required");
        } else if !self
            .slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            errs.add(
                "slug",
                FieldCode::InvalidFormat,
                "Slug may only contain lowercase letters, digits, '-' and '_'",
            );
        }
        if self.subject_template.trim().is_empty() {
            errs.add("subjectTemplate", FieldCode::Required, "Subject template is required");
        }
        if self.html_template.trim().is_empty() {
            errs.add("htmlTemplate", FieldCode::Required, "HTML template is required");
        }
        errs
    }
}

/// Declared runtime type of a template variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl VariableType {
    /// Name of the runtime type of `value`, in schema vocabulary.
    pub fn of(value: &Value) -> VariableType {
        match value {
            Value::Null => VariableType::Null,
            Value::Bool(_) => VariableType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => VariableType::Integer,
            Value::Number(_) => VariableType::Number,
            Value::String(_) => VariableType::String,
            Value::Array(_) => VariableType::Array,
            Value::Object(_) => VariableType::Object,
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VariableType::String => "string",
            VariableType::Integer => "integer",
            VariableType::Number => "number",
            VariableType::Boolean => "boolean",
            VariableType::Array => "array",
            VariableType::Object => "object",
            VariableType::Null => "null",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<VariableType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Variable declaration attached to a template.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VariablesSchema {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
}

impl VariablesSchema {
    /// Validate `vars` against the compiled schema.
    ///
    /// Failures at the document root are missing required names; anything
    /// deeper is reported against the top-level variable it sits under.
    pub fn check(&self, vars: &Map<String, Value>) -> MultiError {
        let mut errs = MultiError::new();
        let validator = match jsonschema::validator_for(&self.to_json_schema()) {
            Ok(v) => v,
            Err(e) => {
                errs.add("variablesSchema", FieldCode::Invalid, format!("invalid schema: {e}"));
                return errs;
            }
        };

        let instance = Value::Object(vars.clone());
        let mut missing_reported = false;
        let mut seen = BTreeSet::new();
        for error in validator.iter_errors(&instance) {
            let path = error.instance_path().to_string();
            match top_level_name(&path) {
                None if !missing_reported => {
                    missing_reported = true;
                    for name in self.required.iter().filter(|n| !vars.contains_key(*n)) {
                        errs.add(
                            name.as_str(),
                            FieldCode::Required,
                            format!("required variable '{}' is missing", name),
                        );
                    }
                }
                None => {}
                Some(name) => {
                    if !seen.insert(name.clone()) {
                        continue;
                    }
                    let detail = match (self.declared_type(&name), vars.get(&name)) {
                        (Some(expected), Some(value)) => format!(
                            "variable '{}' should be of type {}, got {}",
                            name,
                            expected,
                            VariableType::of(value)
                        ),
                        _ => format!("variable '{}': {}", name, error),
                    };
                    errs.add(name, FieldCode::TypeMismatch, detail);
                }
            }
        }

        errs
    }

    fn declared_type(&self, name: &str) -> Option<VariableType> {
        self.properties.get(name).and_then(|p| p.kind)
    }

    /// Equivalent JSON Schema document.
    pub fn to_json_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": self.required,
            "properties": self.properties,
        })
    }
}

/// First segment of a JSON pointer, unescaped. `None` for the root.
fn top_level_name(pointer: &str) -> Option<String> {
    let segment = pointer.strip_prefix('/')?.split('/').next()?;
    Some(segment.replace("~1", "/").replace("~0", "~"))
}

/// Deterministic record used to preview a template without caller data.
pub fn sample_data() -> Value {
    json!({
        "CustomerName": "John Doe",
        "CompanyName": "Acme Corp",
        "OrderNumber": "ORD-12345",
        "OrderTotal": 199.99,
        "IsVIP": true,
        "CreatedAt": "2024-01-15T10:30:00Z",
        "Items": [
            { "Name": "Premium Widget", "Price": 99.99, "Quantity": 1 },
            { "Name": "Standard Widget", "Price": 49.99, "Quantity": 2 }
        ],
        "ShippingAddress": {
            "Street": "123 Main St",
            "City": "Anytown",
            "State": "CA",
            "ZipCode": "12345"
        }
    })
}

// =============================================================================
// TESTS
// =============================================================================
