//! G1: shape of the after-state.
//!
//! Parameters (`config`):
//!
//! ```json
//! {
//!   "requiredFields": ["name", "amount"],
//!   "fieldTypes": { "amount": "number", "tags": "array" },
//!   "schema": { "email": { "type": "email", "required": true } }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use ale_gate_expr::type_name;
use ale_gate_types::{GateConfig, GateContext, GateResult, GateType, Severity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GateError;
use crate::gate::{Gate, GateHeader};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StructuralSettings {
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub field_types: BTreeMap<String, FieldKind>,
    #[serde(default)]
    pub schema: Option<BTreeMap<String, SchemaField>>,
}

/// Primitive category for `fieldTypes`. Integer and float are both numeric.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Float,
    Boolean,
    Object,
    Array,
}

impl FieldKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number | FieldKind::Integer | FieldKind::Float => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Object | FieldKind::Array => value.is_object() || value.is_array(),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaField {
    #[serde(rename = "type", default = "default_schema_kind")]
    pub kind: SchemaKind,
    #[serde(default)]
    pub required: bool,
}

fn default_schema_kind() -> SchemaKind {
    SchemaKind::Any
}

/// Schema field kinds. Unlike [`FieldKind`], these are strict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    String,
    Number,
    Integer,
    Float,
    Boolean,
    Object,
    Array,
    Date,
    Uuid,
    Email,
    Url,
    Any,
}

impl SchemaKind {
    fn validate(&self, value: &Value) -> Result<(), String> {
        let ok = match self {
            SchemaKind::Any => true,
            SchemaKind::String => value.is_string(),
            SchemaKind::Number | SchemaKind::Float => value.is_number(),
            SchemaKind::Integer => is_integer(value),
            SchemaKind::Boolean => value.is_boolean(),
            SchemaKind::Object => value.is_object(),
            SchemaKind::Array => value.is_array(),
            SchemaKind::Date => value.as_str().is_some_and(is_date),
            SchemaKind::Uuid => value
                .as_str()
                .is_some_and(|s| uuid::Uuid::parse_str(s).is_ok()),
            SchemaKind::Email => value.as_str().is_some_and(is_email),
            SchemaKind::Url => value.as_str().is_some_and(is_url),
        };
        if ok {
            Ok(())
        } else {
            Err(format!("expected {}, got {}", self.as_str(), type_name(value)))
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            SchemaKind::String => "string",
            SchemaKind::Number => "number",
            SchemaKind::Integer => "integer",
            SchemaKind::Float => "float",
            SchemaKind::Boolean => "boolean",
            SchemaKind::Object => "object",
            SchemaKind::Array => "array",
            SchemaKind::Date => "date",
            SchemaKind::Uuid => "uuid",
            SchemaKind::Email => "email",
            SchemaKind::Url => "url",
            SchemaKind::Any => "any",
        }
    }
}

fn is_integer(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        _ => false,
    }
}

fn is_date(s: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(s).is_ok()
        || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

fn is_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.split('.').count() >= 2
                && domain.split('.').all(|part| !part.is_empty())
                && !s.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn is_url(s: &str) -> bool {
    match s.split_once("://") {
        Some((scheme, rest)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
                && !rest.is_empty()
                && !s.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// Verifies required fields, field types and an optional schema of the
/// after-state (or `data` when no after-state is supplied).
pub struct StructuralGate {
    header: GateHeader,
    settings: StructuralSettings,
}

impl StructuralGate {
    pub fn new(name: impl Into<String>, settings: StructuralSettings) -> Self {
        Self {
            header: GateHeader::new(name, GateType::Structural, Severity::Error),
            settings,
        }
    }

    pub fn from_config(config: &GateConfig) -> Result<Self, GateError> {
        Ok(Self {
            header: GateHeader::from_config(config, GateType::Structural),
            settings: super::settings(config)?,
        })
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.header.set_severity(severity);
        self
    }

    pub fn settings(&self) -> &StructuralSettings {
        &self.settings
    }

    fn violations(&self, context: &GateContext) -> Vec<String> {
        let data = context.after_or_data();
        let mut errors = Vec::new();

        for field in &self.settings.required_fields {
            if is_blank(data.get(field)) {
                errors.push(format!("required field '{}' is missing or empty", field));
            }
        }

        for (field, kind) in &self.settings.field_types {
            if let Some(value) = data.get(field).filter(|v| !v.is_null()) {
                if !kind.accepts(value) {
                    errors.push(format!(
                        "field '{}' has wrong type: expected {}, got {}",
                        field,
                        kind,
                        type_name(value)
                    ));
                }
            }
        }

        if let Some(schema) = &self.settings.schema {
            for (field, field_schema) in schema {
                match data.get(field) {
                    None | Some(Value::Null) => {
                        if field_schema.required {
                            errors.push(format!("{}: required", field));
                        }
                    }
                    Some(value) => {
                        if let Err(reason) = field_schema.kind.validate(value) {
                            errors.push(format!("{}: {}", field, reason));
                        }
                    }
                }
            }
        }

        errors
    }
}

#[async_trait]
impl Gate for StructuralGate {
    fn header(&self) -> &GateHeader {
        &self.header
    }

    fn is_applicable(&self, context: &GateContext) -> bool {
        context.action.is_write()
    }

    async fn check(&self, context: &GateContext) -> Result<GateResult, GateError> {
        let errors = self.violations(context);
        if errors.is_empty() {
            return Ok(self.header.pass("structural validation passed"));
        }
        let message = format!(
            "structural validation failed: {} error(s): {}",
            errors.len(),
            errors.join("; ")
        );
        Ok(self.header.fail(message).with_detail("errors", errors))
    }

    fn describe(&self) -> &str {
        "Validates required fields, field types and schema of the data being written"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ale_gate_types::JsonMap;
    use serde_json::json;

    fn obj(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn gate(config: Value) -> StructuralGate {
        StructuralGate::from_config(&GateConfig::new("shape", GateType::Structural).config(config))
            .unwrap()
    }

    #[tokio::test]
    async fn missing_required_field_is_named() {
        let gate = gate(json!({"requiredFields": ["name"]}));
        let ctx = GateContext::builder("create", "orders").data(JsonMap::new()).build();

        let result = gate.check(&ctx).await.unwrap();
        assert!(!result.passed);
        assert!(result.message.contains("name"));
        assert_eq!(result.detail_strings("errors").len(), 1);
    }

    #[tokio::test]
    async fn empty_string_counts_as_missing() {
        let gate = gate(json!({"requiredFields": ["name", "id"]}));
        let ctx = GateContext::builder("update", "orders")
            .data(obj(json!({"name": "", "id": 7})))
            .build();

        let result = gate.check(&ctx).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.detail_strings("errors"), vec!["required field 'name' is missing or empty"]);
    }

    #[tokio::test]
    async fn field_types_are_permissive_on_numeric_precision() {
        let gate = gate(json!({"fieldTypes": {"qty": "integer", "tags": "object", "ok": "boolean"}}));
        let good = GateContext::builder("create", "orders")
            .data(obj(json!({"qty": 2.5, "tags": ["a"], "ok": true})))
            .build();
        assert!(gate.check(&good).await.unwrap().passed);

        let bad = GateContext::builder("create", "orders")
            .data(obj(json!({"qty": "2", "ok": 1})))
            .build();
        let result = gate.check(&bad).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.detail_strings("errors").len(), 2);
    }

    #[tokio::test]
    async fn schema_collects_one_message_per_path() {
        let gate = gate(json!({
            "schema": {
                "email": {"type": "email", "required": true},
                "site": {"type": "url"},
                "count": {"type": "integer"},
                "due": {"type": "date"},
                "ref": {"type": "uuid", "required": true}
            }
        }));
        let ctx = GateContext::builder("create", "orders")
            .after(obj(json!({
                "email": "not-an-email",
                "site": "https://example.com",
                "count": 1.5,
                "due": "2024-02-30"
            })))
            .build();

        let result = gate.check(&ctx).await.unwrap();
        let errors = result.detail_strings("errors");
        assert!(!result.passed);
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&"ref: required".to_string()));
        assert!(errors.iter().any(|e| e.starts_with("email:")));
        assert!(errors.iter().any(|e| e.starts_with("count:")));
        assert!(errors.iter().any(|e| e.starts_with("due:")));
    }

    #[tokio::test]
    async fn checks_after_state_when_present() {
        let gate = gate(json!({"requiredFields": ["name"]}));
        let ctx = GateContext::builder("update", "orders")
            .data(JsonMap::new())
            .after(obj(json!({"name": "widget"})))
            .build();
        assert!(gate.check(&ctx).await.unwrap().passed);
    }

    #[test]
    fn applies_only_to_writes() {
        let gate = gate(json!({}));
        assert!(gate.is_applicable(&GateContext::new("create", "orders")));
        assert!(gate.is_applicable(&GateContext::new("update", "orders")));
        assert!(!gate.is_applicable(&GateContext::new("delete", "orders")));
        assert!(!gate.is_applicable(&GateContext::new("approve", "orders")));
    }

    #[test]
    fn unknown_field_kind_is_rejected() {
        let config = GateConfig::new("shape", GateType::Structural)
            .config(json!({"fieldTypes": {"a": "decimal"}}));
        assert!(matches!(
            StructuralGate::from_config(&config),
            Err(GateError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn format_helpers() {
        assert!(is_email("a@b.co"));
        assert!(!is_email("a@b"));
        assert!(!is_email("@b.co"));
        assert!(is_url("https://x"));
        assert!(!is_url("x"));
        assert!(is_date("2024-02-29"));
        assert!(is_date("2024-02-29T10:00:00Z"));
        assert!(!is_date("yesterday"));
    }
}
