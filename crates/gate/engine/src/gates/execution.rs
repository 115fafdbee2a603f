//! G6: preconditions evaluated against the pre-state.
//!
//! Parameters (`config`):
//!
//! ```json
//! {
//!   "stateField": "status",
//!   "preConditions": [
//!     { "name": "approved", "type": "state", "config": { "expectedState": ["approved"] } },
//!     { "name": "budget", "type": "field",
//!       "config": { "field": "amount", "operator": "lte", "value": 1000 } },
//!     { "name": "owner", "type": "expression",
//!       "config": { "expression": "data.owner == context.actorId" },
//!       "errorMessage": "only the owner may change this record" }
//!   ]
//! }
//! ```
//!
//! Expressions may read `data` (the pre-state) and `context`.

use std::cmp::Ordering;

use ale_gate_expr::{compare, parse_with_roots, values_equal, Expr, Scope};
use ale_gate_types::{GateConfig, GateContext, GateResult, GateType, JsonMap, Severity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GateError;
use crate::gate::{Gate, GateHeader};

const EXPRESSION_ROOTS: &[&str] = &["data", "context"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExecutionSettings {
    #[serde(default)]
    pub pre_conditions: Vec<PreconditionConfig>,
    #[serde(default = "default_state_field")]
    pub state_field: String,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            pre_conditions: Vec::new(),
            state_field: default_state_field(),
        }
    }
}

fn default_state_field() -> String {
    "status".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PreconditionConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PreconditionKind,
    #[serde(default)]
    pub config: PreconditionParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreconditionKind {
    State,
    Field,
    Expression,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PreconditionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_state: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<FieldOperator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Exists,
    NotExists,
}

impl FieldOperator {
    fn needs_value(&self) -> bool {
        !matches!(self, FieldOperator::Exists | FieldOperator::NotExists)
    }

    fn apply(&self, actual: &Value, expected: &Value) -> bool {
        let ordered = |want: &[Ordering]| {
            compare(actual, expected)
                .map(|o| want.contains(&o))
                .unwrap_or(false)
        };
        let member = || {
            expected
                .as_array()
                .is_some_and(|items| items.iter().any(|v| values_equal(actual, v)))
        };
        match self {
            FieldOperator::Eq => values_equal(actual, expected),
            FieldOperator::Neq => !values_equal(actual, expected),
            FieldOperator::Gt => ordered(&[Ordering::Greater]),
            FieldOperator::Gte => ordered(&[Ordering::Greater, Ordering::Equal]),
            FieldOperator::Lt => ordered(&[Ordering::Less]),
            FieldOperator::Lte => ordered(&[Ordering::Less, Ordering::Equal]),
            FieldOperator::In => member(),
            FieldOperator::NotIn => !member(),
            FieldOperator::Exists => !actual.is_null(),
            FieldOperator::NotExists => actual.is_null(),
        }
    }
}

/// A precondition compiled from its declarative form.
#[derive(Debug)]
enum Condition {
    State {
        expected: Vec<String>,
    },
    Field {
        field: String,
        operator: FieldOperator,
        value: Value,
    },
    Expression(Expr),
}

#[derive(Debug)]
struct Precondition {
    name: String,
    condition: Condition,
    error_message: String,
}

impl Precondition {
    fn compile(gate: &str, def: PreconditionConfig) -> Result<Self, GateError> {
        let name = def.name;
        let missing = |what: &str| {
            GateError::invalid_config(gate, format!("precondition '{}' requires '{}'", name, what))
        };
        let params = def.config;

        let condition = match def.kind {
            PreconditionKind::State => Condition::State {
                expected: params
                    .expected_state
                    .ok_or_else(|| missing("expectedState"))?
                    .into_vec(),
            },
            PreconditionKind::Field => {
                let field = params.field.ok_or_else(|| missing("field"))?;
                let operator = params.operator.ok_or_else(|| missing("operator"))?;
                let value = match params.value {
                    Some(v) => v,
                    None if operator.needs_value() => return Err(missing("value")),
                    None => Value::Null,
                };
                if matches!(operator, FieldOperator::In | FieldOperator::NotIn) && !value.is_array() {
                    return Err(GateError::invalid_config(
                        gate,
                        format!("precondition '{}': in/notIn expects an array value", name),
                    ));
                }
                Condition::Field {
                    field,
                    operator,
                    value,
                }
            }
            PreconditionKind::Expression => {
                let source = params.expression.ok_or_else(|| missing("expression"))?;
                let expr = parse_with_roots(&source, EXPRESSION_ROOTS).map_err(|e| {
                    GateError::expression(gate, format!("precondition '{}'", name), e)
                })?;
                Condition::Expression(expr)
            }
        };

        let error_message = def
            .error_message
            .unwrap_or_else(|| format!("precondition '{}' not satisfied", name));
        Ok(Self {
            name,
            condition,
            error_message,
        })
    }
}

/// Verifies configured preconditions before an operation executes.
pub struct ExecutionGate {
    header: GateHeader,
    state_field: String,
    preconditions: Vec<Precondition>,
}

impl ExecutionGate {
    pub fn new(name: impl Into<String>, settings: ExecutionSettings) -> Result<Self, GateError> {
        Self::compile(GateHeader::new(name, GateType::Execution, Severity::Error), settings)
    }

    pub fn from_config(config: &GateConfig) -> Result<Self, GateError> {
        Self::compile(
            GateHeader::from_config(config, GateType::Execution),
            super::settings(config)?,
        )
    }

    fn compile(header: GateHeader, settings: ExecutionSettings) -> Result<Self, GateError> {
        let preconditions = settings
            .pre_conditions
            .into_iter()
            .map(|def| Precondition::compile(header.name(), def))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            header,
            state_field: settings.state_field,
            preconditions,
        })
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.header.set_severity(severity);
        self
    }

    /// `None` when the precondition holds, otherwise the failure message.
    fn evaluate(
        &self,
        precondition: &Precondition,
        data: &JsonMap,
        scope: &Scope<'_>,
    ) -> Option<String> {
        match &precondition.condition {
            Condition::State { expected } => {
                let current = data.get(&self.state_field).unwrap_or(&Value::Null);
                let matched = current
                    .as_str()
                    .is_some_and(|s| expected.iter().any(|e| e == s));
                (!matched).then(|| {
                    format!(
                        "{} ({} is {}, expected one of [{}])",
                        precondition.error_message,
                        self.state_field,
                        current,
                        expected.join(", ")
                    )
                })
            }
            Condition::Field {
                field,
                operator,
                value,
            } => {
                let actual = data.get(field).unwrap_or(&Value::Null);
                (!operator.apply(actual, value)).then(|| precondition.error_message.clone())
            }
            Condition::Expression(expr) => match expr.evaluate_bool(scope) {
                Ok(true) => None,
                Ok(false) => Some(precondition.error_message.clone()),
                Err(e) => Some(format!(
                    "precondition '{}' could not be evaluated: {}",
                    precondition.name, e
                )),
            },
        }
    }
}

#[async_trait]
impl Gate for ExecutionGate {
    fn header(&self) -> &GateHeader {
        &self.header
    }

    fn is_applicable(&self, _context: &GateContext) -> bool {
        !self.preconditions.is_empty()
    }

    async fn check(&self, context: &GateContext) -> Result<GateResult, GateError> {
        let data = context.before_or_data();
        let data_value = Value::Object(data.clone());
        let context_value = if self
            .preconditions
            .iter()
            .any(|p| matches!(p.condition, Condition::Expression(_)))
        {
            serde_json::to_value(context).map_err(|e| GateError::Serialization(e.to_string()))?
        } else {
            Value::Null
        };
        let scope = Scope::new()
            .bind("data", &data_value)
            .bind("context", &context_value);

        let errors: Vec<String> = self
            .preconditions
            .iter()
            .filter_map(|p| self.evaluate(p, data, &scope))
            .collect();

        if errors.is_empty() {
            return Ok(self.header.pass("all preconditions satisfied"));
        }
        Ok(self
            .header
            .fail(format!("preconditions not satisfied: {}", errors.join("; ")))
            .with_detail("errors", errors))
    }

    fn describe(&self) -> &str {
        "Verifies state, field and expression preconditions before an operation executes"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn gate(config: Value) -> Result<ExecutionGate, GateError> {
        ExecutionGate::from_config(&GateConfig::new("exec", GateType::Execution).config(config))
    }

    #[tokio::test]
    async fn state_precondition() {
        let gate = gate(json!({
            "preConditions": [
                {"name": "approved", "type": "state", "config": {"expectedState": ["approved"]}}
            ]
        }))
        .unwrap();

        let pending = GateContext::builder("update", "orders")
            .before(obj(json!({"status": "pending"})))
            .build();
        let result = gate.check(&pending).await.unwrap();
        assert!(!result.passed);
        assert!(result.message.contains("\"pending\""));

        let approved = GateContext::builder("update", "orders")
            .before(obj(json!({"status": "approved"})))
            .build();
        assert!(gate.check(&approved).await.unwrap().passed);
    }

    #[tokio::test]
    async fn expected_state_accepts_a_single_string_and_custom_field() {
        let gate = gate(json!({
            "stateField": "phase",
            "preConditions": [
                {"name": "open", "type": "state", "config": {"expectedState": "open"}}
            ]
        }))
        .unwrap();
        let ctx = GateContext::builder("update", "tickets")
            .data(obj(json!({"phase": "open"})))
            .build();
        assert!(gate.check(&ctx).await.unwrap().passed);
    }

    #[tokio::test]
    async fn field_operators() {
        let gate = gate(json!({
            "preConditions": [
                {"name": "cap", "type": "field",
                 "config": {"field": "amount", "operator": "lte", "value": 1000}},
                {"name": "region", "type": "field",
                 "config": {"field": "region", "operator": "in", "value": ["eu", "us"]}},
                {"name": "no-lock", "type": "field",
                 "config": {"field": "lockedBy", "operator": "notExists"}},
                {"name": "currency", "type": "field",
                 "config": {"field": "currency", "operator": "neq", "value": "XXX"},
                 "errorMessage": "currency must be set"}
            ]
        }))
        .unwrap();

        let ok = GateContext::builder("update", "orders")
            .before(obj(json!({"amount": 1000.0, "region": "eu", "currency": "EUR"})))
            .build();
        assert!(gate.check(&ok).await.unwrap().passed);

        let bad = GateContext::builder("update", "orders")
            .before(obj(json!({
                "amount": "lots", "region": "apac", "lockedBy": "bob", "currency": "XXX"
            })))
            .build();
        let result = gate.check(&bad).await.unwrap();
        assert!(!result.passed);
        let errors = result.detail_strings("errors");
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&"currency must be set".to_string()));
    }

    #[tokio::test]
    async fn expression_reads_data_and_context() {
        let gate = gate(json!({
            "preConditions": [
                {"name": "owner", "type": "expression",
                 "config": {"expression": "data.owner == context.actorId"},
                 "errorMessage": "only the owner may change this record"}
            ]
        }))
        .unwrap();

        let owner = GateContext::builder("update", "orders")
            .before(obj(json!({"owner": "u1"})))
            .actor("u1", ale_gate_types::ActorType::User)
            .build();
        assert!(gate.check(&owner).await.unwrap().passed);

        let other = GateContext::builder("update", "orders")
            .before(obj(json!({"owner": "u1"})))
            .actor("u2", ale_gate_types::ActorType::User)
            .build();
        let result = gate.check(&other).await.unwrap();
        assert_eq!(result.message, "preconditions not satisfied: only the owner may change this record");
    }

    #[tokio::test]
    async fn evaluation_errors_fail_only_their_precondition() {
        let gate = gate(json!({
            "preConditions": [
                {"name": "ratio", "type": "expression", "config": {"expression": "data.a / data.b > 1"}}
            ]
        }))
        .unwrap();
        let ctx = GateContext::builder("update", "orders")
            .before(obj(json!({"a": 1, "b": 0})))
            .build();
        let result = gate.check(&ctx).await.unwrap();
        assert!(!result.passed);
        assert!(result.message.contains("could not be evaluated"));
    }

    #[test]
    fn configuration_faults_surface_at_construction() {
        let bad_expr = gate(json!({
            "preConditions": [{"name": "x", "type": "expression", "config": {"expression": "data.a >"}}]
        }));
        assert!(matches!(bad_expr, Err(GateError::Expression { .. })));

        let foreign_root = gate(json!({
            "preConditions": [{"name": "x", "type": "expression", "config": {"expression": "env.HOME"}}]
        }));
        assert!(matches!(
            foreign_root,
            Err(GateError::Expression { ref location, .. }) if location == "precondition 'x'"
        ));

        let no_operator = gate(json!({
            "preConditions": [{"name": "x", "type": "field", "config": {"field": "a"}}]
        }));
        assert!(matches!(no_operator, Err(GateError::InvalidConfig { .. })));

        let scalar_in = gate(json!({
            "preConditions": [{"name": "x", "type": "field",
                               "config": {"field": "a", "operator": "in", "value": "eu"}}]
        }));
        assert!(matches!(scalar_in, Err(GateError::InvalidConfig { .. })));

        let custom = gate(json!({
            "preConditions": [{"name": "x", "type": "custom", "config": {}}]
        }));
        assert!(matches!(custom, Err(GateError::InvalidConfig { .. })));
    }

    #[test]
    fn applicable_only_with_preconditions() {
        let ctx = GateContext::new("update", "orders");
        assert!(!gate(json!({})).unwrap().is_applicable(&ctx));
    }
}
