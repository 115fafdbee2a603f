//! G7: post-execution effects.
//!
//! Parameters (`config`):
//!
//! ```json
//! {
//!   "allowPartialFailure": false,
//!   "rules": [
//!     { "name": "closed", "type": "target", "config": { "expectedValues": { "status": "closed" } } },
//!     { "name": "scope", "type": "effect", "critical": true,
//!       "config": { "affectedObjects": ["status", "closedAt"] } },
//!     { "name": "growth", "type": "quality",
//!       "config": { "qualityFn": "len(after.items) / max(len(before.items), 1)", "threshold": 1 } }
//!   ]
//! }
//! ```
//!
//! Quality expressions may read `before`, `after` and `context`.

use std::collections::BTreeSet;

use ale_gate_expr::{parse_with_roots, values_equal, Expr, Scope};
use ale_gate_types::{GateConfig, GateContext, GateResult, GateType, JsonMap, Severity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GateError;
use crate::gate::{Gate, GateHeader};

const QUALITY_ROOTS: &[&str] = &["before", "after", "context"];

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EvaluationSettings {
    #[serde(default)]
    pub rules: Vec<EvaluationRule>,
    #[serde(default)]
    pub allow_partial_failure: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EvaluationRule {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RuleKind,
    #[serde(default)]
    pub config: RuleParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    #[serde(default)]
    pub critical: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Target,
    Effect,
    Quality,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_values: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_objects: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_fn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

#[derive(Debug)]
enum Check {
    Target(JsonMap),
    Effect(BTreeSet<String>),
    Quality { expr: Expr, threshold: f64 },
}

#[derive(Debug)]
struct Rule {
    name: String,
    check: Check,
    failure_message: String,
    critical: bool,
}

struct Outcome {
    failure: Option<String>,
    metric: Option<f64>,
}

impl Rule {
    fn compile(gate: &str, rule: EvaluationRule) -> Result<Self, GateError> {
        let name = rule.name;
        let params = rule.config;
        let check = match rule.kind {
            RuleKind::Target => Check::Target(params.expected_values.ok_or_else(|| {
                GateError::invalid_config(gate, format!("rule '{}' requires 'expectedValues'", name))
            })?),
            RuleKind::Effect => {
                Check::Effect(params.affected_objects.unwrap_or_default().into_iter().collect())
            }
            RuleKind::Quality => {
                let source = params.quality_fn.ok_or_else(|| {
                    GateError::invalid_config(gate, format!("rule '{}' requires 'qualityFn'", name))
                })?;
                let expr = parse_with_roots(&source, QUALITY_ROOTS).map_err(|e| {
                    GateError::expression(gate, format!("rule '{}'", name), e)
                })?;
                Check::Quality {
                    expr,
                    threshold: params.threshold.unwrap_or(0.0),
                }
            }
        };
        let failure_message = rule
            .failure_message
            .unwrap_or_else(|| format!("rule '{}' failed", name));
        Ok(Self {
            name,
            check,
            failure_message,
            critical: rule.critical,
        })
    }

    fn evaluate(&self, before: &JsonMap, after: &JsonMap, scope: &Scope<'_>) -> Outcome {
        match &self.check {
            Check::Target(expected) => {
                let mismatches: Vec<String> = expected
                    .iter()
                    .filter_map(|(field, want)| {
                        let actual = after.get(field).unwrap_or(&Value::Null);
                        (!values_equal(actual, want))
                            .then(|| format!("{}: expected {}, actual {}", field, want, actual))
                    })
                    .collect();
                Outcome {
                    failure: (!mismatches.is_empty())
                        .then(|| format!("{}: {}", self.failure_message, mismatches.join("; "))),
                    metric: None,
                }
            }
            Check::Effect(allowed) => {
                let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
                let unexpected: Vec<&str> = keys
                    .into_iter()
                    .filter(|key| !allowed.contains(key.as_str()))
                    .filter(|key| {
                        let b = before.get(key.as_str()).unwrap_or(&Value::Null);
                        let a = after.get(key.as_str()).unwrap_or(&Value::Null);
                        !values_equal(b, a)
                    })
                    .map(String::as_str)
                    .collect();
                Outcome {
                    failure: (!unexpected.is_empty()).then(|| {
                        format!(
                            "{}: unexpected changes to {}",
                            self.failure_message,
                            unexpected.join(", ")
                        )
                    }),
                    metric: None,
                }
            }
            Check::Quality { expr, threshold } => match expr.evaluate_number(scope) {
                Ok(metric) => Outcome {
                    failure: (metric < *threshold).then(|| {
                        format!(
                            "{}: metric {} below threshold {}",
                            self.failure_message, metric, threshold
                        )
                    }),
                    metric: Some(metric),
                },
                Err(e) => Outcome {
                    failure: Some(format!("rule '{}' could not be evaluated: {}", self.name, e)),
                    metric: None,
                },
            },
        }
    }
}

/// Verifies the effects of an operation by comparing before and after states.
pub struct EvaluationGate {
    header: GateHeader,
    rules: Vec<Rule>,
    allow_partial_failure: bool,
}

impl EvaluationGate {
    pub fn new(name: impl Into<String>, settings: EvaluationSettings) -> Result<Self, GateError> {
        Self::compile(GateHeader::new(name, GateType::Evaluation, Severity::Error), settings)
    }

    pub fn from_config(config: &GateConfig) -> Result<Self, GateError> {
        Self::compile(
            GateHeader::from_config(config, GateType::Evaluation),
            super::settings(config)?,
        )
    }

    fn compile(header: GateHeader, settings: EvaluationSettings) -> Result<Self, GateError> {
        let rules = settings
            .rules
            .into_iter()
            .map(|rule| Rule::compile(header.name(), rule))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            header,
            rules,
            allow_partial_failure: settings.allow_partial_failure,
        })
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.header.set_severity(severity);
        self
    }
}

#[async_trait]
impl Gate for EvaluationGate {
    fn header(&self) -> &GateHeader {
        &self.header
    }

    fn is_applicable(&self, context: &GateContext) -> bool {
        !self.rules.is_empty() && context.after.is_some()
    }

    async fn check(&self, context: &GateContext) -> Result<GateResult, GateError> {
        let empty = JsonMap::new();
        let before = context.before.as_ref().unwrap_or(&empty);
        let after = context.after_or_data();

        let before_value = Value::Object(before.clone());
        let after_value = Value::Object(after.clone());
        let context_value =
            serde_json::to_value(context).map_err(|e| GateError::Serialization(e.to_string()))?;
        let scope = Scope::new()
            .bind("before", &before_value)
            .bind("after", &after_value)
            .bind("context", &context_value);

        let mut critical = Vec::new();
        let mut warnings = Vec::new();
        let mut metrics = Map::new();
        for rule in &self.rules {
            let outcome = rule.evaluate(before, after, &scope);
            if let Some(metric) = outcome.metric {
                metrics.insert(rule.name.clone(), Value::from(metric));
            }
            match outcome.failure {
                Some(message) if rule.critical => critical.push(message),
                Some(message) => warnings.push(message),
                None => {}
            }
        }

        let result = if !critical.is_empty() {
            self.header.fail(format!(
                "effect evaluation failed: {} critical issue(s): {}",
                critical.len(),
                critical.join("; ")
            ))
        } else if !warnings.is_empty() && !self.allow_partial_failure {
            self.header.fail(format!(
                "effect evaluation failed: {} issue(s): {}",
                warnings.len(),
                warnings.join("; ")
            ))
        } else if !warnings.is_empty() {
            self.header.pass(format!(
                "effect evaluation passed with {} warning(s)",
                warnings.len()
            ))
        } else {
            self.header.pass("effect evaluation passed")
        };

        Ok(result
            .with_detail("criticalErrors", critical)
            .with_detail("warnings", warnings)
            .with_detail("metrics", metrics))
    }

    fn describe(&self) -> &str {
        "Evaluates target values, side effects and quality metrics after an operation"
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

    fn gate(config: Value) -> EvaluationGate {
        EvaluationGate::from_config(&GateConfig::new("eval", GateType::Evaluation).config(config))
            .unwrap()
    }

    fn ctx(before: Value, after: Value) -> GateContext {
        GateContext::builder("update", "orders")
            .before(obj(before))
            .after(obj(after))
            .build()
    }

    #[tokio::test]
    async fn unexpected_side_effect_is_reported() {
        let gate = gate(json!({
            "rules": [{"name": "scope", "type": "effect", "config": {"affectedObjects": ["status"]}}]
        }));
        let result = gate
            .check(&ctx(
                json!({"status": "a", "amount": 10}),
                json!({"status": "b", "amount": 99}),
            ))
            .await
            .unwrap();

        assert!(!result.passed);
        assert!(result.message.contains("amount"));
        assert!(!result.message.contains("status"));
    }

    #[tokio::test]
    async fn added_and_removed_keys_count_as_changes() {
        let gate = gate(json!({
            "rules": [{"name": "scope", "type": "effect", "critical": true}]
        }));
        let result = gate
            .check(&ctx(json!({"gone": 1}), json!({"new": 1})))
            .await
            .unwrap();
        assert!(!result.passed);
        assert_eq!(result.detail_strings("criticalErrors"), vec!["rule 'scope' failed: unexpected changes to gone, new"]);
    }

    #[tokio::test]
    async fn target_mismatch_names_expected_and_actual() {
        let gate = gate(json!({
            "rules": [{"name": "closed", "type": "target",
                       "config": {"expectedValues": {"status": "closed", "total": 10}}}]
        }));
        let result = gate
            .check(&ctx(json!({}), json!({"status": "open", "total": 10.0})))
            .await
            .unwrap();
        assert!(!result.passed);
        assert!(result.message.contains("status: expected \"closed\", actual \"open\""));
        assert!(!result.message.contains("total"));
    }

    #[tokio::test]
    async fn quality_metric_is_exposed_and_thresholded() {
        let gate = gate(json!({
            "rules": [{"name": "growth", "type": "quality",
                       "config": {"qualityFn": "len(after.items) / max(len(before.items), 1)",
                                  "threshold": 1.5}}]
        }));
        let passing = gate
            .check(&ctx(json!({"items": [1, 2]}), json!({"items": [1, 2, 3, 4]})))
            .await
            .unwrap();
        assert!(passing.passed);
        assert_eq!(passing.details["metrics"]["growth"], json!(2.0));

        let failing = gate
            .check(&ctx(json!({"items": [1, 2]}), json!({"items": [1, 2]})))
            .await
            .unwrap();
        assert!(!failing.passed);
        assert!(failing.message.contains("below threshold 1.5"));
    }

    #[tokio::test]
    async fn partial_failure_policy() {
        let rules = json!([
            {"name": "closed", "type": "target", "config": {"expectedValues": {"status": "closed"}}}
        ]);
        let strict = gate(json!({"rules": rules.clone()}));
        let lenient = gate(json!({"rules": rules, "allowPartialFailure": true}));
        let context = ctx(json!({}), json!({"status": "open"}));

        assert!(!strict.check(&context).await.unwrap().passed);
        let result = lenient.check(&context).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.detail_strings("warnings").len(), 1);
    }

    #[tokio::test]
    async fn critical_rules_fail_even_when_partial_failure_allowed() {
        let gate = gate(json!({
            "allowPartialFailure": true,
            "rules": [{"name": "closed", "type": "target", "critical": true,
                       "config": {"expectedValues": {"status": "closed"}}}]
        }));
        assert!(!gate.check(&ctx(json!({}), json!({"status": "open"}))).await.unwrap().passed);
    }

    #[test]
    fn applicability_requires_rules_and_after_state() {
        let gate = gate(json!({"rules": [{"name": "scope", "type": "effect"}]}));
        assert!(!gate.is_applicable(&GateContext::new("update", "orders")));
        assert!(gate.is_applicable(&ctx(json!({}), json!({}))));
    }

    #[test]
    fn bad_quality_expression_is_rejected() {
        let config = GateConfig::new("eval", GateType::Evaluation).config(json!({
            "rules": [{"name": "q", "type": "quality", "config": {"qualityFn": "data.x"}}]
        }));
        assert!(matches!(
            EvaluationGate::from_config(&config),
            Err(GateError::Expression { .. })
        ));
    }
}
