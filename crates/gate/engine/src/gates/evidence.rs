//! G3: evidentiary completeness and quality.
//!
//! Parameters (`config`):
//!
//! ```json
//! {
//!   "requirements": [
//!     { "type": "risk_assessment", "required": true, "minConfidence": 0.8,
//!       "requiredFields": ["score"] }
//!   ],
//!   "defaultMinConfidence": 0.8
//! }
//! ```
//!
//! `metadata.requiredEvidenceTypes` on the context adds required
//! requirements at check time, using the gate-wide default confidence.
//!
//! A requirement may carry a `validationExpr` that every matching evidence
//! item must satisfy, e.g. `evidence.content.score >= 0.5`. It may read
//! `evidence` and `context`.

use ale_gate_expr::{parse_with_roots, Expr, Scope};
use ale_gate_types::{Evidence, GateConfig, GateContext, GateResult, GateType, Severity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GateError;
use crate::gate::{Gate, GateHeader};

const REQUIRED_TYPES_KEY: &str = "requiredEvidenceTypes";
const VALIDATION_ROOTS: &[&str] = &["evidence", "context"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EvidenceRequirement {
    #[serde(rename = "type")]
    pub evidence_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_expr: Option<String>,
}

impl EvidenceRequirement {
    pub fn required(evidence_type: impl Into<String>) -> Self {
        Self {
            evidence_type: evidence_type.into(),
            required: true,
            min_confidence: None,
            required_fields: Vec::new(),
            validation_expr: None,
        }
    }

    pub fn min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = Some(min);
        self
    }

    pub fn validation_expr(mut self, expr: impl Into<String>) -> Self {
        self.validation_expr = Some(expr.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EvidenceSettings {
    #[serde(default)]
    pub requirements: Vec<EvidenceRequirement>,
    #[serde(default = "default_min_confidence")]
    pub default_min_confidence: f64,
}

impl Default for EvidenceSettings {
    fn default() -> Self {
        Self {
            requirements: Vec::new(),
            default_min_confidence: default_min_confidence(),
        }
    }
}

fn default_min_confidence() -> f64 {
    0.8
}

fn check_confidence(gate: &str, what: &str, value: f64) -> Result<(), GateError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(GateError::invalid_config(
            gate,
            format!("{} must be within [0, 1], got {}", what, value),
        ))
    }
}

#[derive(Default)]
struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
}

/// Compiled `validationExpr` of one requirement.
#[derive(Debug)]
struct Validator {
    source: String,
    expr: Expr,
}

/// Verifies that required evidence is attached, confident enough and complete.
pub struct EvidenceGate {
    header: GateHeader,
    settings: EvidenceSettings,
    // Parallel to `settings.requirements`.
    validators: Vec<Option<Validator>>,
}

impl EvidenceGate {
    pub fn new(name: impl Into<String>, settings: EvidenceSettings) -> Result<Self, GateError> {
        let header = GateHeader::new(name, GateType::Evidence, Severity::Error);
        Self::validated(header, settings)
    }

    pub fn from_config(config: &GateConfig) -> Result<Self, GateError> {
        let header = GateHeader::from_config(config, GateType::Evidence);
        Self::validated(header, super::settings(config)?)
    }

    fn validated(header: GateHeader, settings: EvidenceSettings) -> Result<Self, GateError> {
        check_confidence(header.name(), "defaultMinConfidence", settings.default_min_confidence)?;
        let mut validators = Vec::with_capacity(settings.requirements.len());
        for req in &settings.requirements {
            if let Some(min) = req.min_confidence {
                check_confidence(
                    header.name(),
                    &format!("minConfidence of '{}'", req.evidence_type),
                    min,
                )?;
            }
            let validator = match &req.validation_expr {
                Some(source) => {
                    let expr = parse_with_roots(source, VALIDATION_ROOTS).map_err(|e| {
                        GateError::expression(
                            header.name(),
                            format!("validationExpr of '{}'", req.evidence_type),
                            e,
                        )
                    })?;
                    Some(Validator {
                        source: source.clone(),
                        expr,
                    })
                }
                None => None,
            };
            validators.push(validator);
        }
        Ok(Self {
            header,
            settings,
            validators,
        })
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.header.set_severity(severity);
        self
    }

    /// Configured requirements plus those requested through context metadata.
    fn requirements(&self, context: &GateContext) -> Vec<(EvidenceRequirement, Option<&Validator>)> {
        let mut requirements: Vec<_> = self
            .settings
            .requirements
            .iter()
            .cloned()
            .zip(self.validators.iter().map(Option::as_ref))
            .collect();
        for evidence_type in context.metadata_strings(REQUIRED_TYPES_KEY) {
            if !requirements
                .iter()
                .any(|(r, _)| r.evidence_type == evidence_type)
            {
                requirements.push((EvidenceRequirement::required(evidence_type), None));
            }
        }
        requirements
    }

    fn validate(
        &self,
        validator: &Validator,
        evidence: &Evidence,
        context: &Value,
        findings: &mut Findings,
    ) -> Result<(), GateError> {
        let evidence_value =
            serde_json::to_value(evidence).map_err(|e| GateError::Serialization(e.to_string()))?;
        let scope = Scope::new()
            .bind("evidence", &evidence_value)
            .bind("context", context);
        match validator.expr.evaluate_bool(&scope) {
            Ok(true) => {}
            Ok(false) => findings.errors.push(format!(
                "evidence {} failed validation: {}",
                evidence.id, validator.source
            )),
            Err(e) => findings.errors.push(format!(
                "evidence {} could not be validated: {}",
                evidence.id, e
            )),
        }
        Ok(())
    }

    fn inspect(&self, requirement: &EvidenceRequirement, evidence: &Evidence, findings: &mut Findings) {
        let min = requirement
            .min_confidence
            .unwrap_or(self.settings.default_min_confidence);
        if let Some(confidence) = evidence.confidence.filter(|c| *c < min) {
            findings.errors.push(format!(
                "evidence {} confidence too low: {} < {}",
                evidence.id, confidence, min
            ));
        }

        for field in &requirement.required_fields {
            if !evidence.content.contains_key(field) {
                findings.errors.push(format!(
                    "evidence {} missing required field: {}",
                    evidence.id, field
                ));
            }
        }

        if requirement.required && !evidence.verified {
            findings
                .warnings
                .push(format!("evidence {} is not verified", evidence.id));
        }
    }
}

#[async_trait]
impl Gate for EvidenceGate {
    fn header(&self) -> &GateHeader {
        &self.header
    }

    fn is_applicable(&self, context: &GateContext) -> bool {
        !self.settings.requirements.is_empty()
            || context.requires_evidence()
            || !context.metadata_strings(REQUIRED_TYPES_KEY).is_empty()
    }

    async fn check(&self, context: &GateContext) -> Result<GateResult, GateError> {
        let requirements = self.requirements(context);
        let mut findings = Findings::default();
        let context_value = if requirements.iter().any(|(_, v)| v.is_some()) {
            serde_json::to_value(context).map_err(|e| GateError::Serialization(e.to_string()))?
        } else {
            Value::Null
        };

        if requirements.is_empty() && context.requires_evidence() && context.evidences.is_empty() {
            findings
                .errors
                .push("operation requires evidence but none was supplied".to_string());
        }

        for (requirement, validator) in &requirements {
            let matches: Vec<&Evidence> = context
                .evidences_of_type(&requirement.evidence_type)
                .collect();

            if matches.is_empty() {
                if requirement.required {
                    findings.errors.push(format!(
                        "missing required evidence of type: {}",
                        requirement.evidence_type
                    ));
                } else {
                    findings.warnings.push(format!(
                        "recommended evidence not supplied: {}",
                        requirement.evidence_type
                    ));
                }
                continue;
            }

            for evidence in matches {
                self.inspect(requirement, evidence, &mut findings);
                if let Some(validator) = validator {
                    self.validate(validator, evidence, &context_value, &mut findings)?;
                }
            }
        }

        let Findings { errors, warnings } = findings;
        let result = if !errors.is_empty() {
            self.header
                .fail(format!(
                    "evidence validation failed: {} error(s): {}",
                    errors.len(),
                    errors.join("; ")
                ))
                .with_detail("errors", errors)
        } else if !warnings.is_empty() {
            self.header.pass(format!(
                "evidence validation passed with {} warning(s)",
                warnings.len()
            ))
        } else {
            self.header.pass("evidence validation passed")
        };

        Ok(if warnings.is_empty() {
            result
        } else {
            result.with_detail("warnings", warnings)
        })
    }

    fn describe(&self) -> &str {
        "Checks that required evidence is present, sufficiently confident and complete"
    }
}
