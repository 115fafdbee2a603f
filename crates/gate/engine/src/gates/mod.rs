//! Built-in gate implementations and the config-to-gate factory.

mod evaluation;
mod evidence;
mod execution;
mod structural;

use std::sync::Arc;

use ale_gate_types::{GateConfig, GateType, Severity};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::GateError;
use crate::gate::Gate;

pub use evaluation::{EvaluationGate, EvaluationRule, EvaluationSettings, RuleKind, RuleParams};
pub use evidence::{EvidenceGate, EvidenceRequirement, EvidenceSettings};
pub use execution::{
    ExecutionGate, ExecutionSettings, FieldOperator, OneOrMany, PreconditionKind, PreconditionParams,
    PreconditionConfig,
};
pub use structural::{FieldKind, SchemaField, SchemaKind, StructuralGate, StructuralSettings};

/// Build a gate from its declarative definition.
///
/// Semantic, permission and flow gates have reserved ordinals but no
/// built-in implementation; register a custom [`Gate`] for those.
pub fn create_gate_from_config(config: &GateConfig) -> Result<Arc<dyn Gate>, GateError> {
    let gate: Arc<dyn Gate> = match config.gate_type {
        GateType::Structural => Arc::new(StructuralGate::from_config(config)?),
        GateType::Evidence => Arc::new(EvidenceGate::from_config(config)?),
        GateType::Execution => Arc::new(ExecutionGate::from_config(config)?),
        GateType::Evaluation => Arc::new(EvaluationGate::from_config(config)?),
        GateType::Semantic | GateType::Permission | GateType::Flow => {
            return Err(GateError::UnsupportedGateType(config.gate_type));
        }
    };
    Ok(gate)
}

/// Build a gate from a raw JSON definition, distinguishing an unknown
/// `type` from an otherwise malformed definition.
pub fn create_gate_from_value(value: Value) -> Result<Arc<dyn Gate>, GateError> {
    if let Some(raw_type) = value.get("type").and_then(Value::as_str) {
        if GateType::parse(raw_type).is_none() {
            return Err(GateError::UnknownGateType(raw_type.to_string()));
        }
    }
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
        .to_string();
    let config: GateConfig =
        serde_json::from_value(value).map_err(|e| GateError::invalid_config(&name, e.to_string()))?;
    create_gate_from_config(&config)
}

/// Deserialize the type-specific parameters of a gate definition.
pub(crate) fn settings<T: DeserializeOwned>(config: &GateConfig) -> Result<T, GateError> {
    serde_json::from_value(config.config.clone())
        .map_err(|e| GateError::invalid_config(&config.name, e.to_string()))
}

/// The stock gate set registered by `register_default_gates`.
pub fn default_gate_configs() -> Vec<GateConfig> {
    vec![
        GateConfig::new("default_structural", GateType::Structural)
            .config(json!({ "requiredFields": ["id"] })),
        GateConfig::new("default_evidence", GateType::Evidence)
            .severity(Severity::Warning)
            .config(json!({ "defaultMinConfidence": 0.8 })),
        GateConfig::new("default_execution", GateType::Execution)
            .config(json!({ "stateField": "status" })),
        GateConfig::new("default_evaluation", GateType::Evaluation)
            .config(json!({ "allowPartialFailure": true })),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_rejects_reserved_types() {
        for gate_type in [GateType::Semantic, GateType::Permission, GateType::Flow] {
            let err = create_gate_from_config(&GateConfig::new("x", gate_type))
                .err()
                .unwrap();
            assert!(matches!(err, GateError::UnsupportedGateType(t) if t == gate_type));
            assert!(err.is_configuration_fault());
        }
    }

    #[test]
    fn factory_reports_unknown_type() {
        let err = create_gate_from_value(json!({"name": "x", "type": "G9_MAGIC"}))
            .err()
            .unwrap();
        assert!(matches!(err, GateError::UnknownGateType(ref t) if t == "G9_MAGIC"));
    }

    #[test]
    fn factory_builds_from_raw_json() {
        let gate = create_gate_from_value(json!({
            "name": "shape",
            "type": "G1_STRUCTURAL",
            "severity": "critical",
            "config": {"requiredFields": ["name"]}
        }))
        .unwrap();
        assert_eq!(gate.name(), "shape");
        assert_eq!(gate.gate_type(), GateType::Structural);
        assert_eq!(gate.severity(), Severity::Critical);
    }

    #[test]
    fn malformed_parameters_are_config_faults() {
        let config = GateConfig::new("shape", GateType::Structural)
            .config(json!({"requiredFields": "name"}));
        let err = create_gate_from_config(&config).err().unwrap();
        assert!(matches!(err, GateError::InvalidConfig { ref gate, .. } if gate == "shape"));
    }

    #[test]
    fn default_set_builds() {
        let configs = default_gate_configs();
        assert_eq!(configs.len(), 4);
        for config in &configs {
            let gate = create_gate_from_config(config).unwrap();
            assert_eq!(gate.name(), config.name);
        }
        assert_eq!(configs[1].severity, Severity::Warning);
    }
}
