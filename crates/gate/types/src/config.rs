use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kind::{GateType, Severity};

/// Declarative definition of one gate.
///
/// `config` holds type-specific parameters; its shape is documented by each
/// gate implementation and validated when the gate is constructed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub gate_type: GateType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "empty_object")]
    pub config: Value,
}

impl GateConfig {
    pub fn new(name: impl Into<String>, gate_type: GateType) -> Self {
        Self {
            name: name.into(),
            gate_type,
            enabled: true,
            severity: Severity::Error,
            config: empty_object(),
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Same definition under a different name.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

fn default_enabled() -> bool {
    true
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Introspection view of a registered gate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub gate_type: GateType,
    pub enabled: bool,
    pub description: String,
}
