use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kind::Severity;
use crate::JsonMap;

/// Outcome of a single gate's check.
///
/// An expected policy failure is `passed == false`, never an error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    pub gate: String,
    pub passed: bool,
    pub message: String,
    pub severity: Severity,
    #[serde(default)]
    pub details: JsonMap,
    pub timestamp: DateTime<Utc>,
}

impl GateResult {
    pub fn pass(gate: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            gate: gate.into(),
            passed: true,
            message: message.into(),
            severity,
            details: JsonMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn fail(gate: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            gate: gate.into(),
            passed: false,
            message: message.into(),
            severity,
            details: JsonMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach one detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Read a detail entry as a list of strings (e.g. `errors`, `warnings`).
    pub fn detail_strings(&self, key: &str) -> Vec<String> {
        match self.details.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Aggregated outcome of one engine invocation, returned to the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateExecutionResult {
    pub passed: bool,
    pub results: Vec<GateResult>,
    /// Set by `execute`; a pre-check never persists and leaves this empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
    pub summary: String,
    pub duration_ms: u64,
}

impl GateExecutionResult {
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.passed).count()
    }

    /// The failing results, in evaluation order.
    pub fn failures(&self) -> impl Iterator<Item = &GateResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    /// Result of a named gate, if it ran.
    pub fn result_for(&self, gate: &str) -> Option<&GateResult> {
        self.results.iter().find(|r| r.gate == gate)
    }
}
