use ale_gate_expr::ExprError;
use ale_gate_types::GateType;
use thiserror::Error;

/// Errors surfaced by the Gate Engine.
///
/// Policy failures, gate execution faults and timeouts are never returned
/// as `Err`; they are recorded as failing results. What remains here is
/// configuration faults, registry lookups, caller-side blocking and store
/// failures.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("unknown gate type: {0}")]
    UnknownGateType(String),

    #[error("gate type {0} has no built-in implementation")]
    UnsupportedGateType(GateType),

    #[error("invalid configuration for gate '{gate}': {reason}")]
    InvalidConfig { gate: String, reason: String },

    #[error("invalid expression in gate '{gate}' ({location}): {source}")]
    Expression {
        gate: String,
        location: String,
        #[source]
        source: ExprError,
    },

    #[error("gate not found: {0}")]
    GateNotFound(String),

    #[error("operation blocked by gates: {summary}")]
    Blocked {
        summary: String,
        report_id: Option<String>,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl GateError {
    pub(crate) fn invalid_config(gate: &str, reason: impl Into<String>) -> Self {
        GateError::InvalidConfig {
            gate: gate.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn expression(gate: &str, location: impl Into<String>, source: ExprError) -> Self {
        GateError::Expression {
            gate: gate.to_string(),
            location: location.into(),
            source,
        }
    }

    /// Configuration faults must reach the operator instead of being folded into a result.
    pub fn is_configuration_fault(&self) -> bool {
        matches!(
            self,
            GateError::UnknownGateType(_)
                | GateError::UnsupportedGateType(_)
                | GateError::InvalidConfig { .. }
                | GateError::Expression { .. }
        )
    }
}

/// Errors from the report store and gate configuration source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("report already exists: {0}")]
    DuplicateReport(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}
