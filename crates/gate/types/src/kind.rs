use std::fmt;

use serde::{Deserialize, Serialize};

/// The seven gate types, in canonical evaluation order.
///
/// The wire names (`G1_STRUCTURAL` … `G7_EVALUATION`) are what declarative
/// gate definitions use; lowercase aliases are accepted on input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateType {
    #[serde(rename = "G1_STRUCTURAL", alias = "structural")]
    Structural,
    #[serde(rename = "G2_SEMANTIC", alias = "semantic")]
    Semantic,
    #[serde(rename = "G3_EVIDENCE", alias = "evidence")]
    Evidence,
    #[serde(rename = "G4_PERMISSION", alias = "permission")]
    Permission,
    #[serde(rename = "G5_FLOW", alias = "flow")]
    Flow,
    #[serde(rename = "G6_EXECUTION", alias = "execution")]
    Execution,
    #[serde(rename = "G7_EVALUATION", alias = "evaluation")]
    Evaluation,
}

impl GateType {
    /// All gate types in canonical order.
    pub const ALL: [GateType; 7] = [
        GateType::Structural,
        GateType::Semantic,
        GateType::Evidence,
        GateType::Permission,
        GateType::Flow,
        GateType::Execution,
        GateType::Evaluation,
    ];

    /// Position in the evaluation chain (1-7). Lower runs first.
    pub fn ordinal(&self) -> u8 {
        match self {
            GateType::Structural => 1,
            GateType::Semantic => 2,
            GateType::Evidence => 3,
            GateType::Permission => 4,
            GateType::Flow => 5,
            GateType::Execution => 6,
            GateType::Evaluation => 7,
        }
    }

    /// Wire name, e.g. `G3_EVIDENCE`.
    pub fn code(&self) -> &'static str {
        match self {
            GateType::Structural => "G1_STRUCTURAL",
            GateType::Semantic => "G2_SEMANTIC",
            GateType::Evidence => "G3_EVIDENCE",
            GateType::Permission => "G4_PERMISSION",
            GateType::Flow => "G5_FLOW",
            GateType::Execution => "G6_EXECUTION",
            GateType::Evaluation => "G7_EVALUATION",
        }
    }

    /// Parse either the wire name or the lowercase short name.
    pub fn parse(s: &str) -> Option<GateType> {
        let lower = s.trim().to_ascii_lowercase();
        GateType::ALL.into_iter().find(|t| {
            t.code().eq_ignore_ascii_case(&lower) || t.short_name() == lower.as_str()
        })
    }

    fn short_name(&self) -> &'static str {
        match self {
            GateType::Structural => "structural",
            GateType::Semantic => "semantic",
            GateType::Evidence => "evidence",
            GateType::Permission => "permission",
            GateType::Flow => "flow",
            GateType::Execution => "execution",
            GateType::Evaluation => "evaluation",
        }
    }
}

impl fmt::Display for GateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Severity attached to a gate result.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    #[default]
    Error,
    Critical,
}

impl Severity {
    /// Error or critical.
    pub fn is_error(&self) -> bool {
        matches!(self, Severity::Error | Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}
