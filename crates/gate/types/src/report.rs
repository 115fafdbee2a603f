use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::result::GateResult;

/// Persisted, write-once record of one engine invocation.
///
/// `passed` covers only the gates that actually ran; disabled or
/// inapplicable gates never appear in `gates`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateReport {
    pub id: String,
    pub subject_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    pub gates: Vec<GateResult>,
    pub passed: bool,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

impl GateReport {
    /// Build a report with a fresh id; `passed` and `summary` are derived from `gates`.
    pub fn new(
        subject_type: impl Into<String>,
        subject_id: Option<String>,
        gates: Vec<GateResult>,
    ) -> Self {
        let passed = gates.iter().all(|r| r.passed);
        let summary = Self::summarize(&gates);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject_type: subject_type.into(),
            subject_id,
            gates,
            passed,
            summary,
            timestamp: Utc::now(),
        }
    }

    /// `passed: P, failed: F, warnings: W, errors: E`.
    pub fn summarize(gates: &[GateResult]) -> String {
        let passed = gates.iter().filter(|r| r.passed).count();
        let failed = gates.len() - passed;
        let warnings = gates
            .iter()
            .filter(|r| r.severity == crate::Severity::Warning)
            .count();
        let errors = gates.iter().filter(|r| r.severity.is_error()).count();
        format!(
            "passed: {}, failed: {}, warnings: {}, errors: {}",
            passed, failed, warnings, errors
        )
    }
}
