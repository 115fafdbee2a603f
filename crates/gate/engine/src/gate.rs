use std::sync::atomic::{AtomicBool, Ordering};

use ale_gate_types::{GateConfig, GateContext, GateDescriptor, GateResult, GateType, Severity};
use async_trait::async_trait;

use crate::error::GateError;

/// A single independent policy check.
///
/// Gates are long-lived and shared across concurrent evaluations. Apart
/// from the enabled flag they are immutable after construction.
///
/// `check` must not treat an expected policy failure as an error: it
/// returns `Ok` with `passed == false`. An `Err` (or a panic) is an
/// execution fault, which the engine turns into a failing `error` result.
#[async_trait]
pub trait Gate: Send + Sync {
    /// Identity, type, severity and enabled flag.
    fn header(&self) -> &GateHeader;

    /// Cheap, side-effect-free applicability test. Inapplicable gates are
    /// skipped and leave no trace in the report.
    fn is_applicable(&self, context: &GateContext) -> bool;

    /// Run the verification.
    async fn check(&self, context: &GateContext) -> Result<GateResult, GateError>;

    /// Static human-readable purpose.
    fn describe(&self) -> &str;

    fn name(&self) -> &str {
        self.header().name()
    }

    fn gate_type(&self) -> GateType {
        self.header().gate_type()
    }

    fn severity(&self) -> Severity {
        self.header().severity()
    }

    fn is_enabled(&self) -> bool {
        self.header().is_enabled()
    }

    fn enable(&self) {
        self.header().set_enabled(true);
    }

    fn disable(&self) {
        self.header().set_enabled(false);
    }

    fn descriptor(&self) -> GateDescriptor {
        GateDescriptor {
            name: self.name().to_string(),
            gate_type: self.gate_type(),
            enabled: self.is_enabled(),
            description: self.describe().to_string(),
        }
    }
}

/// State shared by every gate implementation.
#[derive(Debug)]
pub struct GateHeader {
    name: String,
    gate_type: GateType,
    severity: Severity,
    enabled: AtomicBool,
}

impl GateHeader {
    pub fn new(name: impl Into<String>, gate_type: GateType, severity: Severity) -> Self {
        Self {
            name: name.into(),
            gate_type,
            severity,
            enabled: AtomicBool::new(true),
        }
    }

    /// Header for a built-in implementation. The type is fixed by the
    /// implementation, not taken from the config.
    pub fn from_config(config: &GateConfig, gate_type: GateType) -> Self {
        Self {
            name: config.name.clone(),
            gate_type,
            severity: config.severity,
            enabled: AtomicBool::new(config.enabled),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gate_type(&self) -> GateType {
        self.gate_type
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn set_severity(&mut self, severity: Severity) {
        self.severity = severity;
    }

    /// Passing result stamped with this gate's name and severity.
    pub fn pass(&self, message: impl Into<String>) -> GateResult {
        GateResult::pass(&self.name, self.severity, message)
    }

    /// Failing result stamped with this gate's name and severity.
    pub fn fail(&self, message: impl Into<String>) -> GateResult {
        GateResult::fail(&self.name, self.severity, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysPass {
        header: GateHeader,
    }

    #[async_trait]
    impl Gate for AlwaysPass {
        fn header(&self) -> &GateHeader {
            &self.header
        }

        fn is_applicable(&self, _context: &GateContext) -> bool {
            true
        }

        async fn check(&self, _context: &GateContext) -> Result<GateResult, GateError> {
            Ok(self.header.pass("ok"))
        }

        fn describe(&self) -> &str {
            "always passes"
        }
    }

    #[test]
    fn enable_disable_toggles_flag() {
        let gate = AlwaysPass {
            header: GateHeader::new("p", GateType::Flow, Severity::Info),
        };
        assert!(gate.is_enabled());
        gate.disable();
        assert!(!gate.is_enabled());
        assert!(!gate.descriptor().enabled);
        gate.enable();
        assert!(gate.is_enabled());
    }

    #[test]
    fn header_from_config_keeps_enabled_and_severity() {
        let config = GateConfig::new("x", GateType::Semantic)
            .enabled(false)
            .severity(Severity::Warning);
        let header = GateHeader::from_config(&config, GateType::Structural);
        assert_eq!(header.gate_type(), GateType::Structural);
        assert_eq!(header.severity(), Severity::Warning);
        assert!(!header.is_enabled());
    }

    #[tokio::test]
    async fn results_carry_gate_identity() {
        let gate = AlwaysPass {
            header: GateHeader::new("p", GateType::Flow, Severity::Info),
        };
        let ctx = GateContext::new("create", "orders");
        let result = gate.check(&ctx).await.unwrap();
        assert_eq!(result.gate, "p");
        assert_eq!(result.severity, Severity::Info);
        assert!(result.passed);
    }
}
