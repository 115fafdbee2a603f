//! Governance Gate Engine: ordered policy checks in front of every
//! state-changing operation.
//!
//! Before a governed entity is created, updated or deleted, the caller
//! builds a [`GateContext`] and asks the [`GateEngine`] to evaluate it. The
//! engine runs every applicable, enabled gate in ordinal order, records a
//! [`GateReport`] and returns a [`GateExecutionResult`]. A result with
//! `passed == false` is an authoritative block.
//!
//! ## Gate order
//!
//! 1. **Structural**: required fields, field types, schema
//! 2. Semantic (custom gates only)
//! 3. **Evidence**: attached evidence, confidence, completeness
//! 4. Permission (custom gates only)
//! 5. Flow (custom gates only)
//! 6. **Execution**: state, field and expression preconditions
//! 7. **Evaluation**: target values, side effects, quality metrics
//!
//! ## Guarantees
//!
//! - A gate that errors, panics or exceeds its time budget yields a failing
//!   `error`-severity result; the evaluation itself never fails on a gate's
//!   behalf.
//! - Strict mode stops at the first failing gate; pre-checks are always lenient.
//! - Only passing outcomes are cached. Pre-checks neither cache nor report.
//! - Unknown gate types and malformed definitions are rejected when the
//!   gate is built, before any evaluation.

pub mod cache;
pub mod engine;
pub mod error;
pub mod gate;
pub mod gates;
pub mod store;

pub use cache::{canonical_json, CacheEntry, CacheStats, GateCache};
pub use engine::{GateEngine, GateEngineConfig, DEFAULT_PRE_CHECK_TYPES};
pub use error::{GateError, StoreError};
pub use gate::{Gate, GateHeader};
pub use gates::{
    create_gate_from_config, create_gate_from_value, default_gate_configs, EvaluationGate,
    EvidenceGate, ExecutionGate, StructuralGate,
};
pub use store::{GateConfigSource, InMemoryGateStore, ReportStore, StoreResult};

pub use ale_gate_types::{
    ActorType, Evidence, GateAction, GateConfig, GateContext, GateDescriptor, GateExecutionResult,
    GateReport, GateResult, GateType, JsonMap, Severity,
};
