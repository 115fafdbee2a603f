//! Governance Gate data model.
//!
//! Every state-changing operation on a governed entity is described by a
//! [`GateContext`] and must pass an ordered chain of independent policy checks
//! ("gates") before it may proceed. This crate holds the values that flow
//! through that chain:
//!
//! - [`GateContext`] / [`Evidence`]: caller-built input, immutable for one evaluation
//! - [`GateResult`]: the outcome of a single gate
//! - [`GateExecutionResult`]: the aggregated outcome returned to callers
//! - [`GateReport`]: the persisted, write-once audit record of one invocation
//! - [`GateConfig`]: declarative gate definition used by factories and loaders
//!
//! ## Canonical gate order
//!
//! | Ordinal | Type        | Purpose                              |
//! |---------|-------------|--------------------------------------|
//! | 1       | Structural  | Shape of the after-state payload     |
//! | 2       | Semantic    | Business-meaning consistency         |
//! | 3       | Evidence    | Evidentiary completeness and quality |
//! | 4       | Permission  | Actor authorization                  |
//! | 5       | Flow        | Process state transitions            |
//! | 6       | Execution   | Preconditions before execution       |
//! | 7       | Evaluation  | Post-execution effects               |

pub mod config;
pub mod context;
pub mod kind;
pub mod report;
pub mod result;

pub use config::{GateConfig, GateDescriptor};
pub use context::{ActorType, Evidence, GateAction, GateContext, GateContextBuilder};
pub use kind::{GateType, Severity};
pub use report::GateReport;
pub use result::{GateExecutionResult, GateResult};

/// Open JSON object used for payloads, snapshots, details and metadata.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;
