use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::JsonMap;

/// Verb describing the attempted operation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GateAction {
    Create,
    Update,
    Delete,
    /// A named custom action (e.g. `publish`, `approve`).
    Custom(String),
}

impl GateAction {
    pub fn as_str(&self) -> &str {
        match self {
            GateAction::Create => "create",
            GateAction::Update => "update",
            GateAction::Delete => "delete",
            GateAction::Custom(name) => name,
        }
    }

    /// Create or update: the actions that carry a new after-state.
    pub fn is_write(&self) -> bool {
        matches!(self, GateAction::Create | GateAction::Update)
    }
}

impl From<String> for GateAction {
    fn from(s: String) -> Self {
        match s.as_str() {
            "create" => GateAction::Create,
            "update" => GateAction::Update,
            "delete" | "destroy" => GateAction::Delete,
            _ => GateAction::Custom(s),
        }
    }
}

impl From<&str> for GateAction {
    fn from(s: &str) -> Self {
        GateAction::from(s.to_string())
    }
}

impl From<GateAction> for String {
    fn from(action: GateAction) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for GateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is attempting the operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    User,
    System,
    Agent,
}

/// A typed, sourced, confidence-scored artifact supporting an operation.
///
/// Evidence is supplied by the caller; the engine never fetches it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub id: String,
    #[serde(rename = "type")]
    pub evidence_type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub content: JsonMap,
    /// Confidence in [0, 1]. Evidence without a score is not confidence-checked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub verified: bool,
}

impl Evidence {
    pub fn new(id: impl Into<String>, evidence_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            evidence_type: evidence_type.into(),
            source: String::new(),
            content: JsonMap::new(),
            confidence: None,
            verified: false,
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn verified(mut self, verified: bool) -> Self {
        self.verified = verified;
        self
    }

    pub fn content_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.content.insert(key.into(), value);
        self
    }
}

/// Full description of one attempted operation subject to gating.
///
/// Built by the caller, immutable for the duration of one evaluation.
/// The `metadata` bag carries gate-specific hints; each gate documents the
/// keys it reads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateContext {
    pub action: GateAction,
    pub subject_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub data: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_type: Option<ActorType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,
    #[serde(default)]
    pub evidences: Vec<Evidence>,
    #[serde(default)]
    pub metadata: JsonMap,
}

impl GateContext {
    /// Minimal context: an action on a subject type.
    pub fn new(action: impl Into<GateAction>, subject_type: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            subject_type: subject_type.into(),
            subject_id: None,
            data: JsonMap::new(),
            before: None,
            after: None,
            actor_id: None,
            actor_type: None,
            space_id: None,
            evidences: Vec::new(),
            metadata: JsonMap::new(),
        }
    }

    pub fn builder(
        action: impl Into<GateAction>,
        subject_type: impl Into<String>,
    ) -> GateContextBuilder {
        GateContextBuilder {
            context: GateContext::new(action, subject_type),
        }
    }

    /// The after-state if supplied, otherwise the working payload.
    pub fn after_or_data(&self) -> &JsonMap {
        self.after.as_ref().unwrap_or(&self.data)
    }

    /// The pre-state if supplied, otherwise the working payload.
    pub fn before_or_data(&self) -> &JsonMap {
        self.before.as_ref().unwrap_or(&self.data)
    }

    /// Evidence items of a given type, in attachment order.
    pub fn evidences_of_type<'a>(&'a self, evidence_type: &'a str) -> impl Iterator<Item = &'a Evidence> {
        self.evidences
            .iter()
            .filter(move |e| e.evidence_type == evidence_type)
    }

    /// `metadata.requiresEvidence == true`.
    pub fn requires_evidence(&self) -> bool {
        matches!(self.metadata.get("requiresEvidence"), Some(Value::Bool(true)))
    }

    /// Read a list of strings from `metadata[key]`; non-string items are ignored.
    pub fn metadata_strings(&self, key: &str) -> Vec<String> {
        match self.metadata.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Builder for [`GateContext`].
pub struct GateContextBuilder {
    context: GateContext,
}

impl GateContextBuilder {
    pub fn subject_id(mut self, id: impl Into<String>) -> Self {
        self.context.subject_id = Some(id.into());
        self
    }

    pub fn data(mut self, data: JsonMap) -> Self {
        self.context.data = data;
        self
    }

    pub fn before(mut self, before: JsonMap) -> Self {
        self.context.before = Some(before);
        self
    }

    pub fn after(mut self, after: JsonMap) -> Self {
        self.context.after = Some(after);
        self
    }

    pub fn actor(mut self, id: impl Into<String>, actor_type: ActorType) -> Self {
        self.context.actor_id = Some(id.into());
        self.context.actor_type = Some(actor_type);
        self
    }

    pub fn space_id(mut self, space: impl Into<String>) -> Self {
        self.context.space_id = Some(space.into());
        self
    }

    pub fn evidence(mut self, evidence: Evidence) -> Self {
        self.context.evidences.push(evidence);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.metadata.insert(key.into(), value);
        self
    }

    pub fn build(self) -> GateContext {
        self.context
    }
}
