//! Gate orchestration.
//!
//! The engine owns a name-keyed registry of live gates, the result cache
//! and handles to the report store and gate configuration source. Gates
//! run sequentially in ordinal order; each `check` is raced against the
//! configured timeout and guarded against panics, so a single broken gate
//! becomes a failing result instead of aborting the evaluation.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ale_gate_types::{
    GateConfig, GateContext, GateDescriptor, GateExecutionResult, GateReport, GateResult, GateType,
    Severity,
};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::GateCache;
use crate::error::GateError;
use crate::gate::Gate;
use crate::gates;
use crate::store::{GateConfigSource, ReportStore};

/// Gate types evaluated by `pre_check` when none are given.
pub const DEFAULT_PRE_CHECK_TYPES: [GateType; 2] = [GateType::Structural, GateType::Evidence];

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateEngineConfig {
    /// Stop at the first failing gate.
    #[serde(default = "default_true")]
    pub strict_mode: bool,
    /// Log passing gates at `info` instead of `debug`.
    #[serde(default = "default_true")]
    pub log_passed: bool,
    /// Per-gate time budget.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Lifetime of cached passing results.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for GateEngineConfig {
    fn default() -> Self {
        Self {
            strict_mode: default_true(),
            log_passed: default_true(),
            default_timeout_ms: default_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

/// How one pass over the candidate gates behaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Strict,
    Lenient,
}

/// The governance gate orchestrator.
pub struct GateEngine {
    gates: RwLock<Vec<Arc<dyn Gate>>>,
    cache: Arc<GateCache>,
    reports: Arc<dyn ReportStore>,
    gate_source: Arc<dyn GateConfigSource>,
    config: GateEngineConfig,
}

impl GateEngine {
    pub fn new(
        config: GateEngineConfig,
        reports: Arc<dyn ReportStore>,
        gate_source: Arc<dyn GateConfigSource>,
    ) -> Self {
        let cache = Arc::new(GateCache::new(Duration::from_secs(config.cache_ttl_secs)));
        Self {
            gates: RwLock::new(Vec::new()),
            cache,
            reports,
            gate_source,
            config,
        }
    }

    /// Engine backed by one store serving both reports and gate configurations.
    pub fn with_store<S>(config: GateEngineConfig, store: Arc<S>) -> Self
    where
        S: ReportStore + GateConfigSource + 'static,
    {
        let reports: Arc<dyn ReportStore> = store.clone();
        let gate_source: Arc<dyn GateConfigSource> = store;
        Self::new(config, reports, gate_source)
    }

    pub fn config(&self) -> &GateEngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<GateCache> {
        &self.cache
    }

    // ── Registry ──────────────────────────────────────────────────────

    /// Register a gate. A gate with the same name is replaced in place.
    pub async fn register_gate(&self, gate: Arc<dyn Gate>) {
        let mut gates = self.gates.write().await;
        if let Some(slot) = gates.iter_mut().find(|g| g.name() == gate.name()) {
            warn!(
                gate = gate.name(),
                gate_type = %gate.gate_type(),
                "Replacing registered gate with the same name"
            );
            *slot = gate;
        } else {
            info!(gate = gate.name(), gate_type = %gate.gate_type(), "Registered gate");
            gates.push(gate);
        }
        self.cache.invalidate();
    }

    /// Build a gate from its definition and register it.
    pub async fn register_config(&self, config: &GateConfig) -> Result<(), GateError> {
        let gate = self.create_gate_from_config(config)?;
        self.register_gate(gate).await;
        Ok(())
    }

    /// Register the stock gate set.
    pub async fn register_default_gates(&self) -> Result<(), GateError> {
        let built = gates::default_gate_configs()
            .iter()
            .map(gates::create_gate_from_config)
            .collect::<Result<Vec<_>, _>>()?;
        for gate in built {
            self.register_gate(gate).await;
        }
        Ok(())
    }

    pub async fn unregister_gate(&self, name: &str) -> Option<Arc<dyn Gate>> {
        let mut gates = self.gates.write().await;
        let index = gates.iter().position(|g| g.name() == name)?;
        let removed = gates.remove(index);
        self.cache.invalidate();
        info!(gate = name, "Unregistered gate");
        Some(removed)
    }

    pub async fn get_gate(&self, name: &str) -> Option<Arc<dyn Gate>> {
        let gates = self.gates.read().await;
        gates.iter().find(|g| g.name() == name).cloned()
    }

    /// All gates in registration order.
    pub async fn get_all_gates(&self) -> Vec<Arc<dyn Gate>> {
        self.gates.read().await.clone()
    }

    pub async fn get_gates_by_type(&self, gate_type: GateType) -> Vec<Arc<dyn Gate>> {
        let gates = self.gates.read().await;
        gates
            .iter()
            .filter(|g| g.gate_type() == gate_type)
            .cloned()
            .collect()
    }

    pub async fn descriptors(&self) -> Vec<GateDescriptor> {
        let gates = self.gates.read().await;
        gates.iter().map(|g| g.descriptor()).collect()
    }

    pub async fn enable_gate(&self, name: &str) -> Result<(), GateError> {
        let gate = self
            .get_gate(name)
            .await
            .ok_or_else(|| GateError::GateNotFound(name.to_string()))?;
        gate.enable();
        self.cache.invalidate();
        info!(gate = name, "Enabled gate");
        Ok(())
    }

    pub async fn disable_gate(&self, name: &str) -> Result<(), GateError> {
        let gate = self
            .get_gate(name)
            .await
            .ok_or_else(|| GateError::GateNotFound(name.to_string()))?;
        gate.disable();
        self.cache.invalidate();
        info!(gate = name, "Disabled gate");
        Ok(())
    }

    pub fn create_gate_from_config(&self, config: &GateConfig) -> Result<Arc<dyn Gate>, GateError> {
        gates::create_gate_from_config(config)
    }

    /// Register the gates declared for `subject_type`, each named
    /// `{subject_type}_{name}`.
    ///
    /// Every definition is built before any is registered, so one bad entry
    /// leaves the registry untouched. Returns the number of gates loaded.
    pub async fn load_gates_from_ontology(&self, subject_type: &str) -> Result<usize, GateError> {
        let Some(configs) = self.gate_source.gate_configs(subject_type).await? else {
            debug!(subject_type, "No gate definitions for subject type");
            return Ok(0);
        };

        let built = configs
            .into_iter()
            .map(|config| {
                let qualified = format!("{}_{}", subject_type, config.name);
                gates::create_gate_from_config(&config.renamed(qualified))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let count = built.len();
        for gate in built {
            self.register_gate(gate).await;
        }
        info!(subject_type, count, "Loaded gates from ontology");
        Ok(count)
    }

    // ── Evaluation ────────────────────────────────────────────────────

    /// Evaluate the gate chain for one operation.
    ///
    /// `gate_names` restricts evaluation to the named gates; unknown names
    /// are skipped. Every fresh evaluation is persisted as a [`GateReport`];
    /// only passing outcomes are cached, and any registry change retires
    /// them.
    pub async fn execute(
        &self,
        context: &GateContext,
        gate_names: Option<&[String]>,
    ) -> Result<GateExecutionResult, GateError> {
        // Read before the registry snapshot so a concurrent change retires this result.
        let generation = self.cache.generation();
        if let Some(cached) = self.cache.get(context, gate_names) {
            debug!(
                subject_type = %context.subject_type,
                action = %context.action,
                "Gate cache hit"
            );
            return Ok(cached);
        }

        let started = Instant::now();
        let mode = if self.config.strict_mode {
            Mode::Strict
        } else {
            Mode::Lenient
        };
        let candidates = self.resolve_by_name(gate_names).await;
        let results = self.evaluate(&candidates, context, mode).await;
        let passed = results.iter().all(|r| r.passed);
        let summary = summarize(&results);

        let report = GateReport::new(
            context.subject_type.clone(),
            context.subject_id.clone(),
            results.clone(),
        );
        let report_id = self.reports.create_report(report).await?;

        let result = GateExecutionResult {
            passed,
            results,
            report_id: Some(report_id),
            summary,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        if passed {
            self.cache
                .set_for_generation(context, gate_names, result.clone(), None, generation);
        }

        info!(
            subject_type = %context.subject_type,
            action = %context.action,
            passed,
            gates = result.results.len(),
            duration_ms = result.duration_ms,
            report_id = result.report_id.as_deref().unwrap_or_default(),
            "Gate chain evaluated"
        );
        Ok(result)
    }

    /// Advisory evaluation restricted to gate types.
    ///
    /// Always lenient. Never writes a report and never reads or writes the cache.
    pub async fn pre_check(
        &self,
        context: &GateContext,
        gate_types: Option<&[GateType]>,
    ) -> GateExecutionResult {
        let started = Instant::now();
        let types = gate_types.unwrap_or(&DEFAULT_PRE_CHECK_TYPES);
        let candidates = {
            let gates = self.gates.read().await;
            let mut selected: Vec<Arc<dyn Gate>> = gates
                .iter()
                .filter(|g| types.contains(&g.gate_type()))
                .cloned()
                .collect();
            sort_by_ordinal(&mut selected);
            selected
        };

        let results = self.evaluate(&candidates, context, Mode::Lenient).await;
        let passed = results.iter().all(|r| r.passed);
        let summary = summarize(&results);
        debug!(
            subject_type = %context.subject_type,
            passed,
            gates = results.len(),
            "Pre-check evaluated"
        );
        GateExecutionResult {
            passed,
            results,
            report_id: None,
            summary,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Evaluate all gates and refuse the operation if any fails.
    pub async fn guard(&self, context: &GateContext) -> Result<GateExecutionResult, GateError> {
        let result = self.execute(context, None).await?;
        if !result.passed {
            return Err(GateError::Blocked {
                summary: result.summary,
                report_id: result.report_id,
            });
        }
        Ok(result)
    }

    pub async fn get_report(&self, id: &str) -> Result<Option<GateReport>, GateError> {
        Ok(self.reports.get_report(id).await?)
    }

    async fn resolve_by_name(&self, gate_names: Option<&[String]>) -> Vec<Arc<dyn Gate>> {
        let gates = self.gates.read().await;
        let mut selected: Vec<Arc<dyn Gate>> = match gate_names {
            None => gates.clone(),
            Some(names) => {
                let mut seen = HashSet::new();
                names
                    .iter()
                    .filter(|name| seen.insert(name.as_str()))
                    .filter_map(|name| {
                        let found = gates.iter().find(|g| g.name() == name.as_str()).cloned();
                        if found.is_none() {
                            warn!(gate = %name, "Requested gate is not registered; skipping");
                        }
                        found
                    })
                    .collect()
            }
        };
        drop(gates);
        sort_by_ordinal(&mut selected);
        selected
    }

    async fn evaluate(
        &self,
        candidates: &[Arc<dyn Gate>],
        context: &GateContext,
        mode: Mode,
    ) -> Vec<GateResult> {
        let mut results = Vec::with_capacity(candidates.len());
        for gate in candidates {
            if !gate.is_enabled() {
                debug!(gate = gate.name(), "Skipping disabled gate");
                continue;
            }
            if !gate.is_applicable(context) {
                debug!(gate = gate.name(), "Skipping inapplicable gate");
                continue;
            }

            let result = self.run_gate(gate.as_ref(), context).await;
            self.log_result(gate.as_ref(), &result);
            let failed = !result.passed;
            results.push(result);

            if failed && mode == Mode::Strict {
                debug!(gate = gate.name(), "Short-circuiting after failed gate");
                break;
            }
        }
        results
    }

    /// Run one gate, converting errors, panics and timeouts into failing results.
    async fn run_gate(&self, gate: &dyn Gate, context: &GateContext) -> GateResult {
        let budget = Duration::from_millis(self.config.default_timeout_ms);
        let guarded = AssertUnwindSafe(gate.check(context)).catch_unwind();

        match tokio::time::timeout(budget, guarded).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(err))) => fault(gate, "error", format!("gate execution error: {}", err)),
            Ok(Err(panic)) => fault(
                gate,
                "panic",
                format!("gate execution error: {}", panic_message(panic.as_ref())),
            ),
            Err(_) => fault(
                gate,
                "timeout",
                format!(
                    "gate execution timed out after {}ms",
                    self.config.default_timeout_ms
                ),
            ),
        }
    }

    fn log_result(&self, gate: &dyn Gate, result: &GateResult) {
        if !result.passed {
            warn!(
                gate = gate.name(),
                gate_type = %gate.gate_type(),
                severity = %result.severity,
                message = %result.message,
                "Gate failed"
            );
        } else if self.config.log_passed {
            info!(gate = gate.name(), gate_type = %gate.gate_type(), "Gate passed");
        } else {
            debug!(gate = gate.name(), gate_type = %gate.gate_type(), "Gate passed");
        }
    }
}

fn sort_by_ordinal(gates: &mut [Arc<dyn Gate>]) {
    gates.sort_by_key(|g| g.gate_type().ordinal());
}

fn fault(gate: &dyn Gate, kind: &str, message: String) -> GateResult {
    GateResult::fail(gate.name(), Severity::Error, message).with_detail("fault", kind)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "gate panicked".to_string()
    }
}

fn summarize(results: &[GateResult]) -> String {
    let failed = results.iter().filter(|r| !r.passed).count();
    if failed == 0 {
        format!("all gates passed ({}/{})", results.len(), results.len())
    } else {
        format!("gate check failed: {} of {} gate(s) failed", failed, results.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryGateStore;
    use serde_json::json;

    fn engine(config: GateEngineConfig) -> (GateEngine, Arc<InMemoryGateStore>) {
        let store = Arc::new(InMemoryGateStore::new());
        (GateEngine::with_store(config, store.clone()), store)
    }

    #[test]
    fn config_defaults() {
        let config: GateEngineConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, GateEngineConfig::default());
        assert!(config.strict_mode);
        assert!(config.log_passed);
        assert_eq!(config.default_timeout_ms, 5000);
        assert_eq!(config.cache_ttl_secs, 300);
    }

    #[test]
    fn summary_wording() {
        let ok = GateResult::pass("a", Severity::Error, "ok");
        let bad = GateResult::fail("b", Severity::Error, "no");
        assert_eq!(summarize(&[ok.clone()]), "all gates passed (1/1)");
        assert_eq!(summarize(&[ok, bad]), "gate check failed: 1 of 2 gate(s) failed");
        assert_eq!(summarize(&[]), "all gates passed (0/0)");
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let s: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(s.as_ref()), "boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(owned.as_ref()), "bang");
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(other.as_ref()), "gate panicked");
    }

    #[tokio::test]
    async fn registration_is_last_write_wins_in_place() {
        let (engine, _) = engine(GateEngineConfig::default());
        engine
            .register_config(&GateConfig::new("a", GateType::Evaluation))
            .await
            .unwrap();
        engine
            .register_config(&GateConfig::new("b", GateType::Structural))
            .await
            .unwrap();
        engine
            .register_config(&GateConfig::new("a", GateType::Execution))
            .await
            .unwrap();

        let gates = engine.get_all_gates().await;
        assert_eq!(gates.len(), 2);
        assert_eq!(gates[0].name(), "a");
        assert_eq!(gates[0].gate_type(), GateType::Execution);
        assert_eq!(engine.get_gates_by_type(GateType::Evaluation).await.len(), 0);
    }

    #[tokio::test]
    async fn enable_disable_unknown_gate() {
        let (engine, _) = engine(GateEngineConfig::default());
        assert!(matches!(
            engine.disable_gate("ghost").await,
            Err(GateError::GateNotFound(ref n)) if n == "ghost"
        ));

        engine.register_default_gates().await.unwrap();
        engine.disable_gate("default_structural").await.unwrap();
        let descriptors = engine.descriptors().await;
        assert_eq!(descriptors.len(), 4);
        assert!(!descriptors[0].enabled);
        assert!(descriptors[1].enabled);

        assert!(engine.unregister_gate("default_structural").await.is_some());
        assert!(engine.unregister_gate("default_structural").await.is_none());
    }
}
