//! Persistence collaborator contract.
//!
//! The engine needs two things from storage: an append-only sink for
//! [`GateReport`]s and a read of declarative gate configurations keyed by
//! subject type. Both are traits so the engine can be constructed against
//! any backend; [`InMemoryGateStore`] implements both for development and
//! testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use ale_gate_types::{GateConfig, GateReport};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Append-only sink for gate reports.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Persist a report and return its id.
    async fn create_report(&self, report: GateReport) -> StoreResult<String>;

    /// Fetch a previously persisted report.
    async fn get_report(&self, id: &str) -> StoreResult<Option<GateReport>>;
}

/// Declarative gate definitions associated with a subject type.
#[async_trait]
pub trait GateConfigSource: Send + Sync {
    /// `None` when the subject type is not governed.
    async fn gate_configs(&self, subject_type: &str) -> StoreResult<Option<Vec<GateConfig>>>;
}

/// In-memory store for development and testing.
#[derive(Debug, Default)]
pub struct InMemoryGateStore {
    reports: RwLock<Vec<GateReport>>,
    ontology: RwLock<HashMap<String, Vec<GateConfig>>>,
    report_writes: AtomicUsize,
    config_reads: AtomicUsize,
}

impl InMemoryGateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed gate definitions for several subject types.
    pub fn with_ontology(ontology: HashMap<String, Vec<GateConfig>>) -> Self {
        Self {
            ontology: RwLock::new(ontology),
            ..Self::default()
        }
    }

    /// Replace the gate definitions of one subject type.
    pub async fn set_gate_configs(&self, subject_type: impl Into<String>, configs: Vec<GateConfig>) {
        self.ontology.write().await.insert(subject_type.into(), configs);
    }

    /// All persisted reports, oldest first.
    pub async fn reports(&self) -> Vec<GateReport> {
        self.reports.read().await.clone()
    }

    /// Number of `create_report` calls that succeeded.
    pub fn report_writes(&self) -> usize {
        self.report_writes.load(Ordering::SeqCst)
    }

    /// Number of `gate_configs` reads.
    pub fn config_reads(&self) -> usize {
        self.config_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportStore for InMemoryGateStore {
    async fn create_report(&self, report: GateReport) -> StoreResult<String> {
        let mut reports = self.reports.write().await;
        if reports.iter().any(|r| r.id == report.id) {
            return Err(StoreError::DuplicateReport(report.id));
        }
        let id = report.id.clone();
        reports.push(report);
        self.report_writes.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn get_report(&self, id: &str) -> StoreResult<Option<GateReport>> {
        let reports = self.reports.read().await;
        Ok(reports.iter().find(|r| r.id == id).cloned())
    }
}

#[async_trait]
impl GateConfigSource for InMemoryGateStore {
    async fn gate_configs(&self, subject_type: &str) -> StoreResult<Option<Vec<GateConfig>>> {
        self.config_reads.fetch_add(1, Ordering::SeqCst);
        let ontology = self.ontology.read().await;
        Ok(ontology.get(subject_type).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ale_gate_types::{GateResult, GateType, Severity};

    #[tokio::test]
    async fn reports_are_append_only() {
        let store = InMemoryGateStore::new();
        let report = GateReport::new(
            "orders",
            None,
            vec![GateResult::pass("g", Severity::Info, "ok")],
        );
        let dup = report.clone();

        let id = store.create_report(report).await.unwrap();
        assert_eq!(store.report_writes(), 1);
        assert!(store.get_report(&id).await.unwrap().is_some());

        let err = store.create_report(dup).await.unwrap_err();
        assert_eq!(err, StoreError::DuplicateReport(id));
        assert_eq!(store.report_writes(), 1);
    }

    #[tokio::test]
    async fn ontology_lookup_by_subject_type() {
        let store = InMemoryGateStore::new();
        store
            .set_gate_configs("orders", vec![GateConfig::new("shape", GateType::Structural)])
            .await;

        let configs = store.gate_configs("orders").await.unwrap().unwrap();
        assert_eq!(configs.len(), 1);
        assert!(store.gate_configs("invoices").await.unwrap().is_none());
        assert_eq!(store.config_reads(), 2);
    }
}
