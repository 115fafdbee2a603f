//! TTL cache of passing gate evaluations.
//!
//! Keys are content-addressed: `gate:` followed by the blake3 digest of a
//! canonical JSON document over the action, subject, a digest of the
//! payload and the gate selection. "All gates" and an explicit (possibly
//! empty) list of names never share a key. Object keys are sorted before
//! hashing so field order never changes the key.
//!
//! Every entry is tagged with the cache generation it was computed under.
//! [`GateCache::invalidate`] bumps the generation, so results computed
//! against an older gate registry are never served again, even if they are
//! written after the invalidation.
//!
//! Expired entries are evicted lazily on read and swept on every write.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ale_gate_types::{GateContext, GateExecutionResult};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::debug;

const KEY_PREFIX: &str = "gate:";

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub result: GateExecutionResult,
    pub expires_at: Instant,
    pub generation: u64,
}

impl CacheEntry {
    fn is_live(&self, now: Instant, generation: u64) -> bool {
        self.expires_at > now && self.generation == generation
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Concurrent result cache shared by all evaluations of one engine.
#[derive(Debug)]
pub struct GateCache {
    entries: DashMap<String, CacheEntry>,
    default_ttl: Duration,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for GateCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

impl GateCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Current generation; entries from earlier generations are dead.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Retire every cached result, including writes still in flight.
    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.entries.clear();
        debug!(generation, "Invalidated gate cache");
    }

    /// Deterministic key for a context and gate selection.
    ///
    /// `None` selects every registered gate. A named selection is treated as
    /// a set: order and duplicates do not matter.
    pub fn key(context: &GateContext, gate_names: Option<&[String]>) -> String {
        let data_hash = digest(&canonical_json(&Value::Object(context.data.clone())));
        let selection = match gate_names {
            None => json!({"kind": "all"}),
            Some(names) => {
                let gates: BTreeSet<&str> = names.iter().map(String::as_str).collect();
                json!({"kind": "named", "gates": gates})
            }
        };
        let material = json!({
            "action": context.action.as_str(),
            "subjectType": context.subject_type,
            "subjectId": context.subject_id,
            "dataHash": data_hash,
            "selection": selection,
        });
        format!("{}{}", KEY_PREFIX, digest(&canonical_json(&material)))
    }

    pub fn get(
        &self,
        context: &GateContext,
        gate_names: Option<&[String]>,
    ) -> Option<GateExecutionResult> {
        self.get_by_key(&Self::key(context, gate_names))
    }

    pub fn get_by_key(&self, key: &str) -> Option<GateExecutionResult> {
        let now = Instant::now();
        let generation = self.generation();
        // The shard guard must be released before removing from the same shard.
        let lookup = self
            .entries
            .get(key)
            .map(|entry| entry.is_live(now, generation).then(|| entry.result.clone()));

        match lookup {
            Some(Some(result)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(result)
            }
            Some(None) => {
                self.entries
                    .remove_if(key, |_, entry| !entry.is_live(now, generation));
                debug!(key, "Evicted stale gate cache entry");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a result under the current generation. `ttl` overrides the
    /// cache default.
    pub fn set(
        &self,
        context: &GateContext,
        gate_names: Option<&[String]>,
        result: GateExecutionResult,
        ttl: Option<Duration>,
    ) {
        self.insert(context, gate_names, result, ttl, self.generation());
    }

    /// Store a result computed under `generation`. Returns `false`, storing
    /// nothing, when the cache has been invalidated since.
    pub fn set_for_generation(
        &self,
        context: &GateContext,
        gate_names: Option<&[String]>,
        result: GateExecutionResult,
        ttl: Option<Duration>,
        generation: u64,
    ) -> bool {
        if generation != self.generation() {
            debug!(generation, "Discarding result computed before invalidation");
            return false;
        }
        self.insert(context, gate_names, result, ttl, generation);
        true
    }

    fn insert(
        &self,
        context: &GateContext,
        gate_names: Option<&[String]>,
        result: GateExecutionResult,
        ttl: Option<Duration>,
        generation: u64,
    ) {
        let key = Self::key(context, gate_names);
        let now = Instant::now();
        let expires_at = now + ttl.unwrap_or(self.default_ttl);
        self.entries.insert(
            key,
            CacheEntry {
                result,
                expires_at,
                generation,
            },
        );
        self.purge_expired_at(now);
    }

    pub fn delete(&self, context: &GateContext, gate_names: Option<&[String]>) -> bool {
        self.entries.remove(&Self::key(context, gate_names)).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let generation = self.generation();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now, generation));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, including any not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            size: self.len(),
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

fn digest(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

/// JSON text with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ale_gate_types::{GateResult, JsonMap, Severity};

    fn ctx(data: Value) -> GateContext {
        let data: JsonMap = match data {
            Value::Object(map) => map,
            _ => JsonMap::new(),
        };
        GateContext::builder("update", "orders")
            .subject_id("o-1")
            .data(data)
            .build()
    }

    fn passing() -> GateExecutionResult {
        GateExecutionResult {
            passed: true,
            results: vec![GateResult::pass("g", Severity::Error, "ok")],
            report_id: Some("r-1".into()),
            summary: "all gates passed (1/1)".into(),
            duration_ms: 3,
        }
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn key_ignores_gate_order_and_field_order() {
        let a = GateCache::key(
            &ctx(json!({"b": 1, "a": {"y": 2, "x": 1}})),
            Some(names(&["g2", "g1"]).as_slice()),
        );
        let b = GateCache::key(
            &ctx(json!({"a": {"x": 1, "y": 2}, "b": 1})),
            Some(names(&["g1", "g2", "g1"]).as_slice()),
        );
        assert_eq!(a, b);
        assert!(a.starts_with("gate:"));
    }

    #[test]
    fn key_depends_on_every_component() {
        let base = GateCache::key(&ctx(json!({"a": 1})), None);
        assert_ne!(base, GateCache::key(&ctx(json!({"a": 2})), None));
        assert_ne!(base, GateCache::key(&ctx(json!({"a": 1})), Some(names(&["g"]).as_slice())));

        let mut other = ctx(json!({"a": 1}));
        other.subject_id = Some("o-2".into());
        assert_ne!(base, GateCache::key(&other, None));
    }

    #[test]
    fn all_gates_and_named_selections_never_collide() {
        let context = ctx(json!({"a": 1}));
        let all = GateCache::key(&context, None);
        assert_ne!(all, GateCache::key(&context, Some(&[] as &[String])));
        // A name containing the list separator is not a pair of names.
        assert_ne!(
            GateCache::key(&context, Some(names(&["a,b"]).as_slice())),
            GateCache::key(&context, Some(names(&["a", "b"]).as_slice()))
        );
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        assert_eq!(
            canonical_json(&json!({"b": [{"d": 1, "c": "x"}], "a": null})),
            r#"{"a":null,"b":[{"c":"x","d":1}]}"#
        );
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = GateCache::new(Duration::from_secs(300));
        let context = ctx(json!({"a": 1}));
        let result = passing();
        cache.set(&context, None, result.clone(), None);
        assert_eq!(cache.get(&context, None), Some(result));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cache.get(&context, None), None);
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_sweep_expired_entries() {
        let cache = GateCache::default();
        cache.set(&ctx(json!({"a": 1})), None, passing(), Some(Duration::from_secs(1)));
        cache.set(&ctx(json!({"a": 2})), None, passing(), None);
        assert_eq!(cache.len(), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.set(&ctx(json!({"a": 3})), None, passing(), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn invalidation_retires_late_writes() {
        let cache = GateCache::default();
        let context = ctx(json!({"a": 1}));
        let before = cache.generation();
        cache.set(&context, None, passing(), None);

        cache.invalidate();
        assert!(cache.is_empty());
        assert_eq!(cache.generation(), before + 1);

        // Computed before the invalidation, written after it.
        assert!(!cache.set_for_generation(&context, None, passing(), None, before));
        assert_eq!(cache.get(&context, None), None);

        assert!(cache.set_for_generation(&context, None, passing(), None, before + 1));
        assert!(cache.get(&context, None).is_some());
    }

    #[test]
    fn delete_and_clear() {
        let cache = GateCache::default();
        let context = ctx(json!({}));
        let selection = names(&["g"]);
        cache.set(&context, Some(selection.as_slice()), passing(), None);
        assert!(cache.delete(&context, Some(selection.as_slice())));
        assert!(!cache.delete(&context, Some(selection.as_slice())));

        cache.set(&context, None, passing(), None);
        cache.clear();
        assert_eq!(cache.stats().size, 0);
    }
}
