//! Configuration for gatectl

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ale_gate_engine::GateEngineConfig;
use ale_gate_types::GateConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Main gatectl configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatectlConfig {
    /// Engine behaviour
    #[serde(default)]
    pub engine: GateEngineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// JSON file holding gate definitions and the subject-type ontology
    #[serde(default)]
    pub gates_file: Option<PathBuf>,

    /// Register the stock gate set before the catalog
    #[serde(default)]
    pub register_defaults: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GatectlConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `ALE_GATE_*` environment variables (`__` separates nested keys, e.g.
    /// `ALE_GATE_ENGINE__STRICT_MODE=false`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&GatectlConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("ALE_GATE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

/// Declarative gates read from `gates_file`.
///
/// ```json
/// {
///   "gates": [ { "name": "shape", "type": "G1_STRUCTURAL", "config": { "requiredFields": ["id"] } } ],
///   "ontology": { "orders": [ { "name": "state", "type": "G6_EXECUTION", "config": { } } ] }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateCatalog {
    /// Registered at start-up
    #[serde(default)]
    pub gates: Vec<GateConfig>,

    /// Loaded on demand per subject type
    #[serde(default)]
    pub ontology: HashMap<String, Vec<GateConfig>>,
}

impl GateCatalog {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read gate catalog {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("invalid gate catalog {}", path.display()))
    }

    pub fn from_json(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }
}
