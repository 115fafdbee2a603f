//! gatectl - evaluate governance gates from the command line
//!
//! Loads the engine configuration and a gate catalog, then:
//! - runs the full gate chain for a context (`check`)
//! - runs an advisory pre-check by gate type (`precheck`)
//! - lists registered gates (`list`)
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use ale_gate_engine::{GateEngine, InMemoryGateStore};
use ale_gate_types::{GateContext, GateType};
use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::{GateCatalog, GatectlConfig};

/// Exit status when the gates block the operation.
const BLOCKED: u8 = 2;

/// gatectl CLI
#[derive(Parser)]
#[command(name = "gatectl")]
#[command(about = "Evaluate governance gates against an operation context", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "ALE_GATE_CONFIG")]
    config: Option<String>,

    /// Gate catalog (JSON); overrides `gates_file` from the configuration
    #[arg(short, long, env = "ALE_GATE_CATALOG")]
    gates: Option<PathBuf>,

    /// Log level; overrides the configuration
    #[arg(long, env = "ALE_GATE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "ALE_GATE_LOG_JSON")]
    json: bool,

    /// Evaluate every gate even after a failure
    #[arg(long)]
    lenient: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gate chain for a context file (`-` reads stdin)
    Check {
        context: PathBuf,

        /// Restrict evaluation to these gates
        #[arg(long = "gate")]
        gates: Vec<String>,

        /// Do not load the context's subject-type gates from the catalog ontology
        #[arg(long)]
        no_ontology: bool,
    },

    /// Advisory evaluation by gate type; writes no report
    Precheck {
        context: PathBuf,

        /// Gate types to evaluate (default: structural, evidence)
        #[arg(long = "type", value_parser = parse_gate_type)]
        types: Vec<GateType>,
    },

    /// List registered gates
    List {
        /// Only gates of this type
        #[arg(long = "type", value_parser = parse_gate_type)]
        gate_type: Option<GateType>,

        /// Also load the ontology gates of this subject type
        #[arg(long)]
        subject: Option<String>,
    },

    /// Show the effective configuration
    Config,
}

fn parse_gate_type(s: &str) -> Result<GateType, String> {
    GateType::parse(s).ok_or_else(|| format!("unknown gate type: {}", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config =
        GatectlConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if cli.lenient {
        config.engine.strict_mode = false;
    }
    if let Some(path) = &cli.gates {
        config.gates_file = Some(path.clone());
    }

    // Initialize tracing
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());
    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    if let Commands::Config = cli.command {
        print_json(&config)?;
        return Ok(ExitCode::SUCCESS);
    }

    let engine = build_engine(&config).await?;

    match cli.command {
        Commands::Check {
            context,
            gates,
            no_ontology,
        } => {
            let context = read_context(&context)?;
            if !no_ontology {
                engine
                    .load_gates_from_ontology(&context.subject_type)
                    .await
                    .context("failed to load ontology gates")?;
            }
            let selection = (!gates.is_empty()).then_some(gates.as_slice());
            let result = engine.execute(&context, selection).await?;
            print_json(&result)?;
            Ok(exit_code(result.passed))
        }
        Commands::Precheck { context, types } => {
            let context = read_context(&context)?;
            let selection = (!types.is_empty()).then_some(types.as_slice());
            let result = engine.pre_check(&context, selection).await;
            print_json(&result)?;
            Ok(exit_code(result.passed))
        }
        Commands::List { gate_type, subject } => {
            if let Some(subject) = subject {
                engine.load_gates_from_ontology(&subject).await?;
            }
            let descriptors: Vec<_> = engine
                .descriptors()
                .await
                .into_iter()
                .filter(|d| gate_type.map_or(true, |t| d.gate_type == t))
                .collect();
            print_json(&descriptors)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config => Ok(ExitCode::SUCCESS),
    }
}

async fn build_engine(config: &GatectlConfig) -> anyhow::Result<GateEngine> {
    let catalog = match &config.gates_file {
        Some(path) => GateCatalog::from_file(path)?,
        None => GateCatalog::default(),
    };

    let store = Arc::new(InMemoryGateStore::with_ontology(catalog.ontology));
    let engine = GateEngine::with_store(config.engine.clone(), store);

    if config.register_defaults {
        engine.register_default_gates().await?;
    }
    for gate in &catalog.gates {
        engine
            .register_config(gate)
            .await
            .with_context(|| format!("invalid gate definition '{}'", gate.name))?;
    }
    info!(
        gates = engine.get_all_gates().await.len(),
        strict_mode = config.engine.strict_mode,
        "Gate engine ready"
    );
    Ok(engine)
}

fn read_context(path: &Path) -> anyhow::Result<GateContext> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("cannot read context from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("cannot read context {}", path.display()))?
    };
    let context: GateContext = serde_json::from_str(&raw).context("invalid gate context")?;
    debug!(
        action = %context.action,
        subject_type = %context.subject_type,
        "Loaded gate context"
    );
    Ok(context)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(passed: bool) -> ExitCode {
    if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(BLOCKED)
    }
}
