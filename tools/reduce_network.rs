// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Reduce a SONATA circuit from the command line.
//!
//! ```text
//! reduce_network circuit_config.json reduced/ --workers 4
//! reduce_network circuit_config.json reduced/ --population cortex
//! reduce_network circuit_config.json single/ --population cortex --node-id 12
//! reduce_network circuit_config.json --population cortex --node-id 12 --in-place
//! ```
//!
//! Exit codes: 0 success, 1 error, 2 population failure threshold exceeded,
//! 3 circuit validation failed, 4 single node failed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use sonata_reduction::config::{load_config, validate_config, SnrConfig};
use sonata_reduction::observability::{apply_debug_env, debug_flags_help, CrateDebugFlags};
use sonata_reduction::reduction::{
    NodeOutputTarget, Orchestrator, OrchestratorSettings, RunError, RunStatus,
};

/// SONATA network reduction - dendritic cable reduction with afferent edge remapping
#[derive(Parser, Debug)]
#[command(name = "reduce_network", version, author, long_about = None, after_help = debug_flags_help())]
struct Args {
    /// Path to the circuit's circuit_config.json
    circuit_config: PathBuf,

    /// Directory for the reduced circuit (or the standalone node bundle)
    output_dir: Option<PathBuf>,

    /// Reduce only this node population
    #[arg(long)]
    population: Option<String>,

    /// Reduce only this node (requires --population)
    #[arg(long, requires = "population")]
    node_id: Option<u64>,

    /// Rewrite the source circuit instead of writing a standalone bundle
    #[arg(long, requires = "node_id", default_value_t = false)]
    in_place: bool,

    /// Frequency (Hz) for the electrotonic length constant
    #[arg(long)]
    reduction_frequency: Option<f64>,

    /// Total segments across the reduced dendrites (-1 = d_lambda rule)
    #[arg(long, allow_negative_numbers = true)]
    total_segments_manual: Option<i64>,

    /// Map every synapse to the centre of its reduced segment
    #[arg(long, default_value_t = false)]
    return_seg_to_seg: bool,

    /// Worker threads (1 = sequential, 0 = all cores)
    #[arg(long)]
    workers: Option<usize>,

    /// A population fails once more than this many nodes fail
    #[arg(long)]
    failure_threshold: Option<usize>,

    /// Per-node wall-clock budget in seconds (0 = none)
    #[arg(long)]
    node_timeout_secs: Option<u64>,

    /// Path to snr_configuration.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for per-crate log files
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Enable debug logging for these crates (comma-separated)
    #[arg(long, value_delimiter = ',')]
    debug: Vec<String>,

    /// Enable debug logging for every crate
    #[arg(long, default_value_t = false)]
    debug_all: bool,
}

impl Args {
    /// Explicit flags, keyed the way the configuration loader expects
    fn overrides(&self) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        if let Some(value) = self.reduction_frequency {
            overrides.insert("reduction_frequency".to_string(), value.to_string());
        }
        if let Some(value) = self.total_segments_manual {
            overrides.insert("total_segments_manual".to_string(), value.to_string());
        }
        if self.return_seg_to_seg {
            overrides.insert("return_seg_to_seg".to_string(), "true".to_string());
        }
        if let Some(value) = self.workers {
            overrides.insert("workers".to_string(), value.to_string());
        }
        if let Some(value) = self.failure_threshold {
            overrides.insert("failure_threshold".to_string(), value.to_string());
        }
        if let Some(value) = self.node_timeout_secs {
            overrides.insert("node_timeout_secs".to_string(), value.to_string());
        }
        if let Some(dir) = &self.log_dir {
            overrides.insert("log_dir".to_string(), dir.display().to_string());
        }
        overrides
    }

    fn debug_flags(&self) -> CrateDebugFlags {
        let mut flags = CrateDebugFlags::default();
        if self.debug_all {
            flags.enable_all();
        }
        for crate_name in &self.debug {
            flags.enable(crate_name);
        }
        if let Ok(value) = std::env::var("SNR_DEBUG") {
            apply_debug_env(&mut flags, &value);
        }
        flags
    }

    fn output(&self) -> Result<&Path, RunError> {
        self.output_dir
            .as_deref()
            .ok_or_else(|| RunError::InvalidArgument("OUTPUT_DIR is required".to_string()))
    }
}

#[cfg(feature = "file-logging")]
type LogGuard = Option<sonata_reduction::observability::LoggingGuard>;
#[cfg(not(feature = "file-logging"))]
type LogGuard = ();

fn init_logging(args: &Args, config: &SnrConfig) -> anyhow::Result<LogGuard> {
    let flags = args.debug_flags();
    #[cfg(feature = "file-logging")]
    {
        if let Some(dir) = config.logging.log_dir() {
            let guard = sonata_reduction::observability::init_logging(
                &flags,
                &config.logging.level,
                dir,
                config.logging.retention_days,
                config.logging.retention_runs,
            )?;
            return Ok(Some(guard));
        }
        sonata_reduction::observability::init_console_logging(&flags, &config.logging.level)?;
        Ok(None)
    }
    #[cfg(not(feature = "file-logging"))]
    {
        sonata_reduction::observability::init_console_logging(&flags, &config.logging.level)
    }
}

fn run(args: &Args, config: &SnrConfig) -> Result<(), RunError> {
    let orchestrator = Orchestrator::with_defaults(OrchestratorSettings::from_config(config));
    info!(
        target: "reduce_network",
        "Reducing {} ({:?})",
        args.circuit_config.display(),
        orchestrator.settings()
    );

    match (&args.population, args.node_id) {
        (Some(population), Some(node_id)) => {
            let target = if args.in_place {
                NodeOutputTarget::InPlace
            } else {
                NodeOutputTarget::Standalone(args.output()?.to_path_buf())
            };
            let report =
                orchestrator.reduce_node(&args.circuit_config, population, node_id, &target)?;
            println!("{}", report);
        }
        (Some(population), None) => {
            let output = args.output()?;
            let report = orchestrator.reduce_population(&args.circuit_config, population, output)?;
            println!("{}", report);
            println!("Output: {}", output.display());
        }
        (None, _) => {
            let report = orchestrator.reduce_network(&args.circuit_config, args.output()?)?;
            println!("{}", report);
            if let Some(dir) = &report.output_dir {
                println!("Output: {}", dir.display());
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref(), Some(&args.overrides()))
        .and_then(|config| validate_config(&config).map(|()| config))
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(RunStatus::Error.exit_code() as u8);
        }
    };

    let _log_guard = match init_logging(&args, &config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::from(RunStatus::Error.exit_code() as u8);
        }
    };

    match run(&args, &config) {
        Ok(()) => ExitCode::from(RunStatus::Success.exit_code() as u8),
        Err(e) => {
            error!(target: "reduce_network", "{}", e);
            eprintln!("Error: {}", e);
            if let RunError::PopulationFailureThresholdExceeded { failures, .. } = &e {
                for failure in failures {
                    eprintln!("  {}", failure);
                }
            }
            ExitCode::from(e.status().exit_code() as u8)
        }
    }
}
