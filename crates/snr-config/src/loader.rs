// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{ConfigError, ConfigResult, SnrConfig};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "snr_configuration.toml";

/// Find the reduction configuration file
///
/// Search order:
/// 1. `SNR_CONFIG_PATH` environment variable
/// 2. Current working directory: `./snr_configuration.toml`
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("SNR_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by SNR_CONFIG_PATH not found: {}",
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));
        let mut current = cwd;
        for _ in 0..5 {
            match current.parent() {
                Some(parent) => {
                    search_paths.push(parent.join(CONFIG_FILE_NAME));
                    current = parent.to_path_buf();
                }
                None => break,
            }
        }
    }

    if let Some(path) = search_paths.iter().find(|p| p.exists()) {
        return Ok(path.clone());
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "'{}' not found in any of these locations:\n{}\n\nSet SNR_CONFIG_PATH to specify a custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration
///
/// An explicit `config_path` must exist. Without one the file is searched for,
/// and defaults are used when none is found.
///
/// # Errors
///
/// Returns error if an explicit config file is missing or contains invalid TOML
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<SnrConfig> {
    let config_file = match config_path {
        Some(path) => Some(path.to_path_buf()),
        None => match find_config_file() {
            Ok(path) => Some(path),
            Err(ConfigError::FileNotFound(_)) if env::var("SNR_CONFIG_PATH").is_err() => None,
            Err(e) => return Err(e),
        },
    };

    let mut config = match config_file {
        Some(path) => {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content)?
        }
        None => SnrConfig::default(),
    };

    apply_environment_overrides(&mut config);

    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli)?;
    }

    Ok(config)
}

fn parse_bool(value: &str) -> bool {
    let value = value.to_lowercase();
    value == "true" || value == "1" || value == "yes"
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `SNR_REDUCTION_FREQUENCY` -> `reduction.reduction_frequency`
/// - `SNR_TOTAL_SEGMENTS_MANUAL` -> `reduction.total_segments_manual`
/// - `SNR_RETURN_SEG_TO_SEG` -> `reduction.return_seg_to_seg`
/// - `SNR_WORKERS` -> `runtime.workers`
/// - `SNR_FAILURE_THRESHOLD` -> `runtime.failure_threshold`
/// - `SNR_NODE_TIMEOUT_SECS` -> `runtime.node_timeout_secs`
/// - `SNR_LOG_LEVEL` -> `logging.level`
/// - `SNR_LOG_DIR` -> `logging.log_dir`
///
/// Unparseable numeric values are ignored.
pub fn apply_environment_overrides(config: &mut SnrConfig) {
    if let Ok(value) = env::var("SNR_REDUCTION_FREQUENCY") {
        if let Ok(frequency) = value.parse::<f64>() {
            config.reduction.reduction_frequency = frequency;
        }
    }
    if let Ok(value) = env::var("SNR_TOTAL_SEGMENTS_MANUAL") {
        if let Ok(total) = value.parse::<i64>() {
            config.reduction.total_segments_manual = total;
        }
    }
    if let Ok(value) = env::var("SNR_RETURN_SEG_TO_SEG") {
        config.reduction.return_seg_to_seg = parse_bool(&value);
    }

    if let Ok(value) = env::var("SNR_WORKERS") {
        if let Ok(workers) = value.parse::<usize>() {
            config.runtime.workers = workers;
        }
    }
    if let Ok(value) = env::var("SNR_FAILURE_THRESHOLD") {
        if let Ok(threshold) = value.parse::<usize>() {
            config.runtime.failure_threshold = threshold;
        }
    }
    if let Ok(value) = env::var("SNR_NODE_TIMEOUT_SECS") {
        if let Ok(secs) = value.parse::<u64>() {
            config.runtime.node_timeout_secs = secs;
        }
    }

    if let Ok(value) = env::var("SNR_LOG_LEVEL") {
        config.logging.level = value;
    }
    if let Ok(value) = env::var("SNR_LOG_DIR") {
        config.logging.log_dir = PathBuf::from(value);
    }
}

fn parse_cli<T: std::str::FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(format!("--{} {}", key, value)))
}

/// Apply CLI argument overrides to configuration
///
/// Keys follow the reducer's option names, e.g.
/// `{"reduction_frequency": "100", "workers": "4"}`.
///
/// # Errors
///
/// Unlike environment overrides, a CLI value that does not parse is an error.
pub fn apply_cli_overrides(
    config: &mut SnrConfig,
    cli_args: &HashMap<String, String>,
) -> ConfigResult<()> {
    if let Some(value) = cli_args.get("reduction_frequency") {
        config.reduction.reduction_frequency = parse_cli("reduction_frequency", value)?;
    }
    if let Some(value) = cli_args.get("total_segments_manual") {
        config.reduction.total_segments_manual = parse_cli("total_segments_manual", value)?;
    }
    if let Some(value) = cli_args.get("return_seg_to_seg") {
        config.reduction.return_seg_to_seg = parse_bool(value);
    }
    if let Some(value) = cli_args.get("section_order") {
        config.reduction.section_order = value.clone();
    }

    if let Some(value) = cli_args.get("workers") {
        config.runtime.workers = parse_cli("workers", value)?;
    }
    if let Some(value) = cli_args.get("failure_threshold") {
        config.runtime.failure_threshold = parse_cli("failure_threshold", value)?;
    }
    if let Some(value) = cli_args.get("node_timeout_secs") {
        config.runtime.node_timeout_secs = parse_cli("node_timeout_secs", value)?;
    }

    if let Some(value) = cli_args.get("log_level") {
        config.logging.level = value.clone();
    }
    if let Some(value) = cli_args.get("log_dir") {
        config.logging.log_dir = PathBuf::from(value);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_find_config_file_env_var() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("custom_config.toml");
        File::create(&config_path).unwrap();

        env::set_var("SNR_CONFIG_PATH", config_path.to_str().unwrap());
        let result = find_config_file();
        env::remove_var("SNR_CONFIG_PATH");

        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_load_minimal_config() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::remove_var("SNR_WORKERS");
        env::remove_var("SNR_REDUCTION_FREQUENCY");
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[reduction]").unwrap();
        writeln!(file, "reduction_frequency = 100.0").unwrap();
        writeln!(file, "[runtime]").unwrap();
        writeln!(file, "workers = 4").unwrap();

        let config = load_config(Some(&config_path), None).unwrap();

        assert_eq!(config.reduction.reduction_frequency, 100.0);
        assert_eq!(config.runtime.workers, 4);
        assert_eq!(config.reduction.total_segments_manual, -1);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            load_config(Some(&missing), None),
            Err(ConfigError::IoError(_))
        ));
    }

    #[test]
    fn test_environment_overrides() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let mut config = SnrConfig::default();

        env::set_var("SNR_WORKERS", "8");
        env::set_var("SNR_RETURN_SEG_TO_SEG", "yes");
        env::set_var("SNR_FAILURE_THRESHOLD", "not-a-number");

        apply_environment_overrides(&mut config);

        env::remove_var("SNR_WORKERS");
        env::remove_var("SNR_RETURN_SEG_TO_SEG");
        env::remove_var("SNR_FAILURE_THRESHOLD");

        assert_eq!(config.runtime.workers, 8);
        assert!(config.reduction.return_seg_to_seg);
        assert_eq!(config.runtime.failure_threshold, 5);
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = SnrConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("reduction_frequency".to_string(), "50".to_string());
        cli_args.insert("total_segments_manual".to_string(), "9".to_string());

        apply_cli_overrides(&mut config, &cli_args).unwrap();

        assert_eq!(config.reduction.reduction_frequency, 50.0);
        assert_eq!(config.reduction.total_segments_manual, 9);
    }

    #[test]
    fn test_cli_rejects_garbage() {
        let mut config = SnrConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("workers".to_string(), "many".to_string());
        assert!(matches!(
            apply_cli_overrides(&mut config, &cli_args),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_override_precedence() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[runtime]").unwrap();
        writeln!(file, "workers = 2").unwrap();
        writeln!(file, "failure_threshold = 3").unwrap();

        env::set_var("SNR_WORKERS", "6");
        env::set_var("SNR_FAILURE_THRESHOLD", "7");

        let mut cli_args = HashMap::new();
        cli_args.insert("workers".to_string(), "10".to_string());

        let config = load_config(Some(&config_path), Some(&cli_args)).unwrap();

        env::remove_var("SNR_WORKERS");
        env::remove_var("SNR_FAILURE_THRESHOLD");

        // CLI wins for workers, env wins for threshold (no CLI override)
        assert_eq!(config.runtime.workers, 10);
        assert_eq!(config.runtime.failure_threshold, 7);
    }
}
