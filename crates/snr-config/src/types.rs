// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `snr_configuration.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Populations abort once their failure count exceeds this value.
pub const DEFAULT_FAILURE_THRESHOLD: usize = 5;

/// Section enumeration understood by the reducer.
pub const SUPPORTED_SECTION_ORDERS: &[&str] = &["nrn"];

/// Log levels accepted by `logging.level`.
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SnrConfig {
    pub reduction: ReductionConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
}

/// Cable reduction parameters forwarded to the reduction algorithm
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReductionConfig {
    /// Frequency (Hz) at which electrotonic lengths are evaluated
    pub reduction_frequency: f64,
    /// Total reduced segment count; -1 selects the d_lambda rule
    pub total_segments_manual: i64,
    /// Place every synapse at the centre of its reduced segment
    pub return_seg_to_seg: bool,
    /// Canonical section enumeration
    pub section_order: String,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            reduction_frequency: 0.0,
            total_segments_manual: -1,
            return_seg_to_seg: false,
            section_order: "nrn".to_string(),
        }
    }
}

impl ReductionConfig {
    /// Manual segment total, `None` when the automatic rule applies
    pub fn manual_segments(&self) -> Option<u32> {
        if self.total_segments_manual > 0 {
            u32::try_from(self.total_segments_manual).ok()
        } else {
            None
        }
    }
}

/// Execution policy for a reduction run
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub workers: usize, // 0 = one per CPU
    pub failure_threshold: usize,
    pub node_timeout_secs: u64, // 0 = disabled
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            node_timeout_secs: 0,
        }
    }
}

impl RuntimeConfig {
    /// Worker count with `0` resolved against available parallelism
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.workers
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: PathBuf,
    pub retention_days: u64,
    pub retention_runs: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::new(),
            retention_days: 30,
            retention_runs: 10,
        }
    }
}

impl LoggingConfig {
    /// File logging is enabled when a directory is configured
    pub fn log_dir(&self) -> Option<&PathBuf> {
        if self.log_dir.as_os_str().is_empty() {
            None
        } else {
            Some(&self.log_dir)
        }
    }
}
