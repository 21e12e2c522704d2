// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! Ensures configuration values are within valid ranges before a run starts.

use crate::types::{LOG_LEVELS, SUPPORTED_SECTION_ORDERS};
use crate::{ConfigError, ConfigResult, SnrConfig};

/// Validation errors that can occur during config validation
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    InvalidValue { field: String, reason: String },
    Unsupported { field: String, value: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
            Self::Unsupported { field, value } => {
                write!(f, "Unsupported value for {}: '{}'", field, value)
            }
        }
    }
}

/// Validate the complete configuration
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every problem found
pub fn validate_config(config: &SnrConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_reduction(config, &mut errors);
    validate_logging(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn validate_reduction(config: &SnrConfig, errors: &mut Vec<ConfigValidationError>) {
    let reduction = &config.reduction;

    if !reduction.reduction_frequency.is_finite() || reduction.reduction_frequency < 0.0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "reduction.reduction_frequency".to_string(),
            reason: format!(
                "must be a finite frequency >= 0 Hz, got {}",
                reduction.reduction_frequency
            ),
        });
    }

    if reduction.total_segments_manual == 0 || reduction.total_segments_manual < -1 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "reduction.total_segments_manual".to_string(),
            reason: format!(
                "must be -1 (automatic) or a positive count, got {}",
                reduction.total_segments_manual
            ),
        });
    }

    if !SUPPORTED_SECTION_ORDERS.contains(&reduction.section_order.as_str()) {
        errors.push(ConfigValidationError::Unsupported {
            field: "reduction.section_order".to_string(),
            value: reduction.section_order.clone(),
        });
    }
}

fn validate_logging(config: &SnrConfig, errors: &mut Vec<ConfigValidationError>) {
    let level = config.logging.level.to_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ConfigValidationError::Unsupported {
            field: "logging.level".to_string(),
            value: config.logging.level.clone(),
        });
    }
}
