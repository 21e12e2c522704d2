// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy.
//!
//! Per-node errors ([`NodeError`]) never escape the Node Reducer; they become
//! `Failed` outcomes. Only [`RunError`] aborts a run.

use std::time::Duration;

use snr_circuit::{CircuitError, StorageError, ValidationResult};
use snr_config::ConfigError;
use snr_morphology::{BiophysicsError, MorphologyError, SimulatorError};

use crate::report::{NodeFailure, RunStatus};

pub type ReductionResult<T> = Result<T, ReductionError>;
pub type RemapResult<T> = Result<T, RemapError>;
pub type NodeResult<T> = Result<T, NodeError>;
pub type RunResult<T> = Result<T, RunError>;

/// The reduction algorithm could not reduce a morphology
#[derive(Debug, thiserror::Error)]
pub enum ReductionError {
    #[error("Morphology has no dendritic sections")]
    NoDendrites,

    #[error("Axonal section {section} lies inside a dendritic subtree")]
    AxonInDendrite { section: String },

    #[error("Dendritic subtree rooted at {section} has zero electrotonic length")]
    ZeroLength { section: String },

    #[error("No finite length constant for {section} at {frequency} Hz")]
    NonFiniteLengthConstant { section: String, frequency: f64 },

    #[error("Invalid reduction frequency {0} Hz")]
    InvalidFrequency(f64),

    #[error("Reduction contract violated: {0}")]
    Contract(String),

    #[error(transparent)]
    Morphology(#[from] MorphologyError),
}

/// The correspondence table cannot place an edge
#[derive(Debug, thiserror::Error)]
pub enum RemapError {
    #[error("No correspondence for segment ({section}, {segment}) used by {population} row {row}")]
    MissingCorrespondence {
        population: String,
        row: usize,
        section: u32,
        segment: u32,
    },

    #[error("{population} row {row} remapped to ({section}, {segment}), which the reduced cell does not have")]
    OutsideReducedCell {
        population: String,
        row: usize,
        section: u32,
        segment: u32,
    },
}

/// Why one node could not be reduced
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Model type '{model_type}' is not biophysical")]
    Unsupported { model_type: String },

    #[error("Missing component: {0}")]
    MissingComponent(String),

    #[error("Invalid placement in {population} row {row}: {reason}")]
    Placement {
        population: String,
        row: usize,
        reason: String,
    },

    #[error("Exceeded the {budget:?} per-node budget after {elapsed:?}")]
    Timeout { budget: Duration, elapsed: Duration },

    #[error(transparent)]
    Reduction(#[from] ReductionError),

    #[error("Remap integrity: {0}")]
    RemapIntegrity(#[from] RemapError),

    #[error(transparent)]
    Simulator(#[from] SimulatorError),

    #[error(transparent)]
    Biophysics(#[from] BiophysicsError),

    #[error(transparent)]
    Morphology(#[from] MorphologyError),

    #[error(transparent)]
    Circuit(#[from] CircuitError),
}

/// Errors that abort a run
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Circuit validation failed: {0}")]
    Validation(ValidationResult),

    #[error("Population '{population}': {failed} nodes failed, more than the threshold of {threshold}")]
    PopulationFailureThresholdExceeded {
        population: String,
        failed: usize,
        threshold: usize,
        failures: Vec<NodeFailure>,
    },

    #[error("Node {population}:{} failed at {}: {}", failure.node_id, failure.stage, failure.reason)]
    NodeFailed {
        population: String,
        failure: NodeFailure,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Circuit(#[from] CircuitError),
}

impl RunError {
    pub fn status(&self) -> RunStatus {
        match self {
            RunError::Validation(_) => RunStatus::ValidationFailed,
            RunError::PopulationFailureThresholdExceeded { .. } => RunStatus::PopulationFailed,
            RunError::NodeFailed { .. } => RunStatus::SingleNodeFailed,
            _ => RunStatus::Error,
        }
    }
}
