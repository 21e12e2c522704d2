// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for morphology, biophysics and simulation.

use std::path::PathBuf;

/// Result type for morphology and segment index operations
pub type MorphologyResult<T> = Result<T, MorphologyError>;

/// Structural problems with a morphology or its segment layout
#[derive(Debug, thiserror::Error)]
pub enum MorphologyError {
    #[error("SWC line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Sample {id} references unknown parent {parent}")]
    UnknownParent { id: i64, parent: i64 },

    #[error("Sample {id} is defined before its parent {parent}")]
    ParentAfterChild { id: i64, parent: i64 },

    #[error("Duplicate sample id {0}")]
    DuplicateSample(i64),

    #[error("Unsupported SWC structure type {code} at sample {id}")]
    UnsupportedSectionType { id: i64, code: i32 },

    #[error("Morphology has no soma")]
    NoSoma,

    #[error("Section {section} has zero segments")]
    EmptySection { section: String },

    #[error("Section {section} is not reachable from the soma")]
    DisconnectedSection { section: String },

    #[error("Invalid cell structure: {0}")]
    InvalidStructure(String),

    #[error("Unsupported morphology format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("Failed to read morphology {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for biophysics parameter files
pub type BiophysicsResult<T> = Result<T, BiophysicsError>;

#[derive(Debug, thiserror::Error)]
pub enum BiophysicsError {
    #[error("Invalid biophysics JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to read biophysics {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid biophysics value: {0}")]
    InvalidValue(String),
}

/// Result type for simulator operations
pub type SimulatorResult<T> = Result<T, SimulatorError>;

/// Failures raised by the simulation collaborator
#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error(transparent)]
    Morphology(#[from] MorphologyError),

    #[error(transparent)]
    Biophysics(#[from] BiophysicsError),

    #[error("No '{list}' section list in biophysics for section {section}")]
    MissingSectionList { list: String, section: String },

    #[error("Simulator session already hosts cell '{0}'")]
    SessionBusy(String),

    #[error("Simulator unavailable: {0}")]
    Unavailable(String),
}
