// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for circuit access and persistence.

use std::path::PathBuf;

/// Result type for in-memory circuit operations
pub type CircuitResult<T> = Result<T, CircuitError>;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum CircuitError {
    #[error("Unknown node population '{0}'")]
    UnknownNodePopulation(String),

    #[error("Unknown edge population '{0}'")]
    UnknownEdgePopulation(String),

    #[error("Node {node_id} out of range for population '{population}' ({size} nodes)")]
    NodeOutOfRange {
        population: String,
        node_id: u64,
        size: usize,
    },

    #[error("Row {row} out of range in population '{population}'")]
    RowOutOfRange { population: String, row: usize },

    #[error("Population '{population}' has no group '{group}'")]
    MissingGroup { population: String, group: String },

    #[error("Attribute '{attribute}' missing for row {row} of '{population}'")]
    MissingAttribute {
        population: String,
        row: usize,
        attribute: String,
    },

    #[error("Attribute '{attribute}' of '{population}': {reason}")]
    IncompatibleColumn {
        population: String,
        attribute: String,
        reason: String,
    },

    #[error("Invalid model template '{0}', expected '<format>:<name>'")]
    InvalidModelTemplate(String),

    #[error("Descriptor error: {0}")]
    Descriptor(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Output directory already exists: {0}")]
    OutputExists(PathBuf),

    #[error("Output directory {output} lies inside the source circuit {source_dir}")]
    OutputInsideSource { output: PathBuf, source_dir: PathBuf },

    #[error("HDF5 error in {path}: {reason}")]
    Hdf5 { path: PathBuf, reason: String },

    #[error("{0} is an HDF5 population file; rebuild with the `hdf5` feature to read it")]
    Hdf5Unavailable(PathBuf),

    #[error("Population file {path} has a malformed population: {reason}")]
    MalformedPopulation { path: PathBuf, reason: String },

    #[error(transparent)]
    Circuit(#[from] CircuitError),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> StorageError {
        let path = path.into();
        move |source| StorageError::Io { path, source }
    }
}
