// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
# snr-circuit

SONATA circuits as the reduction sees them:

- **descriptor**: `circuit_config.json` with manifest substitution
- **types**: node/edge type tables (space-separated CSV)
- **population**: node and edge populations, attribute groups, node models
  and placement schemas
- **format**: population file formats (JSON, SONATA HDF5 with feature `hdf5`)
- **store**: the storage collaborator over a population format
- **validator**: pre-flight checks run before any node is reduced

Copyright 2025 Neuraville Inc.
Licensed under the Apache License, Version 2.0
*/

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod circuit;
pub mod column;
pub mod descriptor;
pub mod error;
pub mod format;
#[cfg(feature = "hdf5")]
pub mod h5;
pub mod population;
pub mod store;
pub mod types;
pub mod validator;

pub use circuit::Circuit;
pub use column::{AttributeValue, Column};
pub use descriptor::{CircuitDescriptor, EdgeFiles, NodeFiles};
pub use error::{CircuitError, CircuitResult, StorageError, StorageResult};
pub use format::{JsonFormat, PopulationFormat, SonataFormat};
#[cfg(feature = "hdf5")]
pub use h5::Hdf5Format;
pub use population::{
    placement, AttributeGroup, EdgePopulation, ModelTemplate, NodeModel, NodePopulation,
    PlacementSchema, MODEL_TEMPLATE, MODEL_TYPE, MORPHOLOGY,
};
pub use store::{
    BundleEdge, CircuitStore, ComponentArtifact, ComponentKind, FileCircuitStore, JsonCircuitStore,
    NodeBundle, SonataCircuitStore, WriteTarget,
};
#[cfg(feature = "hdf5")]
pub use store::Hdf5CircuitStore;
pub use types::TypeTable;
pub use validator::{validate_circuit, ValidationReport, ValidationResult};
