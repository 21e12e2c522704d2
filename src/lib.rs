// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # sonata-reduction
//!
//! Reduces the biophysically detailed neurons of a SONATA circuit to
//! simplified cable models, one node at a time, and rewrites every afferent
//! edge so its synapse lands at the equivalent location on the reduced cell.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use sonata_reduction::prelude::*;
//!
//! let settings = OrchestratorSettings {
//!     workers: 4,
//!     ..OrchestratorSettings::default()
//! };
//! let report = reduce_network(
//!     Path::new("circuit/circuit_config.json"),
//!     Path::new("reduced"),
//!     settings,
//! )?;
//! println!("{}", report);
//! # Ok::<(), RunError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Foundation: snr-config, snr-observability              │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Model: snr-morphology (cells, segment index,           │
//! │         simulator), snr-circuit (populations, storage)  │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Algorithm: snr-reduction (adapter, remapper,           │
//! │             node reducer, worker pool, orchestrator)    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## License
//!
//! Apache-2.0

pub use snr_circuit as circuit;
pub use snr_config as config;
pub use snr_morphology as morphology;
pub use snr_observability as observability;
pub use snr_reduction as reduction;

/// Prelude - commonly used types and entry points
pub mod prelude {
    pub use crate::circuit::{
        Circuit, CircuitStore, JsonCircuitStore, SonataCircuitStore, ValidationResult,
    };
    pub use crate::config::{load_config, validate_config, SnrConfig};
    pub use crate::morphology::{CableSimulator, SectionOrdering, Simulator};
    pub use crate::reduction::{
        reduce_network, reduce_node, reduce_population, EquivalentCableReduction, MergePolicy,
        NetworkReport, NodeOutputTarget, NodeReport, Orchestrator, OrchestratorSettings,
        PopulationReport, ReductionAlgorithm, ReductionOptions, RunError, RunStatus,
    };
}

/// Version of the umbrella crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_match() {
        assert_eq!(VERSION, reduction::VERSION);
        assert_eq!(VERSION, circuit::VERSION);
    }
}
