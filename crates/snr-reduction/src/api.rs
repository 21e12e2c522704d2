// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Entry points with the built-in collaborators (JSON storage, cable
//! simulator, equivalent-cable reduction).
//!
//! Each call validates the circuit first and writes nothing unless the run
//! succeeds. Use [`Orchestrator`] directly to plug in other collaborators.

use std::path::Path;

use crate::adapter::ReductionOptions;
use crate::error::RunResult;
use crate::orchestrator::{NodeOutputTarget, Orchestrator, OrchestratorSettings};
use crate::report::{NetworkReport, NodeReport, PopulationReport};

fn orchestrator(settings: OrchestratorSettings) -> Orchestrator {
    Orchestrator::with_defaults(settings)
}

/// Reduce every biophysical node of `population` into a new circuit at `output_dir`
pub fn reduce_population(
    circuit_config: &Path,
    output_dir: &Path,
    population: &str,
    options: ReductionOptions,
) -> RunResult<PopulationReport> {
    orchestrator(OrchestratorSettings {
        options,
        ..OrchestratorSettings::default()
    })
    .reduce_population(circuit_config, population, output_dir)
}

/// Reduce one node, either in place or into a standalone bundle
pub fn reduce_node(
    node_id: u64,
    population: &str,
    circuit_config: &Path,
    options: ReductionOptions,
    target: &NodeOutputTarget,
) -> RunResult<NodeReport> {
    orchestrator(OrchestratorSettings {
        options,
        ..OrchestratorSettings::default()
    })
    .reduce_node(circuit_config, population, node_id, target)
}

/// Reduce every node population
pub fn reduce_network(
    circuit_config: &Path,
    output_dir: &Path,
    settings: OrchestratorSettings,
) -> RunResult<NetworkReport> {
    orchestrator(settings).reduce_network(circuit_config, output_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CircuitFixture;

    #[test]
    fn test_reduce_population_defaults() {
        let fixture = CircuitFixture::new().cortex_nodes(2).build().unwrap();
        let output = fixture.output_dir("api");
        let report = reduce_population(
            fixture.config_path(),
            &output,
            "cortex",
            ReductionOptions::default(),
        )
        .unwrap();
        assert_eq!(report.counts().reduced, 2);
        assert!(output.join("circuit_config.json").is_file());
    }

    #[test]
    fn test_reduce_node_skips_point_neuron() {
        let fixture = CircuitFixture::new().point_nodes(&[1]).build().unwrap();
        let report = reduce_node(
            1,
            "cortex",
            fixture.config_path(),
            ReductionOptions::default(),
            &NodeOutputTarget::Standalone(fixture.output_dir("single")),
        )
        .unwrap();
        assert!(report.output.is_none());
        assert!(!fixture.output_dir("single").exists());
    }
}
