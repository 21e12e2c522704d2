// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Reduction Orchestrator.

Validates the circuit, runs the Node Reducer over a population (or a single
node), applies the failure budget and commits `Reduced` outcomes into the
in-memory circuit in node-id order. Nothing reaches disk until every
population has been reduced within budget; the storage collaborator then
writes the whole circuit in one step.

Copyright 2025 Neuraville Inc.
Licensed under the Apache License, Version 2.0
*/

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use snr_circuit::{
    validate_circuit, BundleEdge, Circuit, CircuitResult, CircuitStore, ComponentArtifact,
    NodeBundle, SonataCircuitStore, StorageError, WriteTarget,
};
use snr_config::{SnrConfig, DEFAULT_FAILURE_THRESHOLD};
use snr_morphology::{CableSimulator, SectionOrdering, Simulator};
use tracing::{debug, info, warn};

use crate::adapter::{ReductionAdapter, ReductionAlgorithm, ReductionOptions};
use crate::cable::EquivalentCableReduction;
use crate::error::{RunError, RunResult};
use crate::node_reducer::{NodeOutcome, NodeReducer, ReducedNode};
use crate::report::{NetworkReport, NodeFailure, NodeReport, NodeStatus, PopulationReport};
use crate::worker::WorkerPool;

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub options: ReductionOptions,
    /// 1 runs sequentially
    pub workers: usize,
    /// A population fails once more than this many nodes fail
    pub failure_threshold: usize,
    pub node_timeout: Option<Duration>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            options: ReductionOptions::default(),
            workers: 1,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            node_timeout: None,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &SnrConfig) -> Self {
        Self {
            options: ReductionOptions::from_config(&config.reduction),
            workers: config.runtime.effective_workers(),
            failure_threshold: config.runtime.failure_threshold,
            node_timeout: match config.runtime.node_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

/// Where a single-node reduction is written
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutputTarget {
    /// Rewrite the source circuit
    InPlace,
    /// A standalone bundle holding only this node, its edges and components
    Standalone(PathBuf),
}

pub struct Orchestrator {
    store: Arc<dyn CircuitStore>,
    simulator: Arc<dyn Simulator>,
    adapter: ReductionAdapter,
    settings: OrchestratorSettings,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("simulator", &self.simulator.name())
            .field("adapter", &self.adapter)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn CircuitStore>,
        simulator: Arc<dyn Simulator>,
        algorithm: Arc<dyn ReductionAlgorithm>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            simulator,
            adapter: ReductionAdapter::new(algorithm),
            settings,
        }
    }

    /// SONATA storage (HDF5 or JSON population files), the cable simulator
    /// and equivalent-cable reduction
    pub fn with_defaults(settings: OrchestratorSettings) -> Self {
        Self::new(
            Arc::new(SonataCircuitStore::new()),
            Arc::new(CableSimulator::new()),
            Arc::new(EquivalentCableReduction::new()),
            settings,
        )
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Reduce every node population and write the result to `output`
    pub fn reduce_network(&self, config: &Path, output: &Path) -> RunResult<NetworkReport> {
        refuse_existing(output)?;
        let (mut circuit, options) = self.validated(config)?;
        let populations: Vec<String> = circuit.node_population_names().map(str::to_string).collect();

        let mut report = NetworkReport::default();
        let mut artifacts = Vec::new();
        for population in &populations {
            report
                .populations
                .push(self.reduce_into(&mut circuit, population, &options, &mut artifacts)?);
        }

        report.output_dir = Some(self.write(&circuit, &artifacts, output)?);
        let counts = report.counts();
        info!(
            target: "snr-reduction",
            "Reduced network: {} populations, {} reduced, {} skipped, {} failed",
            report.populations.len(),
            counts.reduced,
            counts.skipped,
            counts.failed
        );
        Ok(report)
    }

    /// Reduce one population and write the whole circuit to `output`
    pub fn reduce_population(
        &self,
        config: &Path,
        population: &str,
        output: &Path,
    ) -> RunResult<PopulationReport> {
        refuse_existing(output)?;
        let (mut circuit, options) = self.validated(config)?;
        circuit.node_population(population)?;

        let mut artifacts = Vec::new();
        let report = self.reduce_into(&mut circuit, population, &options, &mut artifacts)?;
        self.write(&circuit, &artifacts, output)?;
        Ok(report)
    }

    /// Reduce exactly one node
    pub fn reduce_node(
        &self,
        config: &Path,
        population: &str,
        node_id: u64,
        target: &NodeOutputTarget,
    ) -> RunResult<NodeReport> {
        if let NodeOutputTarget::Standalone(dir) = target {
            refuse_existing(dir)?;
        }
        let (mut circuit, options) = self.validated(config)?;
        let size = circuit.node_population(population)?.len();
        if node_id >= size as u64 {
            return Err(RunError::InvalidArgument(format!(
                "node {} is not in '{}' ({} nodes)",
                node_id, population, size
            )));
        }

        let outcome = {
            let reducer = NodeReducer::new(
                &circuit,
                population,
                &self.adapter,
                self.simulator.as_ref(),
                &options,
            )?
            .with_timeout(self.settings.node_timeout);
            reducer.reduce(node_id)
        };

        let reduced = match outcome {
            NodeOutcome::Reduced(reduced) => reduced,
            NodeOutcome::Skipped { node_id, reason } => {
                info!(
                    target: "snr-reduction",
                    "Node {}:{} skipped: {}",
                    population,
                    node_id,
                    reason
                );
                return Ok(NodeReport {
                    population: population.to_string(),
                    node_id,
                    status: NodeStatus::Skipped { reason },
                    output: None,
                });
            }
            NodeOutcome::Failed {
                node_id,
                stage,
                error,
            } => {
                return Err(RunError::NodeFailed {
                    population: population.to_string(),
                    failure: NodeFailure {
                        node_id,
                        stage,
                        reason: error.to_string(),
                    },
                })
            }
        };

        commit(&mut circuit, population, &reduced)?;
        let output = match target {
            NodeOutputTarget::InPlace => self
                .store
                .write_circuit(&circuit, &reduced.artifacts, &WriteTarget::InPlace)?,
            NodeOutputTarget::Standalone(dir) => {
                let bundle = bundle(&circuit, population, &reduced)?;
                self.store.write_node_bundle(dir, &bundle)?
            }
        };

        let report = NodeReport {
            population: population.to_string(),
            node_id,
            status: NodeStatus::Reduced {
                morphology: reduced.morphology.clone(),
                sections: reduced.sections,
                segments: reduced.segments,
                edges_rewritten: reduced.edge_rewrites.len(),
            },
            output: Some(output),
        };
        info!(target: "snr-reduction", "{}", report);
        Ok(report)
    }

    /// Validate `config`, returning the loaded circuit and the options
    /// adjusted to the circuit's section ordering
    fn validated(&self, config: &Path) -> RunResult<(Circuit, ReductionOptions)> {
        let report = validate_circuit(self.store.as_ref(), config);
        if !report.result.valid {
            warn!(
                target: "snr-reduction",
                "[VALIDATE] {} failed validation: {}",
                config.display(),
                report.result
            );
            return Err(RunError::Validation(report.result));
        }
        let circuit = report
            .circuit
            .ok_or_else(|| RunError::Validation(report.result.clone()))?;

        let mut options = self.settings.options.clone();
        if let Some(order) = circuit.descriptor().section_order() {
            options.ordering = order
                .parse::<SectionOrdering>()
                .map_err(RunError::InvalidArgument)?;
        }
        Ok((circuit, options))
    }

    /// Run one population and commit its outcomes into `circuit`
    fn reduce_into(
        &self,
        circuit: &mut Circuit,
        population: &str,
        options: &ReductionOptions,
        artifacts: &mut Vec<ComponentArtifact>,
    ) -> RunResult<PopulationReport> {
        let started = Instant::now();
        let run = {
            let nodes = circuit.node_population(population)?;
            let ids: Vec<u64> = nodes.node_ids().collect();
            let biophysical = ids
                .iter()
                .filter(|&&id| nodes.model(id).map(|m| m.is_biophysical()).unwrap_or(false))
                .count();
            if biophysical == 0 {
                warn!(
                    target: "snr-reduction",
                    "Population {} has no biophysical nodes. Is it virtual?",
                    population
                );
            }

            let reducer = NodeReducer::new(
                circuit,
                population,
                &self.adapter,
                self.simulator.as_ref(),
                options,
            )?
            .with_timeout(self.settings.node_timeout);
            WorkerPool::new(self.settings.workers, self.settings.failure_threshold)
                .run(&reducer, &ids)?
        };

        let failures: Vec<NodeFailure> = run
            .outcomes
            .iter()
            .filter_map(|o| match o {
                NodeOutcome::Failed {
                    node_id,
                    stage,
                    error,
                } => Some(NodeFailure {
                    node_id: *node_id,
                    stage: *stage,
                    reason: error.to_string(),
                }),
                _ => None,
            })
            .collect();
        if run.cancelled || failures.len() > self.settings.failure_threshold {
            warn!(
                target: "snr-reduction",
                "Population {} aborted: {} nodes failed (threshold {})",
                population,
                failures.len(),
                self.settings.failure_threshold
            );
            return Err(RunError::PopulationFailureThresholdExceeded {
                population: population.to_string(),
                failed: failures.len(),
                threshold: self.settings.failure_threshold,
                failures,
            });
        }

        let mut report = PopulationReport::new(population);
        report.failed = failures;
        for outcome in run.outcomes {
            match outcome {
                NodeOutcome::Reduced(reduced) => {
                    commit(circuit, population, &reduced)?;
                    report.reduced.push(reduced.node_id);
                    artifacts.extend(reduced.artifacts);
                }
                NodeOutcome::Skipped { node_id, reason } => report.skipped.push((node_id, reason)),
                NodeOutcome::Failed { .. } => {}
            }
        }

        info!(target: "snr-reduction", "{} ({:?})", report, started.elapsed());
        Ok(report)
    }

    fn write(
        &self,
        circuit: &Circuit,
        artifacts: &[ComponentArtifact],
        output: &Path,
    ) -> RunResult<PathBuf> {
        let written = self.store.write_circuit(
            circuit,
            artifacts,
            &WriteTarget::NewCircuit(output.to_path_buf()),
        )?;
        debug!(
            target: "snr-reduction",
            "Wrote {} component files to {}",
            artifacts.len(),
            written.display()
        );
        Ok(written)
    }
}

fn refuse_existing(output: &Path) -> RunResult<()> {
    if output.exists() {
        return Err(RunError::Storage(StorageError::OutputExists(
            output.to_path_buf(),
        )));
    }
    Ok(())
}

/// Apply a reduced node's attributes and edge rewrites
fn commit(circuit: &mut Circuit, population: &str, reduced: &ReducedNode) -> CircuitResult<()> {
    let nodes = circuit.node_population_mut(population)?;
    for (name, value) in &reduced.attributes {
        nodes.set_attribute(reduced.node_id, name, value.clone())?;
    }
    for rewrite in &reduced.edge_rewrites {
        rewrite.apply(circuit.edge_population_mut(&rewrite.population)?)?;
    }
    Ok(())
}

fn bundle(circuit: &Circuit, population: &str, reduced: &ReducedNode) -> CircuitResult<NodeBundle> {
    let mut edges: BTreeMap<String, Vec<BundleEdge>> = BTreeMap::new();
    for rewrite in &reduced.edge_rewrites {
        let rows = circuit.edge_population(&rewrite.population)?;
        edges
            .entry(rewrite.population.clone())
            .or_default()
            .push(BundleEdge {
                row: rewrite.row,
                attributes: rows.attributes(rewrite.row)?,
            });
    }
    Ok(NodeBundle {
        population: population.to_string(),
        node_id: reduced.node_id,
        attributes: circuit
            .node_population(population)?
            .attributes(reduced.node_id)?,
        edges,
        artifacts: reduced.artifacts.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_reducer::NodeStage;
    use crate::testing::{CircuitFixture, CountingSimulator, Misbehavior, MisbehavingReduction};
    use snr_circuit::{placement, AttributeValue, JsonCircuitStore, MORPHOLOGY};

    #[test]
    fn test_settings_from_config() {
        let mut config = SnrConfig::default();
        config.runtime.workers = 3;
        config.runtime.node_timeout_secs = 30;
        config.reduction.reduction_frequency = 50.0;
        let settings = OrchestratorSettings::from_config(&config);
        assert_eq!(settings.workers, 3);
        assert_eq!(settings.node_timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.options.frequency, 50.0);
        assert_eq!(settings.failure_threshold, 5);
    }

    #[test]
    fn test_population_writes_circuit() {
        let fixture = CircuitFixture::new().build().unwrap();
        let output = fixture.output_dir("reduced");
        let orchestrator = Orchestrator::with_defaults(OrchestratorSettings::default());
        let report = orchestrator
            .reduce_population(fixture.config_path(), "cortex", &output)
            .unwrap();
        assert_eq!(report.reduced, vec![0, 1, 2, 3]);

        let circuit = JsonCircuitStore::new()
            .read_circuit(&output.join("circuit_config.json"))
            .unwrap();
        let cortex = circuit.node_population("cortex").unwrap();
        assert_eq!(
            cortex.attribute(1, MORPHOLOGY).unwrap(),
            Some(AttributeValue::Text("stellate_1".to_string()))
        );
        assert!(output.join("components/morphologies/stellate_1.swc").is_file());
        assert!(output.join("components/biophys/stellate_1.json").is_file());
    }

    #[test]
    fn test_validation_runs_before_simulation() {
        let fixture = CircuitFixture::new()
            .remove_morphology("stellate")
            .build()
            .unwrap();
        let simulator = Arc::new(CountingSimulator::new());
        let orchestrator = Orchestrator::new(
            Arc::new(JsonCircuitStore::new()),
            simulator.clone(),
            Arc::new(EquivalentCableReduction::new()),
            OrchestratorSettings::default(),
        );
        let result =
            orchestrator.reduce_population(fixture.config_path(), "cortex", &fixture.output_dir("out"));
        assert!(matches!(result, Err(RunError::Validation(_))));
        assert_eq!(simulator.acquired(), 0);
        assert!(!fixture.output_dir("out").exists());
    }

    #[test]
    fn test_existing_output_refused() {
        let fixture = CircuitFixture::new().build().unwrap();
        let output = fixture.output_dir("taken");
        std::fs::create_dir_all(&output).unwrap();
        let orchestrator = Orchestrator::with_defaults(OrchestratorSettings::default());
        assert!(matches!(
            orchestrator.reduce_population(fixture.config_path(), "cortex", &output),
            Err(RunError::Storage(StorageError::OutputExists(_)))
        ));
    }

    #[test]
    fn test_unknown_node_rejected() {
        let fixture = CircuitFixture::new().build().unwrap();
        let orchestrator = Orchestrator::with_defaults(OrchestratorSettings::default());
        assert!(matches!(
            orchestrator.reduce_node(fixture.config_path(), "cortex", 99, &NodeOutputTarget::InPlace),
            Err(RunError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_misbehaving_algorithm_fails_only_its_nodes() {
        let fixture = CircuitFixture::new()
            .cortex_nodes(4)
            .morphologies(&["stellate", "pyramidal"])
            .build()
            .unwrap();
        let source = JsonCircuitStore::new()
            .read_circuit(fixture.config_path())
            .unwrap();
        let source_edges = source.edge_population("thalamus_to_cortex").unwrap();

        for misbehavior in Misbehavior::ALL {
            let orchestrator = Orchestrator::new(
                Arc::new(JsonCircuitStore::new()),
                Arc::new(CableSimulator::new()),
                Arc::new(MisbehavingReduction::new(misbehavior, "pyramidal")),
                OrchestratorSettings::default(),
            );
            let output = fixture.output_dir(&format!("out_{:?}", misbehavior));
            let report = orchestrator
                .reduce_population(fixture.config_path(), "cortex", &output)
                .unwrap();
            assert_eq!(report.reduced, vec![0, 2], "{:?}", misbehavior);
            let failed: Vec<(u64, NodeStage)> =
                report.failed.iter().map(|f| (f.node_id, f.stage)).collect();
            assert_eq!(failed, vec![(1, NodeStage::Reduce), (3, NodeStage::Reduce)]);

            let written = JsonCircuitStore::new()
                .read_circuit(&output.join("circuit_config.json"))
                .unwrap();
            let cortex = written.node_population("cortex").unwrap();
            assert_eq!(
                cortex.attribute(0, MORPHOLOGY).unwrap(),
                Some(AttributeValue::Text("stellate_0".to_string()))
            );
            assert_eq!(
                cortex.attribute(1, MORPHOLOGY).unwrap(),
                Some(AttributeValue::Text("pyramidal".to_string()))
            );
            let edges = written.edge_population("thalamus_to_cortex").unwrap();
            for row in edges.rows_targeting(1) {
                assert_eq!(
                    edges.attribute(row, placement::AFFERENT_SECTION_ID).unwrap(),
                    source_edges.attribute(row, placement::AFFERENT_SECTION_ID).unwrap()
                );
            }
        }
    }
}
