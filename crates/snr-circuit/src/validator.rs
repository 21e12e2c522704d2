// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Pre-flight circuit validation.

Runs once before any node is touched and collects every problem it finds:
unreadable populations, dangling edge endpoints, missing component files,
incomplete placement attributes and unsupported section orderings. Errors
block the run; warnings are reported and the run proceeds.

Copyright 2025 Neuraville Inc.
Licensed under the Apache License, Version 2.0
*/

use std::collections::BTreeSet;
use std::path::Path;

use snr_morphology::SectionOrdering;
use tracing::{debug, warn};

use crate::circuit::Circuit;
use crate::population::{EdgePopulation, NodeModel, PlacementSchema};
use crate::store::CircuitStore;

/// Validation result
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    /// Whether the circuit may be reduced
    pub valid: bool,
    /// Blocking issues
    pub errors: Vec<String>,
    /// Non-blocking issues
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        if !other.valid {
            self.valid = false;
        }
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error(s)", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  - {}", error)?;
        }
        Ok(())
    }
}

/// Validation outcome; `circuit` is present whenever every population loaded
#[derive(Debug)]
pub struct ValidationReport {
    pub result: ValidationResult,
    pub circuit: Option<Circuit>,
}

/// Validate the circuit described by `config`
pub fn validate_circuit(store: &dyn CircuitStore, config: &Path) -> ValidationReport {
    let mut result = ValidationResult::new();

    let descriptor = match store.read_descriptor(config) {
        Ok(d) => d,
        Err(e) => {
            result.add_error(format!("circuit descriptor {}: {}", config.display(), e));
            return ValidationReport {
                result,
                circuit: None,
            };
        }
    };

    if let Some(order) = descriptor.section_order() {
        if let Err(e) = order.parse::<SectionOrdering>() {
            result.add_error(format!(
                "{}; supported: {}",
                e,
                SectionOrdering::NrnV1.name()
            ));
        }
    }

    let mut nodes = Vec::new();
    for (index, files) in descriptor.nodes().iter().enumerate() {
        match store.read_node_populations(files) {
            Ok(populations) => nodes.extend(populations.into_iter().map(|p| (index, p))),
            Err(e) => result.add_error(format!("node file {}: {}", files.nodes_file.display(), e)),
        }
    }
    let mut edges = Vec::new();
    for (index, files) in descriptor.edges().iter().enumerate() {
        match store.read_edge_populations(files) {
            Ok(populations) => edges.extend(populations.into_iter().map(|p| (index, p))),
            Err(e) => result.add_error(format!("edge file {}: {}", files.edges_file.display(), e)),
        }
    }
    if !result.valid {
        return ValidationReport {
            result,
            circuit: None,
        };
    }

    let circuit = match Circuit::new(descriptor, nodes, edges) {
        Ok(c) => c,
        Err(e) => {
            result.add_error(e.to_string());
            return ValidationReport {
                result,
                circuit: None,
            };
        }
    };

    result.merge(validate_nodes(&circuit));
    for edges in circuit.edge_populations() {
        result.merge(validate_edges(&circuit, edges));
    }

    for w in &result.warnings {
        warn!(target: "snr-circuit", "[VALIDATE] {}", w);
    }
    debug!(
        target: "snr-circuit",
        "[VALIDATE] {} errors, {} warnings",
        result.errors.len(),
        result.warnings.len()
    );

    ValidationReport {
        result,
        circuit: Some(circuit),
    }
}

fn validate_nodes(circuit: &Circuit) -> ValidationResult {
    let mut result = ValidationResult::new();
    let descriptor = circuit.descriptor();

    for population in circuit.node_populations() {
        for node_id in population.node_ids() {
            let model = match population.model(node_id) {
                Ok(m) => m,
                Err(e) => {
                    result.add_error(format!("node {}:{}: {}", population.name(), node_id, e));
                    continue;
                }
            };
            let NodeModel::Biophysical {
                morphology,
                model_template,
            } = model
            else {
                continue;
            };

            match descriptor.morphology_path(&morphology) {
                None => result.add_error(format!(
                    "node {}:{} is biophysical but the circuit has no morphologies_dir",
                    population.name(),
                    node_id
                )),
                Some(path) if !path.is_file() => result.add_error(format!(
                    "node {}:{}: morphology file {} does not exist",
                    population.name(),
                    node_id,
                    path.display()
                )),
                Some(_) => {}
            }
            match descriptor.biophysics_path(&model_template) {
                None => result.add_error(format!(
                    "node {}:{} is biophysical but the circuit has no biophysical_neuron_models_dir",
                    population.name(),
                    node_id
                )),
                Some(path) if !path.is_file() => result.add_error(format!(
                    "node {}:{}: biophysics file {} does not exist",
                    population.name(),
                    node_id,
                    path.display()
                )),
                Some(_) => {}
            }
        }
    }
    result
}

fn validate_edges(circuit: &Circuit, edges: &EdgePopulation) -> ValidationResult {
    let mut result = ValidationResult::new();

    for (role, population, ids) in [
        ("source", edges.source_population(), edges.source_node_ids()),
        ("target", edges.target_population(), edges.target_node_ids()),
    ] {
        match circuit.node_population(population) {
            Ok(nodes) => {
                let size = nodes.len() as u64;
                if let Some(bad) = ids.iter().find(|&&id| id >= size) {
                    result.add_error(format!(
                        "edge population {}: {} node {} not in '{}' ({} nodes)",
                        edges.name(),
                        role,
                        bad,
                        population,
                        size
                    ));
                }
            }
            Err(_) => result.add_error(format!(
                "edge population {}: {} population '{}' does not exist",
                edges.name(),
                role,
                population
            )),
        }
    }
    if !result.valid {
        return result;
    }

    let Ok(targets) = circuit.node_population(edges.target_population()) else {
        return result;
    };
    let biophysical_targets: BTreeSet<u64> = edges
        .target_node_ids()
        .iter()
        .copied()
        .filter(|&id| {
            targets
                .model(id)
                .map(|m| m.is_biophysical())
                .unwrap_or(false)
        })
        .collect();
    if biophysical_targets.is_empty() {
        return result;
    }

    match edges.placement_schema() {
        PlacementSchema::Full { .. } | PlacementSchema::Legacy => {}
        PlacementSchema::Absent => result.add_warning(format!(
            "edge population {} targets {} biophysical nodes but has no afferent placement attributes; it will not be remapped",
            edges.name(),
            biophysical_targets.len()
        )),
        PlacementSchema::Partial { missing } => result.add_error(format!(
            "edge population {} is missing placement attributes: {}",
            edges.name(),
            missing.join(", ")
        )),
    }
    result
}
