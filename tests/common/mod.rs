// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Helpers shared by the integration tests

#![allow(dead_code)]

use std::path::Path;

use sonata_reduction::circuit::{placement, Circuit, CircuitStore, JsonCircuitStore, NodeModel};
use sonata_reduction::morphology::{
    Biophysics, CableSimulator, SectionOrdering, SegmentIndex, Simulator,
};

pub fn read_circuit(config: &Path) -> Circuit {
    JsonCircuitStore::new()
        .read_circuit(config)
        .expect("circuit should load")
}

pub fn output_config(output: &Path) -> std::path::PathBuf {
    output.join("circuit_config.json")
}

/// Segment index of the cell a node currently references, instantiated
/// from the circuit's own component files
pub fn node_index(circuit: &Circuit, population: &str, node_id: u64) -> SegmentIndex {
    let model = circuit
        .node_population(population)
        .unwrap()
        .model(node_id)
        .unwrap();
    let NodeModel::Biophysical {
        morphology,
        model_template,
    } = model
    else {
        panic!("node {}:{} is not biophysical", population, node_id);
    };
    let descriptor = circuit.descriptor();
    let morphology_path = descriptor.morphology_path(&morphology).unwrap();
    let biophysics =
        Biophysics::load(&descriptor.biophysics_path(&model_template).unwrap()).unwrap();

    let simulator = CableSimulator::new();
    let mut session = simulator.acquire().unwrap();
    let cell = session.instantiate(&morphology_path, &biophysics).unwrap();
    SegmentIndex::build(&cell, SectionOrdering::NrnV1).unwrap()
}

/// Afferent placement of one edge row: (section, segment, offset)
pub fn full_placement(circuit: &Circuit, edges: &str, row: usize) -> (i64, i64, f64) {
    let population = circuit.edge_population(edges).unwrap();
    let int = |name: &str| {
        population
            .attribute(row, name)
            .unwrap()
            .and_then(|v| v.as_i64())
            .unwrap()
    };
    let offset = population
        .attribute(row, placement::AFFERENT_SEGMENT_OFFSET)
        .unwrap()
        .and_then(|v| v.as_f64())
        .unwrap();
    (
        int(placement::AFFERENT_SECTION_ID),
        int(placement::AFFERENT_SEGMENT_ID),
        offset,
    )
}

pub fn read(path: &Path) -> String {
    std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("cannot read {}: {}", path.display(), e))
}
