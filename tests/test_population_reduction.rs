// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Population reduction end to end: placement counts, coordinate validity,
//! untouched attributes and determinism.

mod common;

use common::{full_placement, node_index, output_config, read, read_circuit};
use sonata_reduction::circuit::{placement, AttributeValue, MORPHOLOGY};
use sonata_reduction::prelude::*;
use sonata_reduction::reduction::testing::CircuitFixture;

const EDGES: [&str; 2] = ["thalamus_to_cortex", "cortex_to_cortex"];

fn reduce(fixture_config: &std::path::Path, output: &std::path::Path) -> PopulationReport {
    reduce_population(fixture_config, output, "cortex", ReductionOptions::default())
        .expect("population should reduce")
}

#[test]
fn test_edge_rows_preserved() {
    let fixture = CircuitFixture::new().cortex_nodes(4).build().unwrap();
    let output = fixture.output_dir("reduced");
    let report = reduce(fixture.config_path(), &output);
    assert_eq!(report.reduced, vec![0, 1, 2, 3]);

    let source = read_circuit(fixture.config_path());
    let reduced = read_circuit(&output_config(&output));
    for name in EDGES {
        let before = source.edge_population(name).unwrap();
        let after = reduced.edge_population(name).unwrap();
        assert_eq!(before.len(), after.len(), "{}", name);
        assert_eq!(before.source_node_ids(), after.source_node_ids());
        assert_eq!(before.target_node_ids(), after.target_node_ids());
        for node in 0..4 {
            assert_eq!(before.rows_targeting(node), after.rows_targeting(node));
        }
    }
}

#[test]
fn test_placements_address_reduced_segments() {
    let fixture = CircuitFixture::new().cortex_nodes(4).build().unwrap();
    let output = fixture.output_dir("reduced");
    reduce(fixture.config_path(), &output);

    let reduced = read_circuit(&output_config(&output));
    for node in 0..4u64 {
        let index = node_index(&reduced, "cortex", node);
        for name in EDGES {
            for row in reduced.edge_population(name).unwrap().rows_targeting(node) {
                let (section, segment, offset) = full_placement(&reduced, name, row);
                let indexed = index
                    .section(section as u32)
                    .unwrap_or_else(|| panic!("{} row {}: section {} missing", name, row, section));
                assert!(segment >= 0 && (segment as u32) < indexed.nseg);
                assert!((0.0..=1.0).contains(&offset));
            }
        }
    }
}

#[test]
fn test_non_placement_attributes_untouched() {
    let fixture = CircuitFixture::new().build().unwrap();
    let output = fixture.output_dir("reduced");
    reduce(fixture.config_path(), &output);

    let source = read_circuit(fixture.config_path());
    let reduced = read_circuit(&output_config(&output));
    for name in EDGES {
        let before = source.edge_population(name).unwrap();
        let after = reduced.edge_population(name).unwrap();
        for row in 0..before.len() {
            let mut a = before.attributes(row).unwrap();
            let mut b = after.attributes(row).unwrap();
            for column in placement::AFFERENT {
                a.remove(column);
                b.remove(column);
            }
            assert_eq!(a, b, "{} row {}", name, row);
        }
    }

    let cortex = reduced.node_population("cortex").unwrap();
    assert_eq!(
        cortex.attribute(0, MORPHOLOGY).unwrap(),
        Some(AttributeValue::Text("pyramidal_0".to_string()))
    );
    assert_eq!(
        cortex.attribute(2, "x").unwrap(),
        source.node_population("cortex").unwrap().attribute(2, "x").unwrap()
    );
}

#[test]
fn test_output_layout() {
    let fixture = CircuitFixture::new().build().unwrap();
    let output = fixture.output_dir("reduced");
    reduce(fixture.config_path(), &output);

    for node in 0..4 {
        let name = if node % 2 == 0 { "pyramidal" } else { "stellate" };
        assert!(output
            .join(format!("components/morphologies/{}_{}.swc", name, node))
            .is_file());
        assert!(output
            .join(format!("components/biophys/{}_{}.json", name, node))
            .is_file());
    }
    // every biophysical node was reduced, so no original component is referenced
    assert!(!output.join("components/morphologies/pyramidal.swc").exists());
    // source untouched
    assert!(fixture
        .circuit_dir()
        .join("components/morphologies/pyramidal.swc")
        .is_file());
    assert!(!fixture
        .circuit_dir()
        .join("components/morphologies/pyramidal_0.swc")
        .exists());
}

#[test]
fn test_reduction_is_deterministic() {
    let fixture = CircuitFixture::new().cortex_nodes(5).build().unwrap();
    let first = fixture.output_dir("first");
    let second = fixture.output_dir("second");
    reduce(fixture.config_path(), &first);
    reduce(fixture.config_path(), &second);

    for file in [
        "network/nodes.json",
        "network/edges.json",
        "components/morphologies/pyramidal_0.swc",
        "components/biophys/stellate_3.json",
    ] {
        assert_eq!(read(&first.join(file)), read(&second.join(file)), "{}", file);
    }
}

#[test]
fn test_nodes_reduce_independently() {
    // node 2 reduced alone must match node 2 reduced with its population
    let alone = CircuitFixture::new().build().unwrap();
    reduce_node(
        2,
        "cortex",
        alone.config_path(),
        ReductionOptions::default(),
        &NodeOutputTarget::InPlace,
    )
    .unwrap();

    let together = CircuitFixture::new().build().unwrap();
    let output = together.output_dir("reduced");
    reduce(together.config_path(), &output);

    let alone = read_circuit(alone.config_path());
    let together = read_circuit(&output_config(&output));
    for name in EDGES {
        for row in alone.edge_population(name).unwrap().rows_targeting(2) {
            assert_eq!(
                full_placement(&alone, name, row),
                full_placement(&together, name, row)
            );
        }
    }
}

#[test]
fn test_existing_output_refused() {
    let fixture = CircuitFixture::new().build().unwrap();
    let output = fixture.output_dir("taken");
    std::fs::create_dir_all(&output).unwrap();
    let error = reduce_population(
        fixture.config_path(),
        &output,
        "cortex",
        ReductionOptions::default(),
    )
    .unwrap_err();
    assert_eq!(error.status(), RunStatus::Error);
    assert_eq!(std::fs::read_dir(&output).unwrap().count(), 0);
}

#[test]
fn test_output_inside_source_refused() {
    let fixture = CircuitFixture::new().build().unwrap();
    let output = fixture.circuit_dir().join("reduced");
    assert!(reduce_population(
        fixture.config_path(),
        &output,
        "cortex",
        ReductionOptions::default(),
    )
    .is_err());
    assert!(!output.exists());
}
