// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Nodes that are not biophysical are skipped untouched, and efferent
//! placement is never rewritten.

mod common;

use common::{output_config, read_circuit};
use sonata_reduction::circuit::placement;
use sonata_reduction::prelude::*;
use sonata_reduction::reduction::testing::{CircuitFixture, PlacementMode};

#[test]
fn test_point_neurons_skipped_untouched() {
    let fixture = CircuitFixture::new()
        .cortex_nodes(5)
        .point_nodes(&[1, 4])
        .build()
        .unwrap();
    let output = fixture.output_dir("reduced");
    let report = reduce_population(
        fixture.config_path(),
        &output,
        "cortex",
        ReductionOptions::default(),
    )
    .unwrap();
    assert_eq!(report.reduced, vec![0, 2, 3]);
    assert_eq!(
        report.skipped.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
        vec![1, 4]
    );
    assert!(report.failed.is_empty());

    let source = read_circuit(fixture.config_path());
    let reduced = read_circuit(&output_config(&output));
    for node in [1u64, 4] {
        assert_eq!(
            source.node_population("cortex").unwrap().attributes(node).unwrap(),
            reduced.node_population("cortex").unwrap().attributes(node).unwrap()
        );
        for name in ["thalamus_to_cortex", "cortex_to_cortex"] {
            let before = source.edge_population(name).unwrap();
            let after = reduced.edge_population(name).unwrap();
            for row in before.rows_targeting(node) {
                assert_eq!(before.attributes(row).unwrap(), after.attributes(row).unwrap());
            }
        }
    }
}

#[test]
fn test_virtual_population_reports_skips() {
    let fixture = CircuitFixture::new().build().unwrap();
    let output = fixture.output_dir("reduced");
    let report = reduce_network(fixture.config_path(), &output, OrchestratorSettings::default())
        .unwrap();

    let names: Vec<&str> = report.populations.iter().map(|p| p.population.as_str()).collect();
    assert_eq!(names, vec!["cortex", "thalamus"]);
    let thalamus = &report.populations[1];
    assert!(thalamus.reduced.is_empty());
    assert_eq!(thalamus.counts().skipped, 3);
    assert_eq!(report.counts().reduced, 4);
    assert_eq!(report.output_dir.as_deref(), Some(output.as_path()));
}

#[test]
fn test_efferent_placement_unchanged() {
    let fixture = CircuitFixture::new()
        .placement_mode(PlacementMode::FullWithEfferent)
        .build()
        .unwrap();
    let output = fixture.output_dir("reduced");
    reduce_network(fixture.config_path(), &output, OrchestratorSettings::default()).unwrap();

    let source = read_circuit(fixture.config_path());
    let reduced = read_circuit(&output_config(&output));
    let before = source.edge_population("cortex_to_cortex").unwrap();
    let after = reduced.edge_population("cortex_to_cortex").unwrap();
    let efferent = [
        placement::EFFERENT_SECTION_ID,
        placement::EFFERENT_SEGMENT_ID,
        placement::EFFERENT_SEGMENT_OFFSET,
        placement::EFFERENT_SECTION_POS,
    ];
    let mut afferent_changed = false;
    for row in 0..before.len() {
        for column in efferent {
            assert_eq!(
                before.attribute(row, column).unwrap(),
                after.attribute(row, column).unwrap(),
                "row {} column {}",
                row,
                column
            );
        }
        afferent_changed |= [
            placement::AFFERENT_SECTION_ID,
            placement::AFFERENT_SEGMENT_ID,
            placement::AFFERENT_SEGMENT_OFFSET,
        ]
        .iter()
        .any(|column| before.attribute(row, column).unwrap() != after.attribute(row, column).unwrap());
    }
    assert!(afferent_changed, "afferent placement should have been rewritten");
}
