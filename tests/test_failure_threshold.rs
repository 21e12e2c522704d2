// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Failure budget: more than five failed nodes abort the population and
//! write nothing; up to five are tolerated and left as they were.

mod common;

use common::{full_placement, output_config, read_circuit};
use sonata_reduction::circuit::{AttributeValue, MORPHOLOGY};
use sonata_reduction::prelude::*;
use sonata_reduction::reduction::testing::CircuitFixture;
use sonata_reduction::reduction::NodeStage;

#[test]
fn test_six_failures_abort_population() {
    // odd nodes have no dendrites: 6 of 12 fail
    let fixture = CircuitFixture::new()
        .cortex_nodes(12)
        .morphologies(&["pyramidal", "axon_only"])
        .build()
        .unwrap();
    let output = fixture.output_dir("reduced");
    let error = reduce_population(
        fixture.config_path(),
        &output,
        "cortex",
        ReductionOptions::default(),
    )
    .unwrap_err();

    match &error {
        RunError::PopulationFailureThresholdExceeded {
            population,
            failed,
            threshold,
            failures,
        } => {
            assert_eq!(population, "cortex");
            assert_eq!(*failed, 6);
            assert_eq!(*threshold, 5);
            assert!(failures.iter().all(|f| f.node_id % 2 == 1));
            assert!(failures.iter().all(|f| f.stage == NodeStage::Reduce));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(error.status().exit_code(), 2);
    assert!(!output.exists());
    assert_eq!(
        std::fs::read_dir(fixture.root())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name() != "circuit")
            .count(),
        0,
        "no staging directory may survive"
    );
}

#[test]
fn test_five_failures_tolerated() {
    let fixture = CircuitFixture::new()
        .cortex_nodes(10)
        .morphologies(&["pyramidal", "axon_only"])
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
    assert_eq!(report.reduced, vec![0, 2, 4, 6, 8]);
    assert_eq!(
        report.failed.iter().map(|f| f.node_id).collect::<Vec<_>>(),
        vec![1, 3, 5, 7, 9]
    );
    assert!(report.to_string().contains("cortex"));

    let source = read_circuit(fixture.config_path());
    let reduced = read_circuit(&output_config(&output));
    let cortex = reduced.node_population("cortex").unwrap();
    assert_eq!(
        cortex.attribute(3, MORPHOLOGY).unwrap(),
        Some(AttributeValue::Text("axon_only".to_string()))
    );
    assert_eq!(
        cortex.attribute(4, MORPHOLOGY).unwrap(),
        Some(AttributeValue::Text("pyramidal_4".to_string()))
    );
    // failed nodes keep their original component files in the output
    assert!(output.join("components/morphologies/axon_only.swc").is_file());

    for name in ["thalamus_to_cortex", "cortex_to_cortex"] {
        for row in source.edge_population(name).unwrap().rows_targeting(3) {
            assert_eq!(
                full_placement(&source, name, row),
                full_placement(&reduced, name, row)
            );
        }
    }
}

#[test]
fn test_threshold_is_configurable() {
    let fixture = CircuitFixture::new()
        .cortex_nodes(4)
        .morphologies(&["pyramidal", "axon_only"])
        .build()
        .unwrap();
    let settings = OrchestratorSettings {
        failure_threshold: 1,
        ..OrchestratorSettings::default()
    };
    let result = Orchestrator::with_defaults(settings).reduce_population(
        fixture.config_path(),
        "cortex",
        &fixture.output_dir("reduced"),
    );
    assert!(matches!(
        result,
        Err(RunError::PopulationFailureThresholdExceeded { failed: 2, threshold: 1, .. })
    ));
}
