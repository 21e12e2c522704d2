// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! `reduce_network` exit codes and summary output.

use std::process::Command;

use sonata_reduction::reduction::testing::CircuitFixture;

fn reduce_network() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_reduce_network"));
    command.env_remove("SNR_DEBUG").env_remove("SNR_CONFIG_PATH");
    command
}

#[test]
fn test_network_run_succeeds() {
    let fixture = CircuitFixture::new().build().unwrap();
    let output = fixture.output_dir("reduced");
    let config = fixture.root().join("snr_configuration.toml");
    std::fs::write(&config, "[runtime]\nworkers = 2\n").unwrap();

    let result = reduce_network()
        .arg(fixture.config_path())
        .arg(&output)
        .arg("--config")
        .arg(&config)
        .output()
        .unwrap();
    assert_eq!(result.status.code(), Some(0), "{}", String::from_utf8_lossy(&result.stderr));
    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("cortex"));
    assert!(output.join("circuit_config.json").is_file());
}

#[test]
fn test_exit_codes() {
    let config_dir = tempfile::tempdir().unwrap();
    let config = config_dir.path().join("snr_configuration.toml");
    std::fs::write(&config, "").unwrap();

    let broken = CircuitFixture::new().remove_morphology("stellate").build().unwrap();
    let result = reduce_network()
        .arg(broken.config_path())
        .arg(broken.output_dir("out"))
        .arg("--config")
        .arg(&config)
        .output()
        .unwrap();
    assert_eq!(result.status.code(), Some(3));

    let failing = CircuitFixture::new()
        .cortex_nodes(8)
        .morphologies(&["axon_only"])
        .build()
        .unwrap();
    let result = reduce_network()
        .arg(failing.config_path())
        .arg(failing.output_dir("out"))
        .args(["--population", "cortex", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert_eq!(result.status.code(), Some(2));
    assert!(!failing.output_dir("out").exists());

    let result = reduce_network()
        .arg(failing.config_path())
        .arg(failing.output_dir("node"))
        .args(["--population", "cortex", "--node-id", "0", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert_eq!(result.status.code(), Some(4));
}

#[test]
fn test_automatic_segment_count_flag() {
    let result = reduce_network().arg("--help").output().unwrap();
    let help = String::from_utf8_lossy(&result.stdout);
    assert!(help.contains("-1 = d_lambda rule"), "{}", help);

    let config_dir = tempfile::tempdir().unwrap();
    let config = config_dir.path().join("snr_configuration.toml");
    std::fs::write(&config, "").unwrap();
    let fixture = CircuitFixture::new().cortex_nodes(2).build().unwrap();
    let output = fixture.output_dir("reduced");
    let result = reduce_network()
        .arg(fixture.config_path())
        .arg(&output)
        .args(["--total-segments-manual", "-1", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert_eq!(result.status.code(), Some(0), "{}", String::from_utf8_lossy(&result.stderr));

    // zero is neither a budget nor the automatic rule
    let result = reduce_network()
        .arg(fixture.config_path())
        .arg(fixture.output_dir("zero"))
        .args(["--total-segments-manual", "0", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert_eq!(result.status.code(), Some(1));
    assert!(!fixture.output_dir("zero").exists());
}
