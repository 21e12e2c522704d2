// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # snr-observability
//!
//! Logging infrastructure shared by the reduction crates, with per-crate
//! debug flag support.
//!
//! ## Features
//! - `file-logging`: per-crate JSON log files with retention

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod init;

pub use cli::*;
pub use init::*;

/// Known crate names (tracing targets) for debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "snr-config",
    "snr-morphology",
    "snr-circuit",
    "snr-reduction",
    "reduce_network",
];
