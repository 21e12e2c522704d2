// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
# snr-reduction

Per-node dendritic reduction of SONATA circuits with afferent edge remapping.

- **adapter**: the reduction-algorithm seam and the checks run on its output
- **cable**: the built-in equivalent-cable reduction
- **remap**: rewrites afferent placements through a correspondence table
- **node_reducer**: load, reduce, remap and package one node
- **worker**: sequential and threaded dispatch with a failure budget
- **orchestrator**: validation, commit and write for a population or network
- **api**: entry points with the built-in collaborators

## Example

```rust,no_run
use std::path::Path;
use snr_reduction::{reduce_population, ReductionOptions};

let report = reduce_population(
    Path::new("circuit/circuit_config.json"),
    Path::new("reduced"),
    "cortex",
    ReductionOptions::default(),
)?;
println!("{}", report);
# Ok::<(), snr_reduction::RunError>(())
```

Copyright 2025 Neuraville Inc.
Licensed under the Apache License, Version 2.0
*/

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod adapter;
pub mod api;
pub mod cable;
pub mod error;
pub mod node_reducer;
pub mod orchestrator;
pub mod remap;
pub mod report;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adapter::{
    CorrespondenceTable, MergePolicy, ReducedCell, ReductionAdapter, ReductionAlgorithm,
    ReductionOptions, ReductionOutput, SegmentImage, SynapsePlacement,
};
pub use api::{reduce_network, reduce_node, reduce_population};
pub use cable::EquivalentCableReduction;
pub use error::{
    NodeError, NodeResult, ReductionError, ReductionResult, RemapError, RemapResult, RunError,
    RunResult,
};
pub use node_reducer::{NodeOutcome, NodeReducer, NodeStage, ReducedNode};
pub use orchestrator::{NodeOutputTarget, Orchestrator, OrchestratorSettings};
pub use remap::{AfferentEdge, EdgeRemapper, EdgeRewrite};
pub use report::{
    NetworkReport, NodeFailure, NodeReport, NodeStatus, PopulationReport, ReportCounts, RunStatus,
};
pub use worker::{PoolRun, WorkerPool};
