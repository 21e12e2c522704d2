// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
# snr-morphology

Everything a reduction needs to know about a single neuron:

- **swc**: SWC morphology codec (sections split at branch points and type changes)
- **biophysics**: per section-list membrane parameters and discretisation rules
- **cell**: an instantiated cell, sections with geometry and segment counts
- **segment_index**: the versioned section/segment enumeration both the original
  and the reduced cell are addressed in
- **simulator**: the simulation collaborator (explicit session handles) and the
  built-in cable simulator

Copyright 2025 Neuraville Inc.
Licensed under the Apache License, Version 2.0
*/

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod biophysics;
pub mod cell;
pub mod error;
pub mod segment_index;
pub mod simulator;
pub mod swc;

pub use biophysics::{
    complex_length_constant, d_lambda_nseg, lambda_f, Biophysics, NsegRule, SectionList,
    SectionListParams,
};
pub use cell::{Cell, Section, SectionProperties};
pub use error::{
    BiophysicsError, BiophysicsResult, MorphologyError, MorphologyResult, SimulatorError,
    SimulatorResult,
};
pub use segment_index::{IndexedSection, SectionOrdering, SegmentAddress, SegmentIndex};
pub use simulator::{CableSimulator, Simulator, SimulatorSession};
pub use swc::{Morphology, MorphologySection, Point, SectionType};
