// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Reduction Adapter.

Wraps a [`ReductionAlgorithm`] and enforces its contract: one output
placement per input placement, offsets in `[0, 1]`, soma and axon untouched,
and a correspondence table that covers every input segment and agrees with
the placements the algorithm returned.

Copyright 2025 Neuraville Inc.
Licensed under the Apache License, Version 2.0
*/

use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use snr_morphology::{Cell, SectionOrdering, SectionType, SegmentAddress, SegmentIndex};
use tracing::trace;

use crate::error::{ReductionError, ReductionResult};

/// How synapses that share a reduced segment are positioned on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Keep the electrotonic position along the reduced segment
    #[default]
    Proportional,
    /// Move every synapse to the centre of its reduced segment
    SegmentCenter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReductionOptions {
    /// Hz; 0 means DC
    pub frequency: f64,
    /// Total reduced dendritic segments; `None` applies the d_lambda rule
    pub total_segments: Option<u32>,
    pub merge_policy: MergePolicy,
    pub ordering: SectionOrdering,
}

impl Default for ReductionOptions {
    fn default() -> Self {
        Self {
            frequency: 0.0,
            total_segments: None,
            merge_policy: MergePolicy::Proportional,
            ordering: SectionOrdering::NrnV1,
        }
    }
}

impl ReductionOptions {
    pub fn from_config(config: &snr_config::ReductionConfig) -> Self {
        Self {
            frequency: config.reduction_frequency,
            total_segments: config.manual_segments(),
            merge_policy: if config.return_seg_to_seg {
                MergePolicy::SegmentCenter
            } else {
                MergePolicy::Proportional
            },
            ordering: config.section_order.parse().unwrap_or_default(),
        }
    }
}

/// A synapse location in some cell's segment coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SynapsePlacement {
    pub section: u32,
    pub segment: u32,
    /// Position inside the segment, 0..=1
    pub offset: f64,
}

impl SynapsePlacement {
    pub fn new(section: u32, segment: u32, offset: f64) -> Self {
        Self {
            section,
            segment,
            offset,
        }
    }

    pub fn address(&self) -> SegmentAddress {
        SegmentAddress::new(self.section, self.segment)
    }

    /// Position along the whole section, 0..=1
    pub fn section_pos(&self, nseg: u32) -> f64 {
        ((f64::from(self.segment) + self.offset) / f64::from(nseg.max(1))).clamp(0.0, 1.0)
    }

    /// Placement at section-relative position `pos` on a section with `nseg` segments
    pub fn from_section_pos(section: u32, pos: f64, nseg: u32) -> Self {
        let nseg = nseg.max(1);
        let u = pos.clamp(0.0, 1.0) * f64::from(nseg);
        let segment = (u.floor() as u32).min(nseg - 1);
        let offset = (u - f64::from(segment)).clamp(0.0, 1.0);
        Self::new(section, segment, offset)
    }
}

/// Where one original segment ended up
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentImage {
    /// Soma and axon: same address in the reduced cell
    Unchanged,
    /// The segment covers `[start, end]` of reduced section `section`
    Span {
        section: u32,
        nseg: u32,
        start: f64,
        end: f64,
    },
}

/// Original segment address -> reduced location
#[derive(Debug, Clone)]
pub struct CorrespondenceTable {
    ordering: SectionOrdering,
    merge_policy: MergePolicy,
    entries: AHashMap<SegmentAddress, SegmentImage>,
}

impl CorrespondenceTable {
    pub fn new(ordering: SectionOrdering, merge_policy: MergePolicy) -> Self {
        Self {
            ordering,
            merge_policy,
            entries: AHashMap::new(),
        }
    }

    pub fn insert(&mut self, original: SegmentAddress, image: SegmentImage) {
        self.entries.insert(original, image);
    }

    pub fn ordering(&self) -> SectionOrdering {
        self.ordering
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, original: SegmentAddress) -> Option<&SegmentImage> {
        self.entries.get(&original)
    }

    /// Entries sorted by original address
    pub fn entries(&self) -> Vec<(SegmentAddress, SegmentImage)> {
        let mut entries: Vec<_> = self.entries.iter().map(|(a, i)| (*a, *i)).collect();
        entries.sort_by_key(|(a, _)| *a);
        entries
    }

    /// Map a placement on the original cell onto the reduced cell
    pub fn locate(&self, placement: &SynapsePlacement) -> Option<SynapsePlacement> {
        match self.entries.get(&placement.address())? {
            SegmentImage::Unchanged => Some(*placement),
            SegmentImage::Span {
                section,
                nseg,
                start,
                end,
            } => {
                let offset = placement.offset.clamp(0.0, 1.0);
                let x = start + offset * (end - start);
                let located = SynapsePlacement::from_section_pos(*section, x, *nseg);
                Some(match self.merge_policy {
                    MergePolicy::Proportional => located,
                    MergePolicy::SegmentCenter => SynapsePlacement { offset: 0.5, ..located },
                })
            }
        }
    }
}

/// Everything a reduction algorithm returns
#[derive(Debug, Clone)]
pub struct ReductionOutput {
    pub cell: Cell,
    pub table: CorrespondenceTable,
    /// One entry per input placement, same order
    pub placements: Vec<SynapsePlacement>,
}

/// A cable-reduction algorithm
///
/// Implementations must be deterministic: identical cell, placements and
/// options produce identical output.
pub trait ReductionAlgorithm: Send + Sync {
    fn name(&self) -> &str;

    fn reduce(
        &self,
        cell: &Cell,
        index: &SegmentIndex,
        placements: &[SynapsePlacement],
        options: &ReductionOptions,
    ) -> ReductionResult<ReductionOutput>;
}

/// A reduced cell ready for remapping and serialisation
#[derive(Debug, Clone)]
pub struct ReducedCell {
    pub cell: Cell,
    pub index: SegmentIndex,
    pub table: CorrespondenceTable,
    pub placements: Vec<SynapsePlacement>,
}

const POSITION_TOLERANCE: f64 = 1e-9;

#[derive(Clone)]
pub struct ReductionAdapter {
    algorithm: Arc<dyn ReductionAlgorithm>,
}

impl std::fmt::Debug for ReductionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReductionAdapter")
            .field("algorithm", &self.algorithm.name())
            .finish()
    }
}

impl ReductionAdapter {
    pub fn new(algorithm: Arc<dyn ReductionAlgorithm>) -> Self {
        Self { algorithm }
    }

    pub fn algorithm_name(&self) -> &str {
        self.algorithm.name()
    }

    /// Reduce `cell` and check the result
    pub fn reduce(
        &self,
        cell: &Cell,
        index: &SegmentIndex,
        placements: &[SynapsePlacement],
        options: &ReductionOptions,
    ) -> ReductionResult<ReducedCell> {
        let output = self.algorithm.reduce(cell, index, placements, options)?;
        let reduced_index = SegmentIndex::build(&output.cell, options.ordering)?;

        check_placements(placements, &output, &reduced_index)?;
        check_preserved(cell, index, &output.cell, &reduced_index)?;
        check_table(index, placements, &output, options)?;

        trace!(
            target: "snr-reduction",
            "[REDUCE] {} reduced {} to {} sections ({} segments)",
            self.algorithm.name(),
            cell.name(),
            reduced_index.section_count(),
            reduced_index.segment_count()
        );

        Ok(ReducedCell {
            cell: output.cell,
            index: reduced_index,
            table: output.table,
            placements: output.placements,
        })
    }
}

fn contract(message: String) -> ReductionError {
    ReductionError::Contract(message)
}

fn check_placements(
    inputs: &[SynapsePlacement],
    output: &ReductionOutput,
    reduced: &SegmentIndex,
) -> ReductionResult<()> {
    if output.placements.len() != inputs.len() {
        return Err(contract(format!(
            "{} placements in, {} out",
            inputs.len(),
            output.placements.len()
        )));
    }
    for (i, placement) in output.placements.iter().enumerate() {
        if !placement.offset.is_finite() || !(0.0..=1.0).contains(&placement.offset) {
            return Err(contract(format!(
                "placement {} has offset {}",
                i, placement.offset
            )));
        }
        if !reduced.contains(placement.address()) {
            return Err(contract(format!(
                "placement {} lands on missing segment {}",
                i,
                placement.address()
            )));
        }
    }
    Ok(())
}

/// Soma and axon sections keep their type, discretisation and geometry
fn check_preserved(
    original: &Cell,
    original_index: &SegmentIndex,
    reduced: &Cell,
    reduced_index: &SegmentIndex,
) -> ReductionResult<()> {
    for indexed in original_index.sections() {
        if indexed.section_type.is_dendrite() {
            continue;
        }
        let before = &original.sections()[indexed.cell_section];
        let after = reduced_index
            .section(indexed.id)
            .and_then(|s| reduced.section(s.cell_section));
        let unchanged = match after {
            Some(after) => {
                after.section_type == before.section_type
                    && after.nseg == before.nseg
                    && after.points == before.points
            }
            None => false,
        };
        if !unchanged {
            return Err(contract(format!(
                "{} section {} was altered",
                if before.section_type == SectionType::Soma {
                    "somatic"
                } else {
                    "axonal"
                },
                before.name
            )));
        }
    }
    Ok(())
}

fn check_table(
    index: &SegmentIndex,
    inputs: &[SynapsePlacement],
    output: &ReductionOutput,
    options: &ReductionOptions,
) -> ReductionResult<()> {
    let table = &output.table;
    if table.ordering() != options.ordering {
        return Err(contract(format!(
            "table uses ordering {}, expected {}",
            table.ordering(),
            options.ordering
        )));
    }
    if let Some(missing) = index.segments().find(|a| table.get(*a).is_none()) {
        return Err(contract(format!("table has no entry for segment {}", missing)));
    }
    for (i, (input, returned)) in inputs.iter().zip(&output.placements).enumerate() {
        let located = table
            .locate(input)
            .ok_or_else(|| contract(format!("placement {} cannot be located", i)))?;
        let along = |p: &SynapsePlacement| f64::from(p.segment) + p.offset;
        if located.section != returned.section
            || (along(&located) - along(returned)).abs() > POSITION_TOLERANCE
        {
            return Err(contract(format!(
                "placement {} returned as {}+{:.6} but the table maps it to {}+{:.6}",
                i,
                returned.address(),
                returned.offset,
                located.address(),
                located.offset
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_pos_conversion() {
        let p = SynapsePlacement::from_section_pos(2, 0.55, 5);
        assert_eq!(p.section, 2);
        assert_eq!(p.segment, 2);
        assert!((p.offset - 0.75).abs() < 1e-12);
        assert!((p.section_pos(5) - 0.55).abs() < 1e-12);

        let end = SynapsePlacement::from_section_pos(0, 1.0, 3);
        assert_eq!(end.segment, 2);
        assert!((end.offset - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_locate_span() {
        let mut table = CorrespondenceTable::new(SectionOrdering::NrnV1, MergePolicy::Proportional);
        table.insert(SegmentAddress::new(0, 0), SegmentImage::Unchanged);
        table.insert(
            SegmentAddress::new(1, 3),
            SegmentImage::Span {
                section: 1,
                nseg: 4,
                start: 0.5,
                end: 0.75,
            },
        );

        let soma = SynapsePlacement::new(0, 0, 0.3);
        assert_eq!(table.locate(&soma), Some(soma));

        let located = table
            .locate(&SynapsePlacement::new(1, 3, 0.5))
            .expect("entry exists");
        assert_eq!(located.section, 1);
        assert_eq!(located.segment, 2);
        assert!((located.offset - 0.5).abs() < 1e-12);

        assert!(table.locate(&SynapsePlacement::new(1, 4, 0.5)).is_none());
    }

    #[test]
    fn test_locate_segment_center() {
        let mut table =
            CorrespondenceTable::new(SectionOrdering::NrnV1, MergePolicy::SegmentCenter);
        table.insert(
            SegmentAddress::new(2, 0),
            SegmentImage::Span {
                section: 1,
                nseg: 2,
                start: 0.0,
                end: 0.4,
            },
        );
        let located = table
            .locate(&SynapsePlacement::new(2, 0, 0.9))
            .expect("entry exists");
        assert_eq!(located.segment, 0);
        assert_eq!(located.offset, 0.5);
    }

    #[test]
    fn test_options_from_config() {
        let mut config = snr_config::ReductionConfig::default();
        config.return_seg_to_seg = true;
        config.total_segments_manual = 12;
        let options = ReductionOptions::from_config(&config);
        assert_eq!(options.merge_policy, MergePolicy::SegmentCenter);
        assert_eq!(options.total_segments, Some(12));
        assert_eq!(options.ordering, SectionOrdering::NrnV1);
    }
}
