// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Equivalent-cable reduction.

Each soma-rooted dendritic subtree collapses onto one cylinder with the stem's
diameter and membrane properties. Electrotonic distances use the length
constant of a passive membrane with admittance `|g_pas + j2πf·cm|`; the
cylinder's electrotonic length is the subtree's longest path, and a point at
electrotonic distance `X` lands at `X/L` along the cylinder.

Copyright 2025 Neuraville Inc.
Licensed under the Apache License, Version 2.0
*/

use std::collections::BTreeMap;

use snr_morphology::{
    complex_length_constant, Cell, NsegRule, Point, Section, SectionType, SegmentAddress,
    SegmentIndex,
};
use tracing::debug;

use crate::adapter::{
    CorrespondenceTable, ReductionAlgorithm, ReductionOptions, ReductionOutput, SegmentImage,
    SynapsePlacement,
};
use crate::error::{ReductionError, ReductionResult};

const FALLBACK_DIRECTION: [f64; 3] = [1.0, 0.0, 0.0];

/// Where an original section sits relative to its cylinder
#[derive(Debug, Clone, Copy)]
struct Electrotonic {
    cylinder: usize,
    start: f64,
    length: f64,
}

#[derive(Debug, Clone)]
struct Cylinder {
    /// Cell index of the subtree's stem
    stem: usize,
    electrotonic_length: f64,
    diameter: f64,
    physical_length: f64,
    nseg: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EquivalentCableReduction;

impl EquivalentCableReduction {
    pub fn new() -> Self {
        Self
    }
}

impl ReductionAlgorithm for EquivalentCableReduction {
    fn name(&self) -> &str {
        "equivalent-cable"
    }

    fn reduce(
        &self,
        cell: &Cell,
        index: &SegmentIndex,
        placements: &[SynapsePlacement],
        options: &ReductionOptions,
    ) -> ReductionResult<ReductionOutput> {
        let frequency = options.frequency;
        if !frequency.is_finite() || frequency < 0.0 {
            return Err(ReductionError::InvalidFrequency(frequency));
        }

        let roots = cell.children(0);
        let stems: Vec<usize> = roots
            .iter()
            .copied()
            .filter(|&i| cell.sections()[i].section_type.is_dendrite())
            .collect();
        if stems.is_empty() {
            return Err(ReductionError::NoDendrites);
        }

        let mut electrotonic: Vec<Option<Electrotonic>> = vec![None; cell.section_count()];
        let mut cylinders = Vec::with_capacity(stems.len());
        for (c, &stem) in stems.iter().enumerate() {
            let electrotonic_length = walk_subtree(cell, stem, c, frequency, &mut electrotonic)?;
            let section = &cell.sections()[stem];
            let diameter = section.mean_diameter();
            let lambda = length_constant(section, frequency)?;
            cylinders.push(Cylinder {
                stem,
                electrotonic_length,
                diameter,
                physical_length: electrotonic_length * lambda,
                nseg: 1,
            });
        }
        assign_segments(cell, &mut cylinders, options.total_segments);

        let (reduced, cylinder_sections) = build_cell(cell, &roots, &cylinders)?;
        let reduced_index = SegmentIndex::build(&reduced, options.ordering)?;

        let mut table = CorrespondenceTable::new(options.ordering, options.merge_policy);
        for indexed in index.sections() {
            let image = electrotonic[indexed.cell_section];
            for k in 0..indexed.nseg {
                let address = SegmentAddress::new(indexed.id, k);
                let entry = match image {
                    None => SegmentImage::Unchanged,
                    Some(e) => {
                        let cylinder = &cylinders[e.cylinder];
                        let section = reduced_index
                            .section_id(cylinder_sections[e.cylinder])
                            .ok_or_else(|| {
                                ReductionError::Contract("cylinder missing from index".to_string())
                            })?;
                        let n = f64::from(indexed.nseg);
                        let l = cylinder.electrotonic_length;
                        SegmentImage::Span {
                            section,
                            nseg: cylinder.nseg,
                            start: ((e.start + e.length * f64::from(k) / n) / l).clamp(0.0, 1.0),
                            end: ((e.start + e.length * f64::from(k + 1) / n) / l).clamp(0.0, 1.0),
                        }
                    }
                };
                table.insert(address, entry);
            }
        }

        let placements = placements
            .iter()
            .map(|p| {
                table.locate(p).ok_or_else(|| {
                    ReductionError::Contract(format!("no segment {} on {}", p.address(), cell.name()))
                })
            })
            .collect::<ReductionResult<Vec<_>>>()?;

        debug!(
            target: "snr-reduction",
            "[REDUCE] {}: {} dendritic subtrees -> {} cylinders at {} Hz ({} -> {} segments)",
            cell.name(),
            stems.len(),
            cylinders.len(),
            frequency,
            index.segment_count(),
            reduced_index.segment_count()
        );

        Ok(ReductionOutput {
            cell: reduced,
            table,
            placements,
        })
    }
}

fn length_constant(section: &Section, frequency: f64) -> ReductionResult<f64> {
    let p = &section.properties;
    let lambda = complex_length_constant(section.mean_diameter(), p.ra, p.cm, p.g_pas, frequency);
    if lambda.is_finite() && lambda > 0.0 {
        Ok(lambda)
    } else {
        Err(ReductionError::NonFiniteLengthConstant {
            section: section.name.clone(),
            frequency,
        })
    }
}

/// Electrotonic positions for every section under `stem`; returns the
/// subtree's longest electrotonic path
fn walk_subtree(
    cell: &Cell,
    stem: usize,
    cylinder: usize,
    frequency: f64,
    electrotonic: &mut [Option<Electrotonic>],
) -> ReductionResult<f64> {
    let mut longest: f64 = 0.0;
    let mut stack = vec![(stem, 0.0)];
    while let Some((i, start)) = stack.pop() {
        let section = &cell.sections()[i];
        if !section.section_type.is_dendrite() {
            return Err(ReductionError::AxonInDendrite {
                section: section.name.clone(),
            });
        }
        let length = section.length() / length_constant(section, frequency)?;
        electrotonic[i] = Some(Electrotonic {
            cylinder,
            start,
            length,
        });
        longest = longest.max(start + length);
        for child in cell.children(i).into_iter().rev() {
            stack.push((child, start + length));
        }
    }
    if longest > 0.0 && longest.is_finite() {
        Ok(longest)
    } else {
        Err(ReductionError::ZeroLength {
            section: cell.sections()[stem].name.clone(),
        })
    }
}

/// Manual totals are split in proportion to electrotonic length (largest
/// remainder, at least one segment each); otherwise the d_lambda rule
fn assign_segments(cell: &Cell, cylinders: &mut [Cylinder], total: Option<u32>) {
    let Some(total) = total else {
        let rule = NsegRule::default();
        for cylinder in cylinders.iter_mut() {
            let p = &cell.sections()[cylinder.stem].properties;
            cylinder.nseg = rule.nseg(cylinder.physical_length, cylinder.diameter, p.ra, p.cm);
        }
        return;
    };

    let k = cylinders.len() as u32;
    for cylinder in cylinders.iter_mut() {
        cylinder.nseg = 1;
    }
    if total <= k {
        return;
    }

    let spare = f64::from(total - k);
    let sum: f64 = cylinders.iter().map(|c| c.electrotonic_length).sum();
    let shares: Vec<f64> = cylinders
        .iter()
        .map(|c| spare * c.electrotonic_length / sum)
        .collect();
    let mut handed_out = 0u32;
    for (cylinder, share) in cylinders.iter_mut().zip(&shares) {
        let whole = share.floor() as u32;
        cylinder.nseg += whole;
        handed_out += whole;
    }
    let mut by_remainder: Vec<usize> = (0..cylinders.len()).collect();
    by_remainder.sort_by(|&a, &b| {
        let ra = shares[a] - shares[a].floor();
        let rb = shares[b] - shares[b].floor();
        rb.total_cmp(&ra).then(a.cmp(&b))
    });
    for &i in by_remainder.iter().take((total - k - handed_out) as usize) {
        cylinders[i].nseg += 1;
    }
}

/// Soma, then the soma's children in their original order: axon subtrees
/// copied verbatim, each dendritic stem replaced by its cylinder. Returns the
/// reduced cell and the cell index of each cylinder.
fn build_cell(
    cell: &Cell,
    roots: &[usize],
    cylinders: &[Cylinder],
) -> ReductionResult<(Cell, Vec<usize>)> {
    let by_stem: BTreeMap<usize, usize> = cylinders
        .iter()
        .enumerate()
        .map(|(c, cylinder)| (cylinder.stem, c))
        .collect();
    let mut counters: BTreeMap<SectionType, usize> = BTreeMap::new();
    let mut next_name = |section_type: SectionType| {
        let counter = counters.entry(section_type).or_insert(0);
        let name = format!("{}[{}]", section_type.name_prefix(), counter);
        *counter += 1;
        name
    };

    let soma = cell.soma();
    let mut sections = vec![Section {
        name: next_name(SectionType::Soma),
        parent: None,
        ..soma.clone()
    }];
    let mut cylinder_sections = vec![0usize; cylinders.len()];

    for &root in roots {
        if let Some(&c) = by_stem.get(&root) {
            let cylinder = &cylinders[c];
            let stem = &cell.sections()[root];
            let origin = stem.points.first().copied().unwrap_or_else(|| {
                let first = soma.points.first().copied().unwrap_or(Point::new(0.0, 0.0, 0.0, 0.0));
                Point::new(first.x, first.y, first.z, cylinder.diameter)
            });
            let dir = stem.direction().unwrap_or(FALLBACK_DIRECTION);
            let l = cylinder.physical_length;
            cylinder_sections[c] = sections.len();
            sections.push(Section {
                name: next_name(stem.section_type),
                section_type: stem.section_type,
                parent: Some(0),
                points: vec![
                    Point::new(origin.x, origin.y, origin.z, cylinder.diameter),
                    Point::new(
                        origin.x + dir[0] * l,
                        origin.y + dir[1] * l,
                        origin.z + dir[2] * l,
                        cylinder.diameter,
                    ),
                ],
                nseg: cylinder.nseg,
                properties: stem.properties.clone(),
            });
            continue;
        }

        // Cell order already puts parents first
        let mut subtree = vec![root];
        let mut cursor = 0;
        while cursor < subtree.len() {
            subtree.extend(cell.children(subtree[cursor]));
            cursor += 1;
        }
        subtree.sort_unstable();
        let mut remap = BTreeMap::new();
        for original in subtree {
            let source = &cell.sections()[original];
            let parent = match source.parent {
                Some(0) | None => Some(0),
                Some(p) => remap.get(&p).copied(),
            };
            remap.insert(original, sections.len());
            sections.push(Section {
                name: next_name(source.section_type),
                parent,
                ..source.clone()
            });
        }
    }

    Ok((Cell::new(cell.name(), sections)?, cylinder_sections))
}
