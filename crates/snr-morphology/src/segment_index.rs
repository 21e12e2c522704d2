// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Segment Index: the coordinate system shared by original and reduced cells.

Edge placements address a cell as `(section id, segment id)`. Those numbers
only mean something under a fixed section enumeration, so the enumeration is
a named, versioned value ([`SectionOrdering`]) carried by every index and
every table derived from one.

Copyright 2025 Neuraville Inc.
Licensed under the Apache License, Version 2.0
*/

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::error::{MorphologyError, MorphologyResult};
use crate::swc::SectionType;

/// Canonical section enumerations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SectionOrdering {
    /// Soma; then soma-rooted neurites ranked axon, basal, apical (file order
    /// within a rank); depth-first pre-order inside each neurite.
    #[default]
    #[serde(rename = "nrn")]
    NrnV1,
}

impl SectionOrdering {
    /// Name used in circuit descriptors and configuration
    pub fn name(self) -> &'static str {
        match self {
            SectionOrdering::NrnV1 => "nrn",
        }
    }

    pub fn version(self) -> u32 {
        match self {
            SectionOrdering::NrnV1 => 1,
        }
    }

    fn neurite_rank(section_type: SectionType) -> u8 {
        match section_type {
            SectionType::Soma => 0,
            SectionType::Axon => 1,
            SectionType::Basal => 2,
            SectionType::Apical => 3,
        }
    }
}

impl fmt::Display for SectionOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (v{})", self.name(), self.version())
    }
}

impl FromStr for SectionOrdering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nrn" => Ok(SectionOrdering::NrnV1),
            other => Err(format!("unsupported section ordering '{}'", other)),
        }
    }
}

/// One addressable segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentAddress {
    pub section: u32,
    pub segment: u32,
}

impl SegmentAddress {
    pub fn new(section: u32, segment: u32) -> Self {
        Self { section, segment }
    }
}

impl fmt::Display for SegmentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.section, self.segment)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedSection {
    /// Position in the canonical order (the SONATA section id)
    pub id: u32,
    /// Position in the cell's own section list
    pub cell_section: usize,
    pub name: String,
    pub section_type: SectionType,
    pub nseg: u32,
    pub length: f64,
    /// Global position of this section's first segment
    pub first_segment: usize,
}

impl IndexedSection {
    /// Arc length (µm) from the section start to the centre of `segment`
    pub fn segment_center(&self, segment: u32) -> f64 {
        (f64::from(segment) + 0.5) / f64::from(self.nseg) * self.length
    }
}

/// Total order over every segment of a cell
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentIndex {
    ordering: SectionOrdering,
    sections: Vec<IndexedSection>,
    by_cell_section: Vec<u32>,
    segment_count: usize,
}

impl SegmentIndex {
    /// Enumerate `cell` under `ordering`
    ///
    /// # Errors
    ///
    /// `EmptySection` when a section has no segments, `DisconnectedSection`
    /// when a section cannot be reached from the soma.
    pub fn build(cell: &Cell, ordering: SectionOrdering) -> MorphologyResult<Self> {
        let sections = cell.sections();
        if let Some(empty) = sections.iter().find(|s| s.nseg == 0) {
            return Err(MorphologyError::EmptySection {
                section: empty.name.clone(),
            });
        }

        let order = match ordering {
            SectionOrdering::NrnV1 => nrn_order(cell),
        };

        if order.len() != sections.len() {
            let mut reached = vec![false; sections.len()];
            for &index in &order {
                reached[index] = true;
            }
            let orphan = reached.iter().position(|r| !r).unwrap_or(0);
            return Err(MorphologyError::DisconnectedSection {
                section: sections[orphan].name.clone(),
            });
        }

        let mut indexed = Vec::with_capacity(order.len());
        let mut by_cell_section = vec![0u32; sections.len()];
        let mut first_segment = 0usize;
        for (id, &cell_section) in order.iter().enumerate() {
            let section = &sections[cell_section];
            let id = id as u32;
            by_cell_section[cell_section] = id;
            indexed.push(IndexedSection {
                id,
                cell_section,
                name: section.name.clone(),
                section_type: section.section_type,
                nseg: section.nseg,
                length: section.length(),
                first_segment,
            });
            first_segment += section.nseg as usize;
        }

        Ok(Self {
            ordering,
            sections: indexed,
            by_cell_section,
            segment_count: first_segment,
        })
    }

    pub fn ordering(&self) -> SectionOrdering {
        self.ordering
    }

    pub fn sections(&self) -> &[IndexedSection] {
        &self.sections
    }

    pub fn section(&self, id: u32) -> Option<&IndexedSection> {
        self.sections.get(id as usize)
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    /// Canonical id of the cell's `index`-th section
    pub fn section_id(&self, cell_section: usize) -> Option<u32> {
        self.by_cell_section.get(cell_section).copied()
    }

    pub fn contains(&self, address: SegmentAddress) -> bool {
        self.section(address.section)
            .map(|s| address.segment < s.nseg)
            .unwrap_or(false)
    }

    /// Position of `address` in the total segment order
    pub fn position(&self, address: SegmentAddress) -> Option<usize> {
        let section = self.section(address.section)?;
        if address.segment < section.nseg {
            Some(section.first_segment + address.segment as usize)
        } else {
            None
        }
    }

    /// Every segment in canonical order
    pub fn segments(&self) -> impl Iterator<Item = SegmentAddress> + '_ {
        self.sections
            .iter()
            .flat_map(|s| (0..s.nseg).map(move |k| SegmentAddress::new(s.id, k)))
    }
}

fn nrn_order(cell: &Cell) -> Vec<usize> {
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); cell.section_count()];
    for (index, section) in cell.sections().iter().enumerate() {
        if let Some(parent) = section.parent {
            children[parent].push(index);
        }
    }

    let mut roots = children[0].clone();
    // stable: file order within a rank
    roots.sort_by_key(|&i| SectionOrdering::neurite_rank(cell.sections()[i].section_type));

    let mut order = vec![0];
    let mut stack: Vec<usize> = roots.into_iter().rev().collect();
    while let Some(index) = stack.pop() {
        order.push(index);
        stack.extend(children[index].iter().rev());
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biophysics::SectionListParams;
    use crate::cell::{Section, SectionProperties};
    use crate::swc::Point;

    fn section(name: &str, section_type: SectionType, parent: Option<usize>, nseg: u32) -> Section {
        Section {
            name: name.to_string(),
            section_type,
            parent,
            points: vec![Point::new(0.0, 0.0, 0.0, 1.0), Point::new(10.0, 0.0, 0.0, 1.0)],
            nseg,
            properties: SectionProperties::from(&SectionListParams::default()),
        }
    }

    /// soma, dend[0] (children dend[1], dend[2]), axon[0], apic[0]
    fn cell() -> Cell {
        Cell::new(
            "test",
            vec![
                section("soma[0]", SectionType::Soma, None, 1),
                section("dend[0]", SectionType::Basal, Some(0), 3),
                section("dend[1]", SectionType::Basal, Some(1), 1),
                section("axon[0]", SectionType::Axon, Some(0), 1),
                section("apic[0]", SectionType::Apical, Some(0), 5),
                section("dend[2]", SectionType::Basal, Some(1), 2),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_nrn_order() {
        let index = SegmentIndex::build(&cell(), SectionOrdering::NrnV1).unwrap();
        let names: Vec<&str> = index.sections().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["soma[0]", "axon[0]", "dend[0]", "dend[1]", "dend[2]", "apic[0]"]
        );
        assert_eq!(index.section_id(3), Some(1));
        assert_eq!(index.segment_count(), 13);
        assert_eq!(index.position(SegmentAddress::new(2, 2)), Some(4));
        assert_eq!(index.position(SegmentAddress::new(2, 3)), None);
        assert!(index.contains(SegmentAddress::new(5, 4)));
        assert!(!index.contains(SegmentAddress::new(6, 0)));
    }

    #[test]
    fn test_order_is_stable_across_calls() {
        let a = SegmentIndex::build(&cell(), SectionOrdering::NrnV1).unwrap();
        let b = SegmentIndex::build(&cell(), SectionOrdering::NrnV1).unwrap();
        assert_eq!(a, b);
        let segments: Vec<_> = a.segments().collect();
        assert_eq!(segments.len(), a.segment_count());
        assert_eq!(segments[1], SegmentAddress::new(1, 0));
    }

    #[test]
    fn test_zero_segment_section_rejected() {
        let mut sections = cell().sections().to_vec();
        sections[2].nseg = 0;
        let cell = Cell::new("bad", sections).unwrap();
        assert!(matches!(
            SegmentIndex::build(&cell, SectionOrdering::NrnV1),
            Err(MorphologyError::EmptySection { section }) if section == "dend[1]"
        ));
    }

    #[test]
    fn test_disconnected_section_rejected() {
        let mut sections = cell().sections().to_vec();
        sections[4].parent = None;
        let cell = Cell::new("bad", sections).unwrap();
        assert!(matches!(
            SegmentIndex::build(&cell, SectionOrdering::NrnV1),
            Err(MorphologyError::DisconnectedSection { section }) if section == "apic[0]"
        ));
    }

    #[test]
    fn test_ordering_names() {
        assert_eq!("nrn".parse::<SectionOrdering>(), Ok(SectionOrdering::NrnV1));
        assert!("bfs".parse::<SectionOrdering>().is_err());
        assert_eq!(SectionOrdering::NrnV1.to_string(), "nrn (v1)");
    }
}
