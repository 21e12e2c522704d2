// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Edge Remapper.

Rewrites the afferent placement of every edge targeting one reduced node,
using that node's correspondence table. Only afferent columns are written;
efferent placement and every other attribute are left alone. A placement
the table cannot resolve is an integrity failure for the whole node.

Copyright 2025 Neuraville Inc.
Licensed under the Apache License, Version 2.0
*/

use snr_circuit::{placement, AttributeValue, CircuitResult, EdgePopulation, PlacementSchema};
use snr_morphology::SegmentIndex;
use tracing::error;

use crate::adapter::{CorrespondenceTable, SynapsePlacement};
use crate::error::{RemapError, RemapResult};

/// One edge targeting the node under reduction
#[derive(Debug, Clone, PartialEq)]
pub struct AfferentEdge {
    pub population: String,
    pub row: usize,
    /// Placement columns the edge population carries
    pub schema: PlacementSchema,
    /// Placement on the original cell
    pub placement: SynapsePlacement,
}

/// New placement values for one edge row
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRewrite {
    pub population: String,
    pub row: usize,
    pub values: Vec<(&'static str, AttributeValue)>,
}

impl EdgeRewrite {
    pub fn apply(&self, edges: &mut EdgePopulation) -> CircuitResult<()> {
        for (name, value) in &self.values {
            edges.set_attribute(self.row, name, value.clone())?;
        }
        Ok(())
    }

    pub fn value(&self, name: &str) -> Option<&AttributeValue> {
        self.values.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }
}

pub struct EdgeRemapper<'a> {
    table: &'a CorrespondenceTable,
    reduced: &'a SegmentIndex,
}

impl<'a> EdgeRemapper<'a> {
    pub fn new(table: &'a CorrespondenceTable, reduced: &'a SegmentIndex) -> Self {
        Self { table, reduced }
    }

    pub fn remap(&self, edges: &[AfferentEdge]) -> RemapResult<Vec<EdgeRewrite>> {
        edges.iter().map(|edge| self.remap_one(edge)).collect()
    }

    fn remap_one(&self, edge: &AfferentEdge) -> RemapResult<EdgeRewrite> {
        let original = edge.placement;
        let Some(located) = self.table.locate(&original) else {
            error!(
                target: "snr-reduction",
                "[REMAP] {} row {}: no correspondence for segment {}",
                edge.population,
                edge.row,
                original.address()
            );
            return Err(RemapError::MissingCorrespondence {
                population: edge.population.clone(),
                row: edge.row,
                section: original.section,
                segment: original.segment,
            });
        };
        let Some(section) = self
            .reduced
            .section(located.section)
            .filter(|s| located.segment < s.nseg)
        else {
            error!(
                target: "snr-reduction",
                "[REMAP] {} row {}: {} is not a segment of the reduced cell",
                edge.population,
                edge.row,
                located.address()
            );
            return Err(RemapError::OutsideReducedCell {
                population: edge.population.clone(),
                row: edge.row,
                section: located.section,
                segment: located.segment,
            });
        };

        let mut values = vec![(
            placement::AFFERENT_SECTION_ID,
            AttributeValue::Int(i64::from(located.section)),
        )];
        let write_pos = match edge.schema {
            PlacementSchema::Full { has_section_pos } => {
                values.push((
                    placement::AFFERENT_SEGMENT_ID,
                    AttributeValue::Int(i64::from(located.segment)),
                ));
                values.push((
                    placement::AFFERENT_SEGMENT_OFFSET,
                    AttributeValue::Float(located.offset),
                ));
                has_section_pos
            }
            _ => true,
        };
        if write_pos {
            values.push((
                placement::AFFERENT_SECTION_POS,
                AttributeValue::Float(located.section_pos(section.nseg)),
            ));
        }

        Ok(EdgeRewrite {
            population: edge.population.clone(),
            row: edge.row,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{MergePolicy, SegmentImage};
    use snr_morphology::{
        Cell, Point, Section, SectionListParams, SectionOrdering, SectionProperties, SectionType,
        SegmentAddress,
    };

    fn reduced_index() -> SegmentIndex {
        let props = SectionProperties::from(&SectionListParams::default());
        let cell = Cell::new(
            "reduced",
            vec![
                Section {
                    name: "soma[0]".to_string(),
                    section_type: SectionType::Soma,
                    parent: None,
                    points: vec![Point::new(0.0, 0.0, 0.0, 10.0), Point::new(10.0, 0.0, 0.0, 10.0)],
                    nseg: 1,
                    properties: props.clone(),
                },
                Section {
                    name: "dend[0]".to_string(),
                    section_type: SectionType::Basal,
                    parent: Some(0),
                    points: vec![Point::new(10.0, 0.0, 0.0, 2.0), Point::new(110.0, 0.0, 0.0, 2.0)],
                    nseg: 4,
                    properties: props,
                },
            ],
        )
        .expect("valid cell");
        SegmentIndex::build(&cell, SectionOrdering::NrnV1).expect("index")
    }

    fn table() -> CorrespondenceTable {
        let mut table = CorrespondenceTable::new(SectionOrdering::NrnV1, MergePolicy::Proportional);
        table.insert(SegmentAddress::new(0, 0), SegmentImage::Unchanged);
        table.insert(
            SegmentAddress::new(1, 0),
            SegmentImage::Span {
                section: 1,
                nseg: 4,
                start: 0.5,
                end: 1.0,
            },
        );
        table
    }

    fn edge(schema: PlacementSchema, section: u32, segment: u32, offset: f64) -> AfferentEdge {
        AfferentEdge {
            population: "input".to_string(),
            row: 7,
            schema,
            placement: SynapsePlacement::new(section, segment, offset),
        }
    }

    #[test]
    fn test_full_schema() {
        let (table, index) = (table(), reduced_index());
        let remapper = EdgeRemapper::new(&table, &index);
        let rewrites = remapper
            .remap(&[edge(PlacementSchema::Full { has_section_pos: false }, 1, 0, 0.5)])
            .expect("remaps");
        let rewrite = &rewrites[0];
        assert_eq!(rewrite.row, 7);
        assert_eq!(rewrite.values.len(), 3);
        assert_eq!(
            rewrite.value(placement::AFFERENT_SECTION_ID),
            Some(&AttributeValue::Int(1))
        );
        // 0.75 along a 4-segment section: segment 3, offset 0
        assert_eq!(
            rewrite.value(placement::AFFERENT_SEGMENT_ID),
            Some(&AttributeValue::Int(3))
        );
        assert_eq!(
            rewrite.value(placement::AFFERENT_SEGMENT_OFFSET),
            Some(&AttributeValue::Float(0.0))
        );
        assert!(rewrite.value(placement::AFFERENT_SECTION_POS).is_none());
    }

    #[test]
    fn test_legacy_schema_writes_section_pos() {
        let (table, index) = (table(), reduced_index());
        let remapper = EdgeRemapper::new(&table, &index);
        let rewrites = remapper
            .remap(&[edge(PlacementSchema::Legacy, 0, 0, 0.4)])
            .expect("remaps");
        assert_eq!(rewrites[0].values.len(), 2);
        assert_eq!(
            rewrites[0].value(placement::AFFERENT_SECTION_POS),
            Some(&AttributeValue::Float(0.4))
        );
        assert!(rewrites[0].values.iter().all(|(n, _)| n.starts_with("afferent_")));
    }

    #[test]
    fn test_missing_correspondence_fails() {
        let (table, index) = (table(), reduced_index());
        let remapper = EdgeRemapper::new(&table, &index);
        let result = remapper.remap(&[
            edge(PlacementSchema::Legacy, 0, 0, 0.4),
            edge(PlacementSchema::Legacy, 3, 2, 0.1),
        ]);
        assert!(matches!(
            result,
            Err(RemapError::MissingCorrespondence { section: 3, segment: 2, .. })
        ));
    }

    #[test]
    fn test_target_outside_reduced_cell() {
        let mut table = table();
        table.insert(
            SegmentAddress::new(2, 0),
            SegmentImage::Span {
                section: 5,
                nseg: 1,
                start: 0.0,
                end: 1.0,
            },
        );
        let index = reduced_index();
        let remapper = EdgeRemapper::new(&table, &index);
        assert!(matches!(
            remapper.remap(&[edge(PlacementSchema::Legacy, 2, 0, 0.5)]),
            Err(RemapError::OutsideReducedCell { section: 5, .. })
        ));
    }
}
